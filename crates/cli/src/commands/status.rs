use clap::Args;

use routeslip_core::config::LoadOptions;
use routeslip_core::derivation::{DerivedStatus, Viewer};
use routeslip_core::domain::{ApproverId, DocumentId, StudentId};
use routeslip_core::errors::ApprovalError;
use routeslip_core::views::HistoryLine;

use crate::commands::{execute, CommandResult, Completed};
use crate::runtime::Session;

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long, help = "Document id")]
    pub document: String,
    #[arg(
        long,
        value_parser = parse_viewer,
        help = "Who is looking: student:<id> or approver:<identity>"
    )]
    pub viewer: Viewer,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(long, help = "Document id")]
    pub document: String,
}

pub(crate) fn parse_viewer(value: &str) -> Result<Viewer, String> {
    let (role, id) = value
        .split_once(':')
        .ok_or_else(|| format!("viewer `{value}` must look like student:<id> or approver:<id>"))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(format!("viewer `{value}` is missing an id"));
    }

    match role.trim().to_ascii_lowercase().as_str() {
        "student" => Ok(Viewer::Student(StudentId(id.to_string()))),
        "approver" => Ok(Viewer::Approver(ApproverId::new(id))),
        other => Err(format!("unknown viewer role `{other}` (expected student|approver)")),
    }
}

pub fn run(options: &LoadOptions, args: StatusArgs) -> CommandResult {
    execute("status", options, |session| status(session, args))
}

pub fn run_history(options: &LoadOptions, args: HistoryArgs) -> CommandResult {
    execute("history", options, |session| history(session, args))
}

async fn status(
    session: Session,
    args: StatusArgs,
) -> Result<Completed<DerivedStatus>, ApprovalError> {
    let document_id = DocumentId(args.document);

    let status = session.service.derived_status(&document_id, &args.viewer).await?;
    Ok(Completed::new(format!("{document_id}: {}", status.label), status))
}

async fn history(
    session: Session,
    args: HistoryArgs,
) -> Result<Completed<Vec<HistoryLine>>, ApprovalError> {
    let document_id = DocumentId(args.document);

    let lines = session.service.history_lines(&document_id).await?;
    Ok(Completed::new(format!("{} log entries for {document_id}", lines.len()), lines))
}
