use clap::Args;

use routeslip_core::config::LoadOptions;
use routeslip_core::domain::{ApproverId, ApproverStatus, OverallStatus, StudentId};
use routeslip_core::errors::ApprovalError;
use routeslip_core::views::{InboxFilter, InboxItem, OverviewFilter, OverviewItem};

use crate::commands::{execute, CommandResult, Completed};
use crate::runtime::Session;

#[derive(Debug, Args)]
pub struct InboxArgs {
    #[arg(long, help = "Approver identity")]
    pub approver: String,
    #[arg(long, value_parser = parse_approver_status, help = "pending | approved | rejected")]
    pub status: Option<ApproverStatus>,
    #[arg(long, help = "Case-insensitive match on the document type")]
    pub search: Option<String>,
}

#[derive(Debug, Args)]
pub struct OverviewArgs {
    #[arg(long, help = "Student id")]
    pub student: String,
    #[arg(
        long,
        value_parser = parse_overall_status,
        help = "not_submitted | pending | approved | rejected"
    )]
    pub status: Option<OverallStatus>,
    #[arg(long, help = "Case-insensitive match on the document type")]
    pub search: Option<String>,
}

fn parse_approver_status(value: &str) -> Result<ApproverStatus, String> {
    ApproverStatus::parse(value).ok_or_else(|| format!("unknown status `{value}`"))
}

fn parse_overall_status(value: &str) -> Result<OverallStatus, String> {
    OverallStatus::parse(value).ok_or_else(|| format!("unknown status `{value}`"))
}

pub fn run(options: &LoadOptions, args: InboxArgs) -> CommandResult {
    execute("inbox", options, |session| inbox(session, args))
}

pub fn run_overview(options: &LoadOptions, args: OverviewArgs) -> CommandResult {
    execute("overview", options, |session| overview(session, args))
}

async fn inbox(
    session: Session,
    args: InboxArgs,
) -> Result<Completed<Vec<InboxItem>>, ApprovalError> {
    let approver = ApproverId::new(&args.approver);
    let filter = InboxFilter { status: args.status, search: args.search };

    let items = session.service.approver_inbox(&approver, &filter).await?;
    let actionable = items.iter().filter(|item| item.can_act).count();
    Ok(Completed::new(
        format!("{} document(s) for {approver}, {actionable} awaiting action", items.len()),
        items,
    ))
}

async fn overview(
    session: Session,
    args: OverviewArgs,
) -> Result<Completed<Vec<OverviewItem>>, ApprovalError> {
    let student = StudentId(args.student);
    let filter = OverviewFilter { status: args.status, search: args.search };

    let items = session.service.student_overview(&student, &filter).await?;
    Ok(Completed::new(format!("{} document type(s) for {student}", items.len()), items))
}
