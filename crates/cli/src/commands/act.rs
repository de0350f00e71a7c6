use clap::Args;

use routeslip_core::config::LoadOptions;
use routeslip_core::domain::{ApproverId, DocumentId};
use routeslip_core::errors::ApprovalError;
use routeslip_core::flows::{ApproverAction, TransitionOutcome};

use crate::commands::{execute, CommandResult, Completed};
use crate::runtime::Session;

#[derive(Debug, Args)]
pub struct ActArgs {
    #[arg(long, help = "Acting approver identity")]
    pub approver: String,
    #[arg(long, help = "Target document id")]
    pub document: String,
    #[arg(long, value_parser = parse_action, help = "approve | reject | comment")]
    pub action: ApproverAction,
    #[arg(long, default_value = "", help = "Remark recorded with the action")]
    pub comment: String,
}

fn parse_action(value: &str) -> Result<ApproverAction, String> {
    ApproverAction::parse(value)
        .ok_or_else(|| format!("unknown action `{value}` (expected approve|reject|comment)"))
}

pub fn run(options: &LoadOptions, args: ActArgs) -> CommandResult {
    execute("act", options, |session| act(session, args))
}

async fn act(
    session: Session,
    args: ActArgs,
) -> Result<Completed<TransitionOutcome>, ApprovalError> {
    let approver = ApproverId::new(&args.approver);
    let document_id = DocumentId(args.document);

    let outcome =
        session.service.act(&approver, &document_id, args.action, &args.comment).await?;
    Ok(Completed::new(
        format!("{approver} recorded {} on document {document_id}", args.action),
        outcome,
    ))
}
