use clap::Args;

use routeslip_core::config::LoadOptions;
use routeslip_core::domain::{DocumentId, DocumentTypeKey, StudentId};
use routeslip_core::errors::ApprovalError;
use routeslip_core::flows::TransitionOutcome;

use crate::commands::{execute, CommandResult, Completed};
use crate::runtime::Session;

#[derive(Debug, Args)]
pub struct SubmitArgs {
    #[arg(long, help = "Submitting student id")]
    pub student: String,
    #[arg(long = "type", help = "Document type key, as configured under [flows]")]
    pub document_type: String,
}

#[derive(Debug, Args)]
pub struct ResubmitArgs {
    #[arg(long, help = "Owning student id")]
    pub student: String,
    #[arg(long, help = "Rejected document id")]
    pub document: String,
}

pub fn run(options: &LoadOptions, args: SubmitArgs) -> CommandResult {
    execute("submit", options, |session| submit(session, args))
}

pub fn run_resubmit(options: &LoadOptions, args: ResubmitArgs) -> CommandResult {
    execute("resubmit", options, |session| resubmit(session, args))
}

async fn submit(
    session: Session,
    args: SubmitArgs,
) -> Result<Completed<TransitionOutcome>, ApprovalError> {
    let student = StudentId(args.student);
    let document_type = DocumentTypeKey(args.document_type);

    let outcome = session.service.submit(&student, &document_type).await?;
    Ok(Completed::new(
        format!("submitted {document_type} as document {}", outcome.document_id),
        outcome,
    ))
}

async fn resubmit(
    session: Session,
    args: ResubmitArgs,
) -> Result<Completed<TransitionOutcome>, ApprovalError> {
    let student = StudentId(args.student);
    let document_id = DocumentId(args.document);

    let outcome = session.service.resubmit(&student, &document_id).await?;
    Ok(Completed::new(format!("resubmitted document {document_id}"), outcome))
}
