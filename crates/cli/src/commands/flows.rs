use clap::Args;
use serde::Serialize;

use routeslip_core::config::LoadOptions;
use routeslip_core::domain::ApproverId;
use routeslip_core::errors::ApprovalError;
use routeslip_db::SqlChainSource;

use crate::commands::{execute, CommandResult, Completed};
use crate::runtime::Session;

#[derive(Debug, Args)]
pub struct FlowsArgs {
    #[arg(long, help = "Write the configured [flows] table into the database chain store")]
    pub sync: bool,
}

#[derive(Debug, Serialize)]
struct FlowSummary {
    document_type: String,
    chain: Vec<ApproverId>,
}

pub fn run(options: &LoadOptions, args: FlowsArgs) -> CommandResult {
    execute("flows", options, |session| flows(session, args))
}

async fn flows(
    session: Session,
    args: FlowsArgs,
) -> Result<Completed<Vec<FlowSummary>>, ApprovalError> {
    if args.sync {
        let written = SqlChainSource::new(session.pool.clone())
            .replace_all(&session.config.flows)
            .await
            .map_err(|error| ApprovalError::GatewayFailure(error.to_string()))?;
        return Ok(Completed::new(
            format!("synced {written} chain(s) into the database"),
            Vec::new(),
        ));
    }

    let chains = session.service.chains();
    let mut summaries = Vec::new();
    for document_type in chains.document_types().await? {
        let chain = chains.resolve(&document_type).await?;
        summaries.push(FlowSummary { document_type: document_type.0, chain });
    }

    Ok(Completed::new(format!("{} document type(s) configured", summaries.len()), summaries))
}
