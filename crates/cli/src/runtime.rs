use async_trait::async_trait;
use thiserror::Error;

use routeslip_core::chain::{ChainSource, ConfiguredChainSource};
use routeslip_core::config::{AppConfig, ChainSourceKind};
use routeslip_core::domain::DocumentTypeKey;
use routeslip_core::gateway::GatewayError;
use routeslip_core::service::{ApprovalService, RetryPolicy};
use routeslip_core::views::ApproverLabels;
use routeslip_db::{connect_with_settings, migrations, DbPool, SqlChainSource, SqlDocumentGateway};

/// Chain source picked by `workflow.chain_source`.
#[derive(Clone)]
pub enum RuntimeChains {
    Configured(ConfiguredChainSource),
    Stored(SqlChainSource),
}

#[async_trait]
impl ChainSource for RuntimeChains {
    async fn chain_for(
        &self,
        document_type: &DocumentTypeKey,
    ) -> Result<Option<Vec<String>>, GatewayError> {
        match self {
            Self::Configured(source) => source.chain_for(document_type).await,
            Self::Stored(source) => source.chain_for(document_type).await,
        }
    }

    async fn document_types(&self) -> Result<Vec<DocumentTypeKey>, GatewayError> {
        match self {
            Self::Configured(source) => source.document_types().await,
            Self::Stored(source) => source.document_types().await,
        }
    }
}

pub type RuntimeService = ApprovalService<SqlDocumentGateway, RuntimeChains>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to `{url}`: {cause:#}")]
    Connect { url: String, cause: anyhow::Error },
    #[error("failed to apply pending migrations: {0:#}")]
    Migrate(anyhow::Error),
}

impl SessionError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "db_connectivity",
            Self::Migrate(_) => "migration",
        }
    }

    /// Same codes `migrate` uses: 4 for connectivity, 5 for migrations.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Connect { .. } => 4,
            Self::Migrate(_) => 5,
        }
    }
}

/// Everything a workflow command needs for one invocation.
pub struct Session {
    pub config: AppConfig,
    pub pool: DbPool,
    pub service: RuntimeService,
}

impl Session {
    pub async fn open(config: AppConfig) -> Result<Self, SessionError> {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| SessionError::Connect {
            url: config.database.url.clone(),
            cause: error.into(),
        })?;
        if let Err(error) = migrations::run_pending(&pool).await {
            pool.close().await;
            return Err(SessionError::Migrate(error.into()));
        }

        let chains = match config.workflow.chain_source {
            ChainSourceKind::Config => {
                RuntimeChains::Configured(ConfiguredChainSource::new(&config.flows))
            }
            ChainSourceKind::Database => RuntimeChains::Stored(SqlChainSource::new(pool.clone())),
        };

        let service = ApprovalService::new(SqlDocumentGateway::new(pool.clone()), chains)
            .with_labels(ApproverLabels::new(&config.labels))
            .with_retry_policy(RetryPolicy::from(&config.workflow));

        Ok(Self { config, pool, service })
    }
}
