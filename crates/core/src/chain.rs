use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;

use crate::domain::{ApproverId, DocumentTypeKey};
use crate::errors::ApprovalError;
use crate::gateway::GatewayError;

/// Backing store for workflow configuration: which approvers, in which order,
/// must sign off on a document type.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn chain_for(
        &self,
        document_type: &DocumentTypeKey,
    ) -> Result<Option<Vec<String>>, GatewayError>;

    async fn document_types(&self) -> Result<Vec<DocumentTypeKey>, GatewayError>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryChainSource {
    chains: BTreeMap<String, Vec<String>>,
}

impl InMemoryChainSource {
    pub fn with_chains<I, K, V>(chains: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            chains: chains
                .into_iter()
                .map(|(key, chain)| (key.into(), chain.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    pub fn set_chain(&mut self, document_type: impl Into<String>, chain: Vec<String>) {
        self.chains.insert(document_type.into(), chain);
    }
}

#[async_trait]
impl ChainSource for InMemoryChainSource {
    async fn chain_for(
        &self,
        document_type: &DocumentTypeKey,
    ) -> Result<Option<Vec<String>>, GatewayError> {
        Ok(self.chains.get(&document_type.0).cloned())
    }

    async fn document_types(&self) -> Result<Vec<DocumentTypeKey>, GatewayError> {
        Ok(self.chains.keys().cloned().map(DocumentTypeKey).collect())
    }
}

/// Chains declared in the `[flows]` table of the configuration file.
#[derive(Clone, Debug, Default)]
pub struct ConfiguredChainSource {
    inner: InMemoryChainSource,
}

impl ConfiguredChainSource {
    pub fn new(flows: &BTreeMap<String, Vec<String>>) -> Self {
        Self { inner: InMemoryChainSource::with_chains(flows.clone()) }
    }
}

#[async_trait]
impl ChainSource for ConfiguredChainSource {
    async fn chain_for(
        &self,
        document_type: &DocumentTypeKey,
    ) -> Result<Option<Vec<String>>, GatewayError> {
        self.inner.chain_for(document_type).await
    }

    async fn document_types(&self) -> Result<Vec<DocumentTypeKey>, GatewayError> {
        self.inner.document_types().await
    }
}

#[derive(Clone, Debug)]
pub struct ChainResolver<S> {
    source: S,
}

impl<S> ChainResolver<S>
where
    S: ChainSource,
{
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Resolves and normalizes the approver chain for a document type.
    pub async fn resolve(
        &self,
        document_type: &DocumentTypeKey,
    ) -> Result<Vec<ApproverId>, ApprovalError> {
        let raw = self
            .source
            .chain_for(document_type)
            .await
            .map_err(|error| ApprovalError::GatewayFailure(error.to_string()))?;

        self.accept(document_type, raw)
    }

    /// Validates a chain already read from the source. A missing chain is
    /// `ConfigNotFound`; an empty or duplicated one is `InvalidChain`.
    pub fn accept(
        &self,
        document_type: &DocumentTypeKey,
        raw: Option<Vec<String>>,
    ) -> Result<Vec<ApproverId>, ApprovalError> {
        let raw = raw
            .ok_or_else(|| ApprovalError::ConfigNotFound { document_type: document_type.clone() })?;
        normalize_chain(document_type, raw)
    }

    pub async fn document_types(&self) -> Result<Vec<DocumentTypeKey>, ApprovalError> {
        self.source
            .document_types()
            .await
            .map_err(|error| ApprovalError::GatewayFailure(error.to_string()))
    }
}

fn normalize_chain(
    document_type: &DocumentTypeKey,
    raw: Vec<String>,
) -> Result<Vec<ApproverId>, ApprovalError> {
    let chain: Vec<ApproverId> = raw
        .iter()
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| ApproverId::new(entry))
        .collect();

    if chain.is_empty() {
        return Err(ApprovalError::InvalidChain {
            document_type: document_type.clone(),
            reason: "chain has no approvers".to_string(),
        });
    }

    let mut seen = HashSet::new();
    if let Some(duplicate) = chain.iter().find(|approver| !seen.insert(approver.as_str())) {
        return Err(ApprovalError::InvalidChain {
            document_type: document_type.clone(),
            reason: format!("approver `{duplicate}` appears more than once"),
        });
    }

    Ok(chain)
}
