use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink};
use crate::chain::{ChainResolver, ChainSource};
use crate::config::WorkflowConfig;
use crate::derivation::{derive, DerivedState, DerivedStatus, Viewer};
use crate::domain::{
    ApproverId, Document, DocumentId, DocumentTypeKey, LogEntry, StudentId,
};
use crate::errors::ApprovalError;
use crate::flows::{
    check_resubmit, ApproverAction, FlowContext, FlowEngine, FlowEvent, PlannedTransition,
    SequentialFlow, TransitionOutcome,
};
use crate::gateway::{DocumentGateway, DocumentQuery, GatewayError};
use crate::round_log::{Clock, RoundLog, SystemClock};
use crate::views::{
    annotate_history, build_inbox, build_overview, ApproverLabels, HistoryLine, InboxFilter,
    InboxItem, OverviewFilter, OverviewItem,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for one operation, the first one included.
    pub max_attempts: u32,
    /// First read backoff; doubles on each further failure.
    pub read_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, read_backoff: Duration::from_millis(50) }
    }
}

impl From<&WorkflowConfig> for RetryPolicy {
    fn from(config: &WorkflowConfig) -> Self {
        Self { max_attempts: config.max_attempts.max(1), read_backoff: config.read_backoff() }
    }
}

enum CommitResult {
    Committed(TransitionOutcome),
    Retry,
}

/// Entry point for every approval operation.
///
/// Each mutation is read, validate, plan, then a single version-guarded
/// commit. A lost race re-runs the whole cycle from a fresh read, so a stale
/// decision can never advance the chain twice.
pub struct ApprovalService<G, S> {
    gateway: G,
    chains: ChainResolver<S>,
    engine: FlowEngine<SequentialFlow>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    labels: ApproverLabels,
    retry: RetryPolicy,
}

impl<G, S> ApprovalService<G, S>
where
    G: DocumentGateway,
    S: ChainSource,
{
    pub fn new(gateway: G, chain_source: S) -> Self {
        Self {
            gateway,
            chains: ChainResolver::new(chain_source),
            engine: FlowEngine::default(),
            clock: Arc::new(SystemClock),
            audit: Arc::new(TracingAuditSink),
            labels: ApproverLabels::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_labels(mut self, labels: ApproverLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy { max_attempts: retry.max_attempts.max(1), ..retry };
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn chains(&self) -> &ChainResolver<S> {
        &self.chains
    }

    pub fn labels(&self) -> &ApproverLabels {
        &self.labels
    }

    pub async fn submit(
        &self,
        student_id: &StudentId,
        document_type: &DocumentTypeKey,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let audit = AuditContext::new(None, new_correlation_id(), student_id.to_string());
        let query = DocumentQuery::StudentAndType(student_id.clone(), document_type.clone());
        let mut attempt = 0;

        loop {
            attempt += 1;
            let existing = self
                .read_with_backoff("query", || self.gateway.query(&query))
                .await?
                .into_iter()
                .next();

            let chain = match existing {
                Some(_) => Vec::new(),
                None => self
                    .resolve_chain(document_type)
                    .await
                    .map_err(|error| self.rejected(&audit, AuditCategory::Submission, error))?,
            };

            let event = FlowEvent::Submit {
                document_id: DocumentId::generate(),
                student_id: student_id.clone(),
                document_type: document_type.clone(),
                chain,
            };
            let planned = self.plan(existing.as_ref(), &event, &audit)?;
            if let CommitResult::Committed(outcome) = self.commit(planned, attempt, &audit).await? {
                return Ok(outcome);
            }
        }
    }

    pub async fn resubmit(
        &self,
        student_id: &StudentId,
        document_id: &DocumentId,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let audit = AuditContext::new(
            Some(document_id.clone()),
            new_correlation_id(),
            student_id.to_string(),
        );
        let mut attempt = 0;

        loop {
            attempt += 1;
            let document = self.read_document(document_id).await?;
            self.observe(&document, &audit);

            check_resubmit(&document, student_id)
                .map_err(|error| self.rejected(&audit, AuditCategory::Submission, error))?;
            let chain = self
                .resolve_chain(&document.document_type)
                .await
                .map_err(|error| self.rejected(&audit, AuditCategory::Submission, error))?;

            let event = FlowEvent::Resubmit {
                document_id: document_id.clone(),
                student_id: student_id.clone(),
                chain,
            };
            let planned = self.plan(Some(&document), &event, &audit)?;
            if let CommitResult::Committed(outcome) = self.commit(planned, attempt, &audit).await? {
                return Ok(outcome);
            }
        }
    }

    pub async fn act(
        &self,
        approver: &ApproverId,
        document_id: &DocumentId,
        action: ApproverAction,
        comment: &str,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let audit = AuditContext::new(
            Some(document_id.clone()),
            new_correlation_id(),
            approver.to_string(),
        );
        let mut attempt = 0;

        loop {
            attempt += 1;
            let document = self.read_document(document_id).await?;
            self.observe(&document, &audit);

            let event = FlowEvent::Act {
                document_id: document_id.clone(),
                approver: approver.clone(),
                action,
                comment: comment.to_string(),
            };
            let planned = self.plan(Some(&document), &event, &audit)?;
            if let CommitResult::Committed(outcome) = self.commit(planned, attempt, &audit).await? {
                return Ok(outcome);
            }
        }
    }

    pub async fn derived_status(
        &self,
        document_id: &DocumentId,
        viewer: &Viewer,
    ) -> Result<DerivedStatus, ApprovalError> {
        let document = self.read_document(document_id).await?;
        let audit = AuditContext::new(
            Some(document_id.clone()),
            new_correlation_id(),
            viewer_name(viewer),
        );
        let derived = self.observe(&document, &audit);
        Ok(DerivedStatus::for_viewer(&document, &derived, viewer))
    }

    /// Full action log across every round, in display order.
    pub async fn history(&self, document_id: &DocumentId) -> Result<Vec<LogEntry>, ApprovalError> {
        let document = self.read_document(document_id).await?;
        Ok(RoundLog::of(&document).history().cloned().collect())
    }

    pub async fn history_lines(
        &self,
        document_id: &DocumentId,
    ) -> Result<Vec<HistoryLine>, ApprovalError> {
        let document = self.read_document(document_id).await?;
        Ok(annotate_history(&document, &self.labels))
    }

    pub async fn approver_inbox(
        &self,
        approver: &ApproverId,
        filter: &InboxFilter,
    ) -> Result<Vec<InboxItem>, ApprovalError> {
        let query = DocumentQuery::ChainMember(approver.clone());
        let documents = self.read_with_backoff("query", || self.gateway.query(&query)).await?;
        Ok(build_inbox(&documents, approver, filter))
    }

    pub async fn student_overview(
        &self,
        student_id: &StudentId,
        filter: &OverviewFilter,
    ) -> Result<Vec<OverviewItem>, ApprovalError> {
        let document_types = self
            .read_with_backoff("document_types", || self.chains.source().document_types())
            .await?;
        let query = DocumentQuery::Student(student_id.clone());
        let documents = self.read_with_backoff("query", || self.gateway.query(&query)).await?;
        Ok(build_overview(&document_types, &documents, &self.labels, filter))
    }

    fn plan(
        &self,
        current: Option<&Document>,
        event: &FlowEvent,
        audit: &AuditContext,
    ) -> Result<PlannedTransition, ApprovalError> {
        let context = FlowContext::at(self.clock.now());
        self.engine.apply_with_audit(current, event, &context, self.audit.as_ref(), audit).map_err(
            |error| {
                info!(
                    event_name = "approval.request_rejected",
                    correlation_id = %audit.correlation_id,
                    document_id = %event.document_id(),
                    event = event.name(),
                    error_class = error.error_class(),
                    "approval request rejected"
                );
                error
            },
        )
    }

    async fn commit(
        &self,
        planned: PlannedTransition,
        attempt: u32,
        audit: &AuditContext,
    ) -> Result<CommitResult, ApprovalError> {
        let PlannedTransition { write, outcome } = planned;
        let audit = audit.clone().with_document(outcome.document_id.clone());

        match self.gateway.commit(write).await {
            Ok(()) => {
                info!(
                    event_name = "approval.transition_committed",
                    correlation_id = %audit.correlation_id,
                    document_id = %outcome.document_id,
                    kind = outcome.entry.kind.as_str(),
                    from = outcome.from.as_str(),
                    to = outcome.to.as_str(),
                    to_index = outcome.to_index,
                    attempt,
                    "document transition committed"
                );
                self.audit.emit(
                    audit
                        .event(
                            "document.committed",
                            AuditCategory::Persistence,
                            AuditOutcome::Success,
                        )
                        .with_metadata("kind", outcome.entry.kind.as_str())
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("attempt", attempt.to_string()),
                );
                Ok(CommitResult::Committed(outcome))
            }
            Err(GatewayError::Conflict { expected_version, .. })
                if attempt < self.retry.max_attempts =>
            {
                warn!(
                    event_name = "approval.commit_conflict",
                    correlation_id = %audit.correlation_id,
                    document_id = %outcome.document_id,
                    expected_version,
                    attempt,
                    "document changed before commit; retrying from a fresh read"
                );
                Ok(CommitResult::Retry)
            }
            Err(GatewayError::Conflict { .. }) => Err(self.failed(
                &audit,
                ApprovalError::ConcurrentModification {
                    document_id: outcome.document_id.clone(),
                    attempts: attempt,
                },
            )),
            Err(GatewayError::NotFound(document_id)) => {
                Err(self.failed(&audit, ApprovalError::DocumentNotFound(document_id)))
            }
            Err(GatewayError::Failure(message)) => {
                error!(
                    event_name = "approval.commit_failed",
                    correlation_id = %audit.correlation_id,
                    document_id = %outcome.document_id,
                    error = %message,
                    "document write failed"
                );
                Err(self.failed(&audit, ApprovalError::GatewayFailure(message)))
            }
        }
    }

    async fn read_document(&self, document_id: &DocumentId) -> Result<Document, ApprovalError> {
        self.read_with_backoff("get", || self.gateway.get(document_id))
            .await?
            .ok_or_else(|| ApprovalError::DocumentNotFound(document_id.clone()))
    }

    async fn resolve_chain(
        &self,
        document_type: &DocumentTypeKey,
    ) -> Result<Vec<ApproverId>, ApprovalError> {
        let raw = self
            .read_with_backoff("chain_for", || self.chains.source().chain_for(document_type))
            .await?;
        self.chains.accept(document_type, raw)
    }

    async fn read_with_backoff<T, F, Fut>(
        &self,
        operation: &'static str,
        mut read: F,
    ) -> Result<T, ApprovalError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        let mut backoff = self.retry.read_backoff;

        loop {
            attempt += 1;
            match read().await {
                Ok(value) => return Ok(value),
                Err(GatewayError::NotFound(document_id)) => {
                    return Err(ApprovalError::DocumentNotFound(document_id))
                }
                Err(error) if attempt < self.retry.max_attempts => {
                    warn!(
                        event_name = "approval.read_retry",
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "gateway read failed; backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(error) => return Err(ApprovalError::GatewayFailure(error.to_string())),
            }
        }
    }

    fn observe(&self, document: &Document, audit: &AuditContext) -> DerivedState {
        let derived = derive(document);
        for inconsistency in &derived.inconsistencies {
            self.audit.emit(
                audit
                    .event(
                        "derivation.state_inconsistent",
                        AuditCategory::Derivation,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("field", inconsistency.field.clone())
                    .with_metadata("stored", inconsistency.stored.clone())
                    .with_metadata("derived", inconsistency.derived.clone()),
            );
        }
        derived
    }

    fn rejected(
        &self,
        audit: &AuditContext,
        category: AuditCategory,
        error: ApprovalError,
    ) -> ApprovalError {
        self.audit.emit(
            audit
                .event("approval.request_rejected", category, AuditOutcome::Rejected)
                .with_metadata("error_class", error.error_class())
                .with_metadata("error", error.to_string()),
        );
        error
    }

    fn failed(&self, audit: &AuditContext, error: ApprovalError) -> ApprovalError {
        self.audit.emit(
            audit
                .event("document.commit_failed", AuditCategory::Persistence, AuditOutcome::Failed)
                .with_metadata("error_class", error.error_class())
                .with_metadata("error", error.to_string()),
        );
        error
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn viewer_name(viewer: &Viewer) -> String {
    match viewer {
        Viewer::Student(student_id) => student_id.to_string(),
        Viewer::Approver(approver) => approver.to_string(),
    }
}
