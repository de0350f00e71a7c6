use chrono::{DateTime, Utc};

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::derivation::{derive, DerivedState};
use crate::domain::{
    Actor, ApproverId, ApproverStatus, Document, DocumentId, DocumentTypeKey, LogKind,
    OverallStatus, StudentId,
};
use crate::errors::ApprovalError;
use crate::flows::states::{
    ApproverAction, FlowContext, FlowEvent, PlannedTransition, TransitionOutcome,
};
use crate::gateway::{DocumentWrite, FieldUpdate};
use crate::round_log::next_entry;

/// Display format of the system remark written when a round opens.
pub const REMARK_TIME_FORMAT: &str = "%I:%M %p, %d %b %Y";

pub trait FlowDefinition {
    fn name(&self) -> &'static str;

    /// Validates `event` against `current` and plans the resulting write.
    /// Never mutates anything; the caller commits the planned write.
    fn plan(
        &self,
        current: Option<&Document>,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<PlannedTransition, ApprovalError>;
}

/// Strictly sequential sign-off: one approver at a time, in chain order,
/// any rejection ends the round.
#[derive(Clone, Debug, Default)]
pub struct SequentialFlow;

impl FlowDefinition for SequentialFlow {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn plan(
        &self,
        current: Option<&Document>,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<PlannedTransition, ApprovalError> {
        match (current, event) {
            (existing, FlowEvent::Submit { document_id, student_id, document_type, chain }) => {
                plan_submit(existing, document_id, student_id, document_type, chain, context)
            }
            (Some(document), FlowEvent::Resubmit { student_id, chain, .. }) => {
                plan_resubmit(document, student_id, chain, context)
            }
            (Some(document), FlowEvent::Act { approver, action, comment, .. }) => {
                plan_act(document, approver, *action, comment, context)
            }
            (None, event) => Err(ApprovalError::DocumentNotFound(event.document_id().clone())),
        }
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_name(&self) -> &'static str {
        self.flow.name()
    }

    pub fn apply(
        &self,
        current: Option<&Document>,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<PlannedTransition, ApprovalError> {
        self.flow.plan(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: Option<&Document>,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<PlannedTransition, ApprovalError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        let category = match event {
            FlowEvent::Submit { .. } | FlowEvent::Resubmit { .. } => AuditCategory::Submission,
            FlowEvent::Act { .. } => AuditCategory::Approval,
        };
        match &result {
            Ok(planned) => {
                sink.emit(
                    audit
                        .event("flow.transition_planned", category, AuditOutcome::Success)
                        .with_metadata("event", event.name())
                        .with_metadata("from", planned.outcome.from.as_str())
                        .with_metadata("to", planned.outcome.to.as_str())
                        .with_metadata("to_index", planned.outcome.to_index.to_string()),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("flow.transition_rejected", category, AuditOutcome::Rejected)
                        .with_metadata("event", event.name())
                        .with_metadata("error_class", error.error_class())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<SequentialFlow> {
    fn default() -> Self {
        Self::new(SequentialFlow)
    }
}

pub fn round_remark(verb: &str, at: DateTime<Utc>) -> String {
    format!("{verb} on {}", at.format(REMARK_TIME_FORMAT))
}

fn ensure_chain(
    document_type: &DocumentTypeKey,
    chain: &[ApproverId],
) -> Result<(), ApprovalError> {
    if chain.is_empty() {
        return Err(ApprovalError::InvalidChain {
            document_type: document_type.clone(),
            reason: "chain has no approvers".to_string(),
        });
    }
    Ok(())
}

fn plan_submit(
    existing: Option<&Document>,
    document_id: &DocumentId,
    student_id: &StudentId,
    document_type: &DocumentTypeKey,
    chain: &[ApproverId],
    context: &FlowContext,
) -> Result<PlannedTransition, ApprovalError> {
    if let Some(existing) = existing {
        return Err(ApprovalError::AlreadyPending {
            document_id: existing.id.clone(),
            status: derive(existing).overall_status,
        });
    }
    ensure_chain(document_type, chain)?;

    let mut entry = next_entry(None, context.now, Actor::System, LogKind::Submitted, "");
    entry.comment = round_remark("Submitted", entry.timestamp);
    let opened_at = entry.timestamp;

    let document = Document {
        id: document_id.clone(),
        student_id: student_id.clone(),
        document_type: document_type.clone(),
        chain: chain.to_vec(),
        current_index: 0,
        overall_status: OverallStatus::Pending,
        approver_statuses: chain
            .iter()
            .map(|member| (member.clone(), ApproverStatus::Pending))
            .collect(),
        round_start_time: opened_at,
        log: vec![entry.clone()],
        version: 1,
        created_at: opened_at,
        updated_at: opened_at,
    };

    Ok(PlannedTransition {
        write: DocumentWrite::Create(document),
        outcome: TransitionOutcome {
            document_id: document_id.clone(),
            from: OverallStatus::NotSubmitted,
            to: OverallStatus::Pending,
            from_index: 0,
            to_index: 0,
            entry,
        },
    })
}

/// Ownership and status preconditions of a resubmission, checked before the
/// caller spends a chain lookup on it.
pub fn check_resubmit(
    document: &Document,
    student_id: &StudentId,
) -> Result<DerivedState, ApprovalError> {
    if &document.student_id != student_id {
        return Err(ApprovalError::NotDocumentOwner {
            document_id: document.id.clone(),
            student_id: student_id.clone(),
        });
    }
    let derived = derive(document);
    if derived.overall_status != OverallStatus::Rejected {
        return Err(ApprovalError::NotRejected {
            document_id: document.id.clone(),
            status: derived.overall_status,
        });
    }
    Ok(derived)
}

fn plan_resubmit(
    document: &Document,
    student_id: &StudentId,
    chain: &[ApproverId],
    context: &FlowContext,
) -> Result<PlannedTransition, ApprovalError> {
    let derived = check_resubmit(document, student_id)?;
    ensure_chain(&document.document_type, chain)?;

    let mut entry =
        next_entry(Some(document), context.now, Actor::System, LogKind::Resubmitted, "");
    entry.comment = round_remark("Resubmitted", entry.timestamp);
    let opened_at = entry.timestamp;

    Ok(PlannedTransition {
        write: DocumentWrite::Update {
            document_id: document.id.clone(),
            expected_version: document.version,
            updates: vec![
                FieldUpdate::Chain(chain.to_vec()),
                FieldUpdate::CurrentIndex(0),
                FieldUpdate::OverallStatus(OverallStatus::Pending),
                FieldUpdate::ResetApproverStatuses(chain.to_vec()),
                FieldUpdate::RoundStartTime(opened_at),
                FieldUpdate::UpdatedAt(opened_at),
            ],
            append: entry.clone(),
        },
        outcome: TransitionOutcome {
            document_id: document.id.clone(),
            from: derived.overall_status,
            to: OverallStatus::Pending,
            from_index: derived.current_index,
            to_index: 0,
            entry,
        },
    })
}

fn plan_act(
    document: &Document,
    approver: &ApproverId,
    action: ApproverAction,
    comment: &str,
    context: &FlowContext,
) -> Result<PlannedTransition, ApprovalError> {
    let derived = derive(document);
    let comment = comment.trim();

    let (to, to_index) = match action {
        ApproverAction::Comment => {
            if comment.is_empty() {
                return Err(ApprovalError::EmptyComment);
            }
            if !document.is_member(approver) {
                return Err(ApprovalError::NotChainMember {
                    document_id: document.id.clone(),
                    approver: approver.clone(),
                });
            }
            (derived.overall_status, derived.current_index)
        }
        ApproverAction::Approve | ApproverAction::Reject => {
            check_decision_turn(document, &derived, approver)?;
            let index = derived.current_index;
            match action {
                ApproverAction::Approve if index + 1 < document.chain.len() => {
                    (OverallStatus::Pending, index + 1)
                }
                ApproverAction::Approve => (OverallStatus::Approved, index),
                _ => (OverallStatus::Rejected, index),
            }
        }
    };

    let entry = next_entry(
        Some(document),
        context.now,
        Actor::Approver(approver.clone()),
        action.log_kind(),
        comment,
    );

    let mut updates = Vec::new();
    if let Some(decision) = action.log_kind().decision() {
        for state in &derived.approvers {
            let status = if &state.approver == approver { decision } else { state.status };
            updates.push(FieldUpdate::ApproverStatus { approver: state.approver.clone(), status });
        }
        updates.push(FieldUpdate::CurrentIndex(to_index));
        updates.push(FieldUpdate::OverallStatus(to));
    }
    updates.push(FieldUpdate::UpdatedAt(entry.timestamp));

    Ok(PlannedTransition {
        write: DocumentWrite::Update {
            document_id: document.id.clone(),
            expected_version: document.version,
            updates,
            append: entry.clone(),
        },
        outcome: TransitionOutcome {
            document_id: document.id.clone(),
            from: derived.overall_status,
            to,
            from_index: derived.current_index,
            to_index,
            entry,
        },
    })
}

fn check_decision_turn(
    document: &Document,
    derived: &DerivedState,
    approver: &ApproverId,
) -> Result<(), ApprovalError> {
    match derived.approver(approver) {
        Some(state) if state.has_acted => Err(ApprovalError::AlreadyActed {
            document_id: document.id.clone(),
            approver: approver.clone(),
            decision: state.status,
        }),
        _ if !derived.is_turn(approver) => Err(ApprovalError::NotCurrentApprover {
            document_id: document.id.clone(),
            approver: approver.clone(),
            current_approver: derived.current_approver.clone(),
        }),
        _ => Ok(()),
    }
}
