//! Round-scoped read model.
//!
//! The stored status fields on a [`Document`] are a cache. The authoritative
//! state is a fold over the current round of the action log: every chain
//! member's latest approve/reject after `round_start_time`, walked in chain
//! order. Entries at or before the round boundary stay in history but never
//! count here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    ApproverId, ApproverStatus, Document, DocumentId, DocumentTypeKey, OverallStatus, StudentId,
};
use crate::round_log::RoundLog;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverRoundState {
    pub approver: ApproverId,
    pub position: usize,
    pub status: ApproverStatus,
    pub has_acted: bool,
    pub decided_at: Option<DateTime<Utc>>,
}

/// A stored field that disagrees with the value derived from the round log.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("document `{document_id}` stores {field} = `{stored}` but the round log derives `{derived}`")]
pub struct StateInconsistent {
    pub document_id: DocumentId,
    pub field: String,
    pub stored: String,
    pub derived: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedState {
    pub document_id: DocumentId,
    pub overall_status: OverallStatus,
    pub current_index: usize,
    pub current_approver: Option<ApproverId>,
    pub round: usize,
    pub round_start_time: DateTime<Utc>,
    pub approvers: Vec<ApproverRoundState>,
    pub inconsistencies: Vec<StateInconsistent>,
}

impl DerivedState {
    pub fn approver(&self, approver: &ApproverId) -> Option<&ApproverRoundState> {
        self.approvers.iter().find(|state| &state.approver == approver)
    }

    /// `None` when `approver` is not in the current chain.
    pub fn round_status(&self, approver: &ApproverId) -> Option<ApproverStatus> {
        self.approver(approver).map(|state| state.status)
    }

    pub fn has_acted(&self, approver: &ApproverId) -> bool {
        self.approver(approver).is_some_and(|state| state.has_acted)
    }

    pub fn is_turn(&self, approver: &ApproverId) -> bool {
        self.overall_status == OverallStatus::Pending
            && self.current_approver.as_ref() == Some(approver)
    }

    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty()
    }

    /// Dashboard label for an approver looking at this document.
    pub fn label_for(&self, viewer: &ApproverId) -> String {
        match self.approver(viewer) {
            Some(state) if state.has_acted => format!("{} (You)", state.status.label()),
            _ if self.is_turn(viewer) => "Pending (Your Turn)".to_string(),
            _ => self.overall_status.label().to_string(),
        }
    }
}

/// Who is asking for a derived status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Viewer {
    Student(StudentId),
    Approver(ApproverId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedStatus {
    pub document_id: DocumentId,
    pub document_type: DocumentTypeKey,
    pub overall_status: OverallStatus,
    pub current_index: usize,
    pub current_approver: Option<ApproverId>,
    pub round: usize,
    pub viewer_status: Option<ApproverStatus>,
    pub is_viewer_turn: bool,
    pub label: String,
    pub approvers: Vec<ApproverRoundState>,
    pub consistent: bool,
}

impl DerivedStatus {
    pub fn for_viewer(document: &Document, derived: &DerivedState, viewer: &Viewer) -> Self {
        let (viewer_status, is_viewer_turn, label) = match viewer {
            Viewer::Approver(approver) => (
                derived.round_status(approver),
                derived.is_turn(approver),
                derived.label_for(approver),
            ),
            Viewer::Student(_) => (None, false, derived.overall_status.label().to_string()),
        };

        Self {
            document_id: document.id.clone(),
            document_type: document.document_type.clone(),
            overall_status: derived.overall_status,
            current_index: derived.current_index,
            current_approver: derived.current_approver.clone(),
            round: derived.round,
            viewer_status,
            is_viewer_turn,
            label,
            approvers: derived.approvers.clone(),
            consistent: derived.is_consistent(),
        }
    }
}

/// Pure fold from a document and its log to the current-round state.
pub fn derive(document: &Document) -> DerivedState {
    let log = RoundLog::of(document);
    let round_start = document.round_start_time;

    let approvers: Vec<ApproverRoundState> = document
        .chain
        .iter()
        .enumerate()
        .map(|(position, approver)| {
            let decision = log.latest_decision(round_start, approver);
            ApproverRoundState {
                approver: approver.clone(),
                position,
                status: decision
                    .and_then(|entry| entry.kind.decision())
                    .unwrap_or(ApproverStatus::Pending),
                has_acted: decision.is_some(),
                decided_at: decision.map(|entry| entry.timestamp),
            }
        })
        .collect();

    let (overall_status, current_index) = if log.round_count() == 0 {
        (OverallStatus::NotSubmitted, 0)
    } else if approvers.is_empty() {
        (document.overall_status, 0)
    } else {
        fold_chain(&approvers)
    };

    let current_approver = match overall_status {
        OverallStatus::Pending => document.chain.get(current_index).cloned(),
        _ => None,
    };

    let mut derived = DerivedState {
        document_id: document.id.clone(),
        overall_status,
        current_index,
        current_approver,
        round: log.round_count(),
        round_start_time: round_start,
        approvers,
        inconsistencies: Vec::new(),
    };
    derived.inconsistencies = find_inconsistencies(document, &derived, &log);
    derived
}

fn fold_chain(approvers: &[ApproverRoundState]) -> (OverallStatus, usize) {
    for state in approvers {
        match state.status {
            ApproverStatus::Approved => continue,
            ApproverStatus::Rejected => return (OverallStatus::Rejected, state.position),
            ApproverStatus::Pending => return (OverallStatus::Pending, state.position),
        }
    }
    (OverallStatus::Approved, approvers.len().saturating_sub(1))
}

fn find_inconsistencies(
    document: &Document,
    derived: &DerivedState,
    log: &RoundLog<'_>,
) -> Vec<StateInconsistent> {
    let mut found = Vec::new();
    let mut mismatch = |field: &str, stored: String, derived: String| {
        if stored != derived {
            found.push(StateInconsistent {
                document_id: document.id.clone(),
                field: field.to_string(),
                stored,
                derived,
            });
        }
    };

    if document.chain.is_empty() {
        mismatch("chain", "[]".to_string(), "at least one approver".to_string());
    }

    mismatch(
        "overall_status",
        document.overall_status.as_str().to_string(),
        derived.overall_status.as_str().to_string(),
    );
    mismatch(
        "current_index",
        document.current_index.to_string(),
        derived.current_index.to_string(),
    );

    for state in &derived.approvers {
        let stored = document
            .approver_statuses
            .get(&state.approver)
            .map_or("missing", |status| status.as_str());
        mismatch(
            &format!("approver_status[{}]", state.approver),
            stored.to_string(),
            state.status.as_str().to_string(),
        );
    }

    if let Some(opening) = log.latest_round_opening() {
        mismatch(
            "round_start_time",
            document.round_start_time.to_rfc3339(),
            opening.to_rfc3339(),
        );
    }

    found
}
