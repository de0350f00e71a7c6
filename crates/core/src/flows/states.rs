use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ApproverId, DocumentId, DocumentTypeKey, LogEntry, LogKind, OverallStatus, StudentId,
};
use crate::gateway::DocumentWrite;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverAction {
    Approve,
    Reject,
    Comment,
}

impl ApproverAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Comment => "comment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Some(Self::Approve),
            "reject" | "rejected" => Some(Self::Reject),
            "comment" | "commented" => Some(Self::Comment),
            _ => None,
        }
    }

    pub fn log_kind(&self) -> LogKind {
        match self {
            Self::Approve => LogKind::Approved,
            Self::Reject => LogKind::Rejected,
            Self::Comment => LogKind::Commented,
        }
    }

    pub fn is_decision(&self) -> bool {
        !matches!(self, Self::Comment)
    }
}

impl fmt::Display for ApproverAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    Submit {
        document_id: DocumentId,
        student_id: StudentId,
        document_type: DocumentTypeKey,
        chain: Vec<ApproverId>,
    },
    Resubmit {
        document_id: DocumentId,
        student_id: StudentId,
        chain: Vec<ApproverId>,
    },
    Act {
        document_id: DocumentId,
        approver: ApproverId,
        action: ApproverAction,
        comment: String,
    },
}

impl FlowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "submit",
            Self::Resubmit { .. } => "resubmit",
            Self::Act { action, .. } => action.as_str(),
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        match self {
            Self::Submit { document_id, .. }
            | Self::Resubmit { document_id, .. }
            | Self::Act { document_id, .. } => document_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub now: DateTime<Utc>,
}

impl FlowContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub document_id: DocumentId,
    pub from: OverallStatus,
    pub to: OverallStatus,
    pub from_index: usize,
    pub to_index: usize,
    pub entry: LogEntry,
}

impl TransitionOutcome {
    pub fn changed_status(&self) -> bool {
        self.from != self.to || self.from_index != self.to_index
    }
}

/// A transition ready to be committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedTransition {
    pub write: DocumentWrite,
    pub outcome: TransitionOutcome,
}
