use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StudentId(pub String);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentTypeKey(pub String);

impl fmt::Display for DocumentTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical approver identity.
///
/// Every constructor normalizes the raw value, so two `ApproverId`s compare
/// equal exactly when they name the same principal regardless of the casing
/// or padding the identity provider handed us.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ApproverId(String);

impl ApproverId {
    pub fn new(raw: &str) -> Self {
        Self(normalize_identity(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ApproverId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for ApproverId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ApproverId> for String {
    fn from(value: ApproverId) -> Self {
        value.0
    }
}

impl fmt::Display for ApproverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    NotSubmitted,
    Pending,
    Approved,
    Rejected,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSubmitted => "not_submitted",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(' ', "_").as_str() {
            "not_submitted" => Some(Self::NotSubmitted),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NotSubmitted => "Not Submitted",
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApproverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for ApproverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Submitted,
    Resubmitted,
    Approved,
    Rejected,
    Commented,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Resubmitted => "resubmitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Commented => "commented",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "resubmitted" => Some(Self::Resubmitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "commented" => Some(Self::Commented),
            _ => None,
        }
    }

    /// The approver status this entry records, if it is a decision.
    pub fn decision(&self) -> Option<ApproverStatus> {
        match self {
            Self::Approved => Some(ApproverStatus::Approved),
            Self::Rejected => Some(ApproverStatus::Rejected),
            Self::Submitted | Self::Resubmitted | Self::Commented => None,
        }
    }

    pub fn opens_round(&self) -> bool {
        matches!(self, Self::Submitted | Self::Resubmitted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    System,
    Approver(ApproverId),
}

impl Actor {
    pub fn approver(&self) -> Option<&ApproverId> {
        match self {
            Self::System => None,
            Self::Approver(id) => Some(id),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Approver(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub actor: Actor,
    pub kind: LogKind,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub student_id: StudentId,
    pub document_type: DocumentTypeKey,
    pub chain: Vec<ApproverId>,
    pub current_index: usize,
    pub overall_status: OverallStatus,
    pub approver_statuses: BTreeMap<ApproverId, ApproverStatus>,
    pub round_start_time: DateTime<Utc>,
    pub log: Vec<LogEntry>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn current_approver(&self) -> Option<&ApproverId> {
        self.chain.get(self.current_index)
    }

    pub fn position_of(&self, approver: &ApproverId) -> Option<usize> {
        self.chain.iter().position(|member| member == approver)
    }

    pub fn is_member(&self, approver: &ApproverId) -> bool {
        self.position_of(approver).is_some()
    }

    pub fn next_seq(&self) -> u64 {
        self.log.iter().map(|entry| entry.seq).max().map_or(1, |seq| seq.saturating_add(1))
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.log.iter().map(|entry| entry.timestamp).max()
    }
}
