pub mod document;

pub use document::{
    normalize_identity, Actor, ApproverId, ApproverStatus, Document, DocumentId, DocumentTypeKey,
    LogEntry, LogKind, OverallStatus, StudentId,
};
