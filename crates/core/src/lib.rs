pub mod audit;
pub mod chain;
pub mod config;
pub mod derivation;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod gateway;
pub mod round_log;
pub mod service;
pub mod views;

pub use chain::{ChainResolver, ChainSource, ConfiguredChainSource, InMemoryChainSource};
pub use derivation::{derive, DerivedState, DerivedStatus, StateInconsistent, Viewer};
pub use domain::{
    Actor, ApproverId, ApproverStatus, Document, DocumentId, DocumentTypeKey, LogEntry, LogKind,
    OverallStatus, StudentId,
};
pub use errors::{ApprovalError, InterfaceError};
pub use flows::{ApproverAction, TransitionOutcome};
pub use gateway::{
    DocumentGateway, DocumentQuery, DocumentWrite, FieldUpdate, GatewayError,
    InMemoryDocumentGateway,
};
pub use round_log::{Clock, ManualClock, RoundLog, SystemClock};
pub use service::{ApprovalService, RetryPolicy};
pub use views::{
    ApproverLabels, HistoryLine, InboxFilter, InboxItem, OverviewFilter, OverviewItem,
};
