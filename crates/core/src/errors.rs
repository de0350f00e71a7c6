use thiserror::Error;

use crate::domain::{
    ApproverId, ApproverStatus, DocumentId, DocumentTypeKey, OverallStatus, StudentId,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("no approver chain is configured for document type `{document_type}`")]
    ConfigNotFound { document_type: DocumentTypeKey },
    #[error("approver chain for document type `{document_type}` is invalid: {reason}")]
    InvalidChain { document_type: DocumentTypeKey, reason: String },
    #[error(
        "document `{document_id}` already exists with status {status}; resubmit it instead of submitting again"
    )]
    AlreadyPending { document_id: DocumentId, status: OverallStatus },
    #[error("document `{document_id}` is {status}; only rejected documents can be resubmitted")]
    NotRejected { document_id: DocumentId, status: OverallStatus },
    #[error("student `{student_id}` does not own document `{document_id}`")]
    NotDocumentOwner { document_id: DocumentId, student_id: StudentId },
    #[error("`{approver}` is not the current approver for document `{document_id}`")]
    NotCurrentApprover {
        document_id: DocumentId,
        approver: ApproverId,
        current_approver: Option<ApproverId>,
    },
    #[error("`{approver}` already recorded {decision} on document `{document_id}` this round")]
    AlreadyActed { document_id: DocumentId, approver: ApproverId, decision: ApproverStatus },
    #[error("`{approver}` is not in the approver chain of document `{document_id}`")]
    NotChainMember { document_id: DocumentId, approver: ApproverId },
    #[error("a comment must contain text")]
    EmptyComment,
    #[error("document `{0}` not found")]
    DocumentNotFound(DocumentId),
    #[error("document `{document_id}` kept changing underneath the write; gave up after {attempts} attempts")]
    ConcurrentModification { document_id: DocumentId, attempts: u32 },
    #[error("gateway failure: {0}")]
    GatewayFailure(String),
}

impl ApprovalError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "config_not_found",
            Self::InvalidChain { .. } => "invalid_chain",
            Self::AlreadyPending { .. } => "already_pending",
            Self::NotRejected { .. } => "not_rejected",
            Self::NotDocumentOwner { .. } => "not_document_owner",
            Self::NotCurrentApprover { .. } => "not_current_approver",
            Self::AlreadyActed { .. } => "already_acted",
            Self::NotChainMember { .. } => "not_chain_member",
            Self::EmptyComment => "empty_comment",
            Self::DocumentNotFound(_) => "document_not_found",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::GatewayFailure(_) => "gateway_failure",
        }
    }

    /// Whether a caller may retry the same request from a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. } | Self::GatewayFailure(_))
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl From<ApprovalError> for InterfaceError {
    fn from(value: ApprovalError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApprovalError::AlreadyPending { .. }
            | ApprovalError::NotRejected { .. }
            | ApprovalError::NotDocumentOwner { .. }
            | ApprovalError::NotCurrentApprover { .. }
            | ApprovalError::AlreadyActed { .. }
            | ApprovalError::NotChainMember { .. }
            | ApprovalError::EmptyComment
            | ApprovalError::DocumentNotFound(_) => Self::BadRequest { message, correlation_id },
            ApprovalError::ConcurrentModification { .. } | ApprovalError::GatewayFailure(_) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApprovalError::ConfigNotFound { .. } | ApprovalError::InvalidChain { .. } => {
                Self::Internal { message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{ApproverId, ApproverStatus, DocumentId, DocumentTypeKey};
    use crate::errors::{ApprovalError, InterfaceError};

    #[test]
    fn precondition_error_maps_to_bad_request_interface_error() {
        let interface = ApprovalError::AlreadyActed {
            document_id: DocumentId("doc-1".to_owned()),
            approver: ApproverId::new("faculty@dts.com"),
            decision: ApproverStatus::Approved,
        }
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn concurrent_modification_maps_to_service_unavailable_and_is_retryable() {
        let error = ApprovalError::ConcurrentModification {
            document_id: DocumentId("doc-1".to_owned()),
            attempts: 3,
        };
        assert!(error.is_retryable());

        let interface = error.into_interface("req-2");
        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn missing_chain_is_an_internal_setup_error() {
        let error = ApprovalError::ConfigNotFound {
            document_type: DocumentTypeKey("Bonafide Certificate".to_owned()),
        };
        assert!(!error.is_retryable());
        assert_eq!(error.error_class(), "config_not_found");

        let interface = error.into_interface("req-3");
        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn messages_name_the_offending_document() {
        let error = ApprovalError::NotCurrentApprover {
            document_id: DocumentId("doc-9".to_owned()),
            approver: ApproverId::new("HOD@dts.com"),
            current_approver: Some(ApproverId::new("faculty@dts.com")),
        };
        assert_eq!(
            error.to_string(),
            "`hod@dts.com` is not the current approver for document `doc-9`"
        );
    }
}
