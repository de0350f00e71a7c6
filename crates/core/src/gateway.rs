use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::{
    ApproverId, ApproverStatus, Document, DocumentId, DocumentTypeKey, LogEntry, OverallStatus,
    StudentId,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("document `{document_id}` changed since version {expected_version} was read")]
    Conflict { document_id: DocumentId, expected_version: u64 },
    #[error("document `{0}` not found")]
    NotFound(DocumentId),
    #[error("gateway failure: {0}")]
    Failure(String),
}

/// One logical field write inside a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldUpdate {
    Chain(Vec<ApproverId>),
    CurrentIndex(usize),
    OverallStatus(OverallStatus),
    ApproverStatus { approver: ApproverId, status: ApproverStatus },
    /// Replaces the whole status map with `Pending` for each listed approver.
    ResetApproverStatuses(Vec<ApproverId>),
    RoundStartTime(DateTime<Utc>),
    UpdatedAt(DateTime<Utc>),
}

/// A single all-or-nothing write. Updates are guarded by `expected_version`
/// and always carry exactly one appended log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentWrite {
    Create(Document),
    Update {
        document_id: DocumentId,
        expected_version: u64,
        updates: Vec<FieldUpdate>,
        append: LogEntry,
    },
}

impl DocumentWrite {
    pub fn document_id(&self) -> &DocumentId {
        match self {
            Self::Create(document) => &document.id,
            Self::Update { document_id, .. } => document_id,
        }
    }

    /// Applies an update to an in-memory copy, bumping the version.
    pub fn apply_to(&self, document: &mut Document) {
        match self {
            Self::Create(created) => *document = created.clone(),
            Self::Update { updates, append, .. } => {
                for update in updates {
                    apply_field(document, update);
                }
                document.log.push(append.clone());
                document.version = document.version.saturating_add(1);
            }
        }
    }
}

fn apply_field(document: &mut Document, update: &FieldUpdate) {
    match update {
        FieldUpdate::Chain(chain) => document.chain = chain.clone(),
        FieldUpdate::CurrentIndex(index) => document.current_index = *index,
        FieldUpdate::OverallStatus(status) => document.overall_status = *status,
        FieldUpdate::ApproverStatus { approver, status } => {
            document.approver_statuses.insert(approver.clone(), *status);
        }
        FieldUpdate::ResetApproverStatuses(members) => {
            document.approver_statuses = members
                .iter()
                .map(|member| (member.clone(), ApproverStatus::Pending))
                .collect();
        }
        FieldUpdate::RoundStartTime(at) => document.round_start_time = *at,
        FieldUpdate::UpdatedAt(at) => document.updated_at = *at,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentQuery {
    Student(StudentId),
    StudentAndType(StudentId, DocumentTypeKey),
    ChainMember(ApproverId),
    All,
}

impl DocumentQuery {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::Student(student) => &document.student_id == student,
            Self::StudentAndType(student, document_type) => {
                &document.student_id == student && &document.document_type == document_type
            }
            Self::ChainMember(approver) => document.is_member(approver),
            Self::All => true,
        }
    }
}

/// Document store collaborator. Implementations must make each `commit`
/// atomic and reject updates whose `expected_version` is stale.
#[async_trait]
pub trait DocumentGateway: Send + Sync {
    async fn get(&self, id: &DocumentId) -> Result<Option<Document>, GatewayError>;

    async fn commit(&self, write: DocumentWrite) -> Result<(), GatewayError>;

    async fn query(&self, query: &DocumentQuery) -> Result<Vec<Document>, GatewayError>;
}

#[derive(Default)]
pub struct InMemoryDocumentGateway {
    documents: RwLock<BTreeMap<String, Document>>,
}

#[async_trait]
impl DocumentGateway for InMemoryDocumentGateway {
    async fn get(&self, id: &DocumentId) -> Result<Option<Document>, GatewayError> {
        let documents = self.documents.read().await;
        Ok(documents.get(&id.0).cloned())
    }

    async fn commit(&self, write: DocumentWrite) -> Result<(), GatewayError> {
        let mut documents = self.documents.write().await;
        match &write {
            DocumentWrite::Create(document) => {
                let taken = documents.contains_key(&document.id.0)
                    || documents.values().any(|existing| {
                        existing.student_id == document.student_id
                            && existing.document_type == document.document_type
                    });
                if taken {
                    return Err(GatewayError::Conflict {
                        document_id: document.id.clone(),
                        expected_version: 0,
                    });
                }
                documents.insert(document.id.0.clone(), document.clone());
            }
            DocumentWrite::Update { document_id, expected_version, .. } => {
                let stored = documents
                    .get_mut(&document_id.0)
                    .ok_or_else(|| GatewayError::NotFound(document_id.clone()))?;
                if stored.version != *expected_version {
                    return Err(GatewayError::Conflict {
                        document_id: document_id.clone(),
                        expected_version: *expected_version,
                    });
                }
                write.apply_to(stored);
            }
        }
        Ok(())
    }

    async fn query(&self, query: &DocumentQuery) -> Result<Vec<Document>, GatewayError> {
        let documents = self.documents.read().await;
        let mut matched: Vec<Document> =
            documents.values().filter(|document| query.matches(document)).cloned().collect();
        matched.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, TimeZone, Utc};

    use super::{DocumentGateway, DocumentQuery, DocumentWrite, FieldUpdate, GatewayError};
    use super::InMemoryDocumentGateway;
    use crate::domain::{
        Actor, ApproverId, ApproverStatus, Document, DocumentId, DocumentTypeKey, LogEntry,
        LogKind, OverallStatus, StudentId,
    };

    fn document(id: &str, student: &str) -> Document {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let faculty = ApproverId::new("faculty@dts.com");
        Document {
            id: DocumentId(id.to_string()),
            student_id: StudentId(student.to_string()),
            document_type: DocumentTypeKey("Bonafide Certificate".to_string()),
            chain: vec![faculty.clone()],
            current_index: 0,
            overall_status: OverallStatus::Pending,
            approver_statuses: BTreeMap::from([(faculty, ApproverStatus::Pending)]),
            round_start_time: now,
            log: vec![LogEntry {
                seq: 1,
                actor: Actor::System,
                kind: LogKind::Submitted,
                comment: "Submitted".to_string(),
                timestamp: now,
            }],
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn approve(document: &Document, expected_version: u64) -> DocumentWrite {
        let faculty = ApproverId::new("faculty@dts.com");
        DocumentWrite::Update {
            document_id: document.id.clone(),
            expected_version,
            updates: vec![
                FieldUpdate::ApproverStatus {
                    approver: faculty.clone(),
                    status: ApproverStatus::Approved,
                },
                FieldUpdate::OverallStatus(OverallStatus::Approved),
            ],
            append: LogEntry {
                seq: 2,
                actor: Actor::Approver(faculty),
                kind: LogKind::Approved,
                comment: String::new(),
                timestamp: document.round_start_time + Duration::seconds(1),
            },
        }
    }

    #[tokio::test]
    async fn update_applies_fields_appends_entry_and_bumps_version() {
        let gateway = InMemoryDocumentGateway::default();
        let created = document("doc-1", "stu-1");
        gateway.commit(DocumentWrite::Create(created.clone())).await.expect("create");

        gateway.commit(approve(&created, 1)).await.expect("update");

        let stored = gateway.get(&created.id).await.expect("get").expect("exists");
        assert_eq!(stored.overall_status, OverallStatus::Approved);
        assert_eq!(stored.log.len(), 2);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict_and_changes_nothing() {
        let gateway = InMemoryDocumentGateway::default();
        let created = document("doc-1", "stu-1");
        gateway.commit(DocumentWrite::Create(created.clone())).await.expect("create");
        gateway.commit(approve(&created, 1)).await.expect("first writer wins");

        let error = gateway.commit(approve(&created, 1)).await.expect_err("second writer loses");
        assert_eq!(
            error,
            GatewayError::Conflict { document_id: created.id.clone(), expected_version: 1 }
        );

        let stored = gateway.get(&created.id).await.expect("get").expect("exists");
        assert_eq!(stored.log.len(), 2);
    }

    #[tokio::test]
    async fn create_rejects_second_document_for_same_student_and_type() {
        let gateway = InMemoryDocumentGateway::default();
        gateway.commit(DocumentWrite::Create(document("doc-1", "stu-1"))).await.expect("create");

        let error = gateway
            .commit(DocumentWrite::Create(document("doc-2", "stu-1")))
            .await
            .expect_err("duplicate pair");
        assert!(matches!(error, GatewayError::Conflict { .. }));

        gateway
            .commit(DocumentWrite::Create(document("doc-3", "stu-2")))
            .await
            .expect("other student is fine");
    }

    #[tokio::test]
    async fn query_filters_by_student_and_chain_membership() {
        let gateway = InMemoryDocumentGateway::default();
        gateway.commit(DocumentWrite::Create(document("doc-1", "stu-1"))).await.expect("create");
        gateway.commit(DocumentWrite::Create(document("doc-2", "stu-2"))).await.expect("create");

        let mine = gateway
            .query(&DocumentQuery::Student(StudentId("stu-2".to_string())))
            .await
            .expect("query");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id.0, "doc-2");

        let faculty = gateway
            .query(&DocumentQuery::ChainMember(ApproverId::new("FACULTY@dts.com")))
            .await
            .expect("query");
        assert_eq!(faculty.len(), 2);

        let nobody = gateway
            .query(&DocumentQuery::ChainMember(ApproverId::new("accounts@dts.com")))
            .await
            .expect("query");
        assert!(nobody.is_empty());
    }

    #[tokio::test]
    async fn update_of_missing_document_is_not_found() {
        let gateway = InMemoryDocumentGateway::default();
        let error =
            gateway.commit(approve(&document("ghost", "stu-1"), 1)).await.expect_err("missing");
        assert_eq!(error, GatewayError::NotFound(DocumentId("ghost".to_string())));
    }
}
