use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use routeslip_core::domain::{
    Actor, ApproverId, ApproverStatus, Document, DocumentId, DocumentTypeKey, LogEntry, LogKind,
    OverallStatus, StudentId,
};
use routeslip_core::gateway::{
    DocumentGateway, DocumentQuery, DocumentWrite, FieldUpdate, GatewayError,
};

use super::{from_sql_int, to_sql_int, RepositoryError};
use crate::DbPool;

/// Stores documents across four tables and commits each `DocumentWrite`
/// inside one transaction guarded by the row's `version` column.
#[derive(Clone)]
pub struct SqlDocumentGateway {
    pool: DbPool,
}

impl SqlDocumentGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

type Tx<'c> = Transaction<'c, Sqlite>;

fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn decode_time(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn column<T>(row: &SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<T, _>(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn load_document(
    tx: &mut Tx<'_>,
    id: &str,
) -> Result<Option<Document>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, student_id, document_type, current_index, overall_status,
                round_start_time, version, created_at, updated_at
         FROM document WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let chain = sqlx::query(
        "SELECT approver_id FROM document_chain_member WHERE document_id = ? ORDER BY position",
    )
    .bind(id)
    .fetch_all(&mut **tx)
    .await?
    .iter()
    .map(|member| column::<String>(member, "approver_id").map(|raw| ApproverId::new(&raw)))
    .collect::<Result<Vec<_>, _>>()?;

    let mut approver_statuses = BTreeMap::new();
    for status_row in sqlx::query(
        "SELECT approver_id, status FROM document_approver_status WHERE document_id = ?",
    )
    .bind(id)
    .fetch_all(&mut **tx)
    .await?
    {
        let approver: String = column(&status_row, "approver_id")?;
        let raw_status: String = column(&status_row, "status")?;
        let status = ApproverStatus::parse(&raw_status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown approver status `{raw_status}`"))
        })?;
        approver_statuses.insert(ApproverId::new(&approver), status);
    }

    let log = sqlx::query(
        "SELECT seq, actor_id, kind, comment, occurred_at
         FROM document_log WHERE document_id = ? ORDER BY seq",
    )
    .bind(id)
    .fetch_all(&mut **tx)
    .await?
    .iter()
    .map(row_to_entry)
    .collect::<Result<Vec<_>, _>>()?;

    let raw_status: String = column(&row, "overall_status")?;
    let overall_status = OverallStatus::parse(&raw_status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown overall status `{raw_status}`")))?;
    let round_start: String = column(&row, "round_start_time")?;
    let created_at: String = column(&row, "created_at")?;
    let updated_at: String = column(&row, "updated_at")?;

    Ok(Some(Document {
        id: DocumentId(column(&row, "id")?),
        student_id: StudentId(column(&row, "student_id")?),
        document_type: DocumentTypeKey(column(&row, "document_type")?),
        chain,
        current_index: from_sql_int("current_index", column(&row, "current_index")?)?,
        overall_status,
        approver_statuses,
        round_start_time: decode_time("round_start_time", &round_start)?,
        log,
        version: from_sql_int("version", column(&row, "version")?)?,
        created_at: decode_time("created_at", &created_at)?,
        updated_at: decode_time("updated_at", &updated_at)?,
    }))
}

fn row_to_entry(row: &SqliteRow) -> Result<LogEntry, RepositoryError> {
    let actor_id: Option<String> = column(row, "actor_id")?;
    let raw_kind: String = column(row, "kind")?;
    let kind = LogKind::parse(&raw_kind)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown log kind `{raw_kind}`")))?;
    let occurred_at: String = column(row, "occurred_at")?;

    Ok(LogEntry {
        seq: from_sql_int("seq", column(row, "seq")?)?,
        actor: actor_id.map_or(Actor::System, |id| Actor::Approver(ApproverId::new(&id))),
        kind,
        comment: column(row, "comment")?,
        timestamp: decode_time("occurred_at", &occurred_at)?,
    })
}

async fn insert_chain(
    tx: &mut Tx<'_>,
    document_id: &str,
    chain: &[ApproverId],
) -> Result<(), RepositoryError> {
    for (position, approver) in chain.iter().enumerate() {
        sqlx::query(
            "INSERT INTO document_chain_member (document_id, position, approver_id)
             VALUES (?, ?, ?)",
        )
        .bind(document_id)
        .bind(to_sql_int("position", position)?)
        .bind(approver.as_str())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn upsert_status(
    tx: &mut Tx<'_>,
    document_id: &str,
    approver: &ApproverId,
    status: ApproverStatus,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO document_approver_status (document_id, approver_id, status)
         VALUES (?, ?, ?)
         ON CONFLICT(document_id, approver_id) DO UPDATE SET status = excluded.status",
    )
    .bind(document_id)
    .bind(approver.as_str())
    .bind(status.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_entry(
    tx: &mut Tx<'_>,
    document_id: &str,
    entry: &LogEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO document_log (document_id, seq, actor_id, kind, comment, occurred_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(document_id)
    .bind(to_sql_int("seq", entry.seq)?)
    .bind(entry.actor.approver().map(ApproverId::as_str))
    .bind(entry.kind.as_str())
    .bind(&entry.comment)
    .bind(encode_time(&entry.timestamp))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn apply_field(
    tx: &mut Tx<'_>,
    document_id: &str,
    update: &FieldUpdate,
) -> Result<(), RepositoryError> {
    match update {
        FieldUpdate::Chain(chain) => {
            sqlx::query("DELETE FROM document_chain_member WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut **tx)
                .await?;
            insert_chain(tx, document_id, chain).await?;
        }
        FieldUpdate::CurrentIndex(index) => {
            sqlx::query("UPDATE document SET current_index = ? WHERE id = ?")
                .bind(to_sql_int("current_index", *index)?)
                .bind(document_id)
                .execute(&mut **tx)
                .await?;
        }
        FieldUpdate::OverallStatus(status) => {
            sqlx::query("UPDATE document SET overall_status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(document_id)
                .execute(&mut **tx)
                .await?;
        }
        FieldUpdate::ApproverStatus { approver, status } => {
            upsert_status(tx, document_id, approver, *status).await?;
        }
        FieldUpdate::ResetApproverStatuses(members) => {
            sqlx::query("DELETE FROM document_approver_status WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut **tx)
                .await?;
            for member in members {
                upsert_status(tx, document_id, member, ApproverStatus::Pending).await?;
            }
        }
        FieldUpdate::RoundStartTime(at) => {
            sqlx::query("UPDATE document SET round_start_time = ? WHERE id = ?")
                .bind(encode_time(at))
                .bind(document_id)
                .execute(&mut **tx)
                .await?;
        }
        FieldUpdate::UpdatedAt(at) => {
            sqlx::query("UPDATE document SET updated_at = ? WHERE id = ?")
                .bind(encode_time(at))
                .bind(document_id)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

impl SqlDocumentGateway {
    async fn create(&self, document: &Document) -> Result<(), GatewayError> {
        let conflict = || GatewayError::Conflict {
            document_id: document.id.clone(),
            expected_version: 0,
        };
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let inserted = sqlx::query(
            "INSERT INTO document (id, student_id, document_type, current_index, overall_status,
                                   round_start_time, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.id.0)
        .bind(&document.student_id.0)
        .bind(&document.document_type.0)
        .bind(to_sql_int("current_index", document.current_index)?)
        .bind(document.overall_status.as_str())
        .bind(encode_time(&document.round_start_time))
        .bind(to_sql_int("version", document.version.max(1))?)
        .bind(encode_time(&document.created_at))
        .bind(encode_time(&document.updated_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => return Err(conflict()),
            Err(error) => return Err(RepositoryError::from(error).into()),
        }

        insert_chain(&mut tx, &document.id.0, &document.chain).await?;
        for (approver, status) in &document.approver_statuses {
            upsert_status(&mut tx, &document.id.0, approver, *status).await?;
        }
        for entry in &document.log {
            insert_entry(&mut tx, &document.id.0, entry).await?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn update(
        &self,
        document_id: &DocumentId,
        expected_version: u64,
        updates: &[FieldUpdate],
        append: &LogEntry,
    ) -> Result<(), GatewayError> {
        let conflict = || GatewayError::Conflict {
            document_id: document_id.clone(),
            expected_version,
        };
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let bumped =
            sqlx::query("UPDATE document SET version = version + 1 WHERE id = ? AND version = ?")
                .bind(&document_id.0)
                .bind(to_sql_int("version", expected_version)?)
                .execute(&mut *tx)
                .await
                .map_err(RepositoryError::from)?;

        if bumped.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM document WHERE id = ?")
                .bind(&document_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(RepositoryError::from)?
                .is_some();
            return Err(if exists {
                conflict()
            } else {
                GatewayError::NotFound(document_id.clone())
            });
        }

        for update in updates {
            apply_field(&mut tx, &document_id.0, update).await?;
        }

        match insert_entry(&mut tx, &document_id.0, append).await {
            Ok(()) => {}
            Err(RepositoryError::Database(error)) if is_unique_violation(&error) => {
                return Err(conflict())
            }
            Err(error) => return Err(error.into()),
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}

#[async_trait]
impl DocumentGateway for SqlDocumentGateway {
    async fn get(&self, id: &DocumentId) -> Result<Option<Document>, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let document = load_document(&mut tx, &id.0).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(document)
    }

    async fn commit(&self, write: DocumentWrite) -> Result<(), GatewayError> {
        let result = match &write {
            DocumentWrite::Create(document) => self.create(document).await,
            DocumentWrite::Update { document_id, expected_version, updates, append } => {
                self.update(document_id, *expected_version, updates, append).await
            }
        };

        if let Err(GatewayError::Conflict { expected_version, .. }) = &result {
            tracing::debug!(
                event_name = "persistence.version_conflict",
                document_id = %write.document_id(),
                expected_version = *expected_version,
                "document write refused on stale version"
            );
        }
        result
    }

    async fn query(&self, query: &DocumentQuery) -> Result<Vec<Document>, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let id_rows = match query {
            DocumentQuery::Student(student) => {
                sqlx::query("SELECT id FROM document WHERE student_id = ?")
                    .bind(&student.0)
                    .fetch_all(&mut *tx)
                    .await
            }
            DocumentQuery::StudentAndType(student, document_type) => {
                sqlx::query("SELECT id FROM document WHERE student_id = ? AND document_type = ?")
                    .bind(&student.0)
                    .bind(&document_type.0)
                    .fetch_all(&mut *tx)
                    .await
            }
            DocumentQuery::ChainMember(approver) => {
                sqlx::query(
                    "SELECT DISTINCT document_id AS id FROM document_chain_member
                     WHERE approver_id = ?",
                )
                .bind(approver.as_str())
                .fetch_all(&mut *tx)
                .await
            }
            DocumentQuery::All => sqlx::query("SELECT id FROM document").fetch_all(&mut *tx).await,
        }
        .map_err(RepositoryError::from)?;

        let mut documents = Vec::with_capacity(id_rows.len());
        for row in &id_rows {
            let id: String = column(row, "id")?;
            if let Some(document) = load_document(&mut tx, &id).await? {
                documents.push(document);
            }
        }
        tx.commit().await.map_err(RepositoryError::from)?;

        documents.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(documents)
    }
}
