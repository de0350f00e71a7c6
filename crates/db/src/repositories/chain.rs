use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::Row;

use routeslip_core::chain::ChainSource;
use routeslip_core::domain::DocumentTypeKey;
use routeslip_core::gateway::GatewayError;

use super::{to_sql_int, RepositoryError};
use crate::DbPool;

/// Approver chains kept in the `workflow_chain` table, one row per position.
#[derive(Clone)]
pub struct SqlChainSource {
    pool: DbPool,
}

impl SqlChainSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Replaces the chain for one document type. An empty chain removes it.
    pub async fn put_chain(
        &self,
        document_type: &DocumentTypeKey,
        chain: &[String],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM workflow_chain WHERE document_type = ?")
            .bind(&document_type.0)
            .execute(&mut *tx)
            .await?;
        insert_chain(&mut tx, &document_type.0, chain).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Makes the table mirror `flows` exactly. Returns the number of chains written.
    pub async fn replace_all(
        &self,
        flows: &BTreeMap<String, Vec<String>>,
    ) -> Result<usize, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM workflow_chain").execute(&mut *tx).await?;
        for (document_type, chain) in flows {
            insert_chain(&mut tx, document_type, chain).await?;
        }
        tx.commit().await?;

        tracing::info!(
            event_name = "persistence.chains_replaced",
            chain_count = flows.len(),
            "workflow chains replaced"
        );
        Ok(flows.len())
    }

    async fn load_chain(&self, document_type: &str) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT approver_id FROM workflow_chain WHERE document_type = ? ORDER BY position",
        )
        .bind(document_type)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("approver_id")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .collect()
    }

    async fn load_document_types(&self) -> Result<Vec<DocumentTypeKey>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT document_type FROM workflow_chain ORDER BY document_type",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("document_type")
                    .map(DocumentTypeKey)
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .collect()
    }
}

async fn insert_chain(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    document_type: &str,
    chain: &[String],
) -> Result<(), RepositoryError> {
    for (position, approver) in chain.iter().enumerate() {
        sqlx::query(
            "INSERT INTO workflow_chain (document_type, position, approver_id) VALUES (?, ?, ?)",
        )
        .bind(document_type)
        .bind(to_sql_int("position", position)?)
        .bind(approver)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl ChainSource for SqlChainSource {
    async fn chain_for(
        &self,
        document_type: &DocumentTypeKey,
    ) -> Result<Option<Vec<String>>, GatewayError> {
        let chain = self.load_chain(&document_type.0).await?;
        Ok(if chain.is_empty() { None } else { Some(chain) })
    }

    async fn document_types(&self) -> Result<Vec<DocumentTypeKey>, GatewayError> {
        Ok(self.load_document_types().await?)
    }
}
