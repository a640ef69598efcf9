//! Audit log repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use doku_core::{
    AuditEntity, AuditLogEntry, AuditLogRepository, Error, NewAuditEntry, Result,
};

/// PostgreSQL implementation of AuditLogRepository.
#[derive(Clone)]
pub struct PgAuditLogRepository {
    pool: Pool<Postgres>,
}

impl PgAuditLogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Append an entry within an existing transaction.
    pub async fn append_tx(tx: &mut Transaction<'_, Postgres>, entry: NewAuditEntry) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO audit_log (id, action, entity, entity_id, actor, timestamp, payload)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id)
        .bind(entry.action.as_str())
        .bind(entry.entity.as_str())
        .bind(entry.entity_id)
        .bind(&entry.actor)
        .bind(Utc::now())
        .bind(&entry.payload)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    fn parse_row(row: PgRow) -> Result<AuditLogEntry> {
        let action: String = row.get("action");
        let entity: String = row.get("entity");
        Ok(AuditLogEntry {
            id: row.get("id"),
            action: action.parse()?,
            entity: entity.parse()?,
            entity_id: row.get("entity_id"),
            actor: row.get("actor"),
            timestamp: row.get("timestamp"),
            payload: row.get("payload"),
        })
    }
}

#[async_trait]
impl AuditLogRepository for PgAuditLogRepository {
    async fn append(&self, entry: NewAuditEntry) -> Result<Uuid> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let id = Self::append_tx(&mut tx, entry).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(id)
    }

    async fn list_for_entity(
        &self,
        entity: AuditEntity,
        entity_id: Uuid,
    ) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, action, entity, entity_id, actor, timestamp, payload
             FROM audit_log
             WHERE entity = $1 AND entity_id = $2
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(entity.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_row).collect()
    }
}
