//! External reconciliation engine.
//!
//! Applies batches from the external system-of-record onto local locations
//! and orders. Every external record is tracked by exactly one `ext_ref` row
//! keyed by (source, entity table, external id); the row survives tombstoning
//! and lets a hard-deleted local entity be recreated without losing history.
//!
//! A batch is applied in a single transaction. `ext_ref` rows are locked
//! `FOR UPDATE`, so concurrent passes over the same records serialise.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use doku_core::defaults::EXTERNAL_SOURCE_NAME;
use doku_core::{
    AuditAction, EntityTable, Error, ExtRef, ExternalBatch, ExternalRecord, FieldKind,
    NewAuditEntry, ReconcileReport, Reconciler, Result, TrackedField,
};

use crate::audit::PgAuditLogRepository;

/// A tracked value taken from an external record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(Option<String>),
    Bool(bool),
}

/// Tracked fields present in `record`, in declaration order.
///
/// `null` clears a nullable column and is ignored for a non-nullable one.
/// Numbers and booleans given for text columns are stringified. Values that
/// cannot be coerced are dropped.
pub fn extract_tracked(
    table: EntityTable,
    record: &ExternalRecord,
) -> Vec<(TrackedField, FieldValue)> {
    table
        .tracked_fields()
        .iter()
        .filter_map(|field| {
            let raw = record.fields.get(field.key)?;
            coerce(field, raw).map(|value| (*field, value))
        })
        .collect()
}

fn coerce(field: &TrackedField, raw: &JsonValue) -> Option<FieldValue> {
    if raw.is_null() {
        return match (field.nullable, field.kind) {
            (true, FieldKind::Text) => Some(FieldValue::Text(None)),
            _ => None,
        };
    }
    match field.kind {
        FieldKind::Text => match raw {
            JsonValue::String(s) => Some(FieldValue::Text(Some(s.clone()))),
            JsonValue::Number(n) => Some(FieldValue::Text(Some(n.to_string()))),
            JsonValue::Bool(b) => Some(FieldValue::Text(Some(b.to_string()))),
            _ => None,
        },
        FieldKind::Bool => match raw {
            JsonValue::Bool(b) => Some(FieldValue::Bool(*b)),
            JsonValue::Number(n) => n.as_i64().map(|v| FieldValue::Bool(v != 0)),
            JsonValue::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(FieldValue::Bool(true)),
                "false" | "0" | "no" => Some(FieldValue::Bool(false)),
                _ => None,
            },
            _ => None,
        },
    }
}

fn text_value(values: &[(TrackedField, FieldValue)], column: &str) -> Option<String> {
    values.iter().find_map(|(f, v)| match v {
        FieldValue::Text(t) if f.column == column => t.clone(),
        _ => None,
    })
}

fn bool_value(values: &[(TrackedField, FieldValue)], column: &str) -> Option<bool> {
    values.iter().find_map(|(f, v)| match v {
        FieldValue::Bool(b) if f.column == column => Some(*b),
        _ => None,
    })
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Recreated,
    Tombstoned,
    Skipped,
}

impl Outcome {
    fn tally(self, report: &mut ReconcileReport) {
        match self {
            Outcome::Created => report.created += 1,
            Outcome::Updated => report.updated += 1,
            Outcome::Recreated => report.recreated += 1,
            Outcome::Tombstoned => report.tombstoned += 1,
            Outcome::Skipped => report.skipped += 1,
        }
    }
}

/// PostgreSQL reconciliation engine for one external source.
#[derive(Clone)]
pub struct PgReconciler {
    pool: Pool<Postgres>,
    source: String,
}

impl PgReconciler {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self::with_source(pool, EXTERNAL_SOURCE_NAME)
    }

    pub fn with_source(pool: Pool<Postgres>, source: &str) -> Self {
        Self {
            pool,
            source: source.to_string(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn actor(&self) -> String {
        format!("sync:{}", self.source)
    }

    /// Look up the mapping for an external record.
    pub async fn ext_ref(&self, table: EntityTable, external_id: &str) -> Result<Option<ExtRef>> {
        let row = sqlx::query(
            "SELECT entity_id, etag, synced_at FROM ext_ref
             WHERE source = $1 AND entity_table = $2 AND external_id = $3",
        )
        .bind(&self.source)
        .bind(table.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| ExtRef {
            source: self.source.clone(),
            entity_table: table,
            external_id: external_id.to_string(),
            entity_id: row.get("entity_id"),
            etag: row.get("etag"),
            synced_at: row.get("synced_at"),
        }))
    }

    async fn lock_ext_ref_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: EntityTable,
        external_id: &str,
    ) -> Result<Option<(Uuid, Uuid)>> {
        let row = sqlx::query(
            "SELECT id, entity_id FROM ext_ref
             WHERE source = $1 AND entity_table = $2 AND external_id = $3
             FOR UPDATE",
        )
        .bind(&self.source)
        .bind(table.as_str())
        .bind(external_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| (r.get("id"), r.get("entity_id"))))
    }

    async fn insert_ext_ref_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: EntityTable,
        external_id: &str,
        entity_id: Uuid,
        etag: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO ext_ref (id, source, entity_table, external_id, entity_id, etag, synced_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::now_v7())
        .bind(&self.source)
        .bind(table.as_str())
        .bind(external_id)
        .bind(entity_id)
        .bind(etag)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Stamp etag and sync time, optionally repointing to a new entity.
    async fn stamp_ext_ref_tx(
        tx: &mut Transaction<'_, Postgres>,
        ext_ref_id: Uuid,
        entity_id: Uuid,
        etag: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE ext_ref SET entity_id = $2, etag = $3, synced_at = $4 WHERE id = $1")
            .bind(ext_ref_id)
            .bind(entity_id)
            .bind(etag)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// `Some(deleted)` when the entity row exists.
    async fn entity_state_tx(
        tx: &mut Transaction<'_, Postgres>,
        table: EntityTable,
        entity_id: Uuid,
    ) -> Result<Option<bool>> {
        let row = sqlx::query(&format!(
            "SELECT deleted_at IS NOT NULL AS deleted FROM {} WHERE id = $1 FOR UPDATE",
            table.sql_table()
        ))
        .bind(entity_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| r.get("deleted")))
    }

    async fn create_entity_tx(
        tx: &mut Transaction<'_, Postgres>,
        table: EntityTable,
        values: &[(TrackedField, FieldValue)],
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let tenant = text_value(values, "tenant_id");
        let name = text_value(values, "name").unwrap_or_default();

        let query = match table {
            EntityTable::Location => sqlx::query(
                "INSERT INTO location (id, tenant_id, name, original_name, revision, address, active, updated_at)
                 VALUES ($1, $2, $3, $3, 1, $4, $5, $6)",
            )
            .bind(id)
            .bind(tenant)
            .bind(name)
            .bind(text_value(values, "address"))
            .bind(bool_value(values, "active").unwrap_or(true))
            .bind(now),
            EntityTable::Order => sqlx::query(
                r#"INSERT INTO "order" (id, tenant_id, name, status, updated_at)
                   VALUES ($1, $2, $3, $4, $5)"#,
            )
            .bind(id)
            .bind(tenant)
            .bind(name)
            .bind(text_value(values, "status").unwrap_or_default())
            .bind(now),
        };

        query.execute(&mut **tx).await.map_err(Error::Database)?;
        Ok(id)
    }

    /// Overwrite the present tracked fields. Returns whether anything changed.
    async fn update_entity_tx(
        tx: &mut Transaction<'_, Postgres>,
        table: EntityTable,
        entity_id: Uuid,
        values: &[(TrackedField, FieldValue)],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }

        let columns: Vec<&str> = values.iter().map(|(f, _)| f.column).collect();
        let params: Vec<String> = (0..values.len()).map(|i| format!("${}", i + 2)).collect();
        let sets: Vec<String> = columns
            .iter()
            .zip(&params)
            .map(|(c, p)| format!("{} = {}", c, p))
            .collect();
        let now_param = values.len() + 2;
        let revision = if table.has_revision() {
            ", revision = revision + 1"
        } else {
            ""
        };

        let sql = format!(
            "UPDATE {table} SET {sets}, updated_at = ${now_param}{revision}
             WHERE id = $1 AND ({columns}) IS DISTINCT FROM ({params})",
            table = table.sql_table(),
            sets = sets.join(", "),
            columns = columns.join(", "),
            params = params.join(", "),
        );

        let mut q = sqlx::query(&sql).bind(entity_id);
        for (_, value) in values {
            q = match value {
                FieldValue::Text(t) => q.bind(t.clone()),
                FieldValue::Bool(b) => q.bind(*b),
            };
        }
        let result = q
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Set `deleted_at` on a live entity. Returns whether it was live.
    async fn tombstone_entity_tx(
        tx: &mut Transaction<'_, Postgres>,
        table: EntityTable,
        entity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let revision = if table.has_revision() {
            ", revision = revision + 1"
        } else {
            ""
        };
        let result = sqlx::query(&format!(
            "UPDATE {} SET deleted_at = $2, updated_at = $2{} WHERE id = $1 AND deleted_at IS NULL",
            table.sql_table(),
            revision
        ))
        .bind(entity_id)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn audit_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        action: AuditAction,
        table: EntityTable,
        entity_id: Uuid,
        record: &ExternalRecord,
    ) -> Result<()> {
        let entry = NewAuditEntry::new(action, table.audit_entity(), entity_id, &self.actor())
            .with_payload(json!({
                "source": self.source,
                "external_id": record.id,
                "etag": record.etag,
            }));
        PgAuditLogRepository::append_tx(tx, entry).await?;
        Ok(())
    }

    async fn reconcile_record_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: EntityTable,
        record: &ExternalRecord,
    ) -> Result<Outcome> {
        let now = Utc::now();
        let etag = record.etag.as_deref();
        let ext = self.lock_ext_ref_tx(tx, table, &record.id).await?;

        if record.deleted {
            let Some((ext_id, entity_id)) = ext else {
                // Never seen: nothing to delete, and no mapping is created
                return Ok(Outcome::Skipped);
            };
            let tombstoned = Self::tombstone_entity_tx(tx, table, entity_id, now).await?;
            Self::stamp_ext_ref_tx(tx, ext_id, entity_id, etag, now).await?;
            if tombstoned {
                self.audit_tx(tx, AuditAction::Delete, table, entity_id, record)
                    .await?;
                return Ok(Outcome::Tombstoned);
            }
            return Ok(Outcome::Skipped);
        }

        let values = extract_tracked(table, record);

        match ext {
            Some((ext_id, entity_id)) => {
                match Self::entity_state_tx(tx, table, entity_id).await? {
                    Some(_) => {
                        let changed =
                            Self::update_entity_tx(tx, table, entity_id, &values, now).await?;
                        Self::stamp_ext_ref_tx(tx, ext_id, entity_id, etag, now).await?;
                        if changed {
                            self.audit_tx(tx, AuditAction::Update, table, entity_id, record)
                                .await?;
                        }
                        Ok(Outcome::Updated)
                    }
                    None => {
                        let new_id = Self::create_entity_tx(tx, table, &values, now).await?;
                        Self::stamp_ext_ref_tx(tx, ext_id, new_id, etag, now).await?;
                        self.audit_tx(tx, AuditAction::Create, table, new_id, record)
                            .await?;
                        warn!(
                            subsystem = "sync",
                            component = "reconciler",
                            entity_table = table.as_str(),
                            external_id = %record.id,
                            old_entity_id = %entity_id,
                            new_entity_id = %new_id,
                            "Mapped entity missing, recreated from external record"
                        );
                        Ok(Outcome::Recreated)
                    }
                }
            }
            None => {
                let entity_id = Self::create_entity_tx(tx, table, &values, now).await?;
                self.insert_ext_ref_tx(tx, table, &record.id, entity_id, etag, now)
                    .await?;
                self.audit_tx(tx, AuditAction::Create, table, entity_id, record)
                    .await?;
                Ok(Outcome::Created)
            }
        }
    }
}

#[async_trait]
impl Reconciler for PgReconciler {
    async fn reconcile(&self, batch: &ExternalBatch) -> Result<ReconcileReport> {
        let start = Instant::now();
        let mut report = ReconcileReport::default();

        for (name, records) in &batch.tables {
            if EntityTable::from_feed_key(name).is_none() {
                warn!(
                    subsystem = "sync",
                    component = "reconciler",
                    entity_table = %name,
                    record_count = records.len(),
                    "Skipping unknown external table"
                );
                report.skipped += records.len() as u64;
            }
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for table in EntityTable::ALL {
            let Some(records) = batch.tables.get(table.feed_key()) else {
                continue;
            };
            debug!(
                subsystem = "sync",
                component = "reconciler",
                op = "reconcile_table",
                entity_table = table.feed_key(),
                record_count = records.len(),
                "Reconciling table"
            );
            for record in records {
                let outcome = self.reconcile_record_tx(&mut tx, table, record).await?;
                trace!(
                    subsystem = "sync",
                    component = "reconciler",
                    entity_table = table.feed_key(),
                    external_id = %record.id,
                    outcome = ?outcome,
                    "Record reconciled"
                );
                outcome.tally(&mut report);
            }
        }

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "sync",
            component = "reconciler",
            op = "reconcile",
            source = %self.source,
            created = report.created,
            updated = report.updated,
            recreated = report.recreated,
            tombstoned = report.tombstoned,
            skipped = report.skipped,
            duration_ms = start.elapsed().as_millis() as u64,
            "Reconciliation pass complete"
        );
        Ok(report)
    }
}
