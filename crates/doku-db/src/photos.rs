//! Photo repository implementation.
//!
//! Duplicate detection is serialised per (tenant, content hash) with a
//! transaction-scoped advisory lock, so the existence check and the insert
//! are atomic with respect to concurrent uploads of the same bytes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::{postgres::PgRow, Pool, Postgres, Row, Transaction};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use doku_core::{
    AuditAction, AuditEntity, Error, IngestedPhoto, JobType, NewAuditEntry, NewPhoto, Photo,
    PhotoFinalization, PhotoRepository, PhotoStatus, Result, TenantScope, UpdatePhotoRequest,
};

use crate::audit::PgAuditLogRepository;
use crate::jobs::PgJobRepository;
use crate::locations::point_from_row;

/// Column list shared by every query returning a [`Photo`].
pub(crate) const PHOTO_COLUMNS: &str = "id, object_key, taken_at, mode, tenant_id, uploader_id, \
     device_id, site_id, location_id, order_id, \
     ST_Y(geog::geometry) AS lat, ST_X(geog::geometry) AS lon, \
     address, content_hash, perceptual_hash, is_duplicate, quality_flag, note, \
     calendar_week, status, thumbnail_key, updated_at, deleted_at";

pub(crate) fn parse_photo_row(row: PgRow) -> Result<Photo> {
    let mode: String = row.get("mode");
    let status: String = row.get("status");
    Ok(Photo {
        id: row.get("id"),
        object_key: row.get("object_key"),
        taken_at: row.get("taken_at"),
        mode: mode.parse()?,
        tenant_id: row.get("tenant_id"),
        uploader_id: row.get("uploader_id"),
        device_id: row.get("device_id"),
        site_id: row.get("site_id"),
        location_id: row.get("location_id"),
        order_id: row.get("order_id"),
        point: point_from_row(&row),
        address: row.get("address"),
        content_hash: row.get("content_hash"),
        perceptual_hash: row.get("perceptual_hash"),
        is_duplicate: row.get("is_duplicate"),
        quality_flag: row.get("quality_flag"),
        note: row.get("note"),
        calendar_week: row.get("calendar_week"),
        status: status.parse()?,
        thumbnail_key: row.get("thumbnail_key"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    })
}

/// Advisory-lock key for duplicate detection within one tenant.
fn dedup_lock_key(tenant: Option<&str>, content_hash: &str) -> String {
    format!("photo-dedup:{}:{}", tenant.unwrap_or(""), content_hash)
}

/// PostgreSQL implementation of PhotoRepository.
#[derive(Clone)]
pub struct PgPhotoRepository {
    pool: Pool<Postgres>,
    /// Woken after an ingest commits its finalize job.
    job_notify: Option<Arc<Notify>>,
}

impl PgPhotoRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            job_notify: None,
        }
    }

    /// Wake job workers sharing `notify` whenever an ingest queues a job.
    pub fn with_job_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self {
            pool,
            job_notify: Some(notify),
        }
    }

    /// Lock a photo row for update within the tenant scope.
    async fn lock_tx(
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantScope<'_>,
        id: Uuid,
    ) -> Result<Photo> {
        let row = sqlx::query(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photo
             WHERE id = $1 AND ($2::text IS NULL OR tenant_id = $2)
             FOR UPDATE"
        ))
        .bind(id)
        .bind(tenant)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;

        row.map(parse_photo_row)
            .transpose()?
            .ok_or(Error::PhotoNotFound(id))
    }

    /// Insert a photo and decide its duplicate flag within `tx`.
    ///
    /// The advisory lock is held until `tx` ends.
    async fn insert_deduplicated_tx(
        tx: &mut Transaction<'_, Postgres>,
        req: &NewPhoto,
    ) -> Result<Photo> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(dedup_lock_key(req.tenant_id.as_deref(), &req.content_hash))
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        let is_duplicate: bool = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                 SELECT 1 FROM photo
                 WHERE tenant_id IS NOT DISTINCT FROM $1 AND content_hash = $2
             )",
        )
        .bind(&req.tenant_id)
        .bind(&req.content_hash)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let id = Uuid::now_v7();
        let (lat, lon) = req.point.map(|p| (p.lat, p.lon)).unzip();
        let row = sqlx::query(&format!(
            "INSERT INTO photo (id, object_key, taken_at, mode, tenant_id, uploader_id, device_id,
                                site_id, location_id, geog, address, content_hash, perceptual_hash,
                                is_duplicate, calendar_week, status, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                     ST_SetSRID(ST_MakePoint($11, $10), 4326)::geography,
                     $12, $13, $14, $15, $16, $17, $18)
             RETURNING {PHOTO_COLUMNS}"
        ))
        .bind(id)
        .bind(&req.object_key)
        .bind(req.taken_at)
        .bind(req.mode.as_str())
        .bind(&req.tenant_id)
        .bind(&req.uploader_id)
        .bind(&req.device_id)
        .bind(req.site_id)
        .bind(req.location_id)
        .bind(lat)
        .bind(lon)
        .bind(&req.address)
        .bind(&req.content_hash)
        .bind(&req.perceptual_hash)
        .bind(is_duplicate)
        .bind(&req.calendar_week)
        .bind(PhotoStatus::Ingested.as_str())
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "photos",
            op = "insert_deduplicated",
            photo_id = %id,
            is_duplicate,
            "Photo inserted"
        );
        parse_photo_row(row)
    }
}

#[async_trait]
impl PhotoRepository for PgPhotoRepository {
    async fn insert_deduplicated(&self, req: NewPhoto) -> Result<Photo> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let photo = Self::insert_deduplicated_tx(&mut tx, &req).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(photo)
    }

    async fn insert_ingested(&self, req: NewPhoto, actor: &str) -> Result<IngestedPhoto> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let photo = Self::insert_deduplicated_tx(&mut tx, &req).await?;
        PgAuditLogRepository::append_tx(&mut tx, photo.ingest_audit_entry(actor)).await?;
        let finalize_job_id = PgJobRepository::enqueue_tx(
            &mut tx,
            JobType::FinalizePhoto,
            Some(photo.id),
            Some(photo.finalize_job_payload()),
        )
        .await?;
        tx.commit().await.map_err(Error::Database)?;

        if let Some(notify) = &self.job_notify {
            notify.notify_waiters();
        }
        Ok(IngestedPhoto {
            photo,
            finalize_job_id,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Photo>> {
        let row = sqlx::query(&format!("SELECT {PHOTO_COLUMNS} FROM photo WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(parse_photo_row).transpose()
    }

    async fn set_finalized(&self, id: Uuid, finalization: &PhotoFinalization) -> Result<()> {
        // updated_at only moves when a value changes, so re-running is a no-op
        let result = sqlx::query(
            "UPDATE photo SET
                 updated_at = CASE
                     WHEN (content_hash, thumbnail_key, status) IS DISTINCT FROM ($2, $3, $4)
                     THEN $5 ELSE updated_at END,
                 content_hash = $2,
                 thumbnail_key = $3,
                 status = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(&finalization.content_hash)
        .bind(&finalization.thumbnail_key)
        .bind(PhotoStatus::Finalized.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::PhotoNotFound(id));
        }
        Ok(())
    }

    async fn assign_to_order(
        &self,
        tenant: TenantScope<'_>,
        photo_ids: &[Uuid],
        order_id: Uuid,
        week_override: Option<&str>,
        actor: &str,
    ) -> Result<Vec<Photo>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let order_exists: bool = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(
                   SELECT 1 FROM "order"
                   WHERE id = $1 AND deleted_at IS NULL
                     AND ($2::text IS NULL OR tenant_id = $2)
               )"#,
        )
        .bind(order_id)
        .bind(tenant)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if !order_exists {
            return Err(Error::OrderNotFound(order_id));
        }

        let live: HashSet<Uuid> = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM photo
             WHERE id = ANY($1) AND deleted_at IS NULL
               AND ($2::text IS NULL OR tenant_id = $2)
             ORDER BY id
             FOR UPDATE",
        )
        .bind(photo_ids)
        .bind(tenant)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?
        .into_iter()
        .collect();

        if let Some(missing) = photo_ids.iter().find(|id| !live.contains(id)) {
            return Err(Error::PhotoNotFound(*missing));
        }

        let rows = sqlx::query(&format!(
            "UPDATE photo SET
                 order_id = $2,
                 calendar_week = COALESCE($3, calendar_week),
                 updated_at = $4
             WHERE id = ANY($1)
             RETURNING {PHOTO_COLUMNS}"
        ))
        .bind(photo_ids)
        .bind(order_id)
        .bind(week_override)
        .bind(Utc::now())
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let mut by_id: HashMap<Uuid, Photo> = HashMap::with_capacity(rows.len());
        for row in rows {
            let photo = parse_photo_row(row)?;
            by_id.insert(photo.id, photo);
        }

        let mut updated = Vec::with_capacity(by_id.len());
        for id in photo_ids {
            if let Some(photo) = by_id.remove(id) {
                let entry =
                    NewAuditEntry::new(AuditAction::Update, AuditEntity::Photo, photo.id, actor)
                        .with_payload(json!({
                            "order_id": order_id,
                            "calendar_week": photo.calendar_week,
                        }));
                PgAuditLogRepository::append_tx(&mut tx, entry).await?;
                updated.push(photo);
            }
        }

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "photos",
            op = "assign_to_order",
            order_id = %order_id,
            result_count = updated.len(),
            week_override = week_override.unwrap_or(""),
            "Photos assigned to order"
        );
        Ok(updated)
    }

    async fn update_annotations(
        &self,
        tenant: TenantScope<'_>,
        id: Uuid,
        req: UpdatePhotoRequest,
        actor: &str,
    ) -> Result<Photo> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "UPDATE photo SET
                 quality_flag = COALESCE($3, quality_flag),
                 note = COALESCE($4, note),
                 updated_at = $5
             WHERE id = $1 AND deleted_at IS NULL
               AND ($2::text IS NULL OR tenant_id = $2)
             RETURNING {PHOTO_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant)
        .bind(req.quality_flag)
        .bind(&req.note)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::PhotoNotFound(id))?;

        let photo = parse_photo_row(row)?;
        let entry = NewAuditEntry::new(AuditAction::Update, AuditEntity::Photo, id, actor)
            .with_payload(serde_json::to_value(&req)?);
        PgAuditLogRepository::append_tx(&mut tx, entry).await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(photo)
    }

    async fn soft_delete(&self, tenant: TenantScope<'_>, id: Uuid, actor: &str) -> Result<Photo> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let existing = Self::lock_tx(&mut tx, tenant, id).await?;
        if existing.deleted_at.is_some() {
            tx.commit().await.map_err(Error::Database)?;
            return Ok(existing);
        }

        let now = Utc::now();
        let row = sqlx::query(&format!(
            "UPDATE photo SET deleted_at = $2, updated_at = $2
             WHERE id = $1
             RETURNING {PHOTO_COLUMNS}"
        ))
        .bind(id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let entry = NewAuditEntry::new(AuditAction::Delete, AuditEntity::Photo, id, actor);
        PgAuditLogRepository::append_tx(&mut tx, entry).await?;

        tx.commit().await.map_err(Error::Database)?;
        parse_photo_row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_lock_key_scoped_by_tenant() {
        assert_ne!(
            dedup_lock_key(Some("t1"), "abc"),
            dedup_lock_key(Some("t2"), "abc")
        );
        assert_eq!(dedup_lock_key(None, "abc"), "photo-dedup::abc");
    }
}
