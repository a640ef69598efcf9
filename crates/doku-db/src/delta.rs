//! Delta sync queries for offline clients.
//!
//! Upserts are live rows with `updated_at >= since`; tombstones are rows with
//! `deleted_at >= since`. A row is either live or deleted, so no id appears in
//! both lists. The tenant predicate is identical in both halves.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use doku_core::{
    DeltaRepository, DeltaResponse, Error, Location, Photo, Result, TenantScope, Tombstone,
};

use crate::locations::{parse_location_row, LOCATION_COLUMNS};
use crate::photos::{parse_photo_row, PHOTO_COLUMNS};

/// Read-only delta feed over locations and photos.
#[derive(Clone)]
pub struct PgDeltaRepository {
    pool: Pool<Postgres>,
}

impl PgDeltaRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn tombstones(
        &self,
        table: &str,
        tenant: TenantScope<'_>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Tombstone>> {
        let ids: Vec<Uuid> = sqlx::query_scalar::<_, Uuid>(&format!(
            "SELECT id FROM {table}
             WHERE deleted_at IS NOT NULL AND deleted_at >= $1
               AND ($2::text IS NULL OR tenant_id = $2)
             ORDER BY deleted_at ASC, id ASC"
        ))
        .bind(since)
        .bind(tenant)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(ids.into_iter().map(|id| Tombstone { id }).collect())
    }
}

#[async_trait]
impl DeltaRepository for PgDeltaRepository {
    async fn locations_since(
        &self,
        tenant: TenantScope<'_>,
        since: DateTime<Utc>,
    ) -> Result<DeltaResponse<Location>> {
        let start = Instant::now();
        let rows = sqlx::query(&format!(
            "SELECT {LOCATION_COLUMNS} FROM location
             WHERE deleted_at IS NULL AND updated_at >= $1
               AND ($2::text IS NULL OR tenant_id = $2)
             ORDER BY updated_at ASC, id ASC"
        ))
        .bind(since)
        .bind(tenant)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let upserts: Vec<Location> = rows.into_iter().map(parse_location_row).collect();
        let tombstones = self.tombstones("location", tenant, since).await?;

        debug!(
            subsystem = "db",
            component = "delta",
            op = "locations_since",
            upserts = upserts.len(),
            tombstones = tombstones.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Location delta computed"
        );
        Ok(DeltaResponse {
            upserts,
            tombstones,
        })
    }

    async fn photos_since(
        &self,
        tenant: TenantScope<'_>,
        since: DateTime<Utc>,
    ) -> Result<DeltaResponse<Photo>> {
        let start = Instant::now();
        let rows = sqlx::query(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photo
             WHERE deleted_at IS NULL AND updated_at >= $1
               AND ($2::text IS NULL OR tenant_id = $2)
             ORDER BY updated_at ASC, id ASC"
        ))
        .bind(since)
        .bind(tenant)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let upserts = rows
            .into_iter()
            .map(parse_photo_row)
            .collect::<Result<Vec<Photo>>>()?;
        let tombstones = self.tombstones("photo", tenant, since).await?;

        debug!(
            subsystem = "db",
            component = "delta",
            op = "photos_since",
            upserts = upserts.len(),
            tombstones = tombstones.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Photo delta computed"
        );
        Ok(DeltaResponse {
            upserts,
            tombstones,
        })
    }
}
