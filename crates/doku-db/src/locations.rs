//! Location repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use doku_core::{
    Error, GeoPoint, Location, LocationRepository, NewLocation, Result, TenantScope,
    UpdateLocationRequest,
};

/// Column list shared by every query returning a [`Location`].
pub(crate) const LOCATION_COLUMNS: &str = "id, tenant_id, name, original_name, revision, address, \
     ST_Y(geog::geometry) AS lat, ST_X(geog::geometry) AS lon, \
     active, updated_at, deleted_at";

pub(crate) fn point_from_row(row: &PgRow) -> Option<GeoPoint> {
    let lat: Option<f64> = row.get("lat");
    let lon: Option<f64> = row.get("lon");
    match (lat, lon) {
        (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
        _ => None,
    }
}

pub(crate) fn parse_location_row(row: PgRow) -> Location {
    Location {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        original_name: row.get("original_name"),
        revision: row.get("revision"),
        address: row.get("address"),
        point: point_from_row(&row),
        active: row.get("active"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    }
}

/// PostgreSQL implementation of LocationRepository.
#[derive(Clone)]
pub struct PgLocationRepository {
    pool: Pool<Postgres>,
}

impl PgLocationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a location within an existing transaction.
    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        req: NewLocation,
    ) -> Result<Location> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let (lat, lon) = req.point.map(|p| (p.lat, p.lon)).unzip();

        let row = sqlx::query(&format!(
            "INSERT INTO location (id, tenant_id, name, original_name, revision, address, geog, active, updated_at)
             VALUES ($1, $2, $3, $3, 1, $4, ST_SetSRID(ST_MakePoint($6, $5), 4326)::geography, $7, $8)
             RETURNING {LOCATION_COLUMNS}"
        ))
        .bind(id)
        .bind(&req.tenant_id)
        .bind(&req.name)
        .bind(&req.address)
        .bind(lat)
        .bind(lon)
        .bind(req.active)
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(parse_location_row(row))
    }
}

#[async_trait]
impl LocationRepository for PgLocationRepository {
    async fn insert(&self, req: NewLocation) -> Result<Location> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let location = self.insert_tx(&mut tx, req).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(location)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Location>> {
        let row = sqlx::query(&format!(
            "SELECT {LOCATION_COLUMNS} FROM location WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(parse_location_row))
    }

    async fn update(
        &self,
        tenant: TenantScope<'_>,
        id: Uuid,
        req: UpdateLocationRequest,
    ) -> Result<Location> {
        let (lat, lon) = req.point.map(|p| (p.lat, p.lon)).unzip();

        let row = sqlx::query(&format!(
            "UPDATE location SET
                 name = COALESCE($3, name),
                 original_name = COALESCE($4, original_name),
                 address = COALESCE($5, address),
                 geog = COALESCE(ST_SetSRID(ST_MakePoint($7, $6), 4326)::geography, geog),
                 active = COALESCE($8, active),
                 revision = revision + 1,
                 updated_at = $9
             WHERE id = $1
               AND deleted_at IS NULL
               AND ($2::text IS NULL OR tenant_id = $2)
             RETURNING {LOCATION_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant)
        .bind(&req.name)
        .bind(&req.original_name)
        .bind(&req.address)
        .bind(lat)
        .bind(lon)
        .bind(req.active)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(parse_location_row)
            .ok_or(Error::LocationNotFound(id))
    }

    async fn soft_delete(&self, tenant: TenantScope<'_>, id: Uuid) -> Result<Location> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let existing = sqlx::query(&format!(
            "SELECT {LOCATION_COLUMNS} FROM location
             WHERE id = $1 AND ($2::text IS NULL OR tenant_id = $2)
             FOR UPDATE"
        ))
        .bind(id)
        .bind(tenant)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .map(parse_location_row)
        .ok_or(Error::LocationNotFound(id))?;

        if existing.deleted_at.is_some() {
            tx.commit().await.map_err(Error::Database)?;
            return Ok(existing);
        }

        let now = Utc::now();
        let row = sqlx::query(&format!(
            "UPDATE location SET deleted_at = $2, updated_at = $2, revision = revision + 1
             WHERE id = $1
             RETURNING {LOCATION_COLUMNS}"
        ))
        .bind(id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(parse_location_row(row))
    }

    async fn find_nearest_within(
        &self,
        tenant: TenantScope<'_>,
        point: GeoPoint,
        tolerance_m: f64,
    ) -> Result<Option<Location>> {
        let row = sqlx::query(&format!(
            "WITH target AS (
                 SELECT ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography AS g
             )
             SELECT {LOCATION_COLUMNS}
             FROM location, target
             WHERE deleted_at IS NULL
               AND active
               AND geog IS NOT NULL
               AND tenant_id IS NOT DISTINCT FROM $4
               AND ST_DWithin(geog, target.g, $3)
             ORDER BY ST_Distance(geog, target.g) ASC, id ASC
             LIMIT 1"
        ))
        .bind(point.lat)
        .bind(point.lon)
        .bind(tolerance_m)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let location = row.map(parse_location_row);
        debug!(
            subsystem = "db",
            component = "locations",
            op = "find_nearest_within",
            tolerance_m,
            matched = location.is_some(),
            "Nearest location lookup"
        );
        Ok(location)
    }
}
