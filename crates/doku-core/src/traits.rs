//! Core traits for DokuSuite abstractions.
//!
//! These traits are the seams between the ingestion/sync logic and its
//! collaborators (object storage, PostgreSQL, the geocoder, the external
//! system-of-record), so each can be swapped for an in-memory double in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

/// Tenant scope of a caller. `None` is an unscoped administrative caller.
pub type TenantScope<'a> = Option<&'a str>;

// =============================================================================
// STORAGE
// =============================================================================

/// Object storage for uploaded images and derived thumbnails.
///
/// Failures surface as [`crate::Error::Storage`].
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read the object stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Write (or overwrite) the object stored under `key`.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

// =============================================================================
// GEO
// =============================================================================

/// Coordinate to postal address.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// `Ok(None)` when the service has no address for the point.
    async fn lookup(&self, point: GeoPoint) -> Result<Option<String>>;

    /// Whether lookups can produce anything at all.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// String cache with per-entry expiry.
///
/// Backend failures are logged by implementations and behave like a miss.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: &str, ttl: Duration);
}

// =============================================================================
// EXTERNAL SYSTEM-OF-RECORD
// =============================================================================

/// Pulls one batch of records from the external source.
#[async_trait]
pub trait ExternalSourceFeed: Send + Sync {
    async fn fetch(&self) -> Result<ExternalBatch>;
}

/// Applies an external batch to local entities through ExtRef mappings.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, batch: &ExternalBatch) -> Result<ReconcileReport>;
}

// =============================================================================
// REPOSITORIES
// =============================================================================

#[async_trait]
pub trait LocationRepository: Send + Sync {
    async fn insert(&self, location: NewLocation) -> Result<Location>;

    /// Fetch by id regardless of lifecycle state.
    async fn get(&self, id: Uuid) -> Result<Option<Location>>;

    /// Partial update of a live location; bumps revision and `updated_at`.
    async fn update(
        &self,
        tenant: TenantScope<'_>,
        id: Uuid,
        req: UpdateLocationRequest,
    ) -> Result<Location>;

    /// Tombstone a location. Already-deleted locations keep their `deleted_at`.
    async fn soft_delete(&self, tenant: TenantScope<'_>, id: Uuid) -> Result<Location>;

    /// Nearest live, active location within `tolerance_m` of `point`.
    ///
    /// Only locations of exactly `tenant` are candidates; `None` matches
    /// tenantless locations only.
    async fn find_nearest_within(
        &self,
        tenant: TenantScope<'_>,
        point: GeoPoint,
        tolerance_m: f64,
    ) -> Result<Option<Location>>;
}

#[async_trait]
pub trait PhotoRepository: Send + Sync {
    /// Insert a photo, deciding its duplicate flag atomically with the insert.
    ///
    /// The flag is true iff a photo of the same tenant with the same content
    /// hash already exists, in any lifecycle state.
    async fn insert_deduplicated(&self, photo: NewPhoto) -> Result<Photo>;

    /// Insert like [`insert_deduplicated`](Self::insert_deduplicated) and, in
    /// the same unit of work, append the `create` audit entry and queue the
    /// `finalize_photo` job. On error nothing is persisted.
    async fn insert_ingested(&self, photo: NewPhoto, actor: &str) -> Result<IngestedPhoto>;

    /// Fetch by id regardless of lifecycle state.
    async fn get(&self, id: Uuid) -> Result<Option<Photo>>;

    /// Record finalize-job output and mark the photo finalized.
    async fn set_finalized(&self, id: Uuid, finalization: &PhotoFinalization) -> Result<()>;

    /// Attach live photos to an order in one transaction, optionally
    /// overriding their calendar week. Appends one audit entry per photo.
    /// Any missing photo or order rejects the whole call.
    async fn assign_to_order(
        &self,
        tenant: TenantScope<'_>,
        photo_ids: &[Uuid],
        order_id: Uuid,
        week_override: Option<&str>,
        actor: &str,
    ) -> Result<Vec<Photo>>;

    /// Partial update of quality flag and note, with audit.
    async fn update_annotations(
        &self,
        tenant: TenantScope<'_>,
        id: Uuid,
        req: UpdatePhotoRequest,
        actor: &str,
    ) -> Result<Photo>;

    /// Tombstone a photo, with audit. Deleting twice keeps the first `deleted_at`.
    async fn soft_delete(&self, tenant: TenantScope<'_>, id: Uuid, actor: &str) -> Result<Photo>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: NewOrder) -> Result<Order>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: NewAuditEntry) -> Result<Uuid>;

    /// Entries for one entity, oldest first.
    async fn list_for_entity(
        &self,
        entity: AuditEntity,
        entity_id: Uuid,
    ) -> Result<Vec<AuditLogEntry>>;
}

/// Incremental change feed for offline clients.
///
/// Both halves use inclusive `>= since` comparisons, so a client re-sending
/// its last cursor may see a row twice but never misses one.
#[async_trait]
pub trait DeltaRepository: Send + Sync {
    async fn locations_since(
        &self,
        tenant: TenantScope<'_>,
        since: DateTime<Utc>,
    ) -> Result<DeltaResponse<Location>>;

    async fn photos_since(
        &self,
        tenant: TenantScope<'_>,
        since: DateTime<Utc>,
    ) -> Result<DeltaResponse<Photo>>;
}

// =============================================================================
// JOB QUEUE
// =============================================================================

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a new job at the type's default priority.
    async fn enqueue(
        &self,
        job_type: JobType,
        subject_id: Option<Uuid>,
        payload: Option<JsonValue>,
    ) -> Result<Uuid>;

    /// Claim the next pending job whose type is in `job_types`.
    /// An empty slice means "claim any type".
    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>>;

    /// Mark job as completed.
    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Mark job as failed. Returns it to pending while retries remain.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Return jobs left `running` for longer than `older_than` to pending.
    ///
    /// Their worker died mid-run, so the lost run counts as one retry; jobs
    /// already out of retries are marked failed. Returns how many jobs moved.
    async fn requeue_stale(&self, older_than: Duration) -> Result<u64>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Get pending jobs count.
    async fn pending_count(&self) -> Result<i64>;
}
