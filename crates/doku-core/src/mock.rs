//! In-memory implementations of the core traits for deterministic testing.
//!
//! Enabled with the `mock` feature. Every double is cheap to clone and shares
//! its state between clones, so a test can hand one clone to the code under
//! test and keep another for assertions.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use doku_core::mock::{MemoryContentStore, MemoryStore, MockGeocoder};
//!
//! let store = MemoryContentStore::new().with_object("uploads/a.jpg", bytes);
//! let geocoder = MockGeocoder::new().with_address("Alexanderplatz 1, Berlin");
//! let db = MemoryStore::new();
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};
use crate::models::*;
use crate::traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn in_scope(tenant: TenantScope<'_>, row_tenant: &Option<String>) -> bool {
    match tenant {
        None => true,
        Some(t) => row_tenant.as_deref() == Some(t),
    }
}

// =============================================================================
// CONTENT STORE
// =============================================================================

/// Object store backed by a `HashMap`.
#[derive(Clone, Default)]
pub struct MemoryContentStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    put_log: Arc<Mutex<Vec<String>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, bytes: Vec<u8>) -> Self {
        lock(&self.objects).insert(key.to_string(), bytes);
        self
    }

    /// Make every call fail with a storage error.
    pub fn set_unavailable(&self, unavailable: bool) {
        *lock(&self.unavailable) = unavailable;
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).cloned()
    }

    /// Keys written through `put`, in call order.
    pub fn put_keys(&self) -> Vec<String> {
        lock(&self.put_log).clone()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        if *lock(&self.unavailable) {
            return Err(Error::Storage("content store unavailable".to_string()));
        }
        lock(&self.objects)
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("object not found: {}", key)))
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        if *lock(&self.unavailable) {
            return Err(Error::Storage("content store unavailable".to_string()));
        }
        lock(&self.objects).insert(key.to_string(), bytes.to_vec());
        lock(&self.put_log).push(key.to_string());
        Ok(())
    }
}

// =============================================================================
// GEOCODER
// =============================================================================

#[derive(Clone, Default)]
struct GeocoderConfig {
    address: Option<String>,
    fail: bool,
    latency: Option<Duration>,
}

/// Geocoder returning a fixed answer and counting calls.
#[derive(Clone, Default)]
pub struct MockGeocoder {
    config: Arc<GeocoderConfig>,
    calls: Arc<Mutex<Vec<GeoPoint>>>,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).address = Some(address.into());
        self
    }

    /// Fail every lookup with a geocoder error.
    pub fn failing(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls(&self) -> Vec<GeoPoint> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ReverseGeocoder for MockGeocoder {
    async fn lookup(&self, point: GeoPoint) -> Result<Option<String>> {
        lock(&self.calls).push(point);
        if let Some(latency) = self.config.latency {
            tokio::time::sleep(latency).await;
        }
        if self.config.fail {
            return Err(Error::Geocoder("mock geocoder failure".to_string()));
        }
        Ok(self.config.address.clone())
    }
}

// =============================================================================
// EXTERNAL SOURCE
// =============================================================================

/// Feed returning a fixed batch, or failing.
#[derive(Clone, Default)]
pub struct MockFeed {
    batch: Arc<Mutex<Option<ExternalBatch>>>,
    fetches: Arc<Mutex<usize>>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(self, batch: ExternalBatch) -> Self {
        *lock(&self.batch) = Some(batch);
        self
    }

    /// A feed with no batch configured fails every fetch.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn fetch_count(&self) -> usize {
        *lock(&self.fetches)
    }
}

#[async_trait]
impl ExternalSourceFeed for MockFeed {
    async fn fetch(&self) -> Result<ExternalBatch> {
        *lock(&self.fetches) += 1;
        lock(&self.batch)
            .clone()
            .ok_or_else(|| Error::ExternalSource("mock feed unavailable".to_string()))
    }
}

/// Reconciler that records every batch and counts records as created.
#[derive(Clone, Default)]
pub struct RecordingReconciler {
    batches: Arc<Mutex<Vec<ExternalBatch>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn batches(&self) -> Vec<ExternalBatch> {
        lock(&self.batches).clone()
    }
}

#[async_trait]
impl Reconciler for RecordingReconciler {
    async fn reconcile(&self, batch: &ExternalBatch) -> Result<ReconcileReport> {
        if *lock(&self.fail) {
            return Err(Error::Internal("mock reconciler failure".to_string()));
        }
        lock(&self.batches).push(batch.clone());
        Ok(ReconcileReport {
            created: batch.record_count() as u64,
            ..Default::default()
        })
    }
}

// =============================================================================
// JOB QUEUE
// =============================================================================

/// FIFO job queue with the same retry semantics as the database queue.
#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    jobs: Arc<Mutex<Vec<Job>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every enqueue fail until reset.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    fn push(
        &self,
        job_type: JobType,
        subject_id: Option<Uuid>,
        payload: Option<JsonValue>,
    ) -> Result<Uuid> {
        if *lock(&self.failing) {
            return Err(Error::Job("job queue unavailable".to_string()));
        }
        let id = Uuid::now_v7();
        lock(&self.jobs).push(Job {
            id,
            job_type,
            subject_id,
            status: JobStatus::Pending,
            priority: job_type.default_priority(),
            payload,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: defaults::JOB_MAX_RETRIES,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        });
        Ok(id)
    }

    pub fn jobs(&self) -> Vec<Job> {
        lock(&self.jobs).clone()
    }

    pub fn jobs_of_type(&self, job_type: JobType) -> Vec<Job> {
        lock(&self.jobs)
            .iter()
            .filter(|j| j.job_type == job_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobRepository for MemoryJobQueue {
    async fn enqueue(
        &self,
        job_type: JobType,
        subject_id: Option<Uuid>,
        payload: Option<JsonValue>,
    ) -> Result<Uuid> {
        self.push(job_type, subject_id, payload)
    }

    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        let mut jobs = lock(&self.jobs);
        let next = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .filter(|j| job_types.is_empty() || job_types.contains(&j.job_type))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| b.id.cmp(&a.id))
            });
        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        job.status = JobStatus::Completed;
        job.result = result;
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        job.error_message = Some(error.to_string());
        if job.retry_count < job.max_retries {
            job.retry_count += 1;
            job.status = JobStatus::Pending;
            job.started_at = None;
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| Error::InvalidInput(format!("stale threshold: {}", e)))?;
        let mut moved = 0;
        for job in lock(&self.jobs).iter_mut() {
            let stale = job.status == JobStatus::Running
                && job.started_at.is_some_and(|started| started <= cutoff);
            if !stale {
                continue;
            }
            job.error_message = Some(defaults::STALE_JOB_ERROR.to_string());
            if job.retry_count < job.max_retries {
                job.retry_count += 1;
                job.status = JobStatus::Pending;
                job.started_at = None;
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
            }
            moved += 1;
        }
        Ok(moved)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(lock(&self.jobs).iter().find(|j| j.id == job_id).cloned())
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(lock(&self.jobs)
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count() as i64)
    }
}

// =============================================================================
// ENTITY STORE
// =============================================================================

#[derive(Default)]
struct StoreState {
    locations: Vec<Location>,
    photos: Vec<Photo>,
    orders: Vec<Order>,
    audit: Vec<AuditLogEntry>,
}

impl StoreState {
    fn push_photo(&mut self, req: NewPhoto) -> Photo {
        let is_duplicate = self
            .photos
            .iter()
            .any(|p| p.tenant_id == req.tenant_id && p.content_hash == req.content_hash);
        let photo = Photo {
            id: Uuid::now_v7(),
            object_key: req.object_key,
            taken_at: req.taken_at,
            mode: req.mode,
            tenant_id: req.tenant_id,
            uploader_id: req.uploader_id,
            device_id: req.device_id,
            site_id: req.site_id,
            location_id: req.location_id,
            order_id: None,
            point: req.point,
            address: req.address,
            content_hash: req.content_hash,
            perceptual_hash: req.perceptual_hash,
            is_duplicate,
            quality_flag: false,
            note: None,
            calendar_week: req.calendar_week,
            status: PhotoStatus::Ingested,
            thumbnail_key: None,
            updated_at: Utc::now(),
            deleted_at: None,
        };
        self.photos.push(photo.clone());
        photo
    }

    fn push_audit(&mut self, entry: NewAuditEntry) -> Uuid {
        let id = Uuid::now_v7();
        self.audit.push(AuditLogEntry {
            id,
            action: entry.action,
            entity: entry.entity,
            entity_id: entry.entity_id,
            actor: entry.actor,
            timestamp: Utc::now(),
            payload: entry.payload,
        });
        id
    }
}

/// Locations, photos, orders and the audit log behind one lock.
///
/// Holding a single lock per call makes every operation atomic, which is
/// what the transactional database implementation guarantees. Ingests queue
/// their finalize job on `jobs`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    jobs: MemoryJobQueue,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue finalize jobs on a shared queue.
    pub fn with_jobs(mut self, jobs: MemoryJobQueue) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn photos(&self) -> Vec<Photo> {
        lock(&self.state).photos.clone()
    }

    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        lock(&self.state).audit.clone()
    }

    /// Ids of photos that share a content hash with an earlier photo.
    pub fn duplicate_ids(&self) -> HashSet<Uuid> {
        lock(&self.state)
            .photos
            .iter()
            .filter(|p| p.is_duplicate)
            .map(|p| p.id)
            .collect()
    }
}

#[async_trait]
impl LocationRepository for MemoryStore {
    async fn insert(&self, req: NewLocation) -> Result<Location> {
        let location = Location {
            id: Uuid::now_v7(),
            tenant_id: req.tenant_id,
            original_name: req.name.clone(),
            name: req.name,
            revision: 1,
            address: req.address,
            point: req.point,
            active: req.active,
            updated_at: Utc::now(),
            deleted_at: None,
        };
        lock(&self.state).locations.push(location.clone());
        Ok(location)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Location>> {
        Ok(lock(&self.state)
            .locations
            .iter()
            .find(|l| l.id == id)
            .cloned())
    }

    async fn update(
        &self,
        tenant: TenantScope<'_>,
        id: Uuid,
        req: UpdateLocationRequest,
    ) -> Result<Location> {
        let mut state = lock(&self.state);
        let location = state
            .locations
            .iter_mut()
            .find(|l| l.id == id && l.is_live() && in_scope(tenant, &l.tenant_id))
            .ok_or(Error::LocationNotFound(id))?;
        if let Some(name) = req.name {
            location.name = name;
        }
        if let Some(original_name) = req.original_name {
            location.original_name = original_name;
        }
        if let Some(address) = req.address {
            location.address = Some(address);
        }
        if let Some(point) = req.point {
            location.point = Some(point);
        }
        if let Some(active) = req.active {
            location.active = active;
        }
        location.revision += 1;
        location.updated_at = Utc::now();
        Ok(location.clone())
    }

    async fn soft_delete(&self, tenant: TenantScope<'_>, id: Uuid) -> Result<Location> {
        let mut state = lock(&self.state);
        let location = state
            .locations
            .iter_mut()
            .find(|l| l.id == id && in_scope(tenant, &l.tenant_id))
            .ok_or(Error::LocationNotFound(id))?;
        if location.deleted_at.is_none() {
            let now = Utc::now();
            location.deleted_at = Some(now);
            location.updated_at = now;
            location.revision += 1;
        }
        Ok(location.clone())
    }

    async fn find_nearest_within(
        &self,
        tenant: TenantScope<'_>,
        point: GeoPoint,
        tolerance_m: f64,
    ) -> Result<Option<Location>> {
        let state = lock(&self.state);
        let nearest = state
            .locations
            .iter()
            .filter(|l| l.is_live() && l.active && l.tenant_id.as_deref() == tenant)
            .filter_map(|l| l.point.map(|p| (l, p.distance_meters(&point))))
            .filter(|(_, d)| *d <= tolerance_m)
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        Ok(nearest.map(|(l, _)| l.clone()))
    }
}

#[async_trait]
impl PhotoRepository for MemoryStore {
    async fn insert_deduplicated(&self, req: NewPhoto) -> Result<Photo> {
        Ok(lock(&self.state).push_photo(req))
    }

    async fn insert_ingested(&self, req: NewPhoto, actor: &str) -> Result<IngestedPhoto> {
        let mut state = lock(&self.state);
        let photo = state.push_photo(req);
        match self.jobs.push(
            JobType::FinalizePhoto,
            Some(photo.id),
            Some(photo.finalize_job_payload()),
        ) {
            Ok(finalize_job_id) => {
                state.push_audit(photo.ingest_audit_entry(actor));
                Ok(IngestedPhoto {
                    photo,
                    finalize_job_id,
                })
            }
            Err(e) => {
                state.photos.pop();
                Err(e)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Photo>> {
        Ok(lock(&self.state).photos.iter().find(|p| p.id == id).cloned())
    }

    async fn set_finalized(&self, id: Uuid, finalization: &PhotoFinalization) -> Result<()> {
        let mut state = lock(&self.state);
        let photo = state
            .photos
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(Error::PhotoNotFound(id))?;
        photo.content_hash = finalization.content_hash.clone();
        photo.thumbnail_key = Some(finalization.thumbnail_key.clone());
        photo.status = PhotoStatus::Finalized;
        photo.updated_at = Utc::now();
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
        let mut state = lock(&self.state);
        if !state
            .orders
            .iter()
            .any(|o| o.id == order_id && o.deleted_at.is_none() && in_scope(tenant, &o.tenant_id))
        {
            return Err(Error::OrderNotFound(order_id));
        }
        for id in photo_ids {
            if !state
                .photos
                .iter()
                .any(|p| p.id == *id && p.is_live() && in_scope(tenant, &p.tenant_id))
            {
                return Err(Error::PhotoNotFound(*id));
            }
        }

        let now = Utc::now();
        let mut updated = Vec::with_capacity(photo_ids.len());
        for id in photo_ids {
            if let Some(photo) = state.photos.iter_mut().find(|p| p.id == *id) {
                photo.order_id = Some(order_id);
                if let Some(week) = week_override {
                    photo.calendar_week = week.to_string();
                }
                photo.updated_at = now;
                updated.push(photo.clone());
            }
        }
        for photo in &updated {
            let payload = serde_json::json!({
                "order_id": order_id,
                "calendar_week": photo.calendar_week,
            });
            state.push_audit(
                NewAuditEntry::new(AuditAction::Update, AuditEntity::Photo, photo.id, actor)
                    .with_payload(payload),
            );
        }
        Ok(updated)
    }

    async fn update_annotations(
        &self,
        tenant: TenantScope<'_>,
        id: Uuid,
        req: UpdatePhotoRequest,
        actor: &str,
    ) -> Result<Photo> {
        let mut state = lock(&self.state);
        let photo = state
            .photos
            .iter_mut()
            .find(|p| p.id == id && p.is_live() && in_scope(tenant, &p.tenant_id))
            .ok_or(Error::PhotoNotFound(id))?;
        if let Some(flag) = req.quality_flag {
            photo.quality_flag = flag;
        }
        if let Some(note) = req.note.clone() {
            photo.note = Some(note);
        }
        photo.updated_at = Utc::now();
        let photo = photo.clone();
        let payload = serde_json::to_value(&req)?;
        state.push_audit(
            NewAuditEntry::new(AuditAction::Update, AuditEntity::Photo, id, actor)
                .with_payload(payload),
        );
        Ok(photo)
    }

    async fn soft_delete(&self, tenant: TenantScope<'_>, id: Uuid, actor: &str) -> Result<Photo> {
        let mut state = lock(&self.state);
        let photo = state
            .photos
            .iter_mut()
            .find(|p| p.id == id && in_scope(tenant, &p.tenant_id))
            .ok_or(Error::PhotoNotFound(id))?;
        if photo.deleted_at.is_some() {
            return Ok(photo.clone());
        }
        let now = Utc::now();
        photo.deleted_at = Some(now);
        photo.updated_at = now;
        let photo = photo.clone();
        state.push_audit(NewAuditEntry::new(
            AuditAction::Delete,
            AuditEntity::Photo,
            id,
            actor,
        ));
        Ok(photo)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert(&self, req: NewOrder) -> Result<Order> {
        let order = Order {
            id: Uuid::now_v7(),
            tenant_id: req.tenant_id,
            name: req.name,
            status: req.status,
            updated_at: Utc::now(),
            deleted_at: None,
        };
        lock(&self.state).orders.push(order.clone());
        Ok(order)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(lock(&self.state).orders.iter().find(|o| o.id == id).cloned())
    }
}

#[async_trait]
impl AuditLogRepository for MemoryStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<Uuid> {
        Ok(lock(&self.state).push_audit(entry))
    }

    async fn list_for_entity(
        &self,
        entity: AuditEntity,
        entity_id: Uuid,
    ) -> Result<Vec<AuditLogEntry>> {
        Ok(lock(&self.state)
            .audit
            .iter()
            .filter(|e| e.entity == entity && e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

fn split_delta<T, F>(rows: &[T], since: DateTime<Utc>, stamps: F) -> DeltaResponse<T>
where
    T: Clone,
    F: Fn(&T) -> (Uuid, DateTime<Utc>, Option<DateTime<Utc>>),
{
    let mut upserts: Vec<(DateTime<Utc>, Uuid, T)> = Vec::new();
    let mut tombstones: Vec<(DateTime<Utc>, Uuid)> = Vec::new();
    for row in rows {
        let (id, updated_at, deleted_at) = stamps(row);
        match deleted_at {
            None if updated_at >= since => upserts.push((updated_at, id, row.clone())),
            Some(deleted) if deleted >= since => tombstones.push((deleted, id)),
            _ => {}
        }
    }
    upserts.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    tombstones.sort();
    DeltaResponse {
        upserts: upserts.into_iter().map(|(_, _, row)| row).collect(),
        tombstones: tombstones
            .into_iter()
            .map(|(_, id)| Tombstone { id })
            .collect(),
    }
}

#[async_trait]
impl DeltaRepository for MemoryStore {
    async fn locations_since(
        &self,
        tenant: TenantScope<'_>,
        since: DateTime<Utc>,
    ) -> Result<DeltaResponse<Location>> {
        let state = lock(&self.state);
        let scoped: Vec<Location> = state
            .locations
            .iter()
            .filter(|l| in_scope(tenant, &l.tenant_id))
            .cloned()
            .collect();
        Ok(split_delta(&scoped, since, |l| {
            (l.id, l.updated_at, l.deleted_at)
        }))
    }

    async fn photos_since(
        &self,
        tenant: TenantScope<'_>,
        since: DateTime<Utc>,
    ) -> Result<DeltaResponse<Photo>> {
        let state = lock(&self.state);
        let scoped: Vec<Photo> = state
            .photos
            .iter()
            .filter(|p| in_scope(tenant, &p.tenant_id))
            .cloned()
            .collect();
        Ok(split_delta(&scoped, since, |p| {
            (p.id, p.updated_at, p.deleted_at)
        }))
    }
}
