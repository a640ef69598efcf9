//! Domain models for ingestion, delta sync and external reconciliation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Mean earth radius used for great-circle distances (meters).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

// =============================================================================
// GEOGRAPHY
// =============================================================================

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Create a point, rejecting out-of-range or non-finite coordinates.
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(Error::InvalidInput(format!(
                "coordinate must be finite: ({}, {})",
                lat, lon
            )));
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(Error::InvalidInput(format!(
                "coordinate out of range: ({}, {})",
                lat, lon
            )));
        }
        Ok(Self { lat, lon })
    }

    /// WKT for PostGIS (longitude first).
    pub fn to_wkt(&self) -> String {
        format!("POINT({} {})", self.lon, self.lat)
    }

    /// Round both axes to `precision` decimal places.
    pub fn rounded(&self, precision: u32) -> Self {
        let factor = 10f64.powi(precision as i32);
        Self {
            lat: (self.lat * factor).round() / factor,
            lon: (self.lon * factor).round() / factor,
        }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

// =============================================================================
// LOCATIONS
// =============================================================================

/// A known site photos can be attached to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub name: String,
    /// Name as first created; editable, retained for audit.
    pub original_name: String,
    /// Incremented on every mutation.
    pub revision: i64,
    pub address: Option<String>,
    pub point: Option<GeoPoint>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Location {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Request to create a location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
    pub tenant_id: Option<String>,
    pub name: String,
    pub address: Option<String>,
    pub point: Option<GeoPoint>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Partial update of a location. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateLocationRequest {
    pub name: Option<String>,
    pub original_name: Option<String>,
    pub address: Option<String>,
    pub point: Option<GeoPoint>,
    pub active: Option<bool>,
}

impl UpdateLocationRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.original_name.is_none()
            && self.address.is_none()
            && self.point.is_none()
            && self.active.is_none()
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// ORDERS
// =============================================================================

/// A work order photos are grouped under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub name: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Request to create an order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub tenant_id: Option<String>,
    pub name: String,
    pub status: String,
}

// =============================================================================
// PHOTOS
// =============================================================================

/// How a photo was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquisitionMode {
    /// Taken at a registered site.
    FixedSite,
    /// Taken on the move.
    Mobile,
}

impl AcquisitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMode::FixedSite => "FIXED_SITE",
            AcquisitionMode::Mobile => "MOBILE",
        }
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "FIXED_SITE" => Ok(AcquisitionMode::FixedSite),
            "MOBILE" => Ok(AcquisitionMode::Mobile),
            other => Err(Error::InvalidInput(format!(
                "unknown acquisition mode: {}",
                other
            ))),
        }
    }
}

/// Processing state of a photo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhotoStatus {
    /// Persisted by the upload path; thumbnail pending.
    #[default]
    Ingested,
    /// Finalize job has written the thumbnail and verified hash.
    Finalized,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Ingested => "INGESTED",
            PhotoStatus::Finalized => "FINALIZED",
        }
    }
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhotoStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INGESTED" => Ok(PhotoStatus::Ingested),
            "FINALIZED" => Ok(PhotoStatus::Finalized),
            other => Err(Error::InvalidInput(format!("unknown photo status: {}", other))),
        }
    }
}

/// A persisted photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: Uuid,
    pub object_key: String,
    pub taken_at: DateTime<Utc>,
    pub mode: AcquisitionMode,
    pub tenant_id: Option<String>,
    pub uploader_id: String,
    pub device_id: String,
    pub site_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub point: Option<GeoPoint>,
    pub address: Option<String>,
    /// SHA-256 of the normalized bytes, lowercase hex.
    pub content_hash: String,
    /// 64-bit DCT perceptual hash, 16 hex chars.
    pub perceptual_hash: Option<String>,
    /// Computed once at creation.
    pub is_duplicate: bool,
    pub quality_flag: bool,
    pub note: Option<String>,
    pub calendar_week: String,
    pub status: PhotoStatus,
    pub thumbnail_key: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Photo {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// The `create` audit entry written when the photo is ingested.
    pub fn ingest_audit_entry(&self, actor: &str) -> NewAuditEntry {
        NewAuditEntry::new(AuditAction::Create, AuditEntity::Photo, self.id, actor).with_payload(
            serde_json::json!({
                "object_key": self.object_key,
                "content_hash": self.content_hash,
                "is_duplicate": self.is_duplicate,
            }),
        )
    }

    /// Payload of the `finalize_photo` job queued for this photo.
    pub fn finalize_job_payload(&self) -> JsonValue {
        serde_json::json!({
            "photo_id": self.id,
            "object_key": self.object_key,
        })
    }
}

/// A photo row together with the finalize job queued alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedPhoto {
    pub photo: Photo,
    pub finalize_job_id: Uuid,
}

/// Everything the ingestion pipeline knows about a photo before it is inserted.
/// The duplicate flag is decided by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPhoto {
    pub object_key: String,
    pub taken_at: DateTime<Utc>,
    pub mode: AcquisitionMode,
    pub tenant_id: Option<String>,
    pub uploader_id: String,
    pub device_id: String,
    pub site_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub point: Option<GeoPoint>,
    pub address: Option<String>,
    pub content_hash: String,
    pub perceptual_hash: Option<String>,
    pub calendar_week: String,
}

/// Partial update of a photo's mutable annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePhotoRequest {
    pub quality_flag: Option<bool>,
    pub note: Option<String>,
}

impl UpdatePhotoRequest {
    pub fn is_empty(&self) -> bool {
        self.quality_flag.is_none() && self.note.is_none()
    }
}

/// Values written back by the finalize job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoFinalization {
    pub content_hash: String,
    pub thumbnail_key: String,
}

// =============================================================================
// DELTA SYNC
// =============================================================================

/// Marker for an entity deleted since the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: Uuid,
}

/// Incremental changes since a cursor: live rows to upsert and deleted ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaResponse<T> {
    pub upserts: Vec<T>,
    pub tombstones: Vec<Tombstone>,
}

impl<T> Default for DeltaResponse<T> {
    fn default() -> Self {
        Self {
            upserts: Vec::new(),
            tombstones: Vec::new(),
        }
    }
}

impl<T> DeltaResponse<T> {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.tombstones.is_empty()
    }
}

// =============================================================================
// AUDIT LOG
// =============================================================================

/// Kind of mutation recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

impl FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            other => Err(Error::InvalidInput(format!("unknown audit action: {}", other))),
        }
    }
}

/// Entity kind recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEntity {
    Photo,
    Location,
    Order,
}

impl AuditEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntity::Photo => "photo",
            AuditEntity::Location => "location",
            AuditEntity::Order => "order",
        }
    }
}

impl FromStr for AuditEntity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "photo" => Ok(AuditEntity::Photo),
            "location" => Ok(AuditEntity::Location),
            "order" => Ok(AuditEntity::Order),
            other => Err(Error::InvalidInput(format!("unknown audit entity: {}", other))),
        }
    }
}

/// An audit entry to append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: Uuid,
    pub actor: String,
    pub payload: Option<JsonValue>,
}

impl NewAuditEntry {
    pub fn new(action: AuditAction, entity: AuditEntity, entity_id: Uuid, actor: &str) -> Self {
        Self {
            action,
            entity,
            entity_id,
            actor: actor.to_string(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A persisted audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: Uuid,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Option<JsonValue>,
}

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Job(format!("unknown job status: {}", other))),
        }
    }
}

/// Type of job to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Render thumbnail and verify content hash of a freshly ingested photo
    FinalizePhoto,
    /// Pull one batch from the external system-of-record and reconcile it
    ExternalSync,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FinalizePhoto => "finalize_photo",
            JobType::ExternalSync => "external_sync",
        }
    }

    /// Default priority for this job type (higher = more urgent)
    pub fn default_priority(&self) -> i32 {
        match self {
            // Thumbnails are user-visible soon after upload
            JobType::FinalizePhoto => 5,
            JobType::ExternalSync => 3,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "finalize_photo" => Ok(JobType::FinalizePhoto),
            "external_sync" => Ok(JobType::ExternalSync),
            other => Err(Error::Job(format!("unknown job type: {}", other))),
        }
    }
}

/// A job in the processing queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    /// Entity the job works on, if any (the photo for finalize jobs).
    pub subject_id: Option<Uuid>,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Option<JsonValue>,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// EXTERNAL RECONCILIATION
// =============================================================================

/// Local entity tables the external source maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityTable {
    Location,
    Order,
}

/// Column type of a tracked field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
}

/// A payload key copied from external records onto a local column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedField {
    /// Key in the external record.
    pub key: &'static str,
    /// Column in the local table.
    pub column: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

const LOCATION_FIELDS: &[TrackedField] = &[
    TrackedField {
        key: "customer_id",
        column: "tenant_id",
        kind: FieldKind::Text,
        nullable: true,
    },
    TrackedField {
        key: "name",
        column: "name",
        kind: FieldKind::Text,
        nullable: false,
    },
    TrackedField {
        key: "address",
        column: "address",
        kind: FieldKind::Text,
        nullable: true,
    },
    TrackedField {
        key: "active",
        column: "active",
        kind: FieldKind::Bool,
        nullable: false,
    },
];

const ORDER_FIELDS: &[TrackedField] = &[
    TrackedField {
        key: "customer_id",
        column: "tenant_id",
        kind: FieldKind::Text,
        nullable: true,
    },
    TrackedField {
        key: "name",
        column: "name",
        kind: FieldKind::Text,
        nullable: false,
    },
    TrackedField {
        key: "status",
        column: "status",
        kind: FieldKind::Text,
        nullable: false,
    },
];

impl EntityTable {
    /// Processing order within a batch.
    pub const ALL: [EntityTable; 2] = [EntityTable::Location, EntityTable::Order];

    /// Name stored in `ext_ref.entity_table`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityTable::Location => "location",
            EntityTable::Order => "order",
        }
    }

    /// Table name used in external batches.
    pub fn feed_key(&self) -> &'static str {
        match self {
            EntityTable::Location => "locations",
            EntityTable::Order => "orders",
        }
    }

    /// Quoted SQL table name.
    pub fn sql_table(&self) -> &'static str {
        match self {
            EntityTable::Location => "location",
            EntityTable::Order => "\"order\"",
        }
    }

    pub fn from_feed_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.feed_key() == key)
    }

    pub fn tracked_fields(&self) -> &'static [TrackedField] {
        match self {
            EntityTable::Location => LOCATION_FIELDS,
            EntityTable::Order => ORDER_FIELDS,
        }
    }

    /// Whether the table carries a revision counter.
    pub fn has_revision(&self) -> bool {
        matches!(self, EntityTable::Location)
    }

    pub fn audit_entity(&self) -> AuditEntity {
        match self {
            EntityTable::Location => AuditEntity::Location,
            EntityTable::Order => AuditEntity::Order,
        }
    }
}

/// Mapping from an external record to a local entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtRef {
    pub source: String,
    pub entity_table: EntityTable,
    pub external_id: String,
    pub entity_id: Uuid,
    pub etag: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// One record from the external source.
///
/// On the wire this is a flat JSON object: `id` (string or number), optional
/// `etag` and `deleted`, and any other keys as fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "JsonMap<String, JsonValue>",
    into = "JsonMap<String, JsonValue>"
)]
pub struct ExternalRecord {
    pub id: String,
    pub fields: JsonMap<String, JsonValue>,
    pub etag: Option<String>,
    pub deleted: bool,
}

impl ExternalRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: JsonMap::new(),
            etag: None,
            deleted: false,
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn deleted(id: impl Into<String>) -> Self {
        Self {
            deleted: true,
            ..Self::new(id)
        }
    }
}

impl TryFrom<JsonMap<String, JsonValue>> for ExternalRecord {
    type Error = String;

    fn try_from(mut map: JsonMap<String, JsonValue>) -> std::result::Result<Self, String> {
        let id = match map.remove("id") {
            Some(JsonValue::String(s)) => s,
            Some(JsonValue::Number(n)) => n.to_string(),
            Some(other) => return Err(format!("record id must be a string or number, got {}", other)),
            None => return Err("record is missing an id".to_string()),
        };
        let etag = match map.remove("etag") {
            Some(JsonValue::String(s)) => Some(s),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let deleted = map.remove("deleted").is_some_and(|v| is_truthy(&v));
        Ok(Self {
            id,
            fields: map,
            etag,
            deleted,
        })
    }
}

impl From<ExternalRecord> for JsonMap<String, JsonValue> {
    fn from(record: ExternalRecord) -> Self {
        let mut map = record.fields;
        map.insert("id".to_string(), JsonValue::String(record.id));
        if let Some(etag) = record.etag {
            map.insert("etag".to_string(), JsonValue::String(etag));
        }
        if record.deleted {
            map.insert("deleted".to_string(), JsonValue::Bool(true));
        }
        map
    }
}

/// Loose truthiness for flags sent by the external source.
fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        JsonValue::String(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no"
        ),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

/// One pull from the external source: table name to records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalBatch {
    pub tables: BTreeMap<String, Vec<ExternalRecord>>,
}

impl ExternalBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, records: Vec<ExternalRecord>) -> Self {
        self.tables.insert(name.to_string(), records);
        self
    }

    pub fn record_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}

/// Outcome counters of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub created: u64,
    pub updated: u64,
    pub recreated: u64,
    pub tombstoned: u64,
    /// Deletions of unknown or already-deleted records, and unknown tables' records.
    pub skipped: u64,
}

impl ReconcileReport {
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.recreated + self.tombstoned + self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(52.52, 13.405).is_ok());
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -181.0).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_geo_point_wkt_is_lon_lat() {
        let p = GeoPoint::new(52.5, 13.4).unwrap();
        assert_eq!(p.to_wkt(), "POINT(13.4 52.5)");
    }

    #[test]
    fn test_geo_point_rounding() {
        let p = GeoPoint::new(52.520_006_7, 13.404_954_4).unwrap();
        let r = p.rounded(5);
        assert_eq!(r.lat, 52.52001);
        assert_eq!(r.lon, 13.40495);
    }

    #[test]
    fn test_distance_meters() {
        let a = GeoPoint::new(52.0, 13.0).unwrap();
        let b = GeoPoint::new(52.0009, 13.0).unwrap();
        let d = a.distance_meters(&b);
        // 0.0009 degrees latitude is about 100 m
        assert!((d - 100.1).abs() < 1.0, "distance was {}", d);
        assert_eq!(a.distance_meters(&a), 0.0);
    }

    #[test]
    fn test_acquisition_mode_wire_format() {
        assert_eq!(
            serde_json::to_value(AcquisitionMode::FixedSite).unwrap(),
            json!("FIXED_SITE")
        );
        assert_eq!(
            "MOBILE".parse::<AcquisitionMode>().unwrap(),
            AcquisitionMode::Mobile
        );
        assert!("mobile".parse::<AcquisitionMode>().is_err());
    }

    #[test]
    fn test_photo_status_default_is_ingested() {
        assert_eq!(PhotoStatus::default(), PhotoStatus::Ingested);
        assert_eq!(PhotoStatus::Finalized.to_string(), "FINALIZED");
    }

    #[test]
    fn test_job_type_round_trip_strings() {
        for t in [JobType::FinalizePhoto, JobType::ExternalSync] {
            assert_eq!(t.as_str().parse::<JobType>().unwrap(), t);
        }
        assert_eq!(
            serde_json::to_value(JobType::FinalizePhoto).unwrap(),
            json!("finalize_photo")
        );
    }

    #[test]
    fn test_delta_response_wire_shape() {
        let id = Uuid::nil();
        let delta: DeltaResponse<JsonValue> = DeltaResponse {
            upserts: vec![],
            tombstones: vec![Tombstone { id }],
        };
        assert_eq!(
            serde_json::to_value(&delta).unwrap(),
            json!({"upserts": [], "tombstones": [{"id": id}]})
        );
    }

    #[test]
    fn test_external_record_numeric_id_normalized() {
        let rec: ExternalRecord =
            serde_json::from_value(json!({"id": 42, "name": "A", "etag": "v1"})).unwrap();
        assert_eq!(rec.id, "42");
        assert_eq!(rec.etag.as_deref(), Some("v1"));
        assert!(!rec.deleted);
        assert_eq!(rec.fields.get("name"), Some(&json!("A")));
        assert!(!rec.fields.contains_key("id"));
    }

    #[test]
    fn test_external_record_deleted_flag() {
        let rec: ExternalRecord =
            serde_json::from_value(json!({"id": "1", "customer_id": "c1", "deleted": true}))
                .unwrap();
        assert!(rec.deleted);
        assert!(!rec.fields.contains_key("deleted"));
    }

    #[test]
    fn test_external_record_truthy_deleted_values() {
        for flag in [json!(1), json!("true"), json!("yes"), json!("1"), json!("x")] {
            let rec: ExternalRecord =
                serde_json::from_value(json!({"id": "1", "deleted": flag})).unwrap();
            assert!(rec.deleted, "{} should mark the record deleted", flag);
            assert!(rec.fields.is_empty());
        }
        for flag in [json!(0), json!(false), json!(null), json!(""), json!("false"), json!("no")] {
            let rec: ExternalRecord =
                serde_json::from_value(json!({"id": "1", "deleted": flag})).unwrap();
            assert!(!rec.deleted, "{} should keep the record live", flag);
        }
    }

    #[test]
    fn test_external_record_requires_id() {
        let err = serde_json::from_value::<ExternalRecord>(json!({"name": "A"}));
        assert!(err.is_err());
        let err = serde_json::from_value::<ExternalRecord>(json!({"id": [1]}));
        assert!(err.is_err());
    }

    #[test]
    fn test_external_batch_parses_table_map() {
        let batch: ExternalBatch = serde_json::from_value(json!({
            "locations": [{"id": "1", "name": "A"}],
            "orders": [{"id": 7, "status": "open"}, {"id": 8, "deleted": true}]
        }))
        .unwrap();
        assert_eq!(batch.record_count(), 3);
        assert_eq!(batch.tables["orders"][0].id, "7");
    }

    #[test]
    fn test_entity_table_lookup() {
        assert_eq!(
            EntityTable::from_feed_key("locations"),
            Some(EntityTable::Location)
        );
        assert_eq!(EntityTable::from_feed_key("orders"), Some(EntityTable::Order));
        assert_eq!(EntityTable::from_feed_key("shares"), None);
        assert!(EntityTable::Location.has_revision());
        assert!(!EntityTable::Order.has_revision());
    }

    #[test]
    fn test_tracked_fields_map_customer_to_tenant() {
        for table in EntityTable::ALL {
            let f = table.tracked_fields()[0];
            assert_eq!(f.key, "customer_id");
            assert_eq!(f.column, "tenant_id");
            assert!(f.nullable);
        }
    }

    #[test]
    fn test_reconcile_report_total() {
        let r = ReconcileReport {
            created: 1,
            updated: 2,
            recreated: 1,
            tombstoned: 3,
            skipped: 1,
        };
        assert_eq!(r.total(), 8);
    }
}
