//! Photo ingestion pipeline.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use doku_core::calendar_week::calendar_week_label_in;
use doku_core::defaults::SYSTEM_ACTOR;
use doku_core::{
    AcquisitionMode, ContentStore, Error, GeoPoint, IngestedPhoto, NewPhoto, Photo,
    PhotoRepository, RegionalZone, Result, EUROPE_BERLIN,
};
use doku_geo::{GeoResolution, GeoResolver};
use doku_media::{content_hash, normalize_orientation, perceptual_hash};

/// One uploaded photo, already written to the content store under `object_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub object_key: String,
    pub taken_at: DateTime<Utc>,
    pub mode: AcquisitionMode,
    pub tenant_id: Option<String>,
    pub uploader_id: String,
    pub device_id: String,
    #[serde(default)]
    pub site_id: Option<Uuid>,
    #[serde(default)]
    pub point: Option<GeoPoint>,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub photo: Photo,
    pub finalize_job_id: Uuid,
}

/// Normalized bytes and their fingerprints.
struct Fingerprint {
    rewritten: Option<Vec<u8>>,
    content_hash: String,
    perceptual_hash: Option<String>,
}

/// Synchronous part of photo upload handling.
///
/// Everything up to the persisted row, its audit entry and the queued finalize
/// job happens inside [`ingest`](Self::ingest); thumbnailing and hash
/// verification are left to the finalize job. The row, the audit entry and
/// the job are written as one unit, so a failed ingest leaves no photo behind.
#[derive(Clone)]
pub struct IngestionPipeline {
    content: Arc<dyn ContentStore>,
    photos: Arc<dyn PhotoRepository>,
    geo: GeoResolver,
    zone: RegionalZone,
}

impl IngestionPipeline {
    pub fn new(
        content: Arc<dyn ContentStore>,
        photos: Arc<dyn PhotoRepository>,
        geo: GeoResolver,
    ) -> Self {
        Self {
            content,
            photos,
            geo,
            zone: EUROPE_BERLIN,
        }
    }

    /// Bucket calendar weeks in a different zone.
    pub fn with_zone(mut self, zone: RegionalZone) -> Self {
        self.zone = zone;
        self
    }

    #[instrument(
        skip(self, req),
        fields(subsystem = "ingest", component = "pipeline", object_key = %req.object_key)
    )]
    pub async fn ingest(&self, req: IngestRequest) -> Result<IngestOutcome> {
        let start = Instant::now();
        if req.object_key.trim().is_empty() {
            return Err(Error::InvalidInput("object_key must not be empty".to_string()));
        }

        let bytes = self.content.get(&req.object_key).await?;
        let fingerprint = fingerprint(bytes).await?;
        if let Some(upright) = &fingerprint.rewritten {
            self.content.put(&req.object_key, upright).await?;
            debug!(byte_len = upright.len(), "Stored orientation-corrected bytes");
        }

        let geo = match req.point {
            Some(point) => self.geo.resolve(req.tenant_id.as_deref(), point).await,
            None => GeoResolution::default(),
        };
        let calendar_week = calendar_week_label_in(req.taken_at, self.zone);

        let actor = if req.uploader_id.trim().is_empty() {
            SYSTEM_ACTOR
        } else {
            req.uploader_id.as_str()
        };
        let IngestedPhoto {
            photo,
            finalize_job_id,
        } = self
            .photos
            .insert_ingested(
                NewPhoto {
                    object_key: req.object_key.clone(),
                    taken_at: req.taken_at,
                    mode: req.mode,
                    tenant_id: req.tenant_id.clone(),
                    uploader_id: req.uploader_id.clone(),
                    device_id: req.device_id.clone(),
                    site_id: req.site_id,
                    location_id: geo.location_id,
                    point: req.point,
                    address: geo.address,
                    content_hash: fingerprint.content_hash,
                    perceptual_hash: fingerprint.perceptual_hash,
                    calendar_week,
                },
                actor,
            )
            .await?;

        info!(
            photo_id = %photo.id,
            job_id = %finalize_job_id,
            is_duplicate = photo.is_duplicate,
            has_location = photo.location_id.is_some(),
            calendar_week = %photo.calendar_week,
            duration_ms = start.elapsed().as_millis() as u64,
            "Photo ingested"
        );

        Ok(IngestOutcome {
            photo,
            finalize_job_id,
        })
    }
}

/// Normalize and hash on the blocking pool.
async fn fingerprint(bytes: Vec<u8>) -> Result<Fingerprint> {
    tokio::task::spawn_blocking(move || -> Result<Fingerprint> {
        let normalized = normalize_orientation(bytes)?;
        let content_hash = content_hash(&normalized.bytes);
        let perceptual_hash = perceptual_hash(&normalized.bytes);
        Ok(Fingerprint {
            rewritten: normalized.changed.then_some(normalized.bytes),
            content_hash,
            perceptual_hash,
        })
    })
    .await
    .map_err(|e| Error::Internal(format!("fingerprint task failed: {}", e)))?
}
