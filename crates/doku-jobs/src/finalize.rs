//! Finalize job: thumbnail and hash verification for a freshly ingested photo.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use doku_core::{ContentStore, Error, JobType, PhotoFinalization, PhotoRepository, Result};
use doku_media::{content_hash, render_thumbnail, thumbnail_key};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Payload written by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizePayload {
    pub photo_id: Uuid,
    pub object_key: String,
}

/// Renders the thumbnail and writes the verified hash back.
///
/// Every write is keyed by the photo and its object key, so a second run
/// produces the same thumbnail object and the same row values.
pub struct FinalizePhotoHandler {
    content: Arc<dyn ContentStore>,
    photos: Arc<dyn PhotoRepository>,
}

impl FinalizePhotoHandler {
    pub fn new(content: Arc<dyn ContentStore>, photos: Arc<dyn PhotoRepository>) -> Self {
        Self { content, photos }
    }

    async fn finalize(&self, payload: FinalizePayload) -> Result<JobResult> {
        let start = Instant::now();

        let photo = match self.photos.get(payload.photo_id).await? {
            Some(p) if p.deleted_at.is_none() => p,
            Some(_) => {
                debug!(photo_id = %payload.photo_id, "Photo deleted before finalize, skipping");
                return Ok(JobResult::Success(Some(json!({"skipped": "deleted"}))));
            }
            None => {
                warn!(photo_id = %payload.photo_id, "Photo vanished before finalize, skipping");
                return Ok(JobResult::Success(Some(json!({"skipped": "not_found"}))));
            }
        };

        let bytes = self.content.get(&payload.object_key).await?;
        let (thumbnail, recomputed) = tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, String)> {
            let thumbnail = render_thumbnail(&bytes)?;
            Ok((thumbnail, content_hash(&bytes)))
        })
        .await
        .map_err(|e| Error::Internal(format!("thumbnail task failed: {}", e)))??;

        let key = thumbnail_key(&payload.object_key);
        self.content.put(&key, &thumbnail).await?;

        let hash_mismatch = photo.content_hash != recomputed;
        if hash_mismatch {
            warn!(
                photo_id = %photo.id,
                object_key = %payload.object_key,
                stored = %photo.content_hash,
                recomputed = %recomputed,
                "Content hash mismatch, keeping recomputed hash"
            );
        }

        self.photos
            .set_finalized(
                photo.id,
                &PhotoFinalization {
                    content_hash: recomputed.clone(),
                    thumbnail_key: key.clone(),
                },
            )
            .await?;

        info!(
            photo_id = %photo.id,
            thumbnail_key = %key,
            thumbnail_bytes = thumbnail.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Photo finalized"
        );

        Ok(JobResult::Success(Some(json!({
            "photo_id": photo.id,
            "thumbnail_key": key,
            "content_hash": recomputed,
            "hash_mismatch": hash_mismatch,
        }))))
    }
}

#[async_trait]
impl JobHandler for FinalizePhotoHandler {
    fn job_type(&self) -> JobType {
        JobType::FinalizePhoto
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let mut payload = match ctx.parse_payload::<FinalizePayload>() {
            Ok(p) => p,
            Err(e) => return JobResult::Failed(e.to_string()),
        };
        if let Some(subject) = ctx.subject_id() {
            payload.photo_id = subject;
        }

        match self.finalize(payload).await {
            Ok(result) => result,
            Err(e) => {
                warn!(subsystem = "jobs", component = "finalize", job_id = %ctx.job.id, error = %e, "Finalize failed");
                JobResult::from_error(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::job;
    use chrono::Utc;
    use doku_core::mock::{MemoryContentStore, MemoryStore};
    use doku_core::{AcquisitionMode, NewPhoto, Photo, PhotoStatus};
    use doku_media::test_fixtures::gradient_jpeg;

    struct Harness {
        content: MemoryContentStore,
        store: MemoryStore,
        handler: FinalizePhotoHandler,
    }

    fn harness(content: MemoryContentStore) -> Harness {
        let store = MemoryStore::new();
        let handler = FinalizePhotoHandler::new(Arc::new(content.clone()), Arc::new(store.clone()));
        Harness {
            content,
            store,
            handler,
        }
    }

    async fn seed_photo(store: &MemoryStore, key: &str, hash: &str) -> Photo {
        store
            .insert_deduplicated(NewPhoto {
                object_key: key.to_string(),
                taken_at: Utc::now(),
                mode: AcquisitionMode::FixedSite,
                tenant_id: Some("c1".to_string()),
                uploader_id: "u1".to_string(),
                device_id: "d1".to_string(),
                site_id: None,
                location_id: None,
                point: None,
                address: None,
                content_hash: hash.to_string(),
                perceptual_hash: None,
                calendar_week: "2024-W10".to_string(),
            })
            .await
            .unwrap()
    }

    fn finalize_ctx(photo: &Photo) -> JobContext {
        JobContext::new(job(
            JobType::FinalizePhoto,
            Some(photo.id),
            Some(json!({"photo_id": photo.id, "object_key": photo.object_key})),
        ))
    }

    #[tokio::test]
    async fn test_finalize_writes_thumbnail_and_status() {
        let bytes = gradient_jpeg(640, 480);
        let h = harness(MemoryContentStore::new().with_object("uploads/a.jpg", bytes.clone()));
        let photo = seed_photo(&h.store, "uploads/a.jpg", &content_hash(&bytes)).await;

        let result = h.handler.execute(finalize_ctx(&photo)).await;
        let data = match result {
            JobResult::Success(Some(data)) => data,
            other => panic!("expected success, got {:?}", other),
        };
        assert_eq!(data["hash_mismatch"], false);

        let thumb = h.content.object("thumbnails/uploads/a.jpg.jpg").unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert!(decoded.width() <= 256 && decoded.height() <= 256);

        let stored = PhotoRepository::get(&h.store, photo.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PhotoStatus::Finalized);
        assert_eq!(stored.thumbnail_key.as_deref(), Some("thumbnails/uploads/a.jpg.jpg"));
        assert_eq!(stored.content_hash, content_hash(&bytes));
    }

    #[tokio::test]
    async fn test_finalize_twice_is_identical() {
        let bytes = gradient_jpeg(320, 200);
        let h = harness(MemoryContentStore::new().with_object("k.jpg", bytes.clone()));
        let photo = seed_photo(&h.store, "k.jpg", &content_hash(&bytes)).await;

        h.handler.execute(finalize_ctx(&photo)).await;
        let first_thumb = h.content.object("thumbnails/k.jpg.jpg").unwrap();
        let first = PhotoRepository::get(&h.store, photo.id).await.unwrap().unwrap();

        h.handler.execute(finalize_ctx(&photo)).await;
        let second_thumb = h.content.object("thumbnails/k.jpg.jpg").unwrap();
        let second = PhotoRepository::get(&h.store, photo.id).await.unwrap().unwrap();

        assert_eq!(first_thumb, second_thumb);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.thumbnail_key, second.thumbnail_key);
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn test_hash_mismatch_recomputed_wins_and_duplicate_flag_kept() {
        let bytes = gradient_jpeg(100, 100);
        let h = harness(MemoryContentStore::new().with_object("m.jpg", bytes.clone()));
        let original = seed_photo(&h.store, "m.jpg", "stale").await;
        let duplicate = seed_photo(&h.store, "m.jpg", "stale").await;
        assert!(duplicate.is_duplicate);

        let result = h.handler.execute(finalize_ctx(&duplicate)).await;
        let data = match result {
            JobResult::Success(Some(data)) => data,
            other => panic!("expected success, got {:?}", other),
        };
        assert_eq!(data["hash_mismatch"], true);

        let stored = PhotoRepository::get(&h.store, duplicate.id).await.unwrap().unwrap();
        assert_eq!(stored.content_hash, content_hash(&bytes));
        assert!(stored.is_duplicate);
        let untouched = PhotoRepository::get(&h.store, original.id).await.unwrap().unwrap();
        assert!(!untouched.is_duplicate);
        assert_eq!(untouched.status, PhotoStatus::Ingested);
    }

    #[tokio::test]
    async fn test_deleted_photo_is_skipped() {
        let bytes = gradient_jpeg(64, 64);
        let h = harness(MemoryContentStore::new().with_object("d.jpg", bytes.clone()));
        let photo = seed_photo(&h.store, "d.jpg", &content_hash(&bytes)).await;
        h.store.soft_delete(None, photo.id, "u1").await.unwrap();

        let result = h.handler.execute(finalize_ctx(&photo)).await;
        assert!(matches!(result, JobResult::Success(Some(ref v)) if v["skipped"] == "deleted"));
        assert!(h.content.put_keys().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_retried() {
        let content = MemoryContentStore::new();
        let h = harness(content.clone());
        let photo = seed_photo(&h.store, "gone.jpg", "abc").await;
        content.set_unavailable(true);

        let result = h.handler.execute(finalize_ctx(&photo)).await;
        assert!(matches!(result, JobResult::Retry(_)));
        let stored = PhotoRepository::get(&h.store, photo.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PhotoStatus::Ingested);
    }

    #[tokio::test]
    async fn test_undecodable_bytes_fail() {
        let h = harness(MemoryContentStore::new().with_object("bad.jpg", b"not an image".to_vec()));
        let photo = seed_photo(&h.store, "bad.jpg", "abc").await;

        let result = h.handler.execute(finalize_ctx(&photo)).await;
        assert!(matches!(result, JobResult::Failed(_)));
    }

    #[tokio::test]
    async fn test_malformed_payload_fails() {
        let h = harness(MemoryContentStore::new());
        let ctx = JobContext::new(job(JobType::FinalizePhoto, None, Some(json!({"photo": 1}))));

        assert!(matches!(h.handler.execute(ctx).await, JobResult::Failed(_)));
    }
}
