//! End-to-end: upload through the ingestion pipeline, then run the queued
//! finalize job against PostgreSQL and a filesystem content store.
//!
//! Jobs are fetched by id rather than claimed, so tests sharing the queue
//! never pick up each other's work.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;

use doku_core::mock::{MemoryJobQueue, MemoryStore};
use doku_db::test_fixtures::{setup_test_database, unique_tenant};
use doku_db::{
    AcquisitionMode, ContentStore, Database, FilesystemContentStore, JobRepository, JobStatus,
    JobType, PhotoRepository, PhotoStatus,
};
use doku_geo::{DisabledGeocoder, GeoResolver, MemoryAddressCache};
use doku_ingest::{IngestRequest, IngestionPipeline};
use doku_jobs::{FinalizePhotoHandler, JobContext, JobHandler, JobResult};
use doku_media::test_fixtures::{gradient_jpeg, pattern_image, tagged_portrait_jpeg};
use doku_media::{content_hash, thumbnail_key};

struct Env {
    db: Database,
    _dir: TempDir,
    content: Arc<FilesystemContentStore>,
    pipeline: IngestionPipeline,
    finalize: FinalizePhotoHandler,
}

async fn env() -> Env {
    let db = setup_test_database().await;
    let dir = TempDir::new().unwrap();
    let content = Arc::new(FilesystemContentStore::new(dir.path()));
    let geo = GeoResolver::new(
        Arc::new(DisabledGeocoder),
        Arc::new(MemoryAddressCache::default()),
        Arc::new(db.locations.clone()),
    );
    let pipeline = IngestionPipeline::new(content.clone(), Arc::new(db.photos.clone()), geo);
    let finalize = FinalizePhotoHandler::new(content.clone(), Arc::new(db.photos.clone()));
    Env {
        db,
        _dir: dir,
        content,
        pipeline,
        finalize,
    }
}

fn request(key: &str, tenant: &str) -> IngestRequest {
    IngestRequest {
        object_key: key.to_string(),
        taken_at: Utc.with_ymd_and_hms(2024, 5, 6, 9, 30, 0).unwrap(),
        mode: AcquisitionMode::Mobile,
        tenant_id: Some(tenant.to_string()),
        uploader_id: "u1".to_string(),
        device_id: "d1".to_string(),
        site_id: None,
        point: None,
    }
}

async fn run_job(env: &Env, job_id: uuid::Uuid) -> JobResult {
    let job = env.db.jobs.get(job_id).await.unwrap().expect("job enqueued");
    assert_eq!(job.job_type, JobType::FinalizePhoto);
    env.finalize.execute(JobContext::new(job)).await
}

#[tokio::test]
async fn test_ingest_then_finalize() {
    let env = env().await;
    let tenant = unique_tenant("fin");
    let key = format!("uploads/{}.jpg", tenant);
    let bytes = gradient_jpeg(800, 600);
    env.content.put(&key, &bytes).await.unwrap();

    let outcome = env.pipeline.ingest(request(&key, &tenant)).await.unwrap();
    assert_eq!(outcome.photo.status, PhotoStatus::Ingested);
    assert_eq!(outcome.photo.calendar_week, "2024-W19");

    let result = run_job(&env, outcome.finalize_job_id).await;
    assert!(matches!(result, JobResult::Success(_)), "{:?}", result);

    let photo = env.db.photos.get(outcome.photo.id).await.unwrap().unwrap();
    assert_eq!(photo.status, PhotoStatus::Finalized);
    assert_eq!(photo.content_hash, content_hash(&bytes));
    assert_eq!(photo.thumbnail_key, Some(thumbnail_key(&key)));

    let thumb = env.content.get(&thumbnail_key(&key)).await.unwrap();
    let decoded = image::load_from_memory(&thumb).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (256, 192));
}

#[tokio::test]
async fn test_finalize_rerun_is_idempotent() {
    let env = env().await;
    let tenant = unique_tenant("fin");
    let key = format!("uploads/{}.jpg", tenant);
    env.content.put(&key, &gradient_jpeg(300, 300)).await.unwrap();

    let outcome = env.pipeline.ingest(request(&key, &tenant)).await.unwrap();
    run_job(&env, outcome.finalize_job_id).await;
    let first = env.db.photos.get(outcome.photo.id).await.unwrap().unwrap();
    let first_thumb = env.content.get(&thumbnail_key(&key)).await.unwrap();

    run_job(&env, outcome.finalize_job_id).await;
    let second = env.db.photos.get(outcome.photo.id).await.unwrap().unwrap();
    let second_thumb = env.content.get(&thumbnail_key(&key)).await.unwrap();

    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(first.thumbnail_key, second.thumbnail_key);
    assert_eq!(first.updated_at, second.updated_at);
    assert_eq!(first_thumb, second_thumb);
}

#[tokio::test]
async fn test_rotated_upload_finalizes_with_normalized_hash() {
    let env = env().await;
    let tenant = unique_tenant("fin");
    let key = format!("uploads/{}.jpg", tenant);
    env.content
        .put(&key, &tagged_portrait_jpeg(&pattern_image(120, 60)))
        .await
        .unwrap();

    let outcome = env.pipeline.ingest(request(&key, &tenant)).await.unwrap();
    run_job(&env, outcome.finalize_job_id).await;

    // The pipeline stored the upright rewrite, so finalize agrees with ingest
    let photo = env.db.photos.get(outcome.photo.id).await.unwrap().unwrap();
    assert_eq!(photo.content_hash, outcome.photo.content_hash);
    let thumb = image::load_from_memory(&env.content.get(&thumbnail_key(&key)).await.unwrap())
        .unwrap();
    assert!(thumb.width() > thumb.height());
}

#[tokio::test]
async fn test_duplicate_keeps_flag_through_finalize() {
    let env = env().await;
    let tenant = unique_tenant("fin");
    let bytes = gradient_jpeg(200, 100);
    let first_key = format!("uploads/{}-1.jpg", tenant);
    let second_key = format!("uploads/{}-2.jpg", tenant);
    env.content.put(&first_key, &bytes).await.unwrap();
    env.content.put(&second_key, &bytes).await.unwrap();

    let original = env.pipeline.ingest(request(&first_key, &tenant)).await.unwrap();
    let duplicate = env.pipeline.ingest(request(&second_key, &tenant)).await.unwrap();
    assert!(!original.photo.is_duplicate);
    assert!(duplicate.photo.is_duplicate);

    run_job(&env, duplicate.finalize_job_id).await;
    run_job(&env, original.finalize_job_id).await;

    let original = env.db.photos.get(original.photo.id).await.unwrap().unwrap();
    let duplicate = env.db.photos.get(duplicate.photo.id).await.unwrap().unwrap();
    assert!(!original.is_duplicate);
    assert!(duplicate.is_duplicate);
    assert_eq!(duplicate.status, PhotoStatus::Finalized);
}

#[tokio::test]
async fn test_job_bookkeeping_after_handler_result() {
    let env = env().await;
    let tenant = unique_tenant("fin");
    let key = format!("uploads/{}.jpg", tenant);
    env.content.put(&key, &gradient_jpeg(64, 64)).await.unwrap();
    let outcome = env.pipeline.ingest(request(&key, &tenant)).await.unwrap();

    let JobResult::Success(data) = run_job(&env, outcome.finalize_job_id).await else {
        panic!("finalize should succeed");
    };
    env.db
        .jobs
        .complete(outcome.finalize_job_id, data)
        .await
        .unwrap();

    let job = env.db.jobs.get(outcome.finalize_job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.result.as_ref().and_then(|r| r.get("photo_id")),
        Some(&json!(outcome.photo.id))
    );
}

#[tokio::test]
async fn test_memory_store_matches_payload_shape() {
    // The in-memory store queues the same finalize payload as PostgreSQL
    let env = env().await;
    let queue = MemoryJobQueue::new();
    let store = MemoryStore::new().with_jobs(queue.clone());
    let geo = GeoResolver::new(
        Arc::new(DisabledGeocoder),
        Arc::new(MemoryAddressCache::default()),
        Arc::new(store.clone()),
    );
    let memory_pipeline = IngestionPipeline::new(env.content.clone(), Arc::new(store), geo);
    let tenant = unique_tenant("fin");
    let key = format!("uploads/{}.jpg", tenant);
    env.content.put(&key, &gradient_jpeg(64, 64)).await.unwrap();

    let in_memory = memory_pipeline.ingest(request(&key, &tenant)).await.unwrap();
    let memory_job = queue.get(in_memory.finalize_job_id).await.unwrap().unwrap();
    assert_eq!(memory_job.status, JobStatus::Pending);
    assert_eq!(
        memory_job.payload,
        Some(json!({"photo_id": in_memory.photo.id, "object_key": key}))
    );

    let persisted = env.pipeline.ingest(request(&key, &tenant)).await.unwrap();
    let pg_job = env.db.jobs.get(persisted.finalize_job_id).await.unwrap().unwrap();
    assert_eq!(
        pg_job.payload,
        Some(json!({"photo_id": persisted.photo.id, "object_key": key}))
    );

    let result = env.finalize.execute(JobContext::new(pg_job)).await;
    assert!(matches!(result, JobResult::Success(_)));
}
