//! External sync against a mock HTTP source and the PostgreSQL reconciler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use doku_db::test_fixtures::{setup_test_database, unique_tenant};
use doku_db::{EntityTable, Job, JobStatus, JobType, OrderRepository, PgReconciler};
use doku_jobs::{ExternalSyncHandler, HttpSourceFeed, JobContext, JobHandler, JobResult};

fn sync_job(payload: Option<serde_json::Value>) -> JobContext {
    JobContext::new(Job {
        id: Uuid::now_v7(),
        job_type: JobType::ExternalSync,
        subject_id: None,
        status: JobStatus::Running,
        priority: JobType::ExternalSync.default_priority(),
        payload,
        result: None,
        error_message: None,
        retry_count: 0,
        max_retries: 3,
        created_at: Utc::now(),
        started_at: Some(Utc::now()),
        completed_at: None,
    })
}

async fn source(body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn feed(server: &MockServer) -> HttpSourceFeed {
    HttpSourceFeed::new(
        Some(server.uri()),
        Some("t0ken".to_string()),
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn test_fetched_orders_are_reconciled() {
    let db = setup_test_database().await;
    let reconciler = PgReconciler::with_source(db.pool.clone(), &unique_tenant("ninox-test"));
    let server = source(json!({
        "orders": [{"id": 41, "customer_id": "c9", "name": "Roof", "status": "open"}]
    }))
    .await;
    let handler = ExternalSyncHandler::new(Arc::new(feed(&server)), Arc::new(reconciler.clone()));

    let result = handler.execute(sync_job(None)).await;
    match result {
        JobResult::Success(Some(report)) => assert_eq!(report["created"], 1),
        other => panic!("expected success, got {:?}", other),
    }

    let ext = reconciler
        .ext_ref(EntityTable::Order, "41")
        .await
        .unwrap()
        .expect("order mapped");
    let order = db.orders.get(ext.entity_id).await.unwrap().unwrap();
    assert_eq!(order.name, "Roof");
    assert_eq!(order.tenant_id.as_deref(), Some("c9"));

    // Replaying the same pull changes nothing
    let again = handler.execute(sync_job(None)).await;
    match again {
        JobResult::Success(Some(report)) => {
            assert_eq!(report["created"], 0);
            assert_eq!(report["recreated"], 0);
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_source_completes_with_empty_report() {
    let db = setup_test_database().await;
    let reconciler = PgReconciler::with_source(db.pool.clone(), &unique_tenant("ninox-test"));
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let handler = ExternalSyncHandler::new(Arc::new(feed(&server)), Arc::new(reconciler));

    match handler.execute(sync_job(None)).await {
        JobResult::Success(Some(report)) => assert_eq!(report, json!({
            "created": 0, "updated": 0, "recreated": 0, "tombstoned": 0, "skipped": 0
        })),
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_inline_batch_tombstones_location() {
    let db = setup_test_database().await;
    let reconciler = PgReconciler::with_source(db.pool.clone(), &unique_tenant("ninox-test"));
    let server = MockServer::start().await;
    let handler = ExternalSyncHandler::new(Arc::new(feed(&server)), Arc::new(reconciler.clone()));

    handler
        .execute(sync_job(Some(json!({
            "batch": {"locations": [{"id": "L1", "customer_id": "c1", "name": "Yard"}]}
        }))))
        .await;
    let result = handler
        .execute(sync_job(Some(json!({
            "batch": {"locations": [{"id": "L1", "deleted": true}]}
        }))))
        .await;

    match result {
        JobResult::Success(Some(report)) => assert_eq!(report["tombstoned"], 1),
        other => panic!("expected success, got {:?}", other),
    }
    // Inline batches never hit the source
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
