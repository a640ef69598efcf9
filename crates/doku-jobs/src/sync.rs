//! External sync job: pull one batch and reconcile it.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use doku_core::{ExternalBatch, ExternalSourceFeed, JobType, Reconciler};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Optional payload of an `external_sync` job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    /// Records pushed by an on-demand trigger; skips the fetch.
    #[serde(default)]
    pub batch: Option<ExternalBatch>,
}

pub struct ExternalSyncHandler {
    feed: Arc<dyn ExternalSourceFeed>,
    reconciler: Arc<dyn Reconciler>,
}

impl ExternalSyncHandler {
    pub fn new(feed: Arc<dyn ExternalSourceFeed>, reconciler: Arc<dyn Reconciler>) -> Self {
        Self { feed, reconciler }
    }

    /// Fetch from the source. An unreachable source yields an empty batch.
    async fn fetch_or_empty(&self) -> ExternalBatch {
        match self.feed.fetch().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(
                    subsystem = "sync",
                    component = "external_sync",
                    error = %e,
                    "External fetch failed, reconciling empty batch"
                );
                ExternalBatch::new()
            }
        }
    }
}

#[async_trait]
impl JobHandler for ExternalSyncHandler {
    fn job_type(&self) -> JobType {
        JobType::ExternalSync
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let payload = match ctx.parse_payload::<Option<SyncPayload>>() {
            Ok(p) => p.unwrap_or_default(),
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        let (batch, source) = match payload.batch {
            Some(batch) => (batch, "inline"),
            None => (self.fetch_or_empty().await, "feed"),
        };

        match self.reconciler.reconcile(&batch).await {
            Ok(report) => {
                info!(
                    subsystem = "sync",
                    component = "external_sync",
                    job_id = %ctx.job.id,
                    source,
                    created = report.created,
                    updated = report.updated,
                    recreated = report.recreated,
                    tombstoned = report.tombstoned,
                    skipped = report.skipped,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "External sync complete"
                );
                JobResult::Success(serde_json::to_value(report).ok())
            }
            Err(e) => {
                warn!(
                    subsystem = "sync",
                    component = "external_sync",
                    job_id = %ctx.job.id,
                    error = %e,
                    "Reconciliation failed, batch will be retried"
                );
                JobResult::Retry(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::job;
    use doku_core::mock::{MockFeed, RecordingReconciler};
    use doku_core::ExternalRecord;
    use serde_json::json;

    fn handler(feed: MockFeed, reconciler: RecordingReconciler) -> ExternalSyncHandler {
        ExternalSyncHandler::new(Arc::new(feed), Arc::new(reconciler))
    }

    fn feed_batch() -> ExternalBatch {
        ExternalBatch::new().with_table(
            "locations",
            vec![ExternalRecord::new("L1").field("name", "Depot").with_etag("e1")],
        )
    }

    #[tokio::test]
    async fn test_fetches_and_reports() {
        let feed = MockFeed::new().with_batch(feed_batch());
        let reconciler = RecordingReconciler::new();
        let h = handler(feed.clone(), reconciler.clone());

        let result = h
            .execute(JobContext::new(job(JobType::ExternalSync, None, None)))
            .await;

        match result {
            JobResult::Success(Some(report)) => assert_eq!(report["created"], 1),
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(feed.fetch_count(), 1);
        assert_eq!(reconciler.batches(), vec![feed_batch()]);
    }

    #[tokio::test]
    async fn test_inline_batch_skips_fetch() {
        let feed = MockFeed::new().with_batch(feed_batch());
        let reconciler = RecordingReconciler::new();
        let h = handler(feed.clone(), reconciler.clone());

        let inline = json!({"batch": {"orders": [{"id": 7, "status": "open"}]}});
        h.execute(JobContext::new(job(JobType::ExternalSync, None, Some(inline))))
            .await;

        assert_eq!(feed.fetch_count(), 0);
        let batches = reconciler.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].tables["orders"][0].id, "7");
    }

    #[tokio::test]
    async fn test_fetch_failure_reconciles_empty_batch() {
        let reconciler = RecordingReconciler::new();
        let h = handler(MockFeed::failing(), reconciler.clone());

        let result = h
            .execute(JobContext::new(job(JobType::ExternalSync, None, None)))
            .await;

        assert!(matches!(result, JobResult::Success(_)));
        assert_eq!(reconciler.batches(), vec![ExternalBatch::new()]);
    }

    #[tokio::test]
    async fn test_feed_timeout_reconciles_empty_batch() {
        use crate::feed::HttpSourceFeed;
        use std::time::Duration;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"locations": [{"id": "L1"}]}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
        let feed =
            HttpSourceFeed::new(Some(server.uri()), None, Duration::from_millis(200)).unwrap();
        let reconciler = RecordingReconciler::new();
        let h = ExternalSyncHandler::new(Arc::new(feed), Arc::new(reconciler.clone()));

        let result = h
            .execute(JobContext::new(job(JobType::ExternalSync, None, None)))
            .await;

        assert!(matches!(result, JobResult::Success(_)));
        assert_eq!(reconciler.batches(), vec![ExternalBatch::new()]);
    }

    #[tokio::test]
    async fn test_reconcile_failure_retries() {
        let reconciler = RecordingReconciler::new();
        reconciler.set_failing(true);
        let h = handler(MockFeed::new().with_batch(feed_batch()), reconciler);

        let result = h
            .execute(JobContext::new(job(JobType::ExternalSync, None, None)))
            .await;

        assert!(matches!(result, JobResult::Retry(_)));
    }

    #[tokio::test]
    async fn test_malformed_inline_batch_fails() {
        let h = handler(MockFeed::new(), RecordingReconciler::new());
        let bad = json!({"batch": {"orders": [{"status": "no id"}]}});

        let result = h
            .execute(JobContext::new(job(JobType::ExternalSync, None, Some(bad))))
            .await;

        assert!(matches!(result, JobResult::Failed(_)));
    }
}
