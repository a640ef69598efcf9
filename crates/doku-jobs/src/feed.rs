//! HTTP client for the external system of record.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use doku_core::defaults::EXTERNAL_FETCH_TIMEOUT_SECS;
use doku_core::{Error, ExternalBatch, ExternalSourceFeed, Result};

/// Pulls one batch with a single GET.
///
/// The response body is a JSON object mapping table names to record arrays.
/// Without a configured URL every fetch yields an empty batch.
#[derive(Clone)]
pub struct HttpSourceFeed {
    client: Client,
    url: Option<String>,
    token: Option<String>,
}

impl HttpSourceFeed {
    pub fn new(url: Option<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.filter(|u| !u.trim().is_empty()),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Build from `NINOX_URL`, `NINOX_TOKEN` and `EXTERNAL_FETCH_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let timeout_secs = std::env::var("EXTERNAL_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(EXTERNAL_FETCH_TIMEOUT_SECS);
        let url = std::env::var("NINOX_URL").ok();
        if url.is_none() {
            info!(
                subsystem = "sync",
                component = "source_feed",
                "NINOX_URL not set, external fetches return empty batches"
            );
        }
        Self::new(
            url,
            std::env::var("NINOX_TOKEN").ok(),
            Duration::from_secs(timeout_secs),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

#[async_trait]
impl ExternalSourceFeed for HttpSourceFeed {
    async fn fetch(&self) -> Result<ExternalBatch> {
        let Some(url) = self.url.as_deref() else {
            return Ok(ExternalBatch::new());
        };
        let start = Instant::now();

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("external source fetch: {}", e))
            } else {
                Error::ExternalSource(format!("external source fetch: {}", e))
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::ExternalSource(format!(
                "external source returned HTTP {}",
                response.status()
            )));
        }

        let batch: ExternalBatch = response
            .json()
            .await
            .map_err(|e| Error::ExternalSource(format!("invalid external batch: {}", e)))?;

        debug!(
            subsystem = "sync",
            component = "source_feed",
            op = "fetch",
            tables = batch.tables.len(),
            records = batch.record_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "External batch fetched"
        );
        Ok(batch)
    }
}
