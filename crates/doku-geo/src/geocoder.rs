//! Reverse geocoders.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use doku_core::defaults::{GEOCODE_BASE_URL, GEOCODE_TIMEOUT_SECS};
use doku_core::{Error, GeoPoint, Result, ReverseGeocoder};

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: Option<String>,
}

/// Google Geocoding API client.
///
/// Returns the `formatted_address` of the first result. `ZERO_RESULTS` is a
/// successful `None`; any other non-`OK` status is an error.
#[derive(Clone)]
pub struct GoogleGeocoder {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GoogleGeocoder {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(
            api_key,
            GEOCODE_BASE_URL,
            Duration::from_secs(GEOCODE_TIMEOUT_SECS),
        )
    }

    /// Create a client against a custom endpoint (tests, proxies).
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ReverseGeocoder for GoogleGeocoder {
    async fn lookup(&self, point: GeoPoint) -> Result<Option<String>> {
        let start = Instant::now();
        let latlng = format!("{},{}", point.lat, point.lon);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("latlng", latlng.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Geocoder(format!(
                "geocoding API returned HTTP {}",
                response.status()
            )));
        }

        let body: GeocodeResponse = response.json().await?;
        let address = match body.status.as_str() {
            "OK" => body
                .results
                .into_iter()
                .next()
                .and_then(|r| r.formatted_address)
                .filter(|a| !a.is_empty()),
            "ZERO_RESULTS" => None,
            other => {
                return Err(Error::Geocoder(format!(
                    "geocoding API status {}: {}",
                    other,
                    body.error_message.unwrap_or_default()
                )))
            }
        };

        debug!(
            subsystem = "geo",
            component = "google_geocoder",
            op = "reverse_geocode",
            found = address.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Reverse geocode complete"
        );
        Ok(address)
    }
}

/// Geocoder used when no API key is configured. Never finds an address.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGeocoder;

#[async_trait]
impl ReverseGeocoder for DisabledGeocoder {
    async fn lookup(&self, _point: GeoPoint) -> Result<Option<String>> {
        Ok(None)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Build the geocoder from `GOOGLE_MAPS_API_KEY`, `GEOCODE_BASE_URL` and
/// `GEOCODE_TIMEOUT_SECS`.
pub fn geocoder_from_env() -> Arc<dyn ReverseGeocoder> {
    let api_key = match std::env::var("GOOGLE_MAPS_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => {
            info!(
                subsystem = "geo",
                component = "google_geocoder",
                "GOOGLE_MAPS_API_KEY not set, reverse geocoding disabled"
            );
            return Arc::new(DisabledGeocoder);
        }
    };

    let base_url =
        std::env::var("GEOCODE_BASE_URL").unwrap_or_else(|_| GEOCODE_BASE_URL.to_string());
    let timeout_secs = std::env::var("GEOCODE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(GEOCODE_TIMEOUT_SECS);

    match GoogleGeocoder::with_config(api_key, base_url, Duration::from_secs(timeout_secs)) {
        Ok(geocoder) => Arc::new(geocoder),
        Err(e) => {
            warn!(
                subsystem = "geo",
                component = "google_geocoder",
                error = %e,
                "Geocoder setup failed, reverse geocoding disabled"
            );
            Arc::new(DisabledGeocoder)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn point() -> GeoPoint {
        GeoPoint::new(52.52, 13.405).unwrap()
    }

    async fn geocoder_for(server: &MockServer, timeout: Duration) -> GoogleGeocoder {
        GoogleGeocoder::with_config("test-key", server.uri(), timeout).unwrap()
    }

    #[tokio::test]
    async fn test_returns_first_formatted_address() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("latlng", "52.52,13.405"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "results": [
                    {"formatted_address": "Alexanderplatz 1, 10178 Berlin"},
                    {"formatted_address": "Berlin, Germany"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let geocoder = geocoder_for(&server, Duration::from_secs(5)).await;
        let address = geocoder.lookup(point()).await.unwrap();
        assert_eq!(address.as_deref(), Some("Alexanderplatz 1, 10178 Berlin"));
    }

    #[tokio::test]
    async fn test_zero_results_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ZERO_RESULTS",
                "results": []
            })))
            .mount(&server)
            .await;

        let geocoder = geocoder_for(&server, Duration::from_secs(5)).await;
        assert_eq!(geocoder.lookup(point()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_denied_status_is_geocoder_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "REQUEST_DENIED",
                "error_message": "The provided API key is invalid.",
                "results": []
            })))
            .mount(&server)
            .await;

        let geocoder = geocoder_for(&server, Duration::from_secs(5)).await;
        let err = geocoder.lookup(point()).await.unwrap_err();
        assert!(matches!(err, Error::Geocoder(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_geocoder_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let geocoder = geocoder_for(&server, Duration::from_secs(5)).await;
        assert!(matches!(
            geocoder.lookup(point()).await,
            Err(Error::Geocoder(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "OK", "results": []}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let geocoder = geocoder_for(&server, Duration::from_millis(100)).await;
        let err = geocoder.lookup(point()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_disabled_geocoder_finds_nothing() {
        let geocoder = DisabledGeocoder;
        assert!(!geocoder.is_enabled());
        assert_eq!(geocoder.lookup(point()).await.unwrap(), None);
    }
}
