//! Coordinate resolution for ingestion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use doku_core::defaults::{GEOCODE_CACHE_TTL_SECS, GEOCODE_TIMEOUT_SECS, LOCATION_MATCH_TOLERANCE_M};
use doku_core::{GeoPoint, KeyValueCache, LocationRepository, ReverseGeocoder, TenantScope};

use crate::cache::{address_cache_key, cache_from_env};
use crate::geocoder::geocoder_from_env;

/// What a coordinate resolved to. Either half may be missing independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoResolution {
    pub address: Option<String>,
    pub location_id: Option<Uuid>,
}

/// Cache-first reverse geocoding plus nearest-location matching.
#[derive(Clone)]
pub struct GeoResolver {
    geocoder: Arc<dyn ReverseGeocoder>,
    cache: Arc<dyn KeyValueCache>,
    locations: Arc<dyn LocationRepository>,
    cache_ttl: Duration,
    lookup_timeout: Duration,
    tolerance_m: f64,
}

impl GeoResolver {
    pub fn new(
        geocoder: Arc<dyn ReverseGeocoder>,
        cache: Arc<dyn KeyValueCache>,
        locations: Arc<dyn LocationRepository>,
    ) -> Self {
        Self {
            geocoder,
            cache,
            locations,
            cache_ttl: Duration::from_secs(GEOCODE_CACHE_TTL_SECS),
            lookup_timeout: Duration::from_secs(GEOCODE_TIMEOUT_SECS),
            tolerance_m: LOCATION_MATCH_TOLERANCE_M,
        }
    }

    /// Geocoder, address cache and timings from the environment.
    pub async fn from_env(locations: Arc<dyn LocationRepository>) -> Self {
        Self::new(geocoder_from_env(), cache_from_env().await, locations).with_env_overrides()
    }

    /// Read `GEOCODE_CACHE_TTL_SECS` and `GEOCODE_TIMEOUT_SECS` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secs) = env_secs("GEOCODE_CACHE_TTL_SECS") {
            self.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("GEOCODE_TIMEOUT_SECS") {
            self.lookup_timeout = Duration::from_secs(secs);
        }
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_tolerance_m(mut self, tolerance_m: f64) -> Self {
        self.tolerance_m = tolerance_m;
        self
    }

    /// Resolve address and location concurrently.
    pub async fn resolve(&self, tenant: TenantScope<'_>, point: GeoPoint) -> GeoResolution {
        let start = Instant::now();
        let (address, location_id) =
            tokio::join!(self.resolve_address(point), self.match_location(tenant, point));

        debug!(
            subsystem = "geo",
            component = "resolver",
            op = "resolve",
            has_address = address.is_some(),
            has_location = location_id.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Coordinate resolved"
        );
        GeoResolution {
            address,
            location_id,
        }
    }

    /// Cached reverse geocode. Failures and timeouts yield `None` and are not cached.
    pub async fn resolve_address(&self, point: GeoPoint) -> Option<String> {
        let key = address_cache_key(point);
        if let Some(address) = self.cache.get(&key).await {
            return Some(address);
        }
        if !self.geocoder.is_enabled() {
            return None;
        }

        let lookup = tokio::time::timeout(self.lookup_timeout, self.geocoder.lookup(point)).await;
        match lookup {
            Ok(Ok(Some(address))) => {
                self.cache.set(&key, &address, self.cache_ttl).await;
                Some(address)
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!(
                    subsystem = "geo",
                    component = "resolver",
                    op = "reverse_geocode",
                    error = %e,
                    "Reverse geocoding failed, continuing without address"
                );
                None
            }
            Err(_) => {
                warn!(
                    subsystem = "geo",
                    component = "resolver",
                    op = "reverse_geocode",
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Reverse geocoding timed out, continuing without address"
                );
                None
            }
        }
    }

    /// Nearest live, active location within tolerance. Errors yield `None`.
    pub async fn match_location(&self, tenant: TenantScope<'_>, point: GeoPoint) -> Option<Uuid> {
        match self
            .locations
            .find_nearest_within(tenant, point, self.tolerance_m)
            .await
        {
            Ok(found) => found.map(|l| l.id),
            Err(e) => {
                warn!(
                    subsystem = "geo",
                    component = "resolver",
                    op = "match_location",
                    error = %e,
                    "Location matching failed, continuing without location"
                );
                None
            }
        }
    }
}

fn env_secs(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
