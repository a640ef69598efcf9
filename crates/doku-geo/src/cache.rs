//! Address caches keyed by rounded coordinate.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use doku_core::defaults::{
    GEOCODE_CACHE_PREFIX, GEOCODE_MEMORY_CACHE_CAPACITY, GEOCODE_PRECISION,
};
use doku_core::{GeoPoint, KeyValueCache};

/// Cache key for `point`: `geo:{lat},{lon}` at `GEOCODE_PRECISION` decimals.
///
/// Points that round to the same cell share a key.
pub fn address_cache_key(point: GeoPoint) -> String {
    let p = point.rounded(GEOCODE_PRECISION);
    let precision = GEOCODE_PRECISION as usize;
    // Adding 0.0 folds -0.0 into 0.0 so both sides of the axis share a key.
    format!(
        "{}{:.*},{:.*}",
        GEOCODE_CACHE_PREFIX,
        precision,
        p.lat + 0.0,
        precision,
        p.lon + 0.0
    )
}

// =============================================================================
// IN-PROCESS
// =============================================================================

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Bounded in-process cache with per-entry expiry.
///
/// Used when Redis is disabled or unreachable. Entries are lost on restart.
#[derive(Clone)]
pub struct MemoryAddressCache {
    entries: Arc<Mutex<LruCache<String, Entry>>>,
}

impl MemoryAddressCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryAddressCache {
    fn default() -> Self {
        Self::new(GEOCODE_MEMORY_CACHE_CAPACITY)
    }
}

#[async_trait]
impl KeyValueCache for MemoryAddressCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.put(key.to_string(), entry);
    }
}

// =============================================================================
// REDIS
// =============================================================================

/// Redis-backed cache shared by every worker process.
///
/// Redis errors are logged and behave like a miss; a failed `set` only costs
/// a repeated geocoder call later.
#[derive(Clone)]
pub struct RedisAddressCache {
    connection: Arc<RwLock<ConnectionManager>>,
}

impl RedisAddressCache {
    /// Connect to `url`. Fails if the server is unreachable.
    pub async fn connect(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
        })
    }
}

#[async_trait]
impl KeyValueCache for RedisAddressCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection.write().await;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(value)) => {
                debug!(subsystem = "geo", component = "address_cache", key, "Cache HIT");
                Some(value)
            }
            Ok(None) => {
                debug!(subsystem = "geo", component = "address_cache", key, "Cache MISS");
                None
            }
            Err(e) => {
                error!(subsystem = "geo", component = "address_cache", error = %e, "Redis GET error");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let mut conn = self.connection.write().await;
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await {
            error!(subsystem = "geo", component = "address_cache", error = %e, "Redis SET error");
        }
    }
}

/// Connection URL with the password, if any, replaced by `***`.
fn redact_password(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() && parsed.set_password(Some("***")).is_err() {
                return "<redacted>".to_string();
            }
            parsed.to_string()
        }
        Err(_) => "<redacted>".to_string(),
    }
}

/// Build the address cache from `REDIS_ENABLED` / `REDIS_URL`.
///
/// Falls back to a [`MemoryAddressCache`] when Redis is disabled, unset or
/// unreachable.
pub async fn cache_from_env() -> Arc<dyn KeyValueCache> {
    let enabled = std::env::var("REDIS_ENABLED")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);
    let url = std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty());

    match (enabled, url) {
        (true, Some(url)) => match RedisAddressCache::connect(&url).await {
            Ok(cache) => {
                info!(
                    subsystem = "geo",
                    component = "address_cache",
                    url = %redact_password(&url),
                    "Redis address cache enabled"
                );
                Arc::new(cache)
            }
            Err(e) => {
                warn!(
                    subsystem = "geo",
                    component = "address_cache",
                    error = %e,
                    "Failed to connect to Redis, using in-process address cache"
                );
                Arc::new(MemoryAddressCache::default())
            }
        },
        _ => {
            info!(
                subsystem = "geo",
                component = "address_cache",
                "Redis not configured, using in-process address cache"
            );
            Arc::new(MemoryAddressCache::default())
        }
    }
}
