//! Centralized default constants for the DokuSuite core.
//!
//! Every crate reads its defaults from here; environment variables override
//! them through each component's `from_env()` constructor.

// =============================================================================
// GEO RESOLUTION
// =============================================================================

/// Maximum distance (meters) between a photo coordinate and a known location
/// for the photo to be attached to that location.
pub const LOCATION_MATCH_TOLERANCE_M: f64 = 100.0;

/// Decimal places a coordinate is rounded to before it becomes a geocode cache key.
/// Five places is roughly one meter at the equator.
pub const GEOCODE_PRECISION: u32 = 5;

/// Expiry of cached reverse-geocode answers (seconds).
pub const GEOCODE_CACHE_TTL_SECS: u64 = 86_400;

/// Timeout for a single reverse-geocoder request (seconds).
pub const GEOCODE_TIMEOUT_SECS: u64 = 5;

/// Google Geocoding API endpoint.
pub const GEOCODE_BASE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Capacity of the in-process geocode cache used when Redis is unavailable.
pub const GEOCODE_MEMORY_CACHE_CAPACITY: usize = 10_000;

/// Prefix for geocode cache keys.
pub const GEOCODE_CACHE_PREFIX: &str = "geo:";

// =============================================================================
// IMAGES
// =============================================================================

/// Bounding box (pixels) for finalize-job thumbnails.
pub const THUMBNAIL_MAX_DIM: u32 = 256;

/// Object-store prefix for thumbnails.
pub const THUMBNAIL_PREFIX: &str = "thumbnails/";

/// JPEG quality used when re-encoding a rotated upload or a thumbnail.
pub const JPEG_QUALITY: u8 = 90;

// =============================================================================
// EXTERNAL RECONCILIATION
// =============================================================================

/// Source name recorded on ExtRef rows for the external system-of-record.
pub const EXTERNAL_SOURCE_NAME: &str = "ninox";

/// Timeout for fetching one batch from the external source (seconds).
pub const EXTERNAL_FETCH_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// AUDIT
// =============================================================================

/// Actor recorded on audit entries written without a user.
pub const SYSTEM_ACTOR: &str = "system";

// =============================================================================
// JOBS
// =============================================================================

/// Default retries for a failed job before it is marked failed.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Poll interval (ms) when the queue is empty. Enqueue also wakes the worker.
pub const JOB_POLL_INTERVAL_MS: u64 = 1_000;

/// Maximum concurrently executing jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Hard timeout for a single job execution (seconds).
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// A job still `running` after this long lost its worker and is requeued (seconds).
pub const JOB_STALE_AFTER_SECS: u64 = 2 * JOB_TIMEOUT_SECS;

/// Error message recorded on a job requeued after its worker disappeared.
pub const STALE_JOB_ERROR: &str = "worker lease expired";

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum connections in the pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default connection acquire timeout (seconds).
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout (seconds).
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geocode_precision_is_meter_scale() {
        assert_eq!(GEOCODE_PRECISION, 5);
    }

    #[test]
    fn test_thumbnail_prefix_ends_with_slash() {
        assert!(THUMBNAIL_PREFIX.ends_with('/'));
    }
}
