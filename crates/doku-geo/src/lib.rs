//! # doku-geo
//!
//! Turns a photo's coordinate into a postal address and a known location.
//!
//! - [`GoogleGeocoder`] calls the Google Geocoding API; [`DisabledGeocoder`]
//!   stands in when no API key is configured.
//! - [`RedisAddressCache`] and [`MemoryAddressCache`] memoise addresses by
//!   rounded coordinate.
//! - [`GeoResolver`] runs the cached address lookup and nearest-location match
//!   concurrently, degrading each half to `None` on failure.
//!
//! ## Configuration
//!
//! - `GOOGLE_MAPS_API_KEY`: enables the geocoder (unset: disabled)
//! - `GEOCODE_BASE_URL`, `GEOCODE_TIMEOUT_SECS`
//! - `REDIS_ENABLED`, `REDIS_URL`, `GEOCODE_CACHE_TTL_SECS`

pub mod cache;
pub mod geocoder;
pub mod resolver;

pub use cache::{address_cache_key, cache_from_env, MemoryAddressCache, RedisAddressCache};
pub use geocoder::{geocoder_from_env, DisabledGeocoder, GoogleGeocoder};
pub use resolver::{GeoResolution, GeoResolver};
