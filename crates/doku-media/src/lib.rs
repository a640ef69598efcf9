//! # doku-media
//!
//! Pixel-level work for photo ingestion:
//!
//! - [`orientation`]: reading the EXIF orientation tag and applying it
//! - [`normalize`]: re-rendering sideways uploads upright before hashing
//! - [`hash`]: SHA-256 content hashes and DCT perceptual hashes
//! - [`thumbnail`]: bounded JPEG thumbnails for the finalize job
//!
//! Everything here is synchronous and CPU-bound. Async callers run it on the
//! blocking pool (`tokio::task::spawn_blocking`).

pub mod hash;
pub mod normalize;
pub mod orientation;
pub mod thumbnail;

// Always compiled so downstream crates can build test images
pub mod test_fixtures;

pub use hash::{content_hash, perceptual_hash, PerceptualHash};
pub use normalize::{normalize_orientation, NormalizedImage};
pub use orientation::Orientation;
pub use thumbnail::{render_thumbnail, thumbnail_key};
