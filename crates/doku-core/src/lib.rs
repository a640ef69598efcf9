//! # doku-core
//!
//! Core types, traits, and abstractions for the DokuSuite synchronization
//! and ingestion core.
//!
//! This crate provides the domain model (locations, photos, orders, external
//! references, audit entries, jobs), the error taxonomy, the calendar-week
//! rule and the trait contracts the other crates implement or consume.
//!
//! ## Logging
//!
//! Every crate logs through `tracing` with structured fields: `subsystem`
//! (`ingest`, `geo`, `media`, `db`, `sync`, `jobs`), `component`, `op`, entity
//! ids such as `photo_id` or `job_id`, and `duration_ms` on completions.
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values |
//! | TRACE | Per-record iteration during reconciliation |

pub mod calendar_week;
pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;

#[cfg(feature = "mock")]
pub mod mock;

// Re-export commonly used types at crate root
pub use calendar_week::{calendar_week_label, RegionalZone, EUROPE_BERLIN};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
