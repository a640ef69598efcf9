//! # doku-ingest
//!
//! Request-side photo handling:
//!
//! - [`IngestionPipeline`] turns an uploaded object into a persisted, audited
//!   photo row and a queued finalize job.
//! - [`PhotoService`] carries the owner-scoped photo mutations: batch order
//!   reassignment, annotation edits and soft delete.
//!
//! Both depend only on the `doku-core` contracts, so they run unchanged against
//! PostgreSQL or the in-memory mocks.

pub mod pipeline;
pub mod service;

pub use pipeline::{IngestOutcome, IngestRequest, IngestionPipeline};
pub use service::PhotoService;
