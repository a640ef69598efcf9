//! # doku-jobs
//!
//! Background processing for DokuSuite.
//!
//! This crate provides:
//! - [`JobWorker`]: claims queued jobs with bounded concurrency and dispatches
//!   them to registered [`JobHandler`]s, retrying failures until the job's
//!   `max_retries` is spent
//! - [`FinalizePhotoHandler`]: thumbnails and hash verification after upload
//! - [`ExternalSyncHandler`] with [`HttpSourceFeed`]: pulls the external system
//!   of record and reconciles it into the local store
//! - [`logging::init`]: the `tracing` subscriber setup used by `doku-worker`
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use doku_db::{Database, FilesystemContentStore};
//! use doku_jobs::{FinalizePhotoHandler, WorkerBuilder, WorkerConfig};
//!
//! let db = Database::from_env().await?;
//! let content = Arc::new(FilesystemContentStore::from_env()?);
//!
//! let handle = WorkerBuilder::new(Arc::new(db.jobs.clone()))
//!     .with_config(WorkerConfig::from_env())
//!     .with_notify(db.jobs.job_notify())
//!     .with_handler(FinalizePhotoHandler::new(content, Arc::new(db.photos.clone())))
//!     .build()
//!     .await
//!     .start();
//!
//! handle.shutdown().await?;
//! ```

pub mod feed;
pub mod finalize;
pub mod handler;
pub mod logging;
pub mod sync;
pub mod worker;

pub use feed::HttpSourceFeed;
pub use finalize::{FinalizePayload, FinalizePhotoHandler};
pub use handler::{JobContext, JobHandler, JobResult};
pub use logging::{LogConfig, LogFormat};
pub use sync::{ExternalSyncHandler, SyncPayload};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = doku_core::defaults::JOB_POLL_INTERVAL_MS;
