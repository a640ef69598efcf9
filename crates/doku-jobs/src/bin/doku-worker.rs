//! DokuSuite background worker.
//!
//! ```text
//! doku-worker run
//! doku-worker sync [--batch-file records.json]
//! doku-worker migrate
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use doku_core::{ExternalBatch, JobRepository, JobType};
use doku_db::{Database, FilesystemContentStore};
use doku_jobs::logging::{self, LogConfig};
use doku_jobs::{
    ExternalSyncHandler, FinalizePhotoHandler, HttpSourceFeed, SyncPayload, WorkerBuilder,
    WorkerConfig,
};

#[derive(Parser)]
#[command(name = "doku-worker", version, about = "DokuSuite background job worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process queued jobs until Ctrl-C.
    Run,
    /// Enqueue one external sync job and exit.
    Sync {
        /// Reconcile the records in this JSON file instead of fetching.
        #[arg(long)]
        batch_file: Option<PathBuf>,
    },
    /// Apply database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let log_config = LogConfig::from_env();
    let _log_guard = logging::init(&log_config)?;

    let cli = Cli::parse();
    let db = Database::from_env()
        .await
        .context("connecting to the database")?;

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            info!("Migrations applied");
        }
        Command::Sync { batch_file } => {
            let payload = match batch_file {
                Some(path) => {
                    let raw = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    let batch: ExternalBatch = serde_json::from_slice(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?;
                    Some(serde_json::to_value(SyncPayload { batch: Some(batch) })?)
                }
                None => None,
            };
            let job_id = db.jobs.enqueue(JobType::ExternalSync, None, payload).await?;
            info!(%job_id, "External sync job enqueued");
            println!("{}", job_id);
        }
        Command::Run => run(db).await?,
    }

    Ok(())
}

async fn run(db: Database) -> anyhow::Result<()> {
    let content = Arc::new(FilesystemContentStore::from_env()?);
    let feed = Arc::new(HttpSourceFeed::from_env()?);
    let handle = WorkerBuilder::new(Arc::new(db.jobs.clone()))
        .with_config(WorkerConfig::from_env())
        .with_notify(db.jobs.job_notify())
        .with_handler(FinalizePhotoHandler::new(
            content,
            Arc::new(db.photos.clone()),
        ))
        .with_handler(ExternalSyncHandler::new(
            feed,
            Arc::new(db.reconciler.clone()),
        ))
        .build()
        .await
        .start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down job worker");
    handle.shutdown().await?;
    Ok(())
}
