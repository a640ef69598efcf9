//! # doku-db
//!
//! PostgreSQL + PostGIS persistence for the DokuSuite core.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for locations, photos, orders and the audit log
//! - The delta feed for offline clients
//! - The external reconciliation engine and its `ext_ref` mappings
//! - The job queue table
//! - A filesystem content store
//!
//! ## Example
//!
//! ```rust,ignore
//! use doku_db::{Database, DeltaRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/doku").await?;
//!     db.migrate().await?;
//!
//!     let delta = db.delta.photos_since(Some("c1"), cursor).await?;
//!     println!("{} upserts, {} tombstones", delta.upserts.len(), delta.tombstones.len());
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod content_store;
pub mod delta;
pub mod jobs;
pub mod locations;
pub mod orders;
pub mod photos;
pub mod pool;
pub mod reconcile;

// Always compiled so integration tests (in tests/) can use it
pub mod test_fixtures;

// Re-export core types
pub use doku_core::*;

pub use audit::PgAuditLogRepository;
pub use content_store::FilesystemContentStore;
pub use delta::PgDeltaRepository;
pub use jobs::PgJobRepository;
pub use locations::PgLocationRepository;
pub use orders::PgOrderRepository;
pub use photos::PgPhotoRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use reconcile::{extract_tracked, FieldValue, PgReconciler};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub locations: PgLocationRepository,
    pub photos: PgPhotoRepository,
    pub orders: PgOrderRepository,
    pub audit: PgAuditLogRepository,
    pub delta: PgDeltaRepository,
    /// Background job queue.
    pub jobs: PgJobRepository,
    /// Reconciler for the default external source.
    pub reconciler: PgReconciler,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        let jobs = PgJobRepository::new(pool.clone());
        Self {
            locations: PgLocationRepository::new(pool.clone()),
            photos: PgPhotoRepository::with_job_notify(pool.clone(), jobs.job_notify()),
            orders: PgOrderRepository::new(pool.clone()),
            audit: PgAuditLogRepository::new(pool.clone()),
            delta: PgDeltaRepository::new(pool.clone()),
            jobs,
            reconciler: PgReconciler::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Connect using `DATABASE_URL` and `DATABASE_MAX_CONNECTIONS`.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::Config("DATABASE_URL is not set".to_string()))?;
        let pool = create_pool_with_config(&url, PoolConfig::from_env()).await?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}
