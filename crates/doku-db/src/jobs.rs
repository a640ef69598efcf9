//! Job repository implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, Pool, Postgres, Row, Transaction};
use tokio::sync::Notify;
use uuid::Uuid;

use doku_core::defaults::{JOB_MAX_RETRIES, STALE_JOB_ERROR};
use doku_core::{Error, Job, JobRepository, JobType, Result};

const JOB_COLUMNS: &str = "id, job_type::text AS job_type, subject_id, status::text AS status, \
     priority, payload, result, error_message, retry_count, max_retries, \
     created_at, started_at, completed_at";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Woken on every enqueue so idle workers skip their poll delay.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a repository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Get the job notification handle for event-driven waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Queue a job within an existing transaction.
    ///
    /// Callers wake idle workers through [`job_notify`](Self::job_notify)
    /// after committing.
    pub async fn enqueue_tx(
        tx: &mut Transaction<'_, Postgres>,
        job_type: JobType,
        subject_id: Option<Uuid>,
        payload: Option<JsonValue>,
    ) -> Result<Uuid> {
        let job_id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO job_queue (id, job_type, subject_id, status, priority, payload, max_retries, created_at)
             VALUES ($1, $2::job_type, $3, 'pending'::job_status, $4, $5, $6, $7)",
        )
        .bind(job_id)
        .bind(job_type.as_str())
        .bind(subject_id)
        .bind(job_type.default_priority())
        .bind(&payload)
        .bind(JOB_MAX_RETRIES)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(job_id)
    }

    fn parse_job_row(row: PgRow) -> Result<Job> {
        let job_type: String = row.get("job_type");
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            job_type: job_type.parse()?,
            subject_id: row.get("subject_id"),
            status: status.parse()?,
            priority: row.get("priority"),
            payload: row.get("payload"),
            result: row.get("result"),
            error_message: row.get("error_message"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn enqueue(
        &self,
        job_type: JobType,
        subject_id: Option<Uuid>,
        payload: Option<JsonValue>,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let job_id = Self::enqueue_tx(&mut tx, job_type, subject_id, payload).await?;
        tx.commit().await.map_err(Error::Database)?;

        self.notify.notify_waiters();
        Ok(job_id)
    }

    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        let type_strings: Vec<String> = job_types.iter().map(|jt| jt.as_str().to_string()).collect();

        // Filter by type before locking; an empty array claims any type.
        let row = sqlx::query(&format!(
            "UPDATE job_queue
             SET status = 'running'::job_status, started_at = $1
             WHERE id = (
                 SELECT id FROM job_queue
                 WHERE status = 'pending'::job_status
                   AND (cardinality($2::text[]) = 0 OR job_type::text = ANY($2))
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(&type_strings)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        sqlx::query(
            "UPDATE job_queue
             SET status = 'completed'::job_status, completed_at = $1, result = $2
             WHERE id = $3",
        )
        .bind(Utc::now())
        .bind(&result)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let (retry_count, max_retries): (i32, i32) = sqlx::query_as(
            "SELECT retry_count, max_retries FROM job_queue WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

        if retry_count < max_retries {
            sqlx::query(
                "UPDATE job_queue
                 SET status = 'pending'::job_status, retry_count = $1, error_message = $2,
                     started_at = NULL
                 WHERE id = $3",
            )
            .bind(retry_count + 1)
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        } else {
            sqlx::query(
                "UPDATE job_queue
                 SET status = 'failed'::job_status, completed_at = $1, error_message = $2
                 WHERE id = $3",
            )
            .bind(Utc::now())
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| Error::InvalidInput(format!("stale threshold: {}", e)))?;

        // SET expressions see the row as it was before the update
        let result = sqlx::query(
            "UPDATE job_queue SET
                 status = CASE WHEN retry_count < max_retries
                               THEN 'pending'::job_status ELSE 'failed'::job_status END,
                 retry_count = CASE WHEN retry_count < max_retries
                                    THEN retry_count + 1 ELSE retry_count END,
                 started_at = CASE WHEN retry_count < max_retries THEN NULL ELSE started_at END,
                 completed_at = CASE WHEN retry_count < max_retries THEN NULL ELSE $2 END,
                 error_message = $3
             WHERE status = 'running'::job_status AND started_at <= $1",
        )
        .bind(cutoff)
        .bind(Utc::now())
        .bind(STALE_JOB_ERROR)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let moved = result.rows_affected();
        if moved > 0 {
            self.notify.notify_waiters();
        }
        Ok(moved)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM job_queue WHERE status = 'pending'::job_status")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(count.0)
    }
}
