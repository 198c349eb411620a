//! SQLite-backed job store.
//!
//! Persists job records in a single `jobs` table: the domain payload as
//! a JSON column, the scheduler bookkeeping as plain columns, and a
//! monotonic `received_at` sequence that defines pickup order
//! (newest-received-first). Renewals update in place and keep their
//! original receipt position.

use std::marker::PhantomData;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::scheduler::{Job, JobRecord, JobStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id          TEXT PRIMARY KEY,
    payload         TEXT NOT NULL,
    active          INTEGER NOT NULL DEFAULT 0,
    attempts        INTEGER NOT NULL DEFAULT 0,
    retry_after     INTEGER,
    last_attempt_at INTEGER,
    received_at     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_eligible ON jobs (active, retry_after, received_at);
"#;

/// SQLite-backed `JobStore`.
///
/// Timestamps are stored as Unix milliseconds; the payload must be
/// serde-serializable.
pub struct SqliteJobStore<J> {
    pool: SqlitePool,
    _marker: PhantomData<fn() -> J>,
}

impl<J> SqliteJobStore<J>
where
    J: Job + Serialize + DeserializeOwned,
{
    /// Opens (creating if missing) the database at `path` and ensures
    /// the schema exists.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Creates a store from an existing pool, ensuring the schema
    /// exists. Useful when the database is shared with other tables.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            _marker: PhantomData,
        })
    }

    /// Returns the number of persisted records, active or not.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    /// Returns a snapshot of the record with the given id.
    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord<J>>, StoreError> {
        let row = sqlx::query(
            "SELECT payload, active, attempts, retry_after, last_attempt_at \
             FROM jobs WHERE job_id = ?1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_record).transpose()
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

fn row_to_record<J>(row: sqlx::sqlite::SqliteRow) -> Result<JobRecord<J>, StoreError>
where
    J: Job + DeserializeOwned,
{
    let payload: String = row.try_get("payload")?;
    let active: i64 = row.try_get("active")?;
    let attempts: i64 = row.try_get("attempts")?;
    let retry_after: Option<i64> = row.try_get("retry_after")?;
    let last_attempt_at: Option<i64> = row.try_get("last_attempt_at")?;

    Ok(JobRecord {
        job: serde_json::from_str(&payload)?,
        active: active != 0,
        attempts: attempts as u32,
        retry_after: retry_after.map(millis_to_datetime),
        last_attempt_at: last_attempt_at.map(millis_to_datetime),
    })
}

#[async_trait]
impl<J> JobStore<J> for SqliteJobStore<J>
where
    J: Job + Serialize + DeserializeOwned,
{
    async fn mark_all_jobs_inactive(&self) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET active = 0")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_next_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRecord<J>>, StoreError> {
        let rows = sqlx::query(
            "SELECT payload, active, attempts, retry_after, last_attempt_at \
             FROM jobs \
             WHERE active = 0 AND (retry_after IS NULL OR retry_after <= ?1) \
             ORDER BY received_at DESC \
             LIMIT ?2",
        )
        .bind(now.timestamp_millis())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    async fn save_job(
        &self,
        record: &JobRecord<J>,
        _allow_batching: bool,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&record.job)?;

        // The receipt sequence is assigned once on first insert and
        // survives renewals, so re-saving never changes pickup order.
        sqlx::query(
            "INSERT INTO jobs \
                 (job_id, payload, active, attempts, retry_after, last_attempt_at, received_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, \
                 (SELECT IFNULL(MAX(received_at), 0) + 1 FROM jobs)) \
             ON CONFLICT(job_id) DO UPDATE SET \
                 payload = excluded.payload, \
                 active = excluded.active, \
                 attempts = excluded.attempts, \
                 retry_after = excluded.retry_after, \
                 last_attempt_at = excluded.last_attempt_at",
        )
        .bind(record.job_id())
        .bind(&payload)
        .bind(record.active as i64)
        .bind(record.attempts as i64)
        .bind(record.retry_after.map(|t| t.timestamp_millis()))
        .bind(record.last_attempt_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_job(&self, job_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM jobs WHERE job_id = ?1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
