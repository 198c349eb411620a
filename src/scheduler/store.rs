//! Job store contract and the in-memory reference store.
//!
//! The store is the scheduler's single cross-restart source of truth.
//! It owns durable upsert/remove/query of job records; the scheduler's
//! in-memory active set is only a cache reconciled against it at start.
//!
//! Ordering of `get_next_jobs` is store-defined. Both stores in this
//! crate return eligible records newest-received-first, and a renewal
//! (re-saving an existing identity) keeps the original receipt order.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::job::{Job, JobRecord};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to serialize or deserialize a job payload.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    /// Backend-specific failure in a custom store implementation.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Durable storage for job records.
///
/// Implementations must treat `save_job` as an upsert keyed by the
/// record's job id. `allow_batching` is an optimization hint: a store
/// may coalesce or defer such writes, but must not reorder a record's
/// receipt position on renewal.
#[async_trait]
pub trait JobStore<J: Job>: Send + Sync {
    /// Clears the `active` flag on every persisted record. Called once
    /// at scheduler start to recover from a possibly-crashed prior run.
    async fn mark_all_jobs_inactive(&self) -> Result<(), StoreError>;

    /// Returns up to `limit` records that are eligible at `now`: not
    /// active, with `retry_after` unset or elapsed. Ordered
    /// newest-received-first.
    async fn get_next_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRecord<J>>, StoreError>;

    /// Upserts a record by job id.
    async fn save_job(&self, record: &JobRecord<J>, allow_batching: bool)
        -> Result<(), StoreError>;

    /// Permanently deletes the record with the given id. Removing an
    /// unknown id is not an error.
    async fn remove_job(&self, job_id: &str) -> Result<(), StoreError>;
}

struct StoredRecord<J> {
    record: JobRecord<J>,
    /// Monotonic receipt sequence; preserved across renewals so that
    /// re-saving an id does not change its pickup order.
    seq: u64,
}

struct MemoryStoreInner<J> {
    records: HashMap<String, StoredRecord<J>>,
    next_seq: u64,
}

/// In-memory `JobStore` for tests and callers that do not need
/// durability across restarts.
pub struct MemoryStore<J> {
    inner: Mutex<MemoryStoreInner<J>>,
}

impl<J> Default for MemoryStore<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J> MemoryStore<J> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner {
                records: HashMap::new(),
                next_seq: 0,
            }),
        }
    }
}

impl<J: Job> MemoryStore<J> {
    /// Returns the number of records currently held, active or not.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("memory store lock").records.len()
    }

    /// Returns whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the record with the given id.
    pub fn get(&self, job_id: &str) -> Option<JobRecord<J>> {
        self.inner
            .lock()
            .expect("memory store lock")
            .records
            .get(job_id)
            .map(|s| s.record.clone())
    }
}

#[async_trait]
impl<J: Job> JobStore<J> for MemoryStore<J> {
    async fn mark_all_jobs_inactive(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        for stored in inner.records.values_mut() {
            stored.record.active = false;
        }
        Ok(())
    }

    async fn get_next_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRecord<J>>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");
        let mut eligible: Vec<&StoredRecord<J>> = inner
            .records
            .values()
            .filter(|s| s.record.is_eligible(now))
            .collect();
        eligible.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(eligible
            .into_iter()
            .take(limit)
            .map(|s| s.record.clone())
            .collect())
    }

    async fn save_job(
        &self,
        record: &JobRecord<J>,
        _allow_batching: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let id = record.job_id();
        match inner.records.get_mut(&id) {
            Some(stored) => {
                stored.record = record.clone();
            }
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.records.insert(
                    id,
                    StoredRecord {
                        record: record.clone(),
                        seq,
                    },
                );
            }
        }
        Ok(())
    }

    async fn remove_job(&self, job_id: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("memory store lock")
            .records
            .remove(job_id);
        Ok(())
    }
}
