//! durable-jobs: persistent job scheduler for background work.
//!
//! This library drives long-running, failure-prone background jobs
//! (uploads, deletions, syncs) reliably across process restarts:
//! bounded concurrency, exponential-backoff retry, global rate-limit
//! pausing, cooperative cancellation, and idle detection.

// Core modules
pub mod scheduler;
pub mod storage;

// Re-export commonly used types
pub use scheduler::{
    AddJobOutcome, BackoffConfig, Job, JobOutcome, JobRecord, JobRunner, JobScheduler, JobStore,
    MaxAttempts, MemoryStore, RetryConfig, RunContext, SchedulerConfig, SchedulerError, StoreError,
};
pub use storage::SqliteJobStore;
