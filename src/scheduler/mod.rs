//! Persistent job scheduling with retry, rate limiting, and recovery.
//!
//! This module provides the scheduling core for durable background work:
//!
//! - **JobScheduler**: bounded-concurrency scheduling passes over a store
//! - **JobStore**: durable upsert/remove/query of job records
//! - **JobRunner**: executes a single attempt and reports an outcome
//! - **RetryConfig**: attempt budget and exponential backoff curve
//!
//! # Architecture
//!
//! ```text
//!      ┌──────────────┐   add_job    ┌──────────────┐
//!      │    Caller    ├─────────────▶│  JobScheduler │
//!      └──────────────┘              └──────┬───────┘
//!                                           │ scheduling pass
//!                              ┌────────────┼────────────┐
//!                              ▼            ▼            ▼
//!                         ┌─────────┐  ┌─────────┐  ┌─────────┐
//!                         │ attempt │  │ attempt │  │ attempt │
//!                         └────┬────┘  └────┬────┘  └────┬────┘
//!                              │ outcome    │            │
//!                              ▼            ▼            ▼
//!                      remove / reschedule-with-backoff / pause
//!                              │
//!                        ┌─────▼──────┐
//!                        │  JobStore  │  (source of truth across restarts)
//!                        └────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use durable_jobs::{JobScheduler, MemoryStore, SchedulerConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let runner = Arc::new(UploadRunner::new(client));
//! let scheduler = JobScheduler::new(store, runner, SchedulerConfig::default());
//!
//! scheduler.start().await?;
//! scheduler.add_job(UploadJob { media_name: "...".into() }).await?;
//! scheduler.wait_for_idle().await;
//! scheduler.stop().await?;
//! ```
//!
//! # Reliability Features
//!
//! - **Crash recovery**: every persisted `active` flag is reset once at
//!   start; the store is the single cross-restart source of truth
//! - **Exponential backoff**: failed jobs become ineligible until their
//!   per-class backoff curve elapses
//! - **Global rate-limit pause**: one rate-limited runner pauses all
//!   starts for the reported duration
//! - **Graceful shutdown**: `stop` aborts in-flight jobs and awaits
//!   their completion signals

pub mod job;
pub mod manager;
pub mod retry;
pub mod runner;
pub mod store;

// Re-export main types for convenience
pub use job::{Job, JobRecord};
pub use manager::{
    AddJobOutcome, JobCancelledError, JobScheduler, SchedulerConfig, SchedulerError,
};
pub use retry::{backoff_for_attempt, BackoffConfig, MaxAttempts, RetryConfig};
pub use runner::{JobOutcome, JobRunner, RunContext};
pub use store::{JobStore, MemoryStore, StoreError};
