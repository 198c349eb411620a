//! Durable job store backends.
//!
//! The scheduler only depends on the `JobStore` trait; this module
//! provides the SQLite-backed implementation used by callers that need
//! records to survive a process restart.

pub mod sqlite;

pub use sqlite::SqliteJobStore;
