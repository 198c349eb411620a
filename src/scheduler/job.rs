//! Job definitions for the scheduler.
//!
//! This module defines the core job types used in the scheduling system:
//!
//! - `Job`: the caller-supplied domain payload with a stable identity
//! - `JobRecord`: a job plus the scheduler's persistent bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of background work identified by a stable key.
///
/// Implementors supply the domain payload (what to upload, what to
/// delete, ...). The scheduler never inspects the payload; it only needs
/// a stable identity so that retries, renewals, and cancellation all
/// target the same logical job.
pub trait Job: Clone + Send + Sync + 'static {
    /// Stable identity for this job. Two jobs with the same id are the
    /// same logical unit of work; re-adding an active id is a renewal,
    /// not a duplicate.
    fn job_id(&self) -> String;

    /// Identity safe to write to logs. Override when `job_id` contains
    /// user data that must be redacted.
    fn job_id_for_logging(&self) -> String {
        self.job_id()
    }
}

/// A job plus the bookkeeping the scheduler persists alongside it.
///
/// Records are the unit of storage: the store upserts and queries them,
/// and the scheduler mutates the bookkeeping fields across the job's
/// lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord<J> {
    /// The caller-supplied payload.
    pub job: J,
    /// Best-effort mirror of "a runner invocation is in flight".
    /// Reset to false for every record once at scheduler start, since a
    /// prior process may have died mid-run.
    pub active: bool,
    /// Number of completed runner invocations for this identity.
    pub attempts: u32,
    /// When set, the record is ineligible for pickup until this elapses.
    #[serde(default)]
    pub retry_after: Option<DateTime<Utc>>,
    /// When the most recent attempt finished.
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl<J: Job> JobRecord<J> {
    /// Creates a fresh record: zero attempts, inactive, no retry window.
    pub fn new(job: J) -> Self {
        Self {
            job,
            active: false,
            attempts: 0,
            retry_after: None,
            last_attempt_at: None,
        }
    }

    /// Returns the record's stable identity.
    pub fn job_id(&self) -> String {
        self.job.job_id()
    }

    /// Returns the record's redacted identity for logging.
    pub fn job_id_for_logging(&self) -> String {
        self.job.job_id_for_logging()
    }

    /// Returns whether the record may be started at `now`: not active,
    /// and any retry window has elapsed.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.active && self.retry_after.map_or(true, |t| t <= now)
    }

    /// Mutates the record into its post-failure shape: inactive, one
    /// more completed attempt, ineligible until `retry_after`.
    pub fn reschedule(&mut self, retry_after: DateTime<Utc>, now: DateTime<Utc>) {
        self.active = false;
        self.attempts += 1;
        self.retry_after = Some(retry_after);
        self.last_attempt_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestJob {
        name: String,
    }

    impl Job for TestJob {
        fn job_id(&self) -> String {
            self.name.clone()
        }
    }

    fn record(name: &str) -> JobRecord<TestJob> {
        JobRecord::new(TestJob {
            name: name.to_string(),
        })
    }

    #[test]
    fn test_new_record() {
        let rec = record("job-1");

        assert_eq!(rec.job_id(), "job-1");
        assert!(!rec.active);
        assert_eq!(rec.attempts, 0);
        assert!(rec.retry_after.is_none());
        assert!(rec.last_attempt_at.is_none());
    }

    #[test]
    fn test_logging_id_defaults_to_job_id() {
        let rec = record("job-1");
        assert_eq!(rec.job_id_for_logging(), "job-1");
    }

    #[test]
    fn test_eligibility() {
        let now = Utc::now();
        let mut rec = record("job-1");

        assert!(rec.is_eligible(now));

        rec.active = true;
        assert!(!rec.is_eligible(now));

        rec.active = false;
        rec.retry_after = Some(now + Duration::seconds(30));
        assert!(!rec.is_eligible(now));
        assert!(rec.is_eligible(now + Duration::seconds(31)));
    }

    #[test]
    fn test_reschedule() {
        let now = Utc::now();
        let later = now + Duration::minutes(1);
        let mut rec = record("job-1");
        rec.active = true;

        rec.reschedule(later, now);

        assert!(!rec.active);
        assert_eq!(rec.attempts, 1);
        assert_eq!(rec.retry_after, Some(later));
        assert_eq!(rec.last_attempt_at, Some(now));
    }

    #[test]
    fn test_record_serialization() {
        let rec = record("job-1");
        let json = serde_json::to_string(&rec).expect("serialization should work");
        let parsed: JobRecord<TestJob> =
            serde_json::from_str(&json).expect("deserialization should work");

        assert_eq!(parsed.job_id(), rec.job_id());
        assert_eq!(parsed.attempts, rec.attempts);
        assert_eq!(parsed.active, rec.active);
    }
}
