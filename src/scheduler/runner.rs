//! Runner contract: one attempt of one job.
//!
//! A runner executes a single attempt of a job and reports an outcome.
//! The scheduler owns everything around the attempt (bookkeeping,
//! retries, backoff, removal); the runner owns only the domain work.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::job::{Job, JobRecord};
use super::retry::RetryConfig;

/// Per-attempt context handed to the runner.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Cancelled when the scheduler wants the attempt to stop
    /// (shutdown or explicit cancellation). Cooperative: the runner
    /// should check it at its own suspension points.
    pub abort: CancellationToken,
    /// True when this is the job's final allowed attempt. A runner must
    /// not return `JobOutcome::Retry` when this is set.
    pub is_last_attempt: bool,
}

/// Outcome of a single runner invocation.
#[derive(Debug, Clone)]
pub enum JobOutcome<J> {
    /// Terminal: the record is removed from the store. Success and
    /// "nothing more to do" disposal share this outcome. An optional
    /// follow-on job is enqueued through the normal add path.
    Finished {
        /// Follow-on job to enqueue, if any.
        new_job: Option<J>,
    },
    /// Recoverable failure: reschedule with backoff, bounded by the
    /// job class's attempt budget.
    Retry,
    /// The backend rate-limited us. The job is rescheduled like `Retry`,
    /// and additionally the whole scheduler pauses new starts for the
    /// given duration.
    RateLimited {
        /// How long the scheduler should pause.
        pause: Duration,
    },
}

impl<J> JobOutcome<J> {
    /// Terminal outcome with no follow-on job.
    pub fn finished() -> Self {
        JobOutcome::Finished { new_job: None }
    }

    /// Terminal outcome that enqueues a follow-on job.
    pub fn finished_with(new_job: J) -> Self {
        JobOutcome::Finished {
            new_job: Some(new_job),
        }
    }
}

/// Executes attempts for one job class.
///
/// Unexpected failures should be returned as errors; the scheduler
/// treats them like `Retry` (or drops the job on the final attempt).
#[async_trait]
pub trait JobRunner<J: Job>: Send + Sync {
    /// Runs one attempt of `record`.
    async fn run(
        &self,
        record: &JobRecord<J>,
        ctx: &RunContext,
    ) -> anyhow::Result<JobOutcome<J>>;

    /// Retry policy for this job. Evaluated once per attempt, so a
    /// runner may vary the policy by job subtype.
    fn retry_config(&self, job: &J) -> RetryConfig;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        let finished: JobOutcome<String> = JobOutcome::finished();
        assert!(matches!(finished, JobOutcome::Finished { new_job: None }));

        let follow_on = JobOutcome::finished_with("next".to_string());
        assert!(matches!(
            follow_on,
            JobOutcome::Finished { new_job: Some(ref j) } if j == "next"
        ));
    }

    #[test]
    fn test_run_context_abort_starts_unset() {
        let ctx = RunContext {
            abort: CancellationToken::new(),
            is_last_attempt: false,
        };
        assert!(!ctx.abort.is_cancelled());
    }
}
