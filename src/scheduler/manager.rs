//! Scheduler core: scheduling passes, retry application, rate-limit
//! pausing, cancellation, and idle detection.
//!
//! One `JobScheduler` instance drives one job class. Callers construct
//! it with a store, a runner, and a config; there is no global instance.
//!
//! # Scheduling model
//!
//! Work is cooperative: every runner invocation is a spawned task, and
//! `max_concurrent_jobs` bounds how many are in flight at once. A
//! scheduling pass runs at most once at a time (atomic single-flight
//! guard); passes are triggered by the periodic tick, by `add_job`, and
//! by every job completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobRecord};
use super::retry::backoff_for_attempt;
use super::runner::{JobOutcome, JobRunner, RunContext};
use super::store::{JobStore, StoreError};

/// Default bound on simultaneously active runner invocations.
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 3;

/// Default interval between periodic scheduling passes.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Default grace period a cancelled runner gets to actually stop.
const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Default bound on graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler is already running.
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// The scheduler is not running.
    #[error("Scheduler is not running")]
    NotRunning,

    /// Graceful shutdown did not finish in time.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// A store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Error delivered to completion waiters when their job is cancelled.
#[derive(Debug, Clone, Error)]
#[error("Job '{job_id}' was cancelled")]
pub struct JobCancelledError {
    /// Redacted identity of the cancelled job.
    pub job_id: String,
}

/// What `add_job` did with the submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddJobOutcome {
    /// The record was persisted and will start on a later pass.
    Queued,
    /// The identity is currently running; its attempt budget was reset
    /// instead of starting a second run.
    AlreadyRunning,
    /// Immediate start was requested and capacity existed, so the job
    /// is running now.
    Started,
}

/// Configuration for a `JobScheduler`.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Bound on simultaneously active runner invocations.
    pub max_concurrent_jobs: usize,
    /// Interval between periodic scheduling passes.
    pub tick_interval: Duration,
    /// How long a cancelled runner gets to stop before its bookkeeping
    /// is released anyway.
    pub cancel_grace: Duration,
    /// Bound on how long `stop` waits for in-flight jobs.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            tick_interval: DEFAULT_TICK_INTERVAL,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration with the given concurrency bound.
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self {
            max_concurrent_jobs,
            ..Default::default()
        }
    }

    /// Sets the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the cancellation grace period.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// In-memory bookkeeping for one in-flight runner invocation.
struct ActiveJob<J> {
    /// Snapshot of the record as it was started.
    record: JobRecord<J>,
    /// Abort handle for cooperative cancellation.
    abort: CancellationToken,
    /// Completion signal; flips to true when the attempt's task ends.
    done_rx: watch::Receiver<bool>,
}

/// Key for test-synchronization waiters: (identity, attempt number at
/// pickup time).
type AttemptKey = (String, u32);

struct TickHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

type HoldOffFn = dyn Fn() -> bool + Send + Sync;

struct Inner<J: Job> {
    config: SchedulerConfig,
    store: Arc<dyn JobStore<J>>,
    runner: Arc<dyn JobRunner<J>>,
    /// Evaluated every pass; true means "start nothing this round".
    hold_off: Option<Arc<HoldOffFn>>,
    /// At most one entry per job identity.
    active: Mutex<HashMap<String, ActiveJob<J>>>,
    idle_waiters: Mutex<Vec<oneshot::Sender<()>>>,
    started_waiters: Mutex<HashMap<AttemptKey, Vec<oneshot::Sender<()>>>>,
    completed_waiters:
        Mutex<HashMap<AttemptKey, Vec<oneshot::Sender<Result<(), JobCancelledError>>>>>,
    /// Single-flight guard for scheduling passes.
    pass_in_flight: AtomicBool,
    /// Set between start() and stop().
    enabled: AtomicBool,
    /// Set while a rate-limit pause is in effect.
    paused: AtomicBool,
    tick: Mutex<Option<TickHandle>>,
}

/// Persistent job scheduler for one job class.
///
/// Cheap to clone; clones share the same scheduler state.
pub struct JobScheduler<J: Job> {
    inner: Arc<Inner<J>>,
}

impl<J: Job> Clone for JobScheduler<J> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<J: Job> JobScheduler<J> {
    /// Creates a scheduler over the given store and runner.
    pub fn new(
        store: Arc<dyn JobStore<J>>,
        runner: Arc<dyn JobRunner<J>>,
        config: SchedulerConfig,
    ) -> Self {
        Self::build(store, runner, config, None)
    }

    /// Creates a scheduler with a hold-off predicate. While the
    /// predicate returns true (for example "a call is in progress"), a
    /// scheduling pass starts nothing; the next trigger retries.
    pub fn with_hold_off(
        store: Arc<dyn JobStore<J>>,
        runner: Arc<dyn JobRunner<J>>,
        config: SchedulerConfig,
        hold_off: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::build(store, runner, config, Some(Arc::new(hold_off)))
    }

    fn build(
        store: Arc<dyn JobStore<J>>,
        runner: Arc<dyn JobRunner<J>>,
        config: SchedulerConfig,
        hold_off: Option<Arc<HoldOffFn>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                runner,
                hold_off,
                active: Mutex::new(HashMap::new()),
                idle_waiters: Mutex::new(Vec::new()),
                started_waiters: Mutex::new(HashMap::new()),
                completed_waiters: Mutex::new(HashMap::new()),
                pass_in_flight: AtomicBool::new(false),
                enabled: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                tick: Mutex::new(None),
            }),
        }
    }

    /// Starts the scheduler: resets the persisted `active` flags (a
    /// prior process may have died mid-run), runs one scheduling pass,
    /// and begins the periodic tick.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self
            .inner
            .enabled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!("Scheduler starting");

        if let Err(e) = self.inner.store.mark_all_jobs_inactive().await {
            self.inner.enabled.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        self.maybe_start_jobs().await;
        self.spawn_tick();

        Ok(())
    }

    /// Stops the scheduler: disables further passes, cancels the tick,
    /// aborts every in-flight job, and waits for each one's completion
    /// signal, bounded by the configured shutdown timeout.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if !self.inner.enabled.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Scheduler stopping");

        self.stop_tick();
        self.inner.paused.store(false, Ordering::SeqCst);

        let in_flight: Vec<(CancellationToken, watch::Receiver<bool>)> = {
            let active = self.inner.active.lock().expect("active jobs lock");
            active
                .values()
                .map(|entry| (entry.abort.clone(), entry.done_rx.clone()))
                .collect()
        };

        for (abort, _) in &in_flight {
            abort.cancel();
        }

        let wait_all = futures::future::join_all(in_flight.into_iter().map(
            |(_, mut done_rx)| async move {
                wait_for_done(&mut done_rx).await;
            },
        ));

        match tokio::time::timeout(self.inner.config.shutdown_timeout, wait_all).await {
            Ok(_) => {
                info!("Scheduler stopped");
                Ok(())
            }
            Err(_) => Err(SchedulerError::ShutdownTimeout(
                self.inner.config.shutdown_timeout,
            )),
        }
    }

    /// Returns whether the scheduler is between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Returns the number of in-flight runner invocations.
    pub fn active_job_count(&self) -> usize {
        self.inner.active.lock().expect("active jobs lock").len()
    }

    /// Adds a job. The record is persisted (the store may batch the
    /// write) and started on a scheduling pass.
    ///
    /// If a job with the same identity is already running, its attempt
    /// budget is reset to zero instead of starting a second run.
    pub async fn add_job(&self, job: J) -> Result<AddJobOutcome, SchedulerError> {
        self.add_job_inner(job, false).await
    }

    /// Adds a job and starts it synchronously when capacity exists,
    /// bypassing store write batching.
    pub async fn add_job_and_start(&self, job: J) -> Result<AddJobOutcome, SchedulerError> {
        self.add_job_inner(job, true).await
    }

    async fn add_job_inner(
        &self,
        job: J,
        force_start: bool,
    ) -> Result<AddJobOutcome, SchedulerError> {
        let job_id = job.job_id();

        // Renewal: an identity that is currently running keeps its
        // single invocation and gets a fresh attempt budget.
        let renewed = {
            let mut active = self.inner.active.lock().expect("active jobs lock");
            active.get_mut(&job_id).map(|entry| {
                entry.record.attempts = 0;
                entry.record.clone()
            })
        };
        if let Some(record) = renewed {
            debug!(
                job_id = %record.job_id_for_logging(),
                "Job already running; attempts reset"
            );
            self.inner.store.save_job(&record, false).await?;
            return Ok(AddJobOutcome::AlreadyRunning);
        }

        let record = JobRecord::new(job);
        self.inner.store.save_job(&record, !force_start).await?;

        if !self.is_running() {
            return Ok(AddJobOutcome::Queued);
        }

        if force_start && !self.inner.paused.load(Ordering::SeqCst) && self.start_job(record) {
            return Ok(AddJobOutcome::Started);
        }

        self.trigger_pass();
        Ok(AddJobOutcome::Queued)
    }

    /// Resolves once no jobs are active and none are eligible to start.
    /// Resolves immediately when nothing is active right now.
    pub async fn wait_for_idle(&self) {
        let rx = {
            let active = self.inner.active.lock().expect("active jobs lock");
            if active.is_empty() {
                return;
            }
            let (tx, rx) = oneshot::channel();
            self.inner
                .idle_waiters
                .lock()
                .expect("idle waiters lock")
                .push(tx);
            rx
        };
        let _ = rx.await;
    }

    /// Cancels every active job matching the predicate.
    ///
    /// Each matching job is aborted, its pending completion waiters are
    /// rejected with `JobCancelledError`, and the runner gets the
    /// configured grace period to stop. Whether or not it cooperates,
    /// the job is removed from the store; cancellation never retries.
    pub async fn cancel_jobs<F>(&self, predicate: F)
    where
        F: Fn(&J) -> bool,
    {
        let targets: Vec<(String, String, CancellationToken, watch::Receiver<bool>)> = {
            let active = self.inner.active.lock().expect("active jobs lock");
            active
                .iter()
                .filter(|(_, entry)| predicate(&entry.record.job))
                .map(|(id, entry)| {
                    (
                        id.clone(),
                        entry.record.job_id_for_logging(),
                        entry.abort.clone(),
                        entry.done_rx.clone(),
                    )
                })
                .collect()
        };

        for (job_id, log_id, abort, mut done_rx) in targets {
            info!(job_id = %log_id, "Cancelling job");

            abort.cancel();
            self.reject_completion_waiters(&job_id, &log_id);

            let stopped = tokio::time::timeout(
                self.inner.config.cancel_grace,
                wait_for_done(&mut done_rx),
            )
            .await
            .is_ok();

            if !stopped {
                // Fail open: the runner may still be doing I/O, but the
                // scheduler considers the job gone.
                warn!(
                    job_id = %log_id,
                    "Runner did not stop within grace period; releasing bookkeeping"
                );
                self.inner
                    .active
                    .lock()
                    .expect("active jobs lock")
                    .remove(&job_id);
            }

            if let Err(e) = self.inner.store.remove_job(&job_id).await {
                error!(
                    job_id = %log_id,
                    error = %e,
                    "Failed to remove cancelled job from store"
                );
            }
        }
    }

    /// Runs one scheduling pass unless one is already in flight.
    ///
    /// The guard is an atomic compare-and-swap; a pass arriving while
    /// one runs is skipped and the tick or next completion event will
    /// trigger a subsequent pass.
    pub async fn maybe_start_jobs(&self) {
        if self
            .inner
            .pass_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.run_pass().await;
        self.inner.pass_in_flight.store(false, Ordering::SeqCst);
    }

    async fn run_pass(&self) {
        if !self.is_running() || self.inner.paused.load(Ordering::SeqCst) {
            return;
        }

        let capacity = {
            let active = self.inner.active.lock().expect("active jobs lock");
            self.inner
                .config
                .max_concurrent_jobs
                .saturating_sub(active.len())
        };
        if capacity == 0 {
            return;
        }

        let now = Utc::now();
        let jobs = match self.inner.store.get_next_jobs(capacity, now).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to query eligible jobs");
                return;
            }
        };

        if jobs.is_empty() {
            if self.active_job_count() == 0 {
                self.fire_idle_waiters();
            }
            return;
        }

        if let Some(hold_off) = &self.inner.hold_off {
            if hold_off() {
                info!("Holding off on starting queued jobs this pass");
                return;
            }
        }

        for record in jobs {
            // Starts are independent; a refused start never blocks the
            // remaining jobs in the pass.
            self.start_job(record);
        }
    }

    /// Registers bookkeeping for `record` and spawns its attempt.
    /// Returns false when the identity is already active or no capacity
    /// remains; the record stays persisted for a later pass.
    fn start_job(&self, record: JobRecord<J>) -> bool {
        let job_id = record.job_id();
        let log_id = record.job_id_for_logging();

        let retry_config = self.inner.runner.retry_config(&record.job);
        let is_last_attempt = retry_config.max_attempts.is_last_attempt(record.attempts);

        let abort = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        {
            let mut active = self.inner.active.lock().expect("active jobs lock");
            if active.contains_key(&job_id) {
                warn!(job_id = %log_id, "Refusing to start job: identity already active");
                return false;
            }
            if active.len() >= self.inner.config.max_concurrent_jobs {
                debug!(job_id = %log_id, "Refusing to start job: no free capacity");
                return false;
            }
            active.insert(
                job_id.clone(),
                ActiveJob {
                    record: record.clone(),
                    abort: abort.clone(),
                    done_rx,
                },
            );
        }

        self.notify_started(&job_id, record.attempts);

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler
                .run_attempt(record, abort, is_last_attempt, done_tx)
                .await;
        });
        true
    }

    /// One attempt end to end: persist `active=true`, invoke the
    /// runner, apply its outcome, then release bookkeeping, signal
    /// completion, and trigger another pass for the freed slot.
    async fn run_attempt(
        &self,
        mut record: JobRecord<J>,
        abort: CancellationToken,
        is_last_attempt: bool,
        done_tx: watch::Sender<bool>,
    ) {
        let job_id = record.job_id();
        let log_id = record.job_id_for_logging();
        let attempt_key = record.attempts;

        debug!(
            job_id = %log_id,
            attempt = attempt_key + 1,
            is_last_attempt,
            "Starting job attempt"
        );

        record.active = true;
        if let Err(e) = self.inner.store.save_job(&record, false).await {
            error!(job_id = %log_id, error = %e, "Failed to persist active flag");
        }

        let ctx = RunContext {
            abort: abort.clone(),
            is_last_attempt,
        };
        let outcome = self.inner.runner.run(&record, &ctx).await;

        // A renewal may have reset the attempt budget while this
        // attempt ran; the reschedule path must see the reset count.
        {
            let active = self.inner.active.lock().expect("active jobs lock");
            if let Some(entry) = active.get(&job_id) {
                record.attempts = entry.record.attempts;
            }
        }

        if abort.is_cancelled() {
            // Cancellation owns the record's fate; a late outcome from
            // the runner must not mutate the store.
            debug!(job_id = %log_id, "Job attempt ended after cancellation");
        } else {
            self.apply_outcome(&mut record, &job_id, &log_id, is_last_attempt, outcome)
                .await;
        }

        self.inner
            .active
            .lock()
            .expect("active jobs lock")
            .remove(&job_id);
        let _ = done_tx.send(true);
        self.notify_completed(&job_id, attempt_key);
        self.trigger_pass();
    }

    async fn apply_outcome(
        &self,
        record: &mut JobRecord<J>,
        job_id: &str,
        log_id: &str,
        is_last_attempt: bool,
        outcome: anyhow::Result<JobOutcome<J>>,
    ) {
        match outcome {
            Ok(JobOutcome::Finished { new_job }) => {
                info!(job_id = %log_id, attempts = record.attempts + 1, "Job finished");
                self.remove_job_logged(job_id, log_id).await;
                if let Some(new_job) = new_job {
                    if let Err(e) = self.add_job(new_job).await {
                        error!(
                            job_id = %log_id,
                            error = %e,
                            "Failed to enqueue follow-on job"
                        );
                    }
                }
            }
            Ok(JobOutcome::Retry) => {
                if is_last_attempt {
                    // Contract violation by the runner. Degrade to
                    // dropping the job; the scheduling loop never dies.
                    error!(
                        job_id = %log_id,
                        "Runner requested retry on final attempt; dropping job"
                    );
                    self.remove_job_logged(job_id, log_id).await;
                } else {
                    self.reschedule_job(record, log_id).await;
                }
            }
            Ok(JobOutcome::RateLimited { pause }) => {
                warn!(
                    job_id = %log_id,
                    pause_ms = pause.as_millis() as u64,
                    "Runner was rate-limited; pausing all job starts"
                );
                self.reschedule_job(record, log_id).await;
                self.pause_for(pause);
            }
            Err(e) => {
                if is_last_attempt {
                    error!(
                        job_id = %log_id,
                        error = %e,
                        "Job failed on final attempt; giving up"
                    );
                    self.remove_job_logged(job_id, log_id).await;
                } else {
                    warn!(job_id = %log_id, error = %e, "Job failed; rescheduling");
                    self.reschedule_job(record, log_id).await;
                }
            }
        }
    }

    async fn remove_job_logged(&self, job_id: &str, log_id: &str) {
        if let Err(e) = self.inner.store.remove_job(job_id).await {
            error!(job_id = %log_id, error = %e, "Failed to remove job from store");
        }
    }

    /// Persists the record's post-failure shape: inactive, attempts
    /// incremented, ineligible until the backoff elapses.
    async fn reschedule_job(&self, record: &mut JobRecord<J>, log_id: &str) {
        let now = Utc::now();
        let retry_config = self.inner.runner.retry_config(&record.job);
        let delay = backoff_for_attempt(record.attempts + 1, &retry_config.backoff);
        let retry_after =
            now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);

        record.reschedule(retry_after, now);

        debug!(
            job_id = %log_id,
            attempts = record.attempts,
            retry_in_ms = delay.as_millis() as u64,
            "Job rescheduled with backoff"
        );

        if let Err(e) = self.inner.store.save_job(record, false).await {
            error!(job_id = %log_id, error = %e, "Failed to persist reschedule");
        }
    }

    /// Disables the tick and gates passes for `pause`, then re-enables
    /// and triggers a pass. Scheduler-wide: no job starts while paused.
    fn pause_for(&self, pause: Duration) {
        if self.inner.paused.swap(true, Ordering::SeqCst) {
            // A pause is already in effect; the first resume wins.
            return;
        }

        self.stop_tick();

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(pause).await;
            scheduler.inner.paused.store(false, Ordering::SeqCst);
            if scheduler.is_running() {
                info!("Rate-limit pause elapsed; resuming job starts");
                scheduler.spawn_tick();
                scheduler.maybe_start_jobs().await;
            }
        });
    }

    fn spawn_tick(&self) {
        self.stop_tick();

        let token = CancellationToken::new();
        let tick_token = token.clone();
        let interval = self.inner.config.tick_interval;
        let scheduler = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tick_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        scheduler.maybe_start_jobs().await;
                    }
                }
            }
        });

        let mut tick = self.inner.tick.lock().expect("tick lock");
        *tick = Some(TickHandle { token, handle });
    }

    fn stop_tick(&self) {
        let handle = self.inner.tick.lock().expect("tick lock").take();
        if let Some(TickHandle { token, handle }) = handle {
            token.cancel();
            handle.abort();
        }
    }

    fn trigger_pass(&self) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.maybe_start_jobs().await;
        });
    }

    fn fire_idle_waiters(&self) {
        let waiters: Vec<oneshot::Sender<()>> = self
            .inner
            .idle_waiters
            .lock()
            .expect("idle waiters lock")
            .drain(..)
            .collect();
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    // =========================================================================
    // Test-synchronization hooks
    // =========================================================================

    /// Resolves when the attempt identified by `record` (its identity
    /// and current `attempts` count) is started. Intended for tests:
    /// register the waiter before the attempt can begin.
    pub async fn wait_for_job_to_be_started(&self, record: &JobRecord<J>) {
        let key = (record.job_id(), record.attempts);
        let rx = {
            let mut waiters = self
                .inner
                .started_waiters
                .lock()
                .expect("started waiters lock");
            let (tx, rx) = oneshot::channel();
            waiters.entry(key).or_default().push(tx);
            rx
        };
        let _ = rx.await;
    }

    /// Resolves when the attempt identified by `record` completes, or
    /// rejects with `JobCancelledError` if the job is cancelled first.
    /// Intended for tests.
    pub async fn wait_for_job_to_be_completed(
        &self,
        record: &JobRecord<J>,
    ) -> Result<(), JobCancelledError> {
        let job_id = record.job_id();
        let key = (job_id.clone(), record.attempts);
        let rx = {
            let mut waiters = self
                .inner
                .completed_waiters
                .lock()
                .expect("completed waiters lock");
            let (tx, rx) = oneshot::channel();
            waiters.entry(key).or_default().push(tx);
            rx
        };
        rx.await
            .unwrap_or(Err(JobCancelledError { job_id }))
    }

    fn notify_started(&self, job_id: &str, attempt: u32) {
        let waiters = self
            .inner
            .started_waiters
            .lock()
            .expect("started waiters lock")
            .remove(&(job_id.to_string(), attempt));
        if let Some(waiters) = waiters {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }

    fn notify_completed(&self, job_id: &str, attempt: u32) {
        let waiters = self
            .inner
            .completed_waiters
            .lock()
            .expect("completed waiters lock")
            .remove(&(job_id.to_string(), attempt));
        if let Some(waiters) = waiters {
            for waiter in waiters {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    /// Rejects every pending completion waiter for `job_id`, across all
    /// attempt numbers.
    fn reject_completion_waiters(&self, job_id: &str, log_id: &str) {
        let mut rejected = Vec::new();
        {
            let mut waiters = self
                .inner
                .completed_waiters
                .lock()
                .expect("completed waiters lock");
            waiters.retain(|(id, _), senders| {
                if id == job_id {
                    rejected.append(senders);
                    false
                } else {
                    true
                }
            });
        }
        for waiter in rejected {
            let _ = waiter.send(Err(JobCancelledError {
                job_id: log_id.to_string(),
            }));
        }
    }
}

/// Waits until the completion signal flips to true. A dropped sender
/// also counts as done: the attempt task is gone either way.
async fn wait_for_done(done_rx: &mut watch::Receiver<bool>) {
    while !*done_rx.borrow() {
        if done_rx.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();

        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.cancel_grace, Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_scheduler_config_builder() {
        let config = SchedulerConfig::new(8)
            .with_tick_interval(Duration::from_secs(5))
            .with_cancel_grace(Duration::from_millis(200))
            .with_shutdown_timeout(Duration::from_secs(10));

        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.cancel_grace, Duration::from_millis(200));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = SchedulerError::NotRunning;
        assert!(err.to_string().contains("not running"));

        let err = SchedulerError::ShutdownTimeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60"));
    }

    #[test]
    fn test_job_cancelled_error_display() {
        let err = JobCancelledError {
            job_id: "job-1".to_string(),
        };
        assert!(err.to_string().contains("job-1"));
        assert!(err.to_string().contains("cancelled"));
    }
}
