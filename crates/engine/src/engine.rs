//! The job table, admission and settlement.
//!
//! All job state lives in one [`JobTable`] behind a single mutex. Status
//! changes happen only while that lock is held, which is what keeps the
//! single-flight invariant and the "settle exactly once" rule simple: a run
//! is registered in `runs` when it is admitted and removed by whoever settles
//! it first.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use vaultline_core::{
    BackupRule, EventKind, Job, JobError, JobStatus, JobTrigger, LogCategory, NewLogEntry, NotificationEvent,
    TransitionError,
};
use vaultline_crypto::Keyring;
use vaultline_eventlog::EventLog;
use vaultline_notify::Dispatcher;
use vaultline_state::StateStore;

use crate::config::{EngineConfig, SchedulerConfig};
use crate::error::EngineError;
use crate::rules::RuleStore;
use crate::scheduler::{self, SchedulerClock};
use crate::transfer::Transfer;
use crate::worker;

/// Why a running job was asked to stop.
///
/// Ordered by precedence: when several requests race, the highest wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum StopReason {
    Pause = 1,
    Shutdown = 2,
    Cancel = 3,
}

/// Cooperative stop signal shared between the engine and one worker.
#[derive(Debug)]
pub(crate) struct RunSignal {
    pub(crate) token: CancellationToken,
    reason: AtomicU8,
}

impl RunSignal {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: AtomicU8::new(0),
        }
    }

    pub(crate) fn stop(&self, reason: StopReason) {
        self.reason.fetch_max(reason as u8, Ordering::SeqCst);
        self.token.cancel();
    }

    pub(crate) fn reason(&self) -> StopReason {
        match self.reason.load(Ordering::SeqCst) {
            1 => StopReason::Pause,
            3 => StopReason::Cancel,
            _ => StopReason::Shutdown,
        }
    }
}

/// How an attempt ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed,
    Failed(JobError),
    Stopped(StopReason),
}

/// How an admitted job entered `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaunchKind {
    Start,
    Retry,
    Resume,
}

/// Everything a worker needs to execute one attempt.
pub(crate) struct Launch {
    pub(crate) job: Job,
    pub(crate) rule: BackupRule,
    pub(crate) kind: LaunchKind,
    pub(crate) signal: Arc<RunSignal>,
    pub(crate) done: watch::Sender<bool>,
}

/// An admitted job. Holding the entry means holding a concurrency slot.
pub(crate) struct Run {
    pub(crate) signal: Arc<RunSignal>,
    _permit: OwnedSemaphorePermit,
    /// Byte counters at the last completed file, restored on pause.
    checkpoint: (u64, u64),
    pub(crate) done: watch::Receiver<bool>,
    pub(crate) task: AbortHandle,
}

#[derive(Default)]
pub(crate) struct JobTable {
    pub(crate) jobs: HashMap<String, Job>,
    /// Jobs waiting for admission, in arrival order.
    pub(crate) queue: VecDeque<String>,
    /// Rule id to the id of its running job.
    pub(crate) running: HashMap<String, String>,
    /// Rule id to the id of its job waiting out a retry backoff. The rule
    /// stays held for that job until it is admitted again.
    pub(crate) retrying: HashMap<String, String>,
    pub(crate) runs: HashMap<String, Run>,
}

impl JobTable {
    /// Drop whatever reservation `job_id` holds.
    pub(crate) fn release_retry(&mut self, job_id: &str) {
        self.retrying.retain(|_, held| held.as_str() != job_id);
    }
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) scheduler: SchedulerConfig,
    pub(crate) rules: RuleStore,
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) event_log: Arc<dyn EventLog>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) keyring: Arc<Keyring>,
    pub(crate) transfer: Arc<dyn Transfer>,
    slots: Arc<Semaphore>,
    pub(crate) table: Mutex<JobTable>,
    pub(crate) clock: Mutex<SchedulerClock>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tracker: TaskTracker,
    started: AtomicBool,
    pub(crate) started_at: Instant,
}

/// The backup orchestration engine.
///
/// Cheap to clone; clones share one engine. Create it with
/// [`JobEngine::builder`], call [`start`](Self::start) to recover persisted
/// state and run the scheduler clock, and [`stop`](Self::stop) on shutdown.
#[derive(Clone)]
pub struct JobEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl JobEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        config: EngineConfig,
        scheduler: SchedulerConfig,
        state: Arc<dyn StateStore>,
        event_log: Arc<dyn EventLog>,
        dispatcher: Arc<Dispatcher>,
        keyring: Arc<Keyring>,
        transfer: Arc<dyn Transfer>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            inner: Arc::new(EngineInner {
                config,
                scheduler,
                rules: RuleStore::new(),
                state,
                event_log,
                dispatcher,
                keyring,
                transfer,
                slots,
                table: Mutex::new(JobTable::default()),
                clock: Mutex::new(SchedulerClock::new()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                started: AtomicBool::new(false),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Recover persisted rules and jobs, then start the scheduler clock.
    ///
    /// Jobs found `Running` were interrupted by a crash and come back as
    /// `Failed` with [`JobError::ProcessRestart`]. Pending jobs are queued
    /// again, and failed jobs that were waiting for an automatic retry get
    /// it. Calling `start` twice is a no-op.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::Stopped);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.recover().await?;
        self.inner.tracker.spawn(scheduler::run(Arc::clone(&self.inner)));
        Ok(())
    }

    /// Stop the scheduler clock and every running job.
    ///
    /// Running jobs are asked to unwind and end up `Failed` with
    /// [`JobError::ProcessRestart`]; workers that ignore the request past the
    /// cancel grace period are aborted. Pending and paused jobs are left as
    /// they are for the next start.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return;
        }
        info!("stopping job engine");
        inner.shutdown.cancel();

        let signals: Vec<Arc<RunSignal>> = inner
            .table
            .lock()
            .runs
            .values()
            .map(|run| Arc::clone(&run.signal))
            .collect();
        for signal in &signals {
            signal.stop(StopReason::Shutdown);
        }

        inner.tracker.close();
        if tokio::time::timeout(inner.config.cancel_grace, inner.tracker.wait())
            .await
            .is_err()
        {
            let stuck: Vec<(String, AbortHandle)> = inner
                .table
                .lock()
                .runs
                .iter()
                .map(|(id, run)| (id.clone(), run.task.clone()))
                .collect();
            warn!(stuck = stuck.len(), "workers did not stop within the grace period");
            for (job_id, task) in stuck {
                task.abort();
                inner.finish(&job_id, Outcome::Stopped(StopReason::Shutdown)).await;
            }
        }

        inner
            .record(NewLogEntry::info(LogCategory::System, "engine stopped"))
            .await;
        info!("job engine stopped");
    }

    /// Run one scheduler tick as of `now`.
    ///
    /// The background clock calls this on its own; it is public so callers
    /// can drive the schedule deterministically.
    pub async fn tick(&self, now: DateTime<Utc>) {
        self.inner.tick(now).await;
    }

    /// When each armed rule will next fire.
    pub fn next_fire(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.inner.clock.lock().next_fire(rule_id)
    }
}

impl EngineInner {
    async fn recover(self: &Arc<Self>) -> Result<(), EngineError> {
        let rules = self.rules.load(self.state.list_rules().await?);
        let mut stored = self.state.list_jobs().await?;
        stored.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let now = Utc::now();
        let recovered = stored.len();
        let mut interrupted = Vec::new();
        {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            for mut job in stored {
                match job.status {
                    JobStatus::Running => {
                        if job.fail(JobError::ProcessRestart, now).is_ok() {
                            interrupted.push(job.clone());
                        }
                    }
                    JobStatus::Pending => table.queue.push_back(job.id.clone()),
                    JobStatus::Failed
                        if job.attempt < self.config.max_attempts
                            && job.last_error.as_ref().is_some_and(JobError::is_retryable) =>
                    {
                        table.retrying.insert(job.rule_id.clone(), job.id.clone());
                        table.queue.push_back(job.id.clone());
                    }
                    _ => {}
                }
                table.jobs.entry(job.id.clone()).or_insert(job);
            }
        }

        for job in &interrupted {
            self.persist(job).await;
            self.record(
                NewLogEntry::error(LogCategory::Backup, "backup interrupted by restart")
                    .with_details(JobError::ProcessRestart.to_string())
                    .with_job(&job.id, &job.rule_name),
            )
            .await;
        }
        info!(rules, jobs = recovered, interrupted = interrupted.len(), "state recovered");
        self.record(
            NewLogEntry::info(LogCategory::System, "engine started")
                .with_details(format!("{rules} rules, {recovered} jobs recovered")),
        )
        .await;
        self.admit();
        Ok(())
    }

    /// Create a pending job for `rule` and try to admit it.
    pub(crate) async fn submit(self: &Arc<Self>, rule: &BackupRule, trigger: JobTrigger) -> Job {
        let job = Job::new(&rule.id, &rule.name, trigger);
        self.table.lock().jobs.insert(job.id.clone(), job.clone());
        self.persist(&job).await;
        let message = match trigger {
            JobTrigger::Schedule => "scheduled backup queued",
            JobTrigger::Manual => "manual backup queued",
        };
        self.record(NewLogEntry::info(LogCategory::Backup, message).with_job(&job.id, &job.rule_name))
            .await;
        self.enqueue(&job.id);
        self.admit();
        self.job(&job.id).unwrap_or(job)
    }

    pub(crate) fn job(&self, id: &str) -> Option<Job> {
        self.table.lock().jobs.get(id).cloned()
    }

    /// Put `job_id` at the back of the admission queue unless it is there.
    pub(crate) fn enqueue(&self, job_id: &str) {
        let mut table = self.table.lock();
        if !table.queue.iter().any(|id| id == job_id) {
            table.queue.push_back(job_id.to_owned());
        }
    }

    /// Rules that have a job queued, running, paused or waiting to retry.
    pub(crate) fn busy_rules(&self) -> HashSet<String> {
        let table = self.table.lock();
        let mut busy: HashSet<String> = table
            .jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Running | JobStatus::Paused))
            .map(|j| j.rule_id.clone())
            .collect();
        busy.extend(
            table
                .queue
                .iter()
                .filter_map(|id| table.jobs.get(id))
                .map(|j| j.rule_id.clone()),
        );
        busy.extend(table.retrying.keys().cloned());
        busy
    }

    /// Walk the queue in order and start every job that may run now.
    ///
    /// A job is admitted when its rule still exists and is enabled, no other
    /// job of the same rule is running or waiting to retry, and a
    /// concurrency slot is free. Jobs
    /// that cannot start keep their place in the queue; a blocked rule does
    /// not hold back jobs of other rules.
    pub(crate) fn admit(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let now = Utc::now();
        let mut orphaned = Vec::new();
        {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            let mut waiting = VecDeque::with_capacity(table.queue.len());

            while let Some(job_id) = table.queue.pop_front() {
                let Some(job) = table.jobs.get_mut(&job_id) else {
                    continue;
                };
                if !matches!(job.status, JobStatus::Pending | JobStatus::Failed | JobStatus::Paused) {
                    continue;
                }
                let Some(rule) = self.rules.get(&job.rule_id) else {
                    if job.cancel(now).is_ok() {
                        orphaned.push(job.clone());
                    }
                    table.retrying.retain(|_, held| *held != job_id);
                    continue;
                };
                let held_by_other = table.retrying.get(&rule.id).is_some_and(|held| *held != job_id);
                if !rule.enabled || held_by_other || table.running.contains_key(&rule.id) {
                    waiting.push_back(job_id);
                    continue;
                }
                let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                    waiting.push_back(job_id);
                    break;
                };

                let kind = match job.status {
                    JobStatus::Pending => LaunchKind::Start,
                    JobStatus::Failed => LaunchKind::Retry,
                    _ => LaunchKind::Resume,
                };
                let moved = match kind {
                    LaunchKind::Start => job.start(now),
                    LaunchKind::Retry => job.begin_retry(now),
                    LaunchKind::Resume => job.resume(),
                };
                if let Err(e) = moved {
                    warn!(job_id = %job_id, error = %e, "job could not be admitted");
                    continue;
                }
                debug!(job_id = %job_id, rule_id = %rule.id, attempt = job.attempt, ?kind, "job admitted");

                let signal = Arc::new(RunSignal::new());
                let (done_tx, done_rx) = watch::channel(false);
                let checkpoint = (job.bytes_processed, job.bytes_written);
                let launch = Launch {
                    job: job.clone(),
                    rule,
                    kind,
                    signal: Arc::clone(&signal),
                    done: done_tx,
                };
                table.running.insert(job.rule_id.clone(), job_id.clone());
                if table.retrying.get(&job.rule_id).is_some_and(|held| *held == job_id) {
                    table.retrying.remove(&job.rule_id);
                }
                let task = self.tracker.spawn(worker::run(Arc::clone(self), launch));
                table.runs.insert(
                    job_id,
                    Run {
                        signal,
                        _permit: permit,
                        checkpoint,
                        done: done_rx,
                        task: task.abort_handle(),
                    },
                );
            }

            waiting.extend(table.queue.drain(..));
            table.queue = waiting;
        }

        for job in orphaned {
            let inner = Arc::clone(self);
            self.tracker.spawn(async move {
                inner.persist(&job).await;
                inner
                    .record(
                        NewLogEntry::warning(LogCategory::Backup, "backup cancelled")
                            .with_details("rule deleted")
                            .with_job(&job.id, &job.rule_name),
                    )
                    .await;
            });
        }
    }

    /// Apply `update` to a job that is still running.
    pub(crate) fn update_running(&self, job_id: &str, update: impl FnOnce(&mut Job)) {
        let mut table = self.table.lock();
        if let Some(job) = table.jobs.get_mut(job_id)
            && job.status == JobStatus::Running
        {
            update(job);
        }
    }

    /// Record source totals. Returns how many files an earlier run of this
    /// attempt already transferred.
    pub(crate) fn set_totals(&self, job_id: &str, files: u64, bytes: u64) -> u64 {
        let mut table = self.table.lock();
        match table.jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.set_totals(files, bytes);
                job.files_processed
            }
            _ => 0,
        }
    }

    /// Mark one file transferred and move the pause checkpoint.
    pub(crate) fn file_done(&self, job_id: &str) {
        let mut guard = self.table.lock();
        let table = &mut *guard;
        if let Some(job) = table.jobs.get_mut(job_id)
            && job.status == JobStatus::Running
        {
            job.file_done();
            if let Some(run) = table.runs.get_mut(job_id) {
                run.checkpoint = (job.bytes_processed, job.bytes_written);
            }
        }
    }

    /// Settle an attempt. Only the first call for a run has any effect.
    ///
    /// Releases the concurrency slot, persists the job, writes exactly one
    /// log entry, notifies, and schedules an automatic retry when the error
    /// allows it and budget remains.
    pub(crate) async fn finish(self: &Arc<Self>, job_id: &str, outcome: Outcome) {
        let settled = {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            let Some(run) = table.runs.remove(job_id) else {
                return;
            };
            let Some(job) = table.jobs.get_mut(job_id) else {
                return;
            };
            if table.running.get(&job.rule_id).is_some_and(|id| id == job_id) {
                table.running.remove(&job.rule_id);
            }
            let settled = settle(job, outcome, run.checkpoint, &self.config, Utc::now());
            if settled.as_ref().is_ok_and(|s| s.retry_after.is_some()) {
                table.retrying.insert(job.rule_id.clone(), job_id.to_owned());
            }
            drop(run);
            settled.map(|s| (job.clone(), s))
        };

        let (job, settlement) = match settled {
            Ok(pair) => pair,
            Err(e) => {
                warn!(job_id, error = %e, "attempt could not be settled");
                self.admit();
                return;
            }
        };

        self.persist(&job).await;
        self.record(settlement.entry.with_job(&job.id, &job.rule_name))
            .await;
        if let Some(event) = settlement.event {
            self.announce(event);
        }
        if let Some(delay) = settlement.retry_after {
            info!(job_id, attempt = job.attempt, delay_ms = %delay.as_millis(), "retry scheduled");
            self.schedule_retry(job.id.clone(), delay);
        }
        self.admit();
    }

    fn schedule_retry(self: &Arc<Self>, job_id: String, delay: Duration) {
        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    let waiting = {
                        let mut table = inner.table.lock();
                        let waiting = table
                            .jobs
                            .get(&job_id)
                            .is_some_and(|job| job.status == JobStatus::Failed);
                        if !waiting {
                            table.release_retry(&job_id);
                        }
                        waiting
                    };
                    if waiting {
                        inner.enqueue(&job_id);
                        inner.admit();
                    }
                }
                () = inner.shutdown.cancelled() => {}
            }
        });
    }

    pub(crate) async fn persist(&self, job: &Job) {
        if let Err(e) = self.state.put_job(job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist job");
        }
    }

    pub(crate) async fn record(&self, entry: NewLogEntry) {
        if let Err(e) = self.event_log.append(entry).await {
            warn!(error = %e, "failed to append to event log");
        }
    }

    /// Hand `event` to the dispatcher without waiting for delivery.
    pub(crate) fn announce(&self, event: NotificationEvent) {
        if !self.dispatcher.policy().allows(event.kind) {
            return;
        }
        let dispatcher = Arc::clone(&self.dispatcher);
        self.tracker.spawn(async move {
            dispatcher.notify(&event).await;
        });
    }
}

/// What settling an attempt produced, besides the job itself.
#[derive(Debug)]
struct Settlement {
    entry: NewLogEntry,
    event: Option<NotificationEvent>,
    retry_after: Option<Duration>,
}

fn settle(
    job: &mut Job,
    outcome: Outcome,
    checkpoint: (u64, u64),
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<Settlement, TransitionError> {
    match outcome {
        Outcome::Completed if job.files_processed == job.total_files => {
            job.complete(now)?;
            let details = format!(
                "{} files, {} bytes read, {} bytes written",
                job.files_processed, job.bytes_processed, job.bytes_written
            );
            Ok(Settlement {
                entry: NewLogEntry::success(LogCategory::Backup, "backup completed").with_details(details),
                event: Some(NotificationEvent::for_job(EventKind::JobCompleted, job, "backup completed")),
                retry_after: None,
            })
        }
        Outcome::Completed => {
            let err = JobError::IntegrityCheckFailure(format!(
                "{} of {} files transferred",
                job.files_processed, job.total_files
            ));
            settle_failure(job, err, config, now)
        }
        Outcome::Failed(err) => settle_failure(job, err, config, now),
        Outcome::Stopped(StopReason::Pause) => {
            job.pause()?;
            (job.bytes_processed, job.bytes_written) = checkpoint;
            Ok(Settlement {
                entry: NewLogEntry::info(LogCategory::Backup, "backup paused")
                    .with_details(format!("{} of {} files", job.files_processed, job.total_files)),
                event: None,
                retry_after: None,
            })
        }
        Outcome::Stopped(StopReason::Cancel) => {
            job.cancel(now)?;
            Ok(Settlement {
                entry: NewLogEntry::warning(LogCategory::Backup, "backup cancelled")
                    .with_details(format!("cancelled at {:.0}%", job.progress)),
                event: Some(NotificationEvent::for_job(EventKind::Warning, job, "backup cancelled")),
                retry_after: None,
            })
        }
        Outcome::Stopped(StopReason::Shutdown) => {
            job.fail(JobError::ProcessRestart, now)?;
            Ok(Settlement {
                entry: NewLogEntry::error(LogCategory::Backup, "backup interrupted by shutdown")
                    .with_details(JobError::ProcessRestart.to_string()),
                event: None,
                retry_after: None,
            })
        }
    }
}

fn settle_failure(
    job: &mut Job,
    err: JobError,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<Settlement, TransitionError> {
    let retryable = err.is_retryable();
    let details = err.to_string();
    job.fail(err, now)?;

    if job.attempt >= config.max_attempts {
        job.exhaust(now)?;
        let message = format!("backup exhausted after {} attempts", job.attempt);
        return Ok(Settlement {
            event: Some(NotificationEvent::for_job(EventKind::JobExhausted, job, &message)),
            entry: NewLogEntry::error(LogCategory::Backup, message).with_details(details),
            retry_after: None,
        });
    }

    let message = format!("backup failed on attempt {} of {}", job.attempt, config.max_attempts);
    Ok(Settlement {
        event: Some(NotificationEvent::for_job(EventKind::JobFailed, job, &message)),
        entry: NewLogEntry::error(LogCategory::Backup, message).with_details(details),
        retry_after: retryable.then(|| config.retry_strategy.delay_for(job.attempt.saturating_sub(1))),
    })
}
