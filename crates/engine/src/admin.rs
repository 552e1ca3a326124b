//! The administrative surface.
//!
//! These methods are the only way to change rules and jobs from outside the
//! engine. Read methods return snapshots; nothing hands out shared mutable
//! state.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use vaultline_core::{
    BackupRule, ChannelSummary, EventKind, Job, JobStatus, JobTrigger, LogCategory, NewLogEntry,
    NotificationChannel, NotificationEvent, SystemStats, count_by_status,
};
use vaultline_crypto::{KeyInfo, Keyring};
use vaultline_eventlog::{EventLog, LogPage, LogQuery};
use vaultline_notify::ChannelDelivery;
use vaultline_state::StateStore;

use crate::engine::{JobEngine, Outcome, StopReason};
use crate::error::EngineError;

impl JobEngine {
    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::Stopped);
        }
        Ok(())
    }

    /// Every job, newest first.
    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.table.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        jobs
    }

    pub fn get_job(&self, id: &str) -> Result<Job, EngineError> {
        self.inner
            .job(id)
            .ok_or_else(|| EngineError::JobNotFound(id.to_owned()))
    }

    /// Every rule, ordered by id.
    pub fn list_rules(&self) -> Vec<BackupRule> {
        self.inner.rules.list()
    }

    pub fn get_rule(&self, id: &str) -> Result<BackupRule, EngineError> {
        self.inner
            .rules
            .get(id)
            .ok_or_else(|| EngineError::RuleNotFound(id.to_owned()))
    }

    /// Validate and store `rule`, replacing any rule with the same id.
    #[instrument(skip_all, fields(rule.id = %rule.id))]
    pub async fn create_rule(&self, rule: BackupRule) -> Result<BackupRule, EngineError> {
        self.ensure_running()?;
        let inner = &self.inner;
        let previous = inner.rules.get(&rule.id);
        let (stored, replaced) = inner.rules.upsert(rule)?;

        if let Err(e) = inner.state.put_rule(&stored).await {
            match previous {
                Some(previous) => {
                    inner.rules.upsert(previous)?;
                }
                None => {
                    inner.rules.remove(&stored.id);
                }
            }
            return Err(e.into());
        }

        let message = if replaced { "rule updated" } else { "rule created" };
        info!(rule_id = %stored.id, replaced, "rule stored");
        inner
            .record(NewLogEntry::info(LogCategory::System, message).with_details(format!(
                "{} ({}): {} -> {}, {}",
                stored.name, stored.id, stored.source, stored.destination, stored.schedule
            )))
            .await;
        // An enabled rule may unblock jobs waiting for it.
        inner.admit();
        Ok(stored)
    }

    /// Remove a rule. Its pending jobs are cancelled; a running job finishes.
    #[instrument(skip(self))]
    pub async fn delete_rule(&self, id: &str) -> Result<BackupRule, EngineError> {
        self.ensure_running()?;
        let inner = &self.inner;
        if inner.rules.get(id).is_none() {
            return Err(EngineError::RuleNotFound(id.to_owned()));
        }
        inner.state.delete_rule(id).await?;
        let rule = inner
            .rules
            .remove(id)
            .ok_or_else(|| EngineError::RuleNotFound(id.to_owned()))?;

        let now = Utc::now();
        let cancelled: Vec<Job> = {
            let mut guard = inner.table.lock();
            let table = &mut *guard;
            let cancelled: Vec<Job> = table
                .jobs
                .values_mut()
                .filter(|job| job.rule_id == id && job.status == JobStatus::Pending)
                .filter_map(|job| job.cancel(now).ok().map(|()| job.clone()))
                .collect();
            table
                .queue
                .retain(|job_id| !cancelled.iter().any(|job| &job.id == job_id));
            table.retrying.remove(id);
            cancelled
        };

        for job in &cancelled {
            inner.persist(job).await;
            inner
                .record(
                    NewLogEntry::warning(LogCategory::Backup, "backup cancelled")
                        .with_details("rule deleted")
                        .with_job(&job.id, &job.rule_name),
                )
                .await;
        }
        inner
            .record(
                NewLogEntry::info(LogCategory::System, "rule deleted")
                    .with_details(format!("{} ({})", rule.name, rule.id)),
            )
            .await;
        Ok(rule)
    }

    /// Queue a job for `rule_id` now, regardless of its schedule.
    #[instrument(skip(self))]
    pub async fn trigger_rule(&self, rule_id: &str) -> Result<Job, EngineError> {
        self.ensure_running()?;
        let rule = self.get_rule(rule_id)?;
        Ok(self.inner.submit(&rule, JobTrigger::Manual).await)
    }

    /// Ask a running job to pause. Its slot is released; progress is kept
    /// at the last completed file.
    #[instrument(skip(self))]
    pub async fn pause_job(&self, id: &str) -> Result<Job, EngineError> {
        self.ensure_running()?;
        self.stop_run(id, StopReason::Pause, "pause").await
    }

    /// Put a paused job back in the admission queue.
    #[instrument(skip(self))]
    pub async fn resume_job(&self, id: &str) -> Result<Job, EngineError> {
        self.ensure_running()?;
        let job = self.get_job(id)?;
        if job.status != JobStatus::Paused {
            return Err(EngineError::InvalidTransition {
                from: job.status,
                action: "resume",
            });
        }
        self.inner.enqueue(id);
        self.inner.admit();
        self.get_job(id)
    }

    /// Start a new attempt of a failed job.
    ///
    /// The attempt counter goes up by one and progress starts over. An
    /// exhausted job cannot be retried.
    #[instrument(skip(self))]
    pub async fn retry_job(&self, id: &str) -> Result<Job, EngineError> {
        self.ensure_running()?;
        let job = self.get_job(id)?;
        match job.status {
            JobStatus::Failed => {}
            JobStatus::Exhausted => return Err(EngineError::NotRetryable(id.to_owned())),
            from => {
                return Err(EngineError::InvalidTransition { from, action: "retry" });
            }
        }
        self.inner
            .record(
                NewLogEntry::info(LogCategory::Backup, "manual retry requested")
                    .with_job(&job.id, &job.rule_name),
            )
            .await;
        self.inner.enqueue(id);
        self.inner.admit();
        self.get_job(id)
    }

    /// Cancel a job that has not reached a terminal status.
    ///
    /// Idle jobs are cancelled in place. A running job is signalled and
    /// given the cancel grace period to unwind before its task is aborted.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, id: &str) -> Result<Job, EngineError> {
        self.ensure_running()?;
        let idle = {
            let mut guard = self.inner.table.lock();
            let table = &mut *guard;
            let job = table
                .jobs
                .get_mut(id)
                .ok_or_else(|| EngineError::JobNotFound(id.to_owned()))?;
            if job.status == JobStatus::Running {
                None
            } else {
                job.cancel(Utc::now())
                    .map_err(|e| EngineError::InvalidTransition {
                        from: e.from,
                        action: "cancel",
                    })?;
                let job = job.clone();
                table.queue.retain(|queued| queued != id);
                table.release_retry(id);
                Some(job)
            }
        };

        let Some(job) = idle else {
            return self.stop_run(id, StopReason::Cancel, "cancel").await;
        };
        self.inner.persist(&job).await;
        self.inner
            .record(NewLogEntry::warning(LogCategory::Backup, "backup cancelled").with_job(&job.id, &job.rule_name))
            .await;
        self.inner
            .announce(NotificationEvent::for_job(EventKind::Warning, &job, "backup cancelled"));
        self.inner.admit();
        Ok(job)
    }

    async fn stop_run(&self, id: &str, reason: StopReason, action: &'static str) -> Result<Job, EngineError> {
        let inner = &self.inner;
        let (signal, mut done) = {
            let table = inner.table.lock();
            let job = table
                .jobs
                .get(id)
                .ok_or_else(|| EngineError::JobNotFound(id.to_owned()))?;
            match table.runs.get(id) {
                Some(run) if job.status == JobStatus::Running => (Arc::clone(&run.signal), run.done.clone()),
                _ => {
                    return Err(EngineError::InvalidTransition {
                        from: job.status,
                        action,
                    });
                }
            }
        };

        signal.stop(reason);
        let settled = matches!(
            tokio::time::timeout(inner.config.cancel_grace, done.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        if !settled {
            let task = inner.table.lock().runs.get(id).map(|run| run.task.clone());
            if let Some(task) = task {
                warn!(job_id = id, "worker did not stop within the grace period, aborting");
                task.abort();
                inner.finish(id, Outcome::Stopped(signal.reason())).await;
            }
        }
        self.get_job(id)
    }

    /// Event log entries matching `query`.
    pub async fn query_log(&self, query: &LogQuery) -> Result<LogPage, EngineError> {
        Ok(self.inner.event_log.query(query).await?)
    }

    pub fn stats(&self) -> SystemStats {
        let inner = &self.inner;
        let rules = inner.rules.list();
        let table = inner.table.lock();
        SystemStats {
            rules_total: rules.len(),
            rules_enabled: rules.iter().filter(|r| r.enabled).count(),
            jobs_total: table.jobs.len(),
            jobs_by_status: count_by_status(table.jobs.values()),
            bytes_backed_up: table
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Completed)
                .map(|j| j.bytes_processed)
                .sum(),
            running_slots: table.runs.len(),
            max_concurrent_jobs: inner.config.max_concurrent_jobs,
            active_key_id: inner.keyring.active().id().to_owned(),
            uptime_seconds: inner.started_at.elapsed().as_secs(),
        }
    }

    /// Replace the active encryption key now.
    ///
    /// Running jobs keep the key they started with. On failure the previous
    /// key stays active and the failure is logged and announced.
    #[instrument(skip(self))]
    pub async fn rotate_key(&self) -> Result<KeyInfo, EngineError> {
        self.ensure_running()?;
        let inner = &self.inner;
        match inner.keyring.rotate(Utc::now()) {
            Ok(key) => {
                inner
                    .record(
                        NewLogEntry::success(LogCategory::Security, "encryption key rotated")
                            .with_details(format!("new active key {}", key.id)),
                    )
                    .await;
                Ok(key)
            }
            Err(e) => {
                inner
                    .record(
                        NewLogEntry::error(LogCategory::Security, "key rotation failed").with_details(e.to_string()),
                    )
                    .await;
                inner.announce(NotificationEvent::warning(format!("key rotation failed: {e}")));
                Err(e.into())
            }
        }
    }

    /// Metadata of the active key and every retained key.
    pub fn list_keys(&self) -> Vec<KeyInfo> {
        self.inner.keyring.keys()
    }

    /// The keyring, for decrypting archives.
    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.inner.keyring
    }

    pub fn upsert_channel(&self, channel: NotificationChannel) -> Result<(), EngineError> {
        self.inner
            .dispatcher
            .upsert_channel(channel)
            .map_err(EngineError::InvalidChannel)
    }

    pub fn remove_channel(&self, id: &str) -> bool {
        self.inner.dispatcher.remove_channel(id)
    }

    pub fn list_channels(&self) -> Vec<ChannelSummary> {
        self.inner.dispatcher.list_channels()
    }

    /// Check one channel and send it a test message. The result is also
    /// written to the event log.
    pub async fn test_channel(&self, id: &str) -> Result<ChannelDelivery, EngineError> {
        Ok(self.inner.dispatcher.test_channel(id).await?)
    }
}
