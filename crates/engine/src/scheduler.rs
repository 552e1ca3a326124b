//! The scheduler clock.
//!
//! On every tick each enabled rule is checked against its next fire time.
//! Missed occurrences are not backfilled: a rule that is overdue fires once
//! and is re-armed for its next occurrence after `now`, so a process that was
//! down for a day does not start a day's worth of backups on restart. A rule
//! that still has a job queued, running or paused when its time comes skips
//! that occurrence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vaultline_core::{BackupRule, JobTrigger, LogCategory, NewLogEntry, NotificationEvent};

use crate::engine::EngineInner;

#[derive(Debug, Clone)]
struct Armed {
    schedule: String,
    timezone: String,
    next: DateTime<Utc>,
}

/// Next-fire bookkeeping for every enabled rule.
#[derive(Debug, Default)]
pub struct SchedulerClock {
    armed: HashMap<String, Armed>,
}

impl SchedulerClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_fire(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.armed.get(rule_id).map(|a| a.next)
    }

    /// Rules that should get a new job at `now`.
    ///
    /// A rule seen for the first time, or whose schedule changed, is armed
    /// for its next occurrence after `now` and does not fire on this tick.
    /// Rules in `busy` are re-armed without firing.
    pub fn due(&mut self, now: DateTime<Utc>, rules: &[BackupRule], busy: &HashSet<String>) -> Vec<BackupRule> {
        self.armed
            .retain(|id, _| rules.iter().any(|r| &r.id == id && r.enabled));

        let mut due = Vec::new();
        for rule in rules.iter().filter(|r| r.enabled) {
            let current = self
                .armed
                .get(&rule.id)
                .filter(|a| a.schedule == rule.schedule && a.timezone == rule.timezone)
                .map(|a| a.next);

            match current {
                Some(next) if next > now => continue,
                Some(_) if busy.contains(&rule.id) => {
                    debug!(rule_id = %rule.id, "rule still has an active job, skipping occurrence");
                }
                Some(_) => due.push(rule.clone()),
                None => {}
            }

            match next_occurrence(rule, now) {
                Some(next) => {
                    self.armed.insert(
                        rule.id.clone(),
                        Armed {
                            schedule: rule.schedule.clone(),
                            timezone: rule.timezone.clone(),
                            next,
                        },
                    );
                }
                None => {
                    self.armed.remove(&rule.id);
                }
            }
        }
        due
    }
}

fn next_occurrence(rule: &BackupRule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match rule.parsed_schedule() {
        Ok(schedule) => schedule.next_after(after),
        Err(e) => {
            warn!(rule_id = %rule.id, error = %e, "rule schedule no longer parses");
            None
        }
    }
}

/// Drive the clock until the engine shuts down.
pub(crate) async fn run(inner: Arc<EngineInner>) {
    let mut ticker = tokio::time::interval(inner.scheduler.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(tick_ms = %inner.scheduler.tick.as_millis(), "scheduler clock starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => inner.tick(Utc::now()).await,
            () = inner.shutdown.cancelled() => {
                info!("scheduler clock received shutdown signal");
                break;
            }
        }
    }
}

impl EngineInner {
    pub(crate) async fn tick(self: &Arc<Self>, now: DateTime<Utc>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let rules = self.rules.list();
        let busy = self.busy_rules();
        let due = self.clock.lock().due(now, &rules, &busy);
        for rule in &due {
            debug!(rule_id = %rule.id, "rule is due");
            self.submit(rule, JobTrigger::Schedule).await;
        }
        self.maintain_keys(now).await;
        self.admit();
    }

    /// Rotate the active key when it has expired and drop retired keys past
    /// their retention window.
    async fn maintain_keys(&self, now: DateTime<Utc>) {
        match self.keyring.rotate_if_due(now) {
            Ok(Some(key)) => {
                self.record(
                    NewLogEntry::success(LogCategory::Security, "encryption key rotated")
                        .with_details(format!("new active key {}", key.id)),
                )
                .await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "scheduled key rotation failed");
                self.record(
                    NewLogEntry::error(LogCategory::Security, "scheduled key rotation failed")
                        .with_details(e.to_string()),
                )
                .await;
                self.announce(NotificationEvent::warning(format!("key rotation failed: {e}")));
            }
        }

        let pruned = self.keyring.prune(now);
        if pruned > 0 {
            self.record(NewLogEntry::info(
                LogCategory::Security,
                format!("pruned {pruned} retired encryption keys"),
            ))
            .await;
        }
    }
}
