//! Backup jobs and their lifecycle.
//!
//! A job is one execution of a [`BackupRule`](crate::BackupRule). Its status
//! only ever moves along the edges accepted by [`JobStatus::can_transition`];
//! every mutator on [`Job`] checks the edge first and leaves the job untouched
//! when it is not allowed.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    /// Failed on its final permitted attempt.
    Exhausted,
}

impl JobStatus {
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Exhausted,
    ];

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Exhausted)
    }

    /// Whether moving from `self` to `to` is a legal edge.
    pub fn can_transition(self, to: Self) -> bool {
        use JobStatus::{Cancelled, Completed, Exhausted, Failed, Paused, Pending, Running};
        matches!(
            (self, to),
            (Pending | Paused | Failed, Running)
                | (Running, Paused | Completed | Failed)
                | (Pending | Running | Paused | Failed, Cancelled)
                | (Failed, Exhausted)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTrigger {
    Schedule,
    Manual,
}

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum JobError {
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("destination unwritable: {0}")]
    DestinationUnwritable(String),

    #[error("transient transfer error: {0}")]
    TransientTransfer(String),

    #[error("encryption failure: {0}")]
    EncryptionFailure(String),

    #[error("integrity check failed: {0}")]
    IntegrityCheckFailure(String),

    #[error("cancelled")]
    Cancelled,

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The engine stopped while the job was in flight.
    #[error("interrupted by engine restart")]
    ProcessRestart,
}

impl JobError {
    /// Whether the engine should schedule another attempt on its own.
    ///
    /// Non-retryable failures can still be retried by an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientTransfer(_) | Self::IntegrityCheckFailure(_) | Self::Timeout(_)
        )
    }
}

/// A rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move job from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One execution of a backup rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub rule_id: String,
    /// Copied from the rule when the job was created.
    pub rule_name: String,
    pub trigger: JobTrigger,
    pub status: JobStatus,
    /// Percentage of files transferred, 0 to 100.
    pub progress: f64,
    pub files_processed: u64,
    pub total_files: u64,
    /// Source bytes read so far.
    pub bytes_processed: u64,
    pub total_bytes: u64,
    /// Bytes written to the destination, after compression and encryption.
    pub bytes_written: u64,
    /// Smoothed read throughput.
    pub bytes_per_second: f64,
    pub eta_seconds: Option<u64>,
    /// `bytes_written / bytes_processed`, set when the job completes.
    pub compression_ratio: Option<f64>,
    /// Encryption key captured for this job.
    pub key_id: Option<String>,
    /// 1-based attempt counter.
    pub attempt: u32,
    pub last_error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh pending job for `rule_id`.
    pub fn new(rule_id: impl Into<String>, rule_name: impl Into<String>, trigger: JobTrigger) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            rule_id: rule_id.into(),
            rule_name: rule_name.into(),
            trigger,
            status: JobStatus::Pending,
            progress: 0.0,
            files_processed: 0,
            total_files: 0,
            bytes_processed: 0,
            total_bytes: 0,
            bytes_written: 0,
            bytes_per_second: 0.0,
            eta_seconds: None,
            compression_ratio: None,
            key_id: None,
            attempt: 1,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending to Running.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Pending {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Running,
            });
        }
        self.transition(JobStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Paused to Running. Progress is kept.
    pub fn resume(&mut self) -> Result<(), TransitionError> {
        if self.status != JobStatus::Paused {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Running,
            });
        }
        self.transition(JobStatus::Running)
    }

    /// Failed to Running as a new attempt. Progress starts over.
    pub fn begin_retry(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Failed {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Running,
            });
        }
        self.transition(JobStatus::Running)?;
        self.attempt += 1;
        self.progress = 0.0;
        self.files_processed = 0;
        self.bytes_processed = 0;
        self.bytes_written = 0;
        self.bytes_per_second = 0.0;
        self.eta_seconds = None;
        self.key_id = None;
        self.started_at = Some(now);
        self.finished_at = None;
        Ok(())
    }

    /// Running to Paused.
    pub fn pause(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Paused)?;
        self.eta_seconds = None;
        self.bytes_per_second = 0.0;
        Ok(())
    }

    /// Running to Completed. Every file must have been transferred.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status == JobStatus::Running && self.files_processed != self.total_files {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Completed,
            });
        }
        self.transition(JobStatus::Completed)?;
        self.progress = 100.0;
        self.eta_seconds = Some(0);
        self.compression_ratio = ratio(self.bytes_written, self.bytes_processed);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Running to Failed.
    pub fn fail(&mut self, error: JobError, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.last_error = Some(error);
        self.eta_seconds = None;
        self.bytes_per_second = 0.0;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Failed to Exhausted.
    pub fn exhaust(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Exhausted)?;
        self.compression_ratio = ratio(self.bytes_written, self.bytes_processed);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Any non-terminal status to Cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Cancelled)?;
        self.last_error = Some(JobError::Cancelled);
        self.eta_seconds = None;
        self.bytes_per_second = 0.0;
        self.compression_ratio = ratio(self.bytes_written, self.bytes_processed);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Record the enumerated size of the source.
    pub fn set_totals(&mut self, total_files: u64, total_bytes: u64) {
        self.total_files = total_files;
        self.total_bytes = total_bytes;
        self.files_processed = self.files_processed.min(total_files);
        self.refresh_progress();
    }

    /// Mark one more file as transferred.
    pub fn file_done(&mut self) {
        if self.files_processed < self.total_files {
            self.files_processed += 1;
        }
        self.refresh_progress();
    }

    /// Account for source bytes read and destination bytes written.
    pub fn add_bytes(&mut self, read: u64, written: u64) {
        self.bytes_processed = self.bytes_processed.saturating_add(read);
        self.bytes_written = self.bytes_written.saturating_add(written);
    }

    /// Update throughput and the derived ETA.
    pub fn set_throughput(&mut self, bytes_per_second: f64) {
        self.bytes_per_second = bytes_per_second;
        let remaining = self.total_bytes.saturating_sub(self.bytes_processed);
        self.eta_seconds = estimate_eta(remaining, bytes_per_second);
    }

    fn refresh_progress(&mut self) {
        let next = progress_percent(self.files_processed, self.total_files);
        // Progress never moves backwards within an attempt.
        if next > self.progress {
            self.progress = next;
        }
    }
}

/// Percentage of `done` out of `total`, 0 until the total is known.
pub fn progress_percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let pct = done.min(total) as f64 * 100.0 / total as f64;
    pct.clamp(0.0, 100.0)
}

/// Seconds left at `bytes_per_second`, or `None` when no rate is known.
pub fn estimate_eta(remaining_bytes: u64, bytes_per_second: f64) -> Option<u64> {
    if remaining_bytes == 0 {
        return Some(0);
    }
    if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
        return None;
    }
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let secs = (remaining_bytes as f64 / bytes_per_second).ceil() as u64;
    Some(secs)
}

fn ratio(written: u64, read: u64) -> Option<f64> {
    if read == 0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    Some(written as f64 / read as f64)
}
