//! Shared domain types for the vaultline backup engine.
//!
//! Rules, jobs, schedules, log entries and notification channels live here so
//! every other crate agrees on one vocabulary.

pub mod channel;
pub mod error;
pub mod event;
pub mod job;
pub mod log;
pub mod rule;
pub mod schedule;
pub mod stats;

pub use channel::{ChannelConfig, ChannelKind, ChannelSummary, NotificationChannel};
pub use error::ValidationError;
pub use event::{EventKind, NotificationEvent};
pub use job::{Job, JobError, JobStatus, JobTrigger, TransitionError, estimate_eta, progress_percent};
pub use log::{LogCategory, LogEntry, LogLevel, NewLogEntry};
pub use rule::{BackupRule, ExcludeMatcher};
pub use schedule::{MIN_INTERVAL, Schedule, parse_timezone};
pub use stats::{SystemStats, count_by_status};
