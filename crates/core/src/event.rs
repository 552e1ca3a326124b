use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::Job;
use crate::log::LogLevel;

/// What happened, from a notification policy's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobStarted,
    JobCompleted,
    JobFailed,
    JobExhausted,
    /// Anything logged at warning level that is not a job failure.
    Warning,
}

impl EventKind {
    pub fn level(self) -> LogLevel {
        match self {
            Self::JobStarted => LogLevel::Info,
            Self::JobCompleted => LogLevel::Success,
            Self::JobFailed | Self::JobExhausted => LogLevel::Error,
            Self::Warning => LogLevel::Warning,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::JobStarted => "job started",
            Self::JobCompleted => "job completed",
            Self::JobFailed => "job failed",
            Self::JobExhausted => "job exhausted",
            Self::Warning => "warning",
        };
        f.write_str(s)
    }
}

/// An engine event handed to the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub message: String,
    pub job_id: Option<String>,
    pub rule_name: Option<String>,
    pub attempt: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

impl NotificationEvent {
    /// An event describing `job`.
    pub fn for_job(kind: EventKind, job: &Job, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            job_id: Some(job.id.clone()),
            rule_name: Some(job.rule_name.clone()),
            attempt: Some(job.attempt),
            occurred_at: Utc::now(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            message: message.into(),
            job_id: None,
            rule_name: None,
            attempt: None,
            occurred_at: Utc::now(),
        }
    }

    /// One-line subject suitable for an email or chat message.
    pub fn subject(&self) -> String {
        match &self.rule_name {
            Some(rule) => format!("[vaultline] {}: {rule}", self.kind),
            None => format!("[vaultline] {}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobTrigger;

    #[test]
    fn job_event_carries_job_fields() {
        let job = Job::new("r1", "nightly docs", JobTrigger::Schedule);
        let event = NotificationEvent::for_job(EventKind::JobFailed, &job, "disk full");
        assert_eq!(event.job_id.as_deref(), Some(job.id.as_str()));
        assert_eq!(event.attempt, Some(1));
        assert_eq!(event.subject(), "[vaultline] job failed: nightly docs");
        assert_eq!(event.kind.level(), LogLevel::Error);
    }

    #[test]
    fn warning_subject_has_no_rule() {
        let event = NotificationEvent::warning("key rotation failed");
        assert_eq!(event.subject(), "[vaultline] warning");
    }
}
