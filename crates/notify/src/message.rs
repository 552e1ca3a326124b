use serde::{Deserialize, Serialize};
use vaultline_core::{EventKind, LogLevel, NotificationEvent};

/// A rendered notification, ready to hand to a [`Notifier`](crate::Notifier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub subject: String,
    pub body: String,
    pub severity: LogLevel,
    pub kind: EventKind,
    pub job_id: Option<String>,
}

impl NotificationMessage {
    pub fn from_event(event: &NotificationEvent) -> Self {
        let mut body = event.message.clone();
        if let Some(ref rule) = event.rule_name {
            body.push_str(&format!("\nrule: {rule}"));
        }
        if let Some(ref job) = event.job_id {
            body.push_str(&format!("\njob: {job}"));
        }
        if let Some(attempt) = event.attempt {
            body.push_str(&format!("\nattempt: {attempt}"));
        }
        body.push_str(&format!("\nat: {}", event.occurred_at.to_rfc3339()));

        Self {
            subject: event.subject(),
            body,
            severity: event.kind.level(),
            kind: event.kind,
            job_id: event.job_id.clone(),
        }
    }

    /// The message sent by a channel test.
    pub fn test() -> Self {
        Self {
            subject: "[vaultline] test notification".to_owned(),
            body: "This channel is configured correctly.".to_owned(),
            severity: LogLevel::Info,
            kind: EventKind::Warning,
            job_id: None,
        }
    }
}
