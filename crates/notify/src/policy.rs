use serde::{Deserialize, Serialize};
use vaultline_core::EventKind;

/// Which engine events produce notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPolicy {
    /// Notify when a job completes.
    pub on_success: bool,
    /// Notify when a job fails or exhausts its retries.
    pub on_failure: bool,
    /// Notify on warning-level engine events.
    pub on_warning: bool,
    /// Notify when a job starts running.
    pub on_start: bool,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            on_success: true,
            on_failure: true,
            on_warning: true,
            on_start: false,
        }
    }
}

impl NotificationPolicy {
    pub fn allows(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::JobStarted => self.on_start,
            EventKind::JobCompleted => self.on_success,
            EventKind::JobFailed | EventKind::JobExhausted => self.on_failure,
            EventKind::Warning => self.on_warning,
        }
    }
}
