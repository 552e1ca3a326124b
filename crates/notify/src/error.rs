use std::time::Duration;

use thiserror::Error;
use vaultline_core::ChannelKind;

/// Errors that can occur while delivering a notification.
#[derive(Debug, Error)]
pub enum NotifierError {
    /// No notifier is registered for the channel's kind.
    #[error("no notifier registered for {0} channels")]
    NoNotifier(ChannelKind),

    /// No channel with the given id is configured.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// The remote service refused the message.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The notifier did not respond within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A network or transport-level error occurred.
    #[error("connection error: {0}")]
    Connection(String),

    /// The channel configuration is unusable.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The remote service is throttling us.
    #[error("rate limited")]
    RateLimited,
}

impl NotifierError {
    /// Returns `true` if the error is transient and a later delivery may
    /// succeed. The dispatcher itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(NotifierError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(NotifierError::Connection("reset".into()).is_retryable());
        assert!(NotifierError::RateLimited.is_retryable());
    }

    #[test]
    fn non_retryable_errors() {
        assert!(!NotifierError::NoNotifier(ChannelKind::Email).is_retryable());
        assert!(!NotifierError::Rejected("bad token".into()).is_retryable());
        assert!(!NotifierError::Configuration("x".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = NotifierError::NoNotifier(ChannelKind::Telegram);
        assert_eq!(err.to_string(), "no notifier registered for telegram channels");

        let err = NotifierError::Timeout(Duration::from_millis(500));
        assert_eq!(err.to_string(), "timeout after 500ms");
    }
}
