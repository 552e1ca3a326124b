use thiserror::Error;
use vaultline_core::{JobStatus, ValidationError};
use vaultline_crypto::CryptoError;
use vaultline_eventlog::LogError;
use vaultline_notify::NotifierError;
use vaultline_state::StateError;

/// Errors returned by the engine's administrative surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The rule failed validation and was not stored.
    #[error("invalid rule: {}", join(.0))]
    InvalidRule(Vec<ValidationError>),

    #[error("invalid channel: {}", join(.0))]
    InvalidChannel(Vec<ValidationError>),

    /// The requested action does not apply to a job in this status.
    #[error("cannot {action} a job that is {from}")]
    InvalidTransition { from: JobStatus, action: &'static str },

    /// The job used its whole retry budget.
    #[error("job {0} is exhausted and cannot be retried")]
    NotRetryable(String),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("event log error: {0}")]
    Log(#[from] LogError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("notification error: {0}")]
    Notifier(#[from] NotifierError),

    /// The engine was built without a required component.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("engine is stopped")]
    Stopped,
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_rule_lists_every_problem() {
        let err = EngineError::InvalidRule(vec![
            ValidationError::Empty { field: "name" },
            ValidationError::SameLocation,
        ]);
        let text = err.to_string();
        assert!(text.starts_with("invalid rule: "));
        assert!(text.contains("; "));
    }

    #[test]
    fn transition_names_action_and_status() {
        let err = EngineError::InvalidTransition {
            from: JobStatus::Completed,
            action: "pause",
        };
        assert_eq!(err.to_string(), "cannot pause a job that is completed");
    }
}
