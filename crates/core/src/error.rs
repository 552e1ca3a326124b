use thiserror::Error;

/// A single problem found while validating a rule or a notification channel.
///
/// Validation never stops at the first problem; callers receive the complete
/// list so an operator can fix everything in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field was empty or whitespace.
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    /// The schedule expression could not be understood.
    #[error("invalid schedule '{value}': {reason}")]
    Schedule { value: String, reason: String },

    /// The timezone is not a known IANA zone.
    #[error("invalid timezone: {0}")]
    Timezone(String),

    /// An exclude pattern is not a valid glob.
    #[error("invalid exclude pattern '{pattern}': {reason}")]
    ExcludePattern { pattern: String, reason: String },

    /// Source and destination point at the same location.
    #[error("source and destination must differ")]
    SameLocation,

    /// A channel field holds a value that cannot be used.
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    /// The name of the field this error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Empty { field } | Self::Invalid { field, .. } => field,
            Self::Schedule { .. } => "schedule",
            Self::Timezone(_) => "timezone",
            Self::ExcludePattern { .. } => "exclude_patterns",
            Self::SameLocation => "destination",
        }
    }
}

/// Push an [`ValidationError::Empty`] for `field` when `value` is blank.
pub(crate) fn require(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::Empty { field });
    }
}
