use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, require};
use crate::schedule::Schedule;

/// A declarative description of what to back up, where, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRule {
    /// Unique identifier.
    pub id: String,
    /// Human-readable name shown in logs and notifications.
    pub name: String,
    /// Location to read from.
    pub source: String,
    /// Location to write to.
    pub destination: String,
    /// Schedule expression, see [`crate::schedule`].
    pub schedule: String,
    /// IANA timezone used for calendar schedules.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Disabled rules are never triggered and never admitted.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Encrypt the backup with the active key.
    #[serde(default = "default_true")]
    pub encrypted: bool,
    /// Gzip the data before it is encrypted.
    #[serde(default = "default_true")]
    pub compress: bool,
    /// Glob patterns; matching files are skipped.
    #[serde(default)]
    pub exclude_patterns: BTreeSet<String>,
    /// When the rule was first stored.
    pub created_at: DateTime<Utc>,
    /// When the rule was last changed.
    pub updated_at: DateTime<Utc>,
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

fn default_true() -> bool {
    true
}

impl BackupRule {
    /// Build a new enabled rule with a generated id.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
        schedule: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            name: name.into(),
            source: source.into(),
            destination: destination.into(),
            schedule: schedule.into(),
            timezone: default_timezone(),
            enabled: true,
            encrypted: true,
            compress: true,
            exclude_patterns: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = tz.into();
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_encryption(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    #[must_use]
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.insert(pattern.into());
        self
    }

    /// Check every field and return all problems found.
    ///
    /// An empty vector means the rule can be stored.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        require(&mut errors, "id", &self.id);
        require(&mut errors, "name", &self.name);
        require(&mut errors, "source", &self.source);
        require(&mut errors, "destination", &self.destination);

        if !self.source.trim().is_empty()
            && self.source.trim().trim_end_matches('/') == self.destination.trim().trim_end_matches('/')
        {
            errors.push(ValidationError::SameLocation);
        }

        if let Err(e) = Schedule::parse(&self.schedule, &self.timezone) {
            errors.push(e);
        }

        for pattern in &self.exclude_patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                errors.push(ValidationError::ExcludePattern {
                    pattern: pattern.clone(),
                    reason: e.msg.to_owned(),
                });
            }
        }

        errors
    }

    /// Parse the rule's schedule.
    pub fn parsed_schedule(&self) -> Result<Schedule, ValidationError> {
        Schedule::parse(&self.schedule, &self.timezone)
    }

    /// Compile the exclude patterns into a matcher.
    pub fn exclude_matcher(&self) -> Result<ExcludeMatcher, ValidationError> {
        ExcludeMatcher::new(&self.exclude_patterns)
    }
}

/// Compiled exclude patterns.
///
/// A path is excluded when any pattern matches either its relative path or
/// its final component.
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    patterns: Vec<glob::Pattern>,
}

impl ExcludeMatcher {
    pub fn new<'a>(patterns: impl IntoIterator<Item = &'a String>) -> Result<Self, ValidationError> {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| ValidationError::ExcludePattern {
                    pattern: p.clone(),
                    reason: e.msg.to_owned(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, relative_path: &str) -> bool {
        let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.patterns
            .iter()
            .any(|p| p.matches(relative_path) || p.matches(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> BackupRule {
        BackupRule::new("docs", "/home/docs", "s3://bucket/docs", "daily").with_id("r1")
    }

    #[test]
    fn valid_rule_has_no_errors() {
        assert!(rule().validate().is_empty());
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut r = rule();
        r.name = String::new();
        r.source = " ".into();
        r.schedule = "sometimes".into();
        r.exclude_patterns.insert("[".into());

        let errors = r.validate();
        let fields: Vec<_> = errors.iter().map(ValidationError::field).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"source"));
        assert!(fields.contains(&"schedule"));
        assert!(fields.contains(&"exclude_patterns"));
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn same_source_and_destination_is_rejected() {
        let mut r = rule();
        r.destination = "/home/docs/".into();
        assert_eq!(r.validate(), vec![ValidationError::SameLocation]);
    }

    #[test]
    fn bad_timezone_is_reported() {
        let r = rule().with_timezone("Nowhere/Special");
        assert_eq!(
            r.validate(),
            vec![ValidationError::Timezone("Nowhere/Special".into())]
        );
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "id": "r1",
            "name": "docs",
            "source": "/a",
            "destination": "/b",
            "schedule": "hourly",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }"#;
        let r: BackupRule = serde_json::from_str(json).unwrap();
        assert_eq!(r.timezone, "UTC");
        assert!(r.enabled);
        assert!(r.encrypted);
        assert!(r.compress);
        assert!(r.exclude_patterns.is_empty());
    }

    #[test]
    fn exclude_matches_name_or_path() {
        let r = rule().with_exclude("*.tmp").with_exclude("cache/**");
        let matcher = r.exclude_matcher().unwrap();
        assert!(matcher.is_excluded("notes/draft.tmp"));
        assert!(matcher.is_excluded("cache/a/b.bin"));
        assert!(!matcher.is_excluded("notes/final.md"));
    }

    #[test]
    fn empty_matcher_excludes_nothing() {
        let matcher = ExcludeMatcher::default();
        assert!(!matcher.is_excluded("anything"));
    }
}
