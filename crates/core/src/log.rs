use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of an event log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub const ALL: [Self; 4] = [Self::Info, Self::Success, Self::Warning, Self::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Subsystem an event log entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Backup,
    System,
    Network,
    Security,
    Notification,
}

impl LogCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::System => "system",
            Self::Network => "network",
            Self::Security => "security",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "backup" => Ok(Self::Backup),
            "system" => Ok(Self::System),
            "network" => Ok(Self::Network),
            "security" => Ok(Self::Security),
            "notification" => Ok(Self::Notification),
            other => Err(format!("unknown log category: {other}")),
        }
    }
}

/// An immutable, stored event log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique identifier.
    pub id: String,
    /// Position in the log. Strictly increasing in append order.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
}

/// An entry waiting to be appended. The log assigns id, sequence and
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    pub details: Option<String>,
    pub job_id: Option<String>,
    pub job_name: Option<String>,
}

impl NewLogEntry {
    pub fn new(level: LogLevel, category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            level,
            category,
            message: message.into(),
            details: None,
            job_id: None,
            job_name: None,
        }
    }

    pub fn info(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, category, message)
    }

    pub fn success(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, category, message)
    }

    pub fn warning(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, category, message)
    }

    pub fn error(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, category, message)
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn with_job(mut self, job_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self.job_name = Some(job_name.into());
        self
    }

    /// Turn into a stored entry.
    pub fn into_entry(self, sequence: u64, timestamp: DateTime<Utc>) -> LogEntry {
        LogEntry {
            id: uuid::Uuid::now_v7().to_string(),
            sequence,
            timestamp,
            level: self.level,
            category: self.category,
            message: self.message,
            details: self.details,
            job_id: self.job_id,
            job_name: self.job_name,
        }
    }
}
