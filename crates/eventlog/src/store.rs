use std::collections::BTreeMap;

use async_trait::async_trait;
use vaultline_core::{LogEntry, LogLevel, NewLogEntry};

use crate::error::LogError;
use crate::query::{LogPage, LogQuery};

/// Trait for event log storage backends.
///
/// Implementations assign each appended entry the next sequence number under
/// a single lock, so concurrent producers see one total order.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an entry and return it as stored.
    async fn append(&self, entry: NewLogEntry) -> Result<LogEntry, LogError>;

    /// Retrieve an entry by its id.
    async fn get(&self, id: &str) -> Result<Option<LogEntry>, LogError>;

    /// Query entries with filters and pagination.
    async fn query(&self, query: &LogQuery) -> Result<LogPage, LogError>;

    /// Entry counts per level.
    async fn count_by_level(&self) -> Result<BTreeMap<LogLevel, u64>, LogError>;

    /// Total number of entries.
    async fn len(&self) -> Result<u64, LogError>;
}

/// Mirror a stored entry as a diagnostic `tracing` event.
pub(crate) fn trace_entry(entry: &LogEntry) {
    let job = entry.job_id.as_deref().unwrap_or("");
    let details = entry.details.as_deref().unwrap_or("");
    match entry.level {
        LogLevel::Info | LogLevel::Success => tracing::info!(
            sequence = entry.sequence,
            category = %entry.category,
            job,
            details,
            "{}",
            entry.message
        ),
        LogLevel::Warning => tracing::warn!(
            sequence = entry.sequence,
            category = %entry.category,
            job,
            details,
            "{}",
            entry.message
        ),
        LogLevel::Error => tracing::error!(
            sequence = entry.sequence,
            category = %entry.category,
            job,
            details,
            "{}",
            entry.message
        ),
    }
}
