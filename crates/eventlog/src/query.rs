use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vaultline_core::{LogCategory, LogEntry, LogLevel};

/// Largest page a single query may return.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Query parameters for searching the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    /// Filter by level.
    pub level: Option<LogLevel>,
    /// Filter by category.
    pub category: Option<LogCategory>,
    /// Filter by job id.
    pub job_id: Option<String>,
    /// Case-insensitive substring match over message, details and job name.
    pub search: Option<String>,
    /// Only entries at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only entries at or before this time.
    pub to: Option<DateTime<Utc>>,
    /// Only entries with a sequence greater than this.
    pub after_sequence: Option<u64>,
    /// Maximum number of entries to return (default 50, max 1000).
    pub limit: Option<u32>,
    /// Number of entries to skip.
    pub offset: Option<u32>,
    /// Return oldest entries first instead of newest first.
    #[serde(default)]
    pub oldest_first: bool,
}

impl LogQuery {
    /// Return the effective limit, clamped to `[1, 1000]` with a default of 50.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(50).clamp(1, MAX_PAGE_SIZE)
    }

    /// Return the effective offset, defaulting to 0.
    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: LogCategory) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    #[must_use]
    pub fn with_search(mut self, needle: impl Into<String>) -> Self {
        self.search = Some(needle.into());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn oldest_first(mut self) -> Self {
        self.oldest_first = true;
        self
    }

    /// Whether `entry` passes every filter.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if self.level.is_some_and(|l| l != entry.level) {
            return false;
        }
        if self.category.is_some_and(|c| c != entry.category) {
            return false;
        }
        if let Some(ref job) = self.job_id
            && entry.job_id.as_deref() != Some(job.as_str())
        {
            return false;
        }
        if self.from.is_some_and(|from| entry.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.timestamp > to) {
            return false;
        }
        if self.after_sequence.is_some_and(|seq| entry.sequence <= seq) {
            return false;
        }
        if let Some(ref needle) = self.search {
            let needle = needle.to_lowercase();
            let hit = |s: Option<&str>| s.is_some_and(|s| s.to_lowercase().contains(&needle));
            if !(hit(Some(&entry.message)) || hit(entry.details.as_deref()) || hit(entry.job_name.as_deref())) {
                return false;
            }
        }
        true
    }
}

/// A paginated page of log entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPage {
    /// The entries matching the query.
    pub entries: Vec<LogEntry>,
    /// Total number of entries matching the query (before pagination).
    pub total: u64,
    /// The limit used for this page.
    pub limit: u32,
    /// The offset used for this page.
    pub offset: u32,
}

/// Run `query` over entries stored in append order.
pub fn run_query<'a>(entries: impl DoubleEndedIterator<Item = &'a LogEntry>, query: &LogQuery) -> LogPage {
    let limit = query.effective_limit();
    let offset = query.effective_offset();

    let matching: Vec<&LogEntry> = if query.oldest_first {
        entries.filter(|e| query.matches(e)).collect()
    } else {
        entries.rev().filter(|e| query.matches(e)).collect()
    };

    let total = matching.len() as u64;
    let entries = matching
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .cloned()
        .collect();

    LogPage {
        entries,
        total,
        limit,
        offset,
    }
}

/// Entry counts per level. Every level is present.
pub fn count_levels<'a>(entries: impl Iterator<Item = &'a LogEntry>) -> BTreeMap<LogLevel, u64> {
    let mut counts: BTreeMap<LogLevel, u64> = LogLevel::ALL.iter().map(|l| (*l, 0)).collect();
    for entry in entries {
        *counts.entry(entry.level).or_default() += 1;
    }
    counts
}
