use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use vaultline_core::{LogEntry, LogLevel, NewLogEntry};

use crate::error::LogError;
use crate::query::{LogPage, LogQuery, count_levels, run_query};
use crate::store::{EventLog, trace_entry};

/// In-memory event log. Suitable for development and testing.
///
/// Entries are kept in append order, so the vector index is `sequence - 1`.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    entries: RwLock<Vec<LogEntry>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, entry: NewLogEntry) -> Result<LogEntry, LogError> {
        let stored = {
            let mut entries = self.entries.write();
            let stored = entry.into_entry(entries.len() as u64 + 1, Utc::now());
            entries.push(stored.clone());
            stored
        };
        trace_entry(&stored);
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<Option<LogEntry>, LogError> {
        Ok(self.entries.read().iter().find(|e| e.id == id).cloned())
    }

    async fn query(&self, query: &LogQuery) -> Result<LogPage, LogError> {
        Ok(run_query(self.entries.read().iter(), query))
    }

    async fn count_by_level(&self) -> Result<BTreeMap<LogLevel, u64>, LogError> {
        Ok(count_levels(self.entries.read().iter()))
    }

    async fn len(&self) -> Result<u64, LogError> {
        Ok(self.entries.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vaultline_core::LogCategory;

    use super::*;

    #[tokio::test]
    async fn append_assigns_sequence_and_id() {
        let log = MemoryEventLog::new();
        let a = log
            .append(NewLogEntry::info(LogCategory::System, "one"))
            .await
            .unwrap();
        let b = log
            .append(NewLogEntry::info(LogCategory::System, "two"))
            .await
            .unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_ne!(a.id, b.id);
        assert_eq!(log.get(&b.id).await.unwrap().unwrap().message, "two");
        assert!(log.get("missing").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_get_unique_ordered_sequences() {
        let log = Arc::new(MemoryEventLog::new());
        let mut handles = Vec::new();
        for task in 0..8 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    log.append(NewLogEntry::info(LogCategory::Backup, format!("t{task}-{i}")))
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(log.len().await.unwrap(), 400);
        let page = log
            .query(&LogQuery::default().with_limit(1000).oldest_first())
            .await
            .unwrap();
        let seqs: Vec<u64> = page.entries.iter().map(|e| e.sequence).collect();
        let expected: Vec<u64> = (1..=400).collect();
        assert_eq!(seqs, expected);
    }

    #[tokio::test]
    async fn counts_by_level() {
        let log = MemoryEventLog::new();
        log.append(NewLogEntry::error(LogCategory::Backup, "x")).await.unwrap();
        log.append(NewLogEntry::success(LogCategory::Backup, "y")).await.unwrap();
        let counts = log.count_by_level().await.unwrap();
        assert_eq!(counts[&LogLevel::Error], 1);
        assert_eq!(counts[&LogLevel::Success], 1);
        assert_eq!(counts[&LogLevel::Warning], 0);
    }
}
