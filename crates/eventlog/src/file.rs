use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use vaultline_core::{LogEntry, LogLevel, NewLogEntry};

use crate::error::LogError;
use crate::query::{LogPage, LogQuery, count_levels, run_query};
use crate::store::{EventLog, trace_entry};

/// Event log persisted as JSON lines, one entry per line.
///
/// The whole file is replayed into memory on open; appends are synced to
/// the end of the file before they become visible to queries.
pub struct FileEventLog {
    path: PathBuf,
    writer: Mutex<Writer>,
    entries: RwLock<Vec<LogEntry>>,
}

struct Writer {
    file: tokio::fs::File,
    /// Length of the file up to the last complete line.
    len: u64,
}

impl FileEventLog {
    /// Open (or create) the log at `path`.
    ///
    /// Lines that do not parse, such as one torn by a crash mid-write, are
    /// skipped with a warning and the file is compacted without them.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let (entries, skipped) = parse_lines(&contents, &path);
                if skipped > 0 {
                    rewrite(&path, &entries).await?;
                }
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if !entries.is_empty() {
            info!(path = %path.display(), entries = entries.len(), "replayed event log");
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let len = file.metadata().await?.len();

        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, len }),
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns the parsed entries and how many lines were dropped.
fn parse_lines(contents: &str, path: &Path) -> (Vec<LogEntry>, usize) {
    let mut entries = Vec::new();
    let mut skipped = 0;
    for (i, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(path = %path.display(), line = i + 1, error = %e, "skipping unreadable log line");
                skipped += 1;
            }
        }
    }
    (entries, skipped)
}

async fn rewrite(path: &Path, entries: &[LogEntry]) -> Result<(), LogError> {
    let mut buf = Vec::new();
    for entry in entries {
        buf.extend(serde_json::to_vec(entry)?);
        buf.push(b'\n');
    }
    let tmp = path.with_extension("jsonl.tmp");
    tokio::fs::write(&tmp, &buf).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn write_line(file: &mut tokio::fs::File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn append(&self, entry: NewLogEntry) -> Result<LogEntry, LogError> {
        let mut writer = self.writer.lock().await;
        let sequence = self.entries.read().last().map_or(0, |e| e.sequence) + 1;
        let stored = entry.into_entry(sequence, Utc::now());

        let mut line = serde_json::to_vec(&stored)?;
        line.push(b'\n');
        if let Err(e) = write_line(&mut writer.file, &line).await {
            // Cut off whatever part of the line made it to disk so the next
            // append starts on a fresh line.
            if let Err(undo) = writer.file.set_len(writer.len).await {
                warn!(path = %self.path.display(), error = %undo, "failed to roll back partial log write");
            }
            return Err(e.into());
        }
        writer.len += line.len() as u64;

        self.entries.write().push(stored.clone());
        drop(writer);

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
