//! Shared fixtures for engine scenario tests.
//!
//! [`ScriptedTransfer`] serves in-memory sources and records what the engine
//! writes. Gates let a test hold the engine at a precise point: every
//! `open` waits for an open permit and every `read_file` waits for a read
//! permit, when the corresponding gate is installed.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use vaultline_core::Job;
use vaultline_engine::{
    ByteStream, EngineConfig, FileEntry, JobEngine, RetryStrategy, Transfer, TransferError,
    WriteReceipt,
};
use vaultline_eventlog::{LogPage, LogQuery};

const CHUNK: usize = 16;

#[derive(Default)]
pub struct ScriptedTransfer {
    sources: Mutex<HashMap<String, Vec<(String, Vec<u8>)>>>,
    written: Mutex<BTreeMap<String, Vec<u8>>>,
    open_failures: Mutex<VecDeque<TransferError>>,
    read_failures: Mutex<HashMap<String, TransferError>>,
    reads: Mutex<HashMap<String, usize>>,
    open_gate: Option<Arc<Semaphore>>,
    read_gate: Option<Arc<Semaphore>>,
    short_writes: bool,
}

impl ScriptedTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every `open` until [`release_opens`](Self::release_opens).
    #[must_use]
    pub fn gated_opens(mut self) -> Self {
        self.open_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Hold every `read_file` until [`release_reads`](Self::release_reads).
    #[must_use]
    pub fn gated_reads(mut self) -> Self {
        self.read_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Report one byte fewer than was written.
    #[must_use]
    pub fn short_writes(mut self) -> Self {
        self.short_writes = true;
        self
    }

    pub fn add_file(&self, source: &str, path: &str, content: impl Into<Vec<u8>>) {
        self.sources
            .lock()
            .entry(source.to_owned())
            .or_default()
            .push((path.to_owned(), content.into()));
    }

    /// `count` files named `f000.txt` upwards, each `size` bytes.
    pub fn add_files(&self, source: &str, count: usize, size: usize) {
        for i in 0..count {
            let content: Vec<u8> = (0..size).map(|b| u8::try_from((b + i) % 251).unwrap()).collect();
            self.add_file(source, &format!("f{i:03}.txt"), content);
        }
    }

    /// The next `open` fails with `error`.
    pub fn fail_next_open(&self, error: TransferError) {
        self.open_failures.lock().push_back(error);
    }

    /// The next read of `path` fails with `error`.
    pub fn fail_read_once(&self, path: &str, error: TransferError) {
        self.read_failures.lock().insert(path.to_owned(), error);
    }

    pub fn release_opens(&self, n: usize) {
        if let Some(gate) = &self.open_gate {
            gate.add_permits(n);
        }
    }

    pub fn release_reads(&self, n: usize) {
        if let Some(gate) = &self.read_gate {
            gate.add_permits(n);
        }
    }

    pub fn written(&self) -> BTreeMap<String, Vec<u8>> {
        self.written.lock().clone()
    }

    pub fn written_file(&self, path: &str) -> Option<Vec<u8>> {
        self.written.lock().get(path).cloned()
    }

    pub fn read_count(&self, path: &str) -> usize {
        self.reads.lock().get(path).copied().unwrap_or(0)
    }
}

async fn pass(gate: Option<&Arc<Semaphore>>) -> Result<(), TransferError> {
    if let Some(gate) = gate {
        gate.acquire()
            .await
            .map_err(|e| TransferError::Interrupted(e.to_string()))?
            .forget();
    }
    Ok(())
}

#[async_trait]
impl Transfer for ScriptedTransfer {
    async fn open(&self, source: &str) -> Result<Vec<FileEntry>, TransferError> {
        pass(self.open_gate.as_ref()).await?;
        if let Some(error) = self.open_failures.lock().pop_front() {
            return Err(error);
        }
        let sources = self.sources.lock();
        let files = sources
            .get(source)
            .ok_or_else(|| TransferError::NotFound(source.to_owned()))?;
        Ok(files
            .iter()
            .map(|(path, content)| FileEntry::new(path.clone(), content.len() as u64))
            .collect())
    }

    async fn read_file(&self, source: &str, entry: &FileEntry) -> Result<ByteStream, TransferError> {
        pass(self.read_gate.as_ref()).await?;
        *self.reads.lock().entry(entry.path.clone()).or_default() += 1;
        if let Some(error) = self.read_failures.lock().remove(&entry.path) {
            return Err(error);
        }
        let content = self
            .sources
            .lock()
            .get(source)
            .and_then(|files| files.iter().find(|(path, _)| path == &entry.path))
            .map(|(_, content)| content.clone())
            .ok_or_else(|| TransferError::NotFound(entry.path.clone()))?;
        let chunks: Vec<Result<Bytes, TransferError>> = content
            .chunks(CHUNK)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn write_file(&self, destination: &str, mut data: ByteStream) -> Result<WriteReceipt, TransferError> {
        let mut buf = Vec::new();
        while let Some(chunk) = data.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let sha256 = hex::encode(Sha256::digest(&buf));
        let mut bytes_written = buf.len() as u64;
        if self.short_writes {
            bytes_written = bytes_written.saturating_sub(1);
        }
        self.written.lock().insert(destination.to_owned(), buf);
        Ok(WriteReceipt {
            bytes_written,
            sha256: Some(sha256),
        })
    }
}

/// Fast retries and a short grace period.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        retry_strategy: RetryStrategy::Constant {
            delay: Duration::from_millis(10),
        },
        cancel_grace: Duration::from_secs(2),
        ..EngineConfig::default()
    }
}

/// Poll until `ready` holds, failing the test after five seconds.
pub async fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !ready() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until the job satisfies `ready` and return it.
pub async fn wait_job(engine: &JobEngine, id: &str, ready: impl Fn(&Job) -> bool) -> Job {
    wait_until(&format!("job {id}"), || {
        engine.get_job(id).is_ok_and(|job| ready(&job))
    })
    .await;
    engine.get_job(id).expect("job exists")
}

/// Poll the event log until `query` matches at least `count` entries.
pub async fn wait_log(engine: &JobEngine, query: &LogQuery, count: u64) -> LogPage {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let page = engine.query_log(query).await.expect("query log");
        if page.total >= count {
            return page;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} log entries, have {}",
            page.total
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
