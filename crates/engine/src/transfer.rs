//! The byte-moving capability the engine drives.
//!
//! A [`Transfer`] adapter knows how to list a source, stream a file out of
//! it, and stream bytes into a destination. The engine never touches the
//! storage itself; compression, encryption and checksums happen between the
//! adapter's read side and its write side.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stream of chunks flowing into or out of an adapter.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// One file found in a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    pub size: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// What the adapter reports after a write completes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteReceipt {
    pub bytes_written: u64,
    /// Hex SHA-256 of the bytes the adapter persisted, when it computes one.
    pub sha256: Option<String>,
}

/// Errors raised by a transfer adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("destination unwritable: {0}")]
    DestinationUnwritable(String),

    #[error("destination quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    /// The stream was cut short.
    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl TransferError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Interrupted(_) | Self::Timeout(_)
        )
    }
}

/// Streaming access to backup sources and destinations.
///
/// Implementations must be `Send + Sync`. Every call may be abandoned
/// mid-flight by dropping its future; a write whose input stream yields an
/// error must not leave a complete-looking file behind.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Enumerate the files under `source` with their sizes.
    async fn open(&self, source: &str) -> Result<Vec<FileEntry>, TransferError>;

    /// Stream the contents of `entry`, which came from [`Transfer::open`].
    async fn read_file(&self, source: &str, entry: &FileEntry) -> Result<ByteStream, TransferError>;

    /// Consume `data` into `destination`, replacing anything already there.
    async fn write_file(&self, destination: &str, data: ByteStream) -> Result<WriteReceipt, TransferError>;
}
