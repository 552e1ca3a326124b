//! A [`Transfer`] adapter over the local filesystem.
//!
//! Sources and destinations are directory paths. Writes go to a `.partial`
//! sibling first and are renamed into place only after the whole stream has
//! been written and synced, so an interrupted write never leaves a
//! complete-looking file behind.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;
use vaultline_engine::{ByteStream, FileEntry, Transfer, TransferError, WriteReceipt};

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, Copy)]
enum Side {
    Read,
    Write,
}

/// Reads and writes plain files under local directories.
#[derive(Debug, Clone)]
pub struct LocalTransfer {
    chunk_size: usize,
}

impl LocalTransfer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl Transfer for LocalTransfer {
    async fn open(&self, source: &str) -> Result<Vec<FileEntry>, TransferError> {
        let root = PathBuf::from(source);
        let meta = fs::metadata(&root)
            .await
            .map_err(|e| classify(&e, &root, Side::Read))?;
        if !meta.is_dir() {
            return Err(TransferError::SourceUnreadable(format!(
                "{source} is not a directory"
            )));
        }

        let mut entries = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut listing = fs::read_dir(&dir)
                .await
                .map_err(|e| classify(&e, &dir, Side::Read))?;
            while let Some(item) = listing
                .next_entry()
                .await
                .map_err(|e| classify(&e, &dir, Side::Read))?
            {
                let path = item.path();
                let kind = item
                    .file_type()
                    .await
                    .map_err(|e| classify(&e, &path, Side::Read))?;
                if kind.is_dir() {
                    pending.push(path);
                } else if kind.is_file() {
                    let size = item
                        .metadata()
                        .await
                        .map_err(|e| classify(&e, &path, Side::Read))?
                        .len();
                    entries.push(FileEntry::new(relative(&root, &path), size));
                }
            }
        }
        debug!(source, files = entries.len(), "source listed");
        Ok(entries)
    }

    async fn read_file(&self, source: &str, entry: &FileEntry) -> Result<ByteStream, TransferError> {
        let path = Path::new(source).join(&entry.path);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| classify(&e, &path, Side::Read))?;
        let stream = ReaderStream::with_capacity(file, self.chunk_size)
            .map_err(move |e| classify(&e, &path, Side::Read));
        Ok(stream.boxed())
    }

    async fn write_file(&self, destination: &str, mut data: ByteStream) -> Result<WriteReceipt, TransferError> {
        let path = PathBuf::from(destination);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| classify(&e, parent, Side::Write))?;
        }
        let partial = PathBuf::from(format!("{destination}{PARTIAL_SUFFIX}"));

        match write_partial(&partial, &mut data).await {
            Ok((bytes_written, digest)) => {
                fs::rename(&partial, &path)
                    .await
                    .map_err(|e| classify(&e, &path, Side::Write))?;
                Ok(WriteReceipt {
                    bytes_written,
                    sha256: Some(digest),
                })
            }
            Err(e) => {
                // Nothing to clean up if the file was never created.
                let _ = fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }
}

async fn write_partial(path: &Path, data: &mut ByteStream) -> Result<(u64, String), TransferError> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| classify(&e, path, Side::Write))?;
    let mut hasher = Sha256::new();
    let mut written = 0u64;
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| classify(&e, path, Side::Write))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| classify(&e, path, Side::Write))?;
    file.sync_all()
        .await
        .map_err(|e| classify(&e, path, Side::Write))?;
    Ok((written, hex::encode(hasher.finalize())))
}

/// `path` relative to `root`, `/`-separated.
fn relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn classify(err: &io::Error, path: &Path, side: Side) -> TransferError {
    let context = format!("{}: {err}", path.display());
    match err.kind() {
        io::ErrorKind::NotFound => TransferError::NotFound(context),
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => TransferError::QuotaExceeded(context),
        io::ErrorKind::Interrupted | io::ErrorKind::UnexpectedEof => TransferError::Interrupted(context),
        io::ErrorKind::TimedOut => TransferError::Timeout(context),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe => TransferError::Connection(context),
        _ => match side {
            Side::Read => TransferError::SourceUnreadable(context),
            Side::Write => TransferError::DestinationUnwritable(context),
        },
    }
}
