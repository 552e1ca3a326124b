//! Execution of one admitted attempt.
//!
//! The worker enumerates the source, then streams each file through the
//! transform pipeline into the destination while the adapter's write side
//! consumes it. Cancellation, pause and shutdown all arrive through the
//! run's signal; the attempt future is dropped at its next await point, which
//! also drops any open adapter stream.

use std::sync::Arc;

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use tokio::time::Instant;
use tracing::{debug, instrument};
use vaultline_core::{BackupRule, EventKind, Job, JobError, LogCategory, NewLogEntry, NotificationEvent};
use vaultline_crypto::KeyHandle;

use crate::engine::{EngineInner, Launch, LaunchKind, Outcome};
use crate::progress::Throughput;
use crate::transfer::{ByteStream, FileEntry, TransferError};
use crate::transform::{Pipeline, Sealed, TransformError, destination_path};

/// Chunks buffered between the transform and the adapter's writer.
const CHANNEL_DEPTH: usize = 4;

pub(crate) async fn run(inner: Arc<EngineInner>, launch: Launch) {
    let Launch {
        job,
        rule,
        kind,
        signal,
        done,
    } = launch;

    inner.persist(&job).await;
    let message = match kind {
        LaunchKind::Start => "backup started".to_owned(),
        LaunchKind::Retry => format!("backup retry started, attempt {}", job.attempt),
        LaunchKind::Resume => "backup resumed".to_owned(),
    };
    inner
        .record(NewLogEntry::info(LogCategory::Backup, &message).with_job(&job.id, &job.rule_name))
        .await;
    if kind != LaunchKind::Resume {
        inner.announce(NotificationEvent::for_job(EventKind::JobStarted, &job, message));
    }

    let limit = inner.config.attempt_timeout;
    let outcome = tokio::select! {
        biased;
        () = signal.token.cancelled() => Outcome::Stopped(signal.reason()),
        result = tokio::time::timeout(limit, execute(&inner, &job, &rule)) => match result {
            Ok(Ok(())) => Outcome::Completed,
            Ok(Err(e)) => Outcome::Failed(e),
            Err(_elapsed) => Outcome::Failed(JobError::Timeout(limit)),
        },
    };
    debug!(job_id = %job.id, ?outcome, "attempt ended");

    inner.finish(&job.id, outcome).await;
    done.send_replace(true);
}

#[instrument(skip_all, fields(job.id = %job.id, rule.id = %rule.id, attempt = job.attempt))]
async fn execute(inner: &EngineInner, job: &Job, rule: &BackupRule) -> Result<(), JobError> {
    let key = if rule.encrypted {
        Some(capture_key(inner, job)?)
    } else {
        None
    };
    let matcher = rule
        .exclude_matcher()
        .map_err(|e| JobError::SourceUnreadable(e.to_string()))?;

    let mut entries = inner
        .transfer
        .open(&rule.source)
        .await
        .map_err(|e| read_error(&e))?;
    entries.retain(|entry| !matcher.is_excluded(&entry.path));
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    let total_bytes = entries.iter().map(|entry| entry.size).sum();

    let skip = inner.set_totals(&job.id, entries.len() as u64, total_bytes);
    debug!(files = entries.len(), total_bytes, skip, "source enumerated");

    let mut throughput = Throughput::new(inner.config.ewma_alpha, Instant::now());
    for entry in entries.iter().skip(usize::try_from(skip).unwrap_or(usize::MAX)) {
        copy_file(inner, &job.id, rule, entry, key.as_deref(), &mut throughput).await?;
        inner.file_done(&job.id);
    }
    Ok(())
}

/// The key this job encrypts with: the one recorded on the job, or the
/// currently active key, which is then recorded.
fn capture_key(inner: &EngineInner, job: &Job) -> Result<Arc<KeyHandle>, JobError> {
    if let Some(id) = &job.key_id {
        return inner
            .keyring
            .find(id)
            .ok_or_else(|| JobError::EncryptionFailure(format!("key {id} is no longer retained")));
    }
    let key = inner.keyring.active();
    let key_id = key.id().to_owned();
    inner.update_running(&job.id, |job| job.key_id = Some(key_id));
    Ok(key)
}

async fn copy_file(
    inner: &EngineInner,
    job_id: &str,
    rule: &BackupRule,
    entry: &FileEntry,
    key: Option<&KeyHandle>,
    throughput: &mut Throughput,
) -> Result<(), JobError> {
    let pipeline = Pipeline::new(rule.compress, key).map_err(transform_error)?;
    let input = inner
        .transfer
        .read_file(&rule.source, entry)
        .await
        .map_err(|e| read_error(&e))?;
    let destination = destination_path(&rule.destination, &entry.path, rule.compress, key.is_some());

    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let pumped = pump(inner, job_id, input, pipeline, tx, throughput);
    let written = inner.transfer.write_file(&destination, rx.boxed());
    let (pumped, written) = futures::join!(pumped, written);

    let (sealed, receipt) = match (pumped, written) {
        (Err(PumpError::Failed(e)), _) => return Err(e),
        (_, Err(e)) => return Err(write_error(&e)),
        (Err(PumpError::Closed), Ok(_)) => {
            return Err(JobError::DestinationUnwritable(format!(
                "{destination}: adapter stopped reading early"
            )));
        }
        (Ok(sealed), Ok(receipt)) => (sealed, receipt),
    };

    if inner.config.verify_integrity {
        if receipt.bytes_written != sealed.bytes_out {
            return Err(JobError::IntegrityCheckFailure(format!(
                "{destination}: wrote {} of {} bytes",
                receipt.bytes_written, sealed.bytes_out
            )));
        }
        if let Some(digest) = &receipt.sha256
            && !digest.eq_ignore_ascii_case(&sealed.sha256)
        {
            return Err(JobError::IntegrityCheckFailure(format!(
                "{destination}: checksum mismatch"
            )));
        }
    }
    debug!(path = %entry.path, bytes_out = sealed.bytes_out, "file transferred");
    Ok(())
}

enum PumpError {
    /// Reading or transforming failed; the writer was told to abort.
    Failed(JobError),
    /// The writer dropped its end of the stream.
    Closed,
}

/// Move one file from `input` through `pipeline` into `tx`, reporting
/// progress per chunk.
async fn pump(
    inner: &EngineInner,
    job_id: &str,
    mut input: ByteStream,
    mut pipeline: Pipeline,
    mut tx: mpsc::Sender<Result<Bytes, TransferError>>,
    throughput: &mut Throughput,
) -> Result<Sealed, PumpError> {
    while let Some(chunk) = input.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return abort(&mut tx, read_error(&e)).await,
        };
        let out = match pipeline.push(&chunk) {
            Ok(out) => out,
            Err(e) => return abort(&mut tx, transform_error(e)).await,
        };
        report(inner, job_id, throughput, chunk.len(), out.len());
        if !out.is_empty() && tx.send(Ok(out)).await.is_err() {
            return Err(PumpError::Closed);
        }
    }

    let (tail, sealed) = match pipeline.finish() {
        Ok(done) => done,
        Err(e) => return abort(&mut tx, transform_error(e)).await,
    };
    report(inner, job_id, throughput, 0, tail.len());
    if !tail.is_empty() && tx.send(Ok(tail)).await.is_err() {
        return Err(PumpError::Closed);
    }
    Ok(sealed)
}

async fn abort(tx: &mut mpsc::Sender<Result<Bytes, TransferError>>, err: JobError) -> Result<Sealed, PumpError> {
    // The writer may already be gone.
    let _ = tx.send(Err(TransferError::Interrupted(err.to_string()))).await;
    Err(PumpError::Failed(err))
}

fn report(inner: &EngineInner, job_id: &str, throughput: &mut Throughput, read: usize, written: usize) {
    let read = read as u64;
    let rate = throughput.record(read, Instant::now());
    inner.update_running(job_id, |job| {
        job.add_bytes(read, written as u64);
        job.set_throughput(rate);
    });
}

fn read_error(e: &TransferError) -> JobError {
    if e.is_retryable() {
        JobError::TransientTransfer(e.to_string())
    } else {
        JobError::SourceUnreadable(e.to_string())
    }
}

fn write_error(e: &TransferError) -> JobError {
    if e.is_retryable() {
        JobError::TransientTransfer(e.to_string())
    } else {
        JobError::DestinationUnwritable(e.to_string())
    }
}

fn transform_error(e: TransformError) -> JobError {
    match e {
        TransformError::Encryption(e) => JobError::EncryptionFailure(e.to_string()),
        TransformError::Compression(e) => JobError::SourceUnreadable(format!("compression failed: {e}")),
    }
}
