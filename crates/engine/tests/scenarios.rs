//! End-to-end engine scenarios.
//!
//! Every test drives a real [`JobEngine`] over a [`ScriptedTransfer`] and
//! observes it only through the administrative surface and the event log.

mod common;

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use common::{ScriptedTransfer, test_config, wait_job, wait_log};
use secrecy::SecretString;
use vaultline_core::{
    BackupRule, ChannelConfig, ChannelKind, Job, JobError, JobStatus, JobTrigger, LogCategory, LogLevel,
    NotificationChannel,
};
use vaultline_crypto::{StreamDecryptor, decrypt_archive};
use vaultline_engine::{EngineConfig, EngineError, JobEngine, RetryStrategy, TransferError};
use vaultline_eventlog::LogQuery;
use vaultline_notify::{DeliveryReceipt, DynNotifier, NotificationMessage, Notifier, NotifierError, NotifierRegistry};
use vaultline_state::{MemoryStateStore, StateStore};

// -- Fixtures --

fn engine_with(transfer: &Arc<ScriptedTransfer>, config: EngineConfig) -> JobEngine {
    JobEngine::builder()
        .transfer(Arc::clone(transfer) as Arc<dyn vaultline_engine::Transfer>)
        .config(config)
        .build()
        .expect("engine should build")
}

fn plain_rule(name: &str, source: &str) -> BackupRule {
    BackupRule::new(name, source, "/dst", "daily")
        .with_encryption(false)
        .with_compression(false)
}

async fn add_rule(engine: &JobEngine, rule: BackupRule) -> BackupRule {
    engine.create_rule(rule).await.expect("rule should be stored")
}

fn status(status: JobStatus) -> impl Fn(&Job) -> bool {
    move |job: &Job| job.status == status
}

async fn log_count(engine: &JobEngine, query: &LogQuery) -> u64 {
    engine.query_log(query).await.expect("query log").total
}

// -- Admission --

mod admission {
    use super::*;

    #[tokio::test]
    async fn one_running_job_per_rule() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_reads());
        transfer.add_files("/src", 3, 64);
        let engine = engine_with(
            &transfer,
            EngineConfig {
                max_concurrent_jobs: 1,
                ..test_config()
            },
        );
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;

        let first = engine.trigger_rule(&rule.id).await.unwrap();
        let second = engine.trigger_rule(&rule.id).await.unwrap();
        assert_eq!(first.status, JobStatus::Running);
        assert_eq!(second.status, JobStatus::Pending);

        transfer.release_reads(2);
        wait_job(&engine, &first.id, |job| job.files_processed == 2).await;
        assert_eq!(engine.get_job(&second.id).unwrap().status, JobStatus::Pending);

        transfer.release_reads(100);
        let first = wait_job(&engine, &first.id, status(JobStatus::Completed)).await;
        let second = wait_job(&engine, &second.id, status(JobStatus::Completed)).await;
        assert!(second.started_at.unwrap() >= first.finished_at.unwrap());
        assert_eq!(engine.stats().running_slots, 0);
    }

    #[tokio::test]
    async fn cap_holds_back_other_rules() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_reads());
        for source in ["/a", "/b", "/c"] {
            transfer.add_files(source, 2, 32);
        }
        let engine = engine_with(
            &transfer,
            EngineConfig {
                max_concurrent_jobs: 2,
                ..test_config()
            },
        );
        let mut jobs = Vec::new();
        for source in ["/a", "/b", "/c"] {
            let rule = add_rule(&engine, plain_rule(source, source)).await;
            jobs.push(engine.trigger_rule(&rule.id).await.unwrap());
        }

        let stats = engine.stats();
        assert_eq!(stats.running_slots, 2);
        assert_eq!(stats.jobs_by_status["running"], 2);
        assert_eq!(jobs[2].status, JobStatus::Pending);

        transfer.release_reads(100);
        for job in &jobs {
            wait_job(&engine, &job.id, status(JobStatus::Completed)).await;
        }
    }

    #[tokio::test]
    async fn disabled_rule_keeps_manual_job_pending() {
        let transfer = Arc::new(ScriptedTransfer::new());
        transfer.add_files("/src", 1, 8);
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(&engine, plain_rule("docs", "/src").with_enabled(false)).await;

        let job = engine.trigger_rule(&rule.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.get_job(&job.id).unwrap().status, JobStatus::Pending);

        add_rule(&engine, rule.with_enabled(true)).await;
        wait_job(&engine, &job.id, status(JobStatus::Completed)).await;
    }

    #[tokio::test]
    async fn deleting_a_rule_cancels_its_pending_jobs() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_reads());
        transfer.add_files("/src", 2, 16);
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;
        let running = engine.trigger_rule(&rule.id).await.unwrap();
        let pending = engine.trigger_rule(&rule.id).await.unwrap();

        engine.delete_rule(&rule.id).await.unwrap();
        assert_eq!(engine.get_job(&pending.id).unwrap().status, JobStatus::Cancelled);
        assert!(matches!(
            engine.trigger_rule(&rule.id).await,
            Err(EngineError::RuleNotFound(_))
        ));

        transfer.release_reads(10);
        wait_job(&engine, &running.id, status(JobStatus::Completed)).await;

        let query = LogQuery::default().with_job(&pending.id).with_search("rule deleted");
        assert_eq!(log_count(&engine, &query).await, 1);
    }

    fn hourly_rule() -> BackupRule {
        BackupRule::new("docs", "/src", "/dst", "hourly")
            .with_encryption(false)
            .with_compression(false)
    }

    fn backoff_config(delay: Duration) -> EngineConfig {
        EngineConfig {
            max_concurrent_jobs: 1,
            retry_strategy: RetryStrategy::Constant { delay },
            ..test_config()
        }
    }

    #[tokio::test]
    async fn job_waiting_to_retry_holds_its_rule() {
        let transfer = Arc::new(ScriptedTransfer::new());
        transfer.add_files("/src", 1, 8);
        transfer.fail_next_open(TransferError::Connection("connection reset".into()));
        let engine = engine_with(&transfer, backoff_config(Duration::from_millis(400)));
        let rule = add_rule(&engine, hourly_rule()).await;
        engine.tick(Utc::now()).await;
        let next = engine.next_fire(&rule.id).unwrap();

        let first = engine.trigger_rule(&rule.id).await.unwrap();
        let second = engine.trigger_rule(&rule.id).await.unwrap();
        wait_job(&engine, &first.id, |job| job.status == JobStatus::Failed && job.attempt == 1).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.get_job(&second.id).unwrap().status, JobStatus::Pending);
        assert_eq!(engine.stats().running_slots, 0);

        engine.tick(next).await;
        assert_eq!(engine.list_jobs().len(), 2);

        let first = wait_job(&engine, &first.id, status(JobStatus::Completed)).await;
        assert_eq!(first.attempt, 2);
        let second = wait_job(&engine, &second.id, status(JobStatus::Completed)).await;
        assert!(second.started_at.unwrap() >= first.finished_at.unwrap());
    }

    #[tokio::test]
    async fn cancelling_a_backed_off_job_frees_its_rule() {
        let transfer = Arc::new(ScriptedTransfer::new());
        transfer.add_files("/src", 1, 8);
        transfer.fail_next_open(TransferError::Connection("connection reset".into()));
        let engine = engine_with(&transfer, backoff_config(Duration::from_secs(600)));
        let rule = add_rule(&engine, hourly_rule()).await;

        let first = engine.trigger_rule(&rule.id).await.unwrap();
        let second = engine.trigger_rule(&rule.id).await.unwrap();
        wait_job(&engine, &first.id, status(JobStatus::Failed)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.get_job(&second.id).unwrap().status, JobStatus::Pending);

        let cancelled = engine.cancel_job(&first.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        wait_job(&engine, &second.id, status(JobStatus::Completed)).await;
    }
}

// -- Failures and retries --

mod retries {
    use super::*;

    #[tokio::test]
    async fn transient_failures_retry_until_exhausted() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_opens());
        transfer.add_files("/src", 1, 8);
        for _ in 0..3 {
            transfer.fail_next_open(TransferError::Connection("connection reset".into()));
        }
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;
        let job = engine.trigger_rule(&rule.id).await.unwrap();
        assert_eq!((job.status, job.attempt), (JobStatus::Running, 1));

        transfer.release_opens(1);
        wait_job(&engine, &job.id, |j| j.status == JobStatus::Running && j.attempt == 2).await;
        transfer.release_opens(1);
        wait_job(&engine, &job.id, |j| j.status == JobStatus::Running && j.attempt == 3).await;
        transfer.release_opens(1);

        let job = wait_job(&engine, &job.id, status(JobStatus::Exhausted)).await;
        assert_eq!(job.attempt, 3);
        assert!(matches!(job.last_error, Some(JobError::TransientTransfer(_))));

        let exhausted = LogQuery::default().with_job(&job.id).with_search("exhausted after 3 attempts");
        assert_eq!(log_count(&engine, &exhausted).await, 1);
        let failed = LogQuery::default()
            .with_job(&job.id)
            .with_level(LogLevel::Error)
            .with_search("failed on attempt");
        assert_eq!(log_count(&engine, &failed).await, 2);

        assert!(matches!(
            engine.retry_job(&job.id).await,
            Err(EngineError::NotRetryable(_))
        ));
    }

    #[tokio::test]
    async fn retry_starts_progress_over() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_reads());
        transfer.add_files("/src", 5, 40);
        transfer.fail_read_once("f002.txt", TransferError::Interrupted("stream reset".into()));
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;
        let job = engine.trigger_rule(&rule.id).await.unwrap();

        transfer.release_reads(2);
        wait_job(&engine, &job.id, |j| j.files_processed == 2).await;
        transfer.release_reads(1);

        let retried = wait_job(&engine, &job.id, |j| j.status == JobStatus::Running && j.attempt == 2).await;
        assert_eq!(retried.files_processed, 0);
        assert_eq!(retried.bytes_processed, 0);
        assert!(retried.progress.abs() < f64::EPSILON);

        transfer.release_reads(10);
        let done = wait_job(&engine, &job.id, status(JobStatus::Completed)).await;
        assert_eq!(done.attempt, 2);
        assert_eq!(done.files_processed, 5);
        assert_eq!(done.bytes_processed, 200);
        assert_eq!(transfer.read_count("f000.txt"), 2);
    }

    #[tokio::test]
    async fn permanent_failure_waits_for_manual_retry() {
        let transfer = Arc::new(ScriptedTransfer::new());
        transfer.add_files("/src", 2, 8);
        transfer.fail_next_open(TransferError::SourceUnreadable("permission denied".into()));
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;
        let job = engine.trigger_rule(&rule.id).await.unwrap();

        let failed = wait_job(&engine, &job.id, status(JobStatus::Failed)).await;
        assert!(matches!(failed.last_error, Some(JobError::SourceUnreadable(_))));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.get_job(&job.id).unwrap().attempt, 1);

        engine.retry_job(&job.id).await.unwrap();
        let done = wait_job(&engine, &job.id, status(JobStatus::Completed)).await;
        assert_eq!(done.attempt, 2);
        assert_eq!(done.files_processed, 2);
    }

    #[tokio::test]
    async fn short_write_fails_integrity_check() {
        let transfer = Arc::new(ScriptedTransfer::new().short_writes());
        transfer.add_files("/src", 1, 64);
        let engine = engine_with(
            &transfer,
            EngineConfig {
                max_attempts: 1,
                ..test_config()
            },
        );
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;
        let job = engine.trigger_rule(&rule.id).await.unwrap();

        let job = wait_job(&engine, &job.id, status(JobStatus::Exhausted)).await;
        assert!(matches!(job.last_error, Some(JobError::IntegrityCheckFailure(_))));
    }

    #[tokio::test]
    async fn slow_attempt_times_out() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_opens());
        transfer.add_files("/src", 1, 8);
        let engine = engine_with(
            &transfer,
            EngineConfig {
                max_attempts: 1,
                attempt_timeout: Duration::from_millis(50),
                ..test_config()
            },
        );
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;
        let job = engine.trigger_rule(&rule.id).await.unwrap();

        let job = wait_job(&engine, &job.id, status(JobStatus::Exhausted)).await;
        assert!(matches!(job.last_error, Some(JobError::Timeout(_))));
        assert_eq!(engine.stats().running_slots, 0);
    }
}

// -- Cancel, pause and resume --

mod control {
    use super::*;

    #[tokio::test]
    async fn cancel_mid_transfer_releases_the_slot() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_reads());
        transfer.add_files("/src", 10, 32);
        transfer.add_files("/other", 1, 32);
        let engine = engine_with(
            &transfer,
            EngineConfig {
                max_concurrent_jobs: 1,
                ..test_config()
            },
        );
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;
        let other = add_rule(&engine, plain_rule("other", "/other")).await;
        let job = engine.trigger_rule(&rule.id).await.unwrap();

        transfer.release_reads(4);
        let at_forty = wait_job(&engine, &job.id, |j| j.files_processed == 4).await;
        assert!((at_forty.progress - 40.0).abs() < 1e-9);

        let cancelled = engine.cancel_job(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(engine.stats().running_slots, 0);

        let query = LogQuery::default()
            .with_job(&job.id)
            .with_category(LogCategory::Backup)
            .with_search("backup cancelled");
        let page = wait_log(&engine, &query, 1).await;
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].level, LogLevel::Warning);

        let next = engine.trigger_rule(&other.id).await.unwrap();
        assert_eq!(next.status, JobStatus::Running);
        transfer.release_reads(10);
        wait_job(&engine, &next.id, status(JobStatus::Completed)).await;
        assert_eq!(engine.get_job(&job.id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_pending_job_in_place() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_reads());
        transfer.add_files("/src", 1, 8);
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;
        let running = engine.trigger_rule(&rule.id).await.unwrap();
        let pending = engine.trigger_rule(&rule.id).await.unwrap();

        let cancelled = engine.cancel_job(&pending.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(matches!(
            engine.cancel_job(&pending.id).await,
            Err(EngineError::InvalidTransition { .. })
        ));

        transfer.release_reads(1);
        wait_job(&engine, &running.id, status(JobStatus::Completed)).await;
        assert_eq!(engine.get_job(&pending.id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn pause_and_resume_continue_from_last_file() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_reads());
        transfer.add_files("/src", 5, 64);
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(&engine, BackupRule::new("docs", "/src", "/dst", "daily")).await;
        let job = engine.trigger_rule(&rule.id).await.unwrap();

        transfer.release_reads(2);
        wait_job(&engine, &job.id, |j| j.files_processed == 2).await;

        let paused = engine.pause_job(&job.id).await.unwrap();
        assert_eq!(paused.status, JobStatus::Paused);
        assert_eq!(paused.files_processed, 2);
        assert_eq!(paused.bytes_processed, 128);
        assert_eq!(engine.stats().running_slots, 0);
        assert!(matches!(
            engine.pause_job(&job.id).await,
            Err(EngineError::InvalidTransition { .. })
        ));

        let resumed = engine.resume_job(&job.id).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Running);
        transfer.release_reads(10);

        let done = wait_job(&engine, &job.id, status(JobStatus::Completed)).await;
        assert_eq!(done.files_processed, 5);
        assert_eq!(done.bytes_processed, 320);
        assert_eq!(done.key_id, paused.key_id);
        for i in 0..5 {
            assert_eq!(transfer.read_count(&format!("f{i:03}.txt")), 1);
        }
        assert_eq!(transfer.written().len(), 5);
    }

    #[tokio::test]
    async fn stop_interrupts_running_jobs() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_reads());
        transfer.add_files("/src", 3, 8);
        let engine = engine_with(&transfer, test_config());
        engine.start().await.unwrap();
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;
        let job = engine.trigger_rule(&rule.id).await.unwrap();

        engine.stop().await;
        let job = engine.get_job(&job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(matches!(job.last_error, Some(JobError::ProcessRestart)));
        assert!(matches!(
            engine.trigger_rule(&rule.id).await,
            Err(EngineError::Stopped)
        ));
        assert!(matches!(engine.start().await, Err(EngineError::Stopped)));
    }
}

// -- Transform pipeline --

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn compressed_encrypted_archive_round_trips() {
        let transfer = Arc::new(ScriptedTransfer::new());
        let content = b"quarterly report, draft seven\n".repeat(40);
        transfer.add_file("/src", "report.txt", content.clone());
        transfer.add_file("/src", "scratch.tmp", b"ignore me".to_vec());
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(
            &engine,
            BackupRule::new("docs", "/src", "/dst", "daily").with_exclude("*.tmp"),
        )
        .await;

        let job = engine.trigger_rule(&rule.id).await.unwrap();
        let job = wait_job(&engine, &job.id, status(JobStatus::Completed)).await;
        assert_eq!(job.total_files, 1);
        assert!(job.compression_ratio.is_some_and(|ratio| ratio < 1.0));

        let written = transfer.written();
        assert_eq!(written.keys().collect::<Vec<_>>(), vec!["/dst/report.txt.gz.vlt"]);

        let gz = decrypt_archive(engine.keyring().decryptor(), &written["/dst/report.txt.gz.vlt"]).unwrap();
        let mut plain = Vec::new();
        flate2::read::GzDecoder::new(gz.as_slice())
            .read_to_end(&mut plain)
            .unwrap();
        assert_eq!(plain, content);
    }

    #[tokio::test]
    async fn plain_rule_copies_bytes_verbatim() {
        let transfer = Arc::new(ScriptedTransfer::new());
        transfer.add_file("/src", "nested/notes.md", b"# notes".to_vec());
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;

        let job = engine.trigger_rule(&rule.id).await.unwrap();
        let job = wait_job(&engine, &job.id, status(JobStatus::Completed)).await;
        assert!(job.key_id.is_none());
        assert_eq!(transfer.written_file("/dst/nested/notes.md").unwrap(), b"# notes");
    }
}

// -- Key rotation --

mod keys {
    use super::*;

    #[tokio::test]
    async fn archives_stay_readable_across_rotation() {
        let transfer = Arc::new(ScriptedTransfer::new());
        let content = b"top secret payload ".repeat(10);
        transfer.add_file("/src", "secret.txt", content.clone());
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(&engine, plain_rule("vault", "/src").with_encryption(true)).await;

        let first = engine.trigger_rule(&rule.id).await.unwrap();
        let first = wait_job(&engine, &first.id, status(JobStatus::Completed)).await;
        let old_archive = transfer.written_file("/dst/secret.txt.vlt").unwrap();
        let old_id = first.key_id.clone().unwrap();

        let rotated = engine.rotate_key().await.unwrap();
        assert_ne!(rotated.id, old_id);
        assert_eq!(engine.list_keys().len(), 2);

        let second = engine.trigger_rule(&rule.id).await.unwrap();
        let second = wait_job(&engine, &second.id, status(JobStatus::Completed)).await;
        assert_eq!(second.key_id.as_deref(), Some(rotated.id.as_str()));
        let new_archive = transfer.written_file("/dst/secret.txt.vlt").unwrap();

        let keyring = engine.keyring();
        assert_eq!(decrypt_archive(keyring.decryptor(), &old_archive).unwrap(), content);
        assert_eq!(decrypt_archive(keyring.decryptor(), &new_archive).unwrap(), content);

        let old_key = keyring.find(&old_id).unwrap();
        assert!(decrypt_archive(StreamDecryptor::with_key(old_key), &new_archive).is_err());

        let query = LogQuery::default()
            .with_category(LogCategory::Security)
            .with_search("encryption key rotated");
        assert_eq!(log_count(&engine, &query).await, 1);
    }

    #[tokio::test]
    async fn running_job_keeps_its_key() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_reads());
        transfer.add_files("/src", 2, 32);
        let engine = engine_with(&transfer, test_config());
        let rule = add_rule(&engine, plain_rule("vault", "/src").with_encryption(true)).await;

        let job = engine.trigger_rule(&rule.id).await.unwrap();
        let running = wait_job(&engine, &job.id, |j| j.key_id.is_some()).await;
        let old_id = running.key_id.unwrap();
        engine.rotate_key().await.unwrap();
        transfer.release_reads(10);

        let done = wait_job(&engine, &job.id, status(JobStatus::Completed)).await;
        assert_eq!(done.key_id.as_deref(), Some(old_id.as_str()));
        let old_key = engine.keyring().find(&old_id).unwrap();
        let archive = transfer.written_file("/dst/f000.txt.vlt").unwrap();
        assert!(decrypt_archive(StreamDecryptor::with_key(old_key), &archive).is_ok());
    }
}

// -- Scheduling and recovery --

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn scheduled_rule_fires_once_and_skips_while_busy() {
        let transfer = Arc::new(ScriptedTransfer::new().gated_reads());
        transfer.add_files("/src", 1, 8);
        let engine = engine_with(&transfer, test_config());
        let hourly = BackupRule::new("docs", "/src", "/dst", "hourly")
            .with_encryption(false)
            .with_compression(false);
        let rule = add_rule(&engine, hourly).await;

        engine.tick(Utc::now()).await;
        assert!(engine.list_jobs().is_empty());
        let next = engine.next_fire(&rule.id).unwrap();

        engine.tick(next).await;
        let jobs = engine.list_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].trigger, JobTrigger::Schedule);
        assert_eq!(jobs[0].status, JobStatus::Running);

        engine.tick(next + chrono::Duration::hours(1)).await;
        assert_eq!(engine.list_jobs().len(), 1);
        assert_eq!(
            engine.next_fire(&rule.id),
            Some(next + chrono::Duration::hours(2))
        );

        transfer.release_reads(1);
        wait_job(&engine, &jobs[0].id, status(JobStatus::Completed)).await;
    }

    #[tokio::test]
    async fn restart_marks_interrupted_jobs_and_resumes_queue() {
        let state = Arc::new(MemoryStateStore::new());
        let rule = plain_rule("docs", "/src");
        state.put_rule(&rule).await.unwrap();

        let mut interrupted = Job::new(&rule.id, &rule.name, JobTrigger::Schedule);
        interrupted.start(Utc::now()).unwrap();
        interrupted.files_processed = 1;
        state.put_job(&interrupted).await.unwrap();
        let queued = Job::new(&rule.id, &rule.name, JobTrigger::Manual);
        state.put_job(&queued).await.unwrap();

        let transfer = Arc::new(ScriptedTransfer::new());
        transfer.add_files("/src", 2, 16);
        let engine = JobEngine::builder()
            .transfer(Arc::clone(&transfer) as Arc<dyn vaultline_engine::Transfer>)
            .config(test_config())
            .state(Arc::clone(&state) as Arc<dyn StateStore>)
            .build()
            .unwrap();
        engine.start().await.unwrap();

        let failed = engine.get_job(&interrupted.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(matches!(failed.last_error, Some(JobError::ProcessRestart)));
        wait_job(&engine, &queued.id, status(JobStatus::Completed)).await;

        let stored = state.list_jobs().await.unwrap();
        let persisted = stored.iter().find(|j| j.id == interrupted.id).unwrap();
        assert_eq!(persisted.status, JobStatus::Failed);

        engine.retry_job(&interrupted.id).await.unwrap();
        let retried = wait_job(&engine, &interrupted.id, status(JobStatus::Completed)).await;
        assert_eq!(retried.attempt, 2);

        let query = LogQuery::default().with_search("interrupted by restart");
        assert_eq!(log_count(&engine, &query).await, 1);
        engine.stop().await;
    }
}

// -- Notifications --

mod notifications {
    use super::*;

    #[derive(Default)]
    struct SplitTelegram {
        sent: AtomicUsize,
    }

    impl Notifier for SplitTelegram {
        fn name(&self) -> &str {
            "split"
        }

        fn kind(&self) -> ChannelKind {
            ChannelKind::Telegram
        }

        async fn send(
            &self,
            channel: &NotificationChannel,
            _message: &NotificationMessage,
        ) -> Result<DeliveryReceipt, NotifierError> {
            if channel.config.targets()[0] == "broken" {
                return Err(NotifierError::Connection("connection refused".into()));
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryReceipt { message_id: None })
        }

        async fn health_check(&self, _channel: &NotificationChannel) -> Result<(), NotifierError> {
            Ok(())
        }
    }

    fn telegram(id: &str, chat: &str) -> NotificationChannel {
        NotificationChannel::new(
            id,
            id,
            ChannelConfig::Telegram {
                bot_token: SecretString::new("token".into()),
                chat_id: chat.into(),
            },
        )
    }

    #[tokio::test]
    async fn broken_channel_does_not_block_the_others() {
        let notifier = Arc::new(SplitTelegram::default());
        let mut registry = NotifierRegistry::new();
        registry.register(Arc::clone(&notifier) as Arc<dyn DynNotifier>);

        let transfer = Arc::new(ScriptedTransfer::new());
        transfer.add_files("/src", 1, 8);
        let engine = JobEngine::builder()
            .transfer(Arc::clone(&transfer) as Arc<dyn vaultline_engine::Transfer>)
            .config(test_config())
            .notifiers(registry)
            .channel(telegram("broken", "broken"))
            .channel(telegram("muted", "ops").with_enabled(false))
            .channel(telegram("good", "ops"))
            .build()
            .unwrap();
        let rule = add_rule(&engine, plain_rule("docs", "/src")).await;

        let job = engine.trigger_rule(&rule.id).await.unwrap();
        wait_job(&engine, &job.id, status(JobStatus::Completed)).await;

        let query = LogQuery::default().with_category(LogCategory::Notification);
        let page = wait_log(&engine, &query, 3).await;
        let messages: Vec<&str> = page.entries.iter().map(|e| e.message.as_str()).collect();
        assert!(messages.contains(&"job completed notification delivered via good"));
        assert!(messages.contains(&"job completed notification failed via broken"));
        assert!(messages.contains(&"job completed notification skipped, channel muted is disabled"));
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
        assert_eq!(engine.list_channels().len(), 3);
    }
}
