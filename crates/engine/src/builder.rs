use std::sync::Arc;
use std::time::Duration;

use vaultline_core::NotificationChannel;
use vaultline_crypto::{Keyring, KeyringConfig};
use vaultline_eventlog::{EventLog, MemoryEventLog};
use vaultline_notify::{Dispatcher, DispatcherConfig, NotificationPolicy, NotifierRegistry};
use vaultline_state::{MemoryStateStore, StateStore};

use crate::config::{EngineConfig, SchedulerConfig};
use crate::engine::JobEngine;
use crate::error::EngineError;
use crate::transfer::Transfer;

/// Fluent builder for a [`JobEngine`].
///
/// Only a [`Transfer`] adapter is required. Everything else defaults to
/// in-memory components: state and event log, a keyring with a fresh key,
/// and log-only notifiers for every channel kind.
pub struct JobEngineBuilder {
    config: EngineConfig,
    scheduler: SchedulerConfig,
    transfer: Option<Arc<dyn Transfer>>,
    state: Option<Arc<dyn StateStore>>,
    event_log: Option<Arc<dyn EventLog>>,
    keyring: Option<Arc<Keyring>>,
    notifiers: Option<NotifierRegistry>,
    dispatcher: DispatcherConfig,
    channels: Vec<NotificationChannel>,
}

impl JobEngine {
    pub fn builder() -> JobEngineBuilder {
        JobEngineBuilder::new()
    }
}

impl JobEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            scheduler: SchedulerConfig::default(),
            transfer: None,
            state: None,
            event_log: None,
            keyring: None,
            notifiers: None,
            dispatcher: DispatcherConfig::default(),
            channels: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Set the adapter that moves the bytes.
    #[must_use]
    pub fn transfer(mut self, transfer: Arc<dyn Transfer>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    #[must_use]
    pub fn state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    #[must_use]
    pub fn keyring(mut self, keyring: Arc<Keyring>) -> Self {
        self.keyring = Some(keyring);
        self
    }

    /// Replace the default log-only notifiers.
    #[must_use]
    pub fn notifiers(mut self, notifiers: NotifierRegistry) -> Self {
        self.notifiers = Some(notifiers);
        self
    }

    #[must_use]
    pub fn notification_policy(mut self, policy: NotificationPolicy) -> Self {
        self.dispatcher.policy = policy;
        self
    }

    /// Upper bound on a single channel delivery.
    #[must_use]
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher.send_timeout = timeout;
        self
    }

    /// Add a notification channel. Channels are validated by [`build`](Self::build).
    #[must_use]
    pub fn channel(mut self, channel: NotificationChannel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn build(self) -> Result<JobEngine, EngineError> {
        let transfer = self
            .transfer
            .ok_or_else(|| EngineError::Configuration("transfer adapter is required".into()))?;
        if self.config.max_concurrent_jobs == 0 {
            return Err(EngineError::Configuration(
                "max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.config.max_attempts == 0 {
            return Err(EngineError::Configuration("max_attempts must be at least 1".into()));
        }

        let state = self
            .state
            .unwrap_or_else(|| Arc::new(MemoryStateStore::new()));
        let event_log = self
            .event_log
            .unwrap_or_else(|| Arc::new(MemoryEventLog::new()));
        let keyring = match self.keyring {
            Some(keyring) => keyring,
            None => Arc::new(Keyring::in_memory(KeyringConfig::default())?),
        };
        let notifiers = self
            .notifiers
            .unwrap_or_else(NotifierRegistry::with_log_notifiers);

        let dispatcher = Dispatcher::new(self.dispatcher, Arc::new(notifiers), Arc::clone(&event_log));
        for channel in self.channels {
            dispatcher
                .upsert_channel(channel)
                .map_err(EngineError::InvalidChannel)?;
        }

        Ok(JobEngine::from_parts(
            self.config,
            self.scheduler,
            state,
            event_log,
            Arc::new(dispatcher),
            keyring,
            transfer,
        ))
    }
}

impl Default for JobEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use secrecy::SecretString;
    use vaultline_core::ChannelConfig;

    use super::*;
    use crate::transfer::{ByteStream, FileEntry, TransferError, WriteReceipt};

    struct NullTransfer;

    #[async_trait]
    impl Transfer for NullTransfer {
        async fn open(&self, _source: &str) -> Result<Vec<FileEntry>, TransferError> {
            Ok(Vec::new())
        }

        async fn read_file(&self, _source: &str, entry: &FileEntry) -> Result<ByteStream, TransferError> {
            Err(TransferError::NotFound(entry.path.clone()))
        }

        async fn write_file(&self, _destination: &str, _data: ByteStream) -> Result<WriteReceipt, TransferError> {
            Ok(WriteReceipt::default())
        }
    }

    #[test]
    fn build_without_transfer_fails() {
        let err = JobEngineBuilder::new().build().err().unwrap();
        assert!(err.to_string().contains("transfer adapter is required"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = JobEngine::builder()
            .transfer(Arc::new(NullTransfer))
            .config(EngineConfig {
                max_concurrent_jobs: 0,
                ..EngineConfig::default()
            })
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn invalid_channel_is_rejected() {
        let channel = NotificationChannel::new(
            "tg",
            "ops",
            ChannelConfig::Telegram {
                bot_token: SecretString::new(String::new()),
                chat_id: String::new(),
            },
        );
        let err = JobEngine::builder()
            .transfer(Arc::new(NullTransfer))
            .channel(channel)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::InvalidChannel(_)));
    }

    #[tokio::test]
    async fn defaults_build_a_working_engine() {
        let engine = JobEngine::builder()
            .transfer(Arc::new(NullTransfer))
            .build()
            .unwrap();
        assert!(engine.list_rules().is_empty());
        assert_eq!(engine.stats().max_concurrent_jobs, 3);
        assert_eq!(engine.list_keys().len(), 1);
    }
}
