//! `vaultline.toml`.
//!
//! Every section and field has a default, so an empty or missing file is a
//! valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use vaultline_core::NotificationChannel;
use vaultline_crypto::KeyringConfig;
use vaultline_engine::{EngineConfig, RetryStrategy, SchedulerConfig};
use vaultline_notify::NotificationPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Default, Deserialize)]
pub struct VaultlineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub encryption: EncryptionSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub event_log: EventLogSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl VaultlineConfig {
    /// Load `path`, or the defaults when it does not exist. The flag tells
    /// whether the file was found.
    pub fn load(path: &Path) -> Result<(Self, bool), ConfigError> {
        if !path.exists() {
            return Ok((toml::from_str("")?, false));
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok((toml::from_str(&contents)?, true))
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));
        if self.engine.max_concurrent_jobs == 0 {
            return invalid("engine.max_concurrent_jobs must be at least 1");
        }
        if self.engine.max_attempts == 0 {
            return invalid("engine.max_attempts must be at least 1");
        }
        if self.engine.chunk_size == 0 {
            return invalid("engine.chunk_size must be at least 1");
        }
        if self.scheduler.tick_seconds == 0 {
            return invalid("scheduler.tick_seconds must be at least 1");
        }
        if self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be at least 1.0");
        }
        if self.encryption.rotation_days == 0 {
            return invalid("encryption.rotation_days must be at least 1");
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let engine = &self.engine;
        EngineConfig {
            max_concurrent_jobs: engine.max_concurrent_jobs,
            max_attempts: engine.max_attempts,
            retry_strategy: self.retry.strategy(),
            attempt_timeout: Duration::from_secs(engine.attempt_timeout_seconds),
            cancel_grace: Duration::from_secs(engine.cancel_grace_seconds),
            verify_integrity: engine.verify_integrity,
            ..EngineConfig::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick: Duration::from_secs(self.scheduler.tick_seconds),
        }
    }

    pub fn keyring_config(&self) -> KeyringConfig {
        KeyringConfig {
            rotation_days: self.encryption.rotation_days,
            retention_days: self.encryption.retention_days,
        }
    }
}

/// `[engine]`
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Attempts per job, counting the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout_seconds")]
    pub attempt_timeout_seconds: u64,
    /// How long a cancel or pause waits before the worker is aborted.
    #[serde(default = "default_cancel_grace_seconds")]
    pub cancel_grace_seconds: u64,
    #[serde(default = "default_true")]
    pub verify_integrity: bool,
    /// Read size of the local filesystem adapter, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_attempts: default_max_attempts(),
            attempt_timeout_seconds: default_attempt_timeout_seconds(),
            cancel_grace_seconds: default_cancel_grace_seconds(),
            verify_integrity: true,
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_attempt_timeout_seconds() -> u64 {
    300
}

fn default_cancel_grace_seconds() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_true() -> bool {
    true
}

/// Backoff shape for automatic retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryKind {
    Exponential,
    Linear,
    Constant,
}

/// `[retry]`
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_retry_kind")]
    pub strategy: RetryKind,
    /// First delay for `exponential`, step for `linear`, the delay for `constant`.
    #[serde(default = "default_base_delay_seconds")]
    pub base_delay_seconds: u64,
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            strategy: default_retry_kind(),
            base_delay_seconds: default_base_delay_seconds(),
            max_delay_seconds: default_max_delay_seconds(),
            multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

impl RetrySection {
    pub fn strategy(&self) -> RetryStrategy {
        let base = Duration::from_secs(self.base_delay_seconds);
        let max = Duration::from_secs(self.max_delay_seconds);
        match self.strategy {
            RetryKind::Exponential => RetryStrategy::Exponential {
                base,
                max,
                multiplier: self.multiplier,
                jitter: self.jitter,
            },
            RetryKind::Linear => RetryStrategy::Linear { delay: base, max },
            RetryKind::Constant => RetryStrategy::Constant { delay: base },
        }
    }
}

fn default_retry_kind() -> RetryKind {
    RetryKind::Exponential
}

fn default_base_delay_seconds() -> u64 {
    30
}

fn default_max_delay_seconds() -> u64 {
    30 * 60
}

fn default_multiplier() -> f64 {
    2.0
}

/// `[scheduler]`
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
        }
    }
}

fn default_tick_seconds() -> u64 {
    5
}

/// `[encryption]`
#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionSection {
    #[serde(default = "default_rotation_days")]
    pub rotation_days: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Environment variable holding the master key.
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
}

impl Default for EncryptionSection {
    fn default() -> Self {
        Self {
            rotation_days: default_rotation_days(),
            retention_days: default_retention_days(),
            master_key_env: default_master_key_env(),
        }
    }
}

fn default_rotation_days() -> u32 {
    90
}

fn default_retention_days() -> u32 {
    30
}

fn default_master_key_env() -> String {
    "VAULTLINE_MASTER_KEY".to_owned()
}

/// `[notifications]`
#[derive(Debug, Deserialize)]
pub struct NotificationsSection {
    #[serde(default = "default_true")]
    pub on_success: bool,
    #[serde(default = "default_true")]
    pub on_failure: bool,
    #[serde(default = "default_true")]
    pub on_warning: bool,
    #[serde(default)]
    pub on_start: bool,
    /// Upper bound on one delivery.
    #[serde(default = "default_send_timeout_seconds")]
    pub send_timeout_seconds: u64,
    /// `[[notifications.channels]]` tables, tagged by `kind`.
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            on_success: true,
            on_failure: true,
            on_warning: true,
            on_start: false,
            send_timeout_seconds: default_send_timeout_seconds(),
            channels: Vec::new(),
        }
    }
}

impl NotificationsSection {
    pub fn policy(&self) -> NotificationPolicy {
        NotificationPolicy {
            on_success: self.on_success,
            on_failure: self.on_failure,
            on_warning: self.on_warning,
            on_start: self.on_start,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_seconds)
    }
}

fn default_send_timeout_seconds() -> u64 {
    10
}

/// Where rules, jobs and the event log live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    File,
}

/// `[state]`
#[derive(Debug, Clone, Deserialize)]
pub struct StateSection {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    /// Directory for `rules.json`, `jobs.json` and sealed keys.
    #[serde(default = "default_state_directory")]
    pub directory: PathBuf,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            directory: default_state_directory(),
        }
    }
}

fn default_backend() -> Backend {
    Backend::File
}

fn default_state_directory() -> PathBuf {
    PathBuf::from("vaultline-state")
}

/// `[event_log]`
#[derive(Debug, Clone, Deserialize)]
pub struct EventLogSection {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default = "default_event_log_path")]
    pub path: PathBuf,
}

impl Default for EventLogSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_event_log_path(),
        }
    }
}

fn default_event_log_path() -> PathBuf {
    PathBuf::from("vaultline-state/events.jsonl")
}

/// `[logging]`
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// One JSON object per line instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}
