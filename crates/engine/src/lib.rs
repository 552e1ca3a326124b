//! The vaultline job engine.
//!
//! [`JobEngine`] owns the rule set, turns rules into jobs on schedule or on
//! demand, admits them against a global concurrency cap with at most one
//! running job per rule, executes them through a [`Transfer`] adapter with
//! compression, encryption and integrity checks in between, retries
//! transient failures, and reports everything to the event log and the
//! notification dispatcher.

mod admin;
pub mod builder;
pub mod config;
mod engine;
pub mod error;
pub mod progress;
pub mod retry;
pub mod rules;
pub mod scheduler;
pub mod transfer;
pub mod transform;
mod worker;

pub use builder::JobEngineBuilder;
pub use config::{EngineConfig, SchedulerConfig};
pub use engine::JobEngine;
pub use error::EngineError;
pub use progress::Throughput;
pub use retry::RetryStrategy;
pub use rules::RuleStore;
pub use scheduler::SchedulerClock;
pub use transfer::{ByteStream, FileEntry, Transfer, TransferError, WriteReceipt};
pub use transform::{ENCRYPTED_SUFFIX, GZIP_SUFFIX, destination_path};
