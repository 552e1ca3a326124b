//! The vaultline event log.
//!
//! Every component records what it did here: job transitions, delivery
//! outcomes, key rotations. Entries are append-only and totally ordered by a
//! sequence number assigned at append time.

pub mod error;
pub mod export;
pub mod file;
pub mod memory;
pub mod query;
pub mod store;

pub use error::LogError;
pub use export::{collect_all, export_csv, write_csv};
pub use file::FileEventLog;
pub use memory::MemoryEventLog;
pub use query::{LogPage, LogQuery, MAX_PAGE_SIZE};
pub use store::EventLog;
