//! Persistence for rules and jobs.
//!
//! The engine writes through a [`StateStore`] on every rule edit and job
//! transition, and reads everything back once at startup.

pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use error::StateError;
pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use store::StateStore;
