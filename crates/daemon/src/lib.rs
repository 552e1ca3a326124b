//! The vaultline daemon.
//!
//! Wires the engine to the local filesystem, file-backed state and event
//! log, and a key vault sealed with the operator's master key. The `vaultline`
//! binary is a thin command-line layer over these pieces.

pub mod config;
pub mod fs_transfer;
pub mod keys;
pub mod telemetry;

pub use config::{ConfigError, VaultlineConfig};
pub use fs_transfer::LocalTransfer;
pub use keys::{FileKeyVault, load_keyring};
