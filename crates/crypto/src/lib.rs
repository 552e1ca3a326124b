//! AES-256-GCM encryption for backup archives.
//!
//! Archives are encrypted as a stream of authenticated frames (see
//! [`stream`]) so arbitrarily large files never have to fit in memory. Keys
//! are managed by a [`Keyring`] which rotates them on a fixed interval and
//! keeps superseded keys around long enough to restore older archives.
//!
//! Key material lives in [`MasterKey`], which zeroizes itself on drop and
//! never prints its bytes.

pub mod keyring;
pub mod stream;

use std::fmt;

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use keyring::{KeyHandle, KeyInfo, KeySource, KeyVault, Keyring, KeyringConfig, MemoryKeyVault, OsKeySource};
pub use stream::{StreamDecryptor, StreamEncryptor, decrypt_archive, encrypt_archive};

/// The only algorithm vaultline writes.
pub const ALGORITHM: &str = "AES-256-GCM";

/// A 32-byte AES-256 key that is zeroized when dropped.
///
/// The [`Debug`] implementation is redacted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Generate a key from the operating system's RNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut key = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding, for printing a freshly generated key once.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Base64 encoding, as accepted by [`parse_master_key`].
    pub fn to_base64(&self) -> String {
        B64.encode(self.0)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Errors from key management and archive encryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided key is not valid (wrong length or encoding).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The archive bytes are malformed.
    #[error("invalid archive format: {0}")]
    InvalidFormat(String),

    /// Authentication failed: corrupted or tampered data.
    #[error("decryption failed (corrupted or tampered data)")]
    DecryptionFailed,

    /// The archive was written with a different key.
    #[error("archive was encrypted with key {archive} but key {provided} was supplied")]
    KeyMismatch { archive: String, provided: String },

    /// No retained key matches the archive.
    #[error("unknown key id: {0}")]
    UnknownKey(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The archive ended before its final frame.
    #[error("archive is truncated")]
    Truncated,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Persisting a new key failed.
    #[error("key storage failed: {0}")]
    KeyStorage(String),
}

/// Parse a 32-byte key from hex or base64.
///
/// Accepts either 64 hex characters or a base64 string that decodes to exactly
/// 32 bytes.
pub fn parse_master_key(raw: &str) -> Result<MasterKey, CryptoError> {
    let trimmed = raw.trim();
    if trimmed.len() == 64
        && let Ok(bytes) = hex::decode(trimmed)
        && bytes.len() == 32
    {
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        return Ok(MasterKey(key));
    }
    if let Ok(bytes) = B64.decode(trimmed)
        && bytes.len() == 32
    {
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        return Ok(MasterKey(key));
    }
    Err(CryptoError::InvalidKey(
        "must be 32 bytes encoded as 64 hex chars or base64".to_owned(),
    ))
}
