//! Persistent key storage for the daemon.
//!
//! Each generated data key is appended to `keys.jsonl` in the state
//! directory, sealed with the operator's master key. On startup the newest
//! record becomes the active key and older records are restored as retired
//! keys for as long as their retention window allows.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{info, warn};
use vaultline_crypto::{
    CryptoError, KeyHandle, KeyInfo, KeyVault, Keyring, KeyringConfig, MasterKey, MemoryKeyVault,
    OsKeySource, StreamDecryptor, decrypt_archive, encrypt_archive, parse_master_key,
};
use zeroize::Zeroizing;

pub const KEYS_FILE: &str = "keys.jsonl";

const WRAP_KEY_ID: &str = "master";

#[derive(Debug, Serialize, Deserialize)]
struct SealedKey {
    #[serde(flatten)]
    info: KeyInfo,
    /// Base64 of the key's hex encoding, encrypted under the master key.
    sealed: String,
}

fn wrap_handle(master: MasterKey) -> Arc<KeyHandle> {
    let now = Utc::now();
    Arc::new(KeyHandle::new(WRAP_KEY_ID, master, now, now))
}

/// Appends sealed keys to a JSON-lines file.
pub struct FileKeyVault {
    path: PathBuf,
    wrap: Arc<KeyHandle>,
}

impl FileKeyVault {
    pub fn new(path: impl Into<PathBuf>, master: MasterKey) -> Self {
        Self {
            path: path.into(),
            wrap: wrap_handle(master),
        }
    }

    fn seal(&self, key: &MasterKey) -> Result<String, CryptoError> {
        let plain = Zeroizing::new(key.to_hex());
        let sealed = encrypt_archive(&self.wrap, plain.as_bytes())?;
        Ok(B64.encode(sealed))
    }

    fn unseal(&self, sealed: &str) -> Result<MasterKey, CryptoError> {
        let bytes = B64
            .decode(sealed)
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;
        let plain = Zeroizing::new(decrypt_archive(StreamDecryptor::with_key(Arc::clone(&self.wrap)), &bytes)?);
        let text = std::str::from_utf8(&plain).map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;
        parse_master_key(text)
    }

    async fn load(&self) -> Result<Vec<(KeyInfo, MasterKey)>, CryptoError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CryptoError::KeyStorage(format!("{}: {e}", self.path.display()))),
        };
        let mut keys = Vec::new();
        for (n, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: SealedKey = serde_json::from_str(line)
                .map_err(|e| CryptoError::KeyStorage(format!("{} line {}: {e}", self.path.display(), n + 1)))?;
            let key = self.unseal(&record.sealed)?;
            keys.push((record.info, key));
        }
        Ok(keys)
    }
}

impl KeyVault for FileKeyVault {
    fn persist(&self, info: &KeyInfo, key: &MasterKey) -> Result<(), CryptoError> {
        let record = SealedKey {
            info: info.clone(),
            sealed: self.seal(key)?,
        };
        let mut line = serde_json::to_string(&record).map_err(|e| CryptoError::KeyStorage(e.to_string()))?;
        line.push('\n');

        // Rotation runs on engine tasks; keep the synced write off the
        // async workers where the runtime allows it.
        let write = || append_line(&self.path, line.as_bytes());
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => tokio::task::block_in_place(write),
            _ => write(),
        }
    }
}

fn append_line(path: &Path, line: &[u8]) -> Result<(), CryptoError> {
    let storage = |e: std::io::Error| CryptoError::KeyStorage(format!("{}: {e}", path.display()));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(storage)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(storage)?;
    file.write_all(line).map_err(storage)?;
    file.sync_all().map_err(storage)
}

impl std::fmt::Debug for FileKeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeyVault").field("path", &self.path).finish_non_exhaustive()
    }
}

/// Build the engine's keyring.
///
/// Without a master key the ring lives only in memory and archives written
/// by this process cannot be restored after it exits. With a master key and
/// a state directory, keys are persisted and reloaded across restarts.
pub async fn load_keyring(
    config: KeyringConfig,
    master: Option<MasterKey>,
    state_dir: Option<&Path>,
) -> Result<Keyring, CryptoError> {
    let Some(master) = master else {
        warn!("no master key configured, encryption keys will not survive a restart");
        return Keyring::in_memory(config);
    };
    let Some(dir) = state_dir else {
        return Keyring::generate(config, Arc::new(OsKeySource), Arc::new(MemoryKeyVault::default()));
    };

    let vault = Arc::new(FileKeyVault::new(dir.join(KEYS_FILE), master));
    let mut stored = vault.load().await?;
    let Some((active_info, active_key)) = stored.pop() else {
        info!(path = %vault.path.display(), "no stored keys, generating the first encryption key");
        return Keyring::generate(config, Arc::new(OsKeySource), vault);
    };

    // A key was retired when its successor was created.
    let now = Utc::now();
    let mut retired = Vec::new();
    let mut successor_created = active_info.created_at;
    for (info, key) in stored.into_iter().rev() {
        let retain_until = successor_created + config.retention();
        successor_created = info.created_at;
        if retain_until > now {
            retired.push((KeyHandle::new(info.id, key, info.created_at, info.expires_at), retain_until));
        }
    }
    retired.reverse();

    info!(active = %active_info.id, retained = retired.len(), "encryption keys restored");
    let active = KeyHandle::new(active_info.id, active_key, active_info.created_at, active_info.expires_at);
    Ok(Keyring::restore(config, active, retired, Arc::new(OsKeySource), vault))
}
