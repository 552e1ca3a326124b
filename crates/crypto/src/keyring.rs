//! Active and retired encryption keys.
//!
//! Exactly one key is active at a time. Rotation generates and persists the
//! replacement before swapping it in, so a failed rotation leaves the current
//! key untouched. The superseded key is retained for restores until its
//! retention window closes, then [`Keyring::prune`] drops it.
//!
//! Jobs take an `Arc<KeyHandle>` when they start and keep using it even if the
//! ring rotates underneath them.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::stream::StreamDecryptor;
use crate::{ALGORITHM, CryptoError, MasterKey};

/// Rotation and retention settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringConfig {
    /// Days a key stays active before it is due for rotation.
    pub rotation_days: u32,
    /// Days a superseded key is kept for decrypting older archives.
    pub retention_days: u32,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            rotation_days: 90,
            retention_days: 30,
        }
    }
}

impl KeyringConfig {
    pub fn rotation(&self) -> Duration {
        Duration::days(i64::from(self.rotation_days))
    }

    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }
}

/// Public metadata about a key. Never contains key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub id: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    /// When the key is due for rotation.
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    /// For retired keys, when they will be pruned.
    pub retain_until: Option<DateTime<Utc>>,
}

/// A key plus its identity.
pub struct KeyHandle {
    id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    key: MasterKey,
}

impl KeyHandle {
    pub fn new(id: impl Into<String>, key: MasterKey, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            expires_at,
            key,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub(crate) fn key(&self) -> &MasterKey {
        &self.key
    }

    fn info(&self, active: bool, retain_until: Option<DateTime<Utc>>) -> KeyInfo {
        KeyInfo {
            id: self.id.clone(),
            algorithm: ALGORITHM.to_owned(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            active,
            retain_until,
        }
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Produces new key material.
pub trait KeySource: Send + Sync {
    fn generate(&self) -> Result<MasterKey, CryptoError>;
}

/// Generates keys from the operating system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeySource;

impl KeySource for OsKeySource {
    fn generate(&self) -> Result<MasterKey, CryptoError> {
        MasterKey::generate()
    }
}

/// Durable storage for keys. A rotation only takes effect after the new key
/// has been persisted.
pub trait KeyVault: Send + Sync {
    fn persist(&self, info: &KeyInfo, key: &MasterKey) -> Result<(), CryptoError>;
}

/// A vault that only remembers which key ids it has seen.
#[derive(Debug, Default)]
pub struct MemoryKeyVault {
    stored: Mutex<Vec<String>>,
}

impl MemoryKeyVault {
    pub fn stored_ids(&self) -> Vec<String> {
        self.stored.lock().clone()
    }
}

impl KeyVault for MemoryKeyVault {
    fn persist(&self, info: &KeyInfo, _key: &MasterKey) -> Result<(), CryptoError> {
        self.stored.lock().push(info.id.clone());
        Ok(())
    }
}

struct Retired {
    handle: Arc<KeyHandle>,
    retain_until: DateTime<Utc>,
}

struct RingState {
    active: Arc<KeyHandle>,
    retired: Vec<Retired>,
}

/// The set of keys the engine encrypts and decrypts with.
pub struct Keyring {
    config: KeyringConfig,
    source: Arc<dyn KeySource>,
    vault: Arc<dyn KeyVault>,
    state: RwLock<RingState>,
    /// Serializes rotations; readers never take it.
    rotation: Mutex<()>,
}

impl Keyring {
    /// A ring with a freshly generated active key.
    pub fn generate(
        config: KeyringConfig,
        source: Arc<dyn KeySource>,
        vault: Arc<dyn KeyVault>,
    ) -> Result<Self, CryptoError> {
        let key = source.generate()?;
        Self::with_key(config, key, source, vault)
    }

    /// A ring whose active key is `key`.
    pub fn with_key(
        config: KeyringConfig,
        key: MasterKey,
        source: Arc<dyn KeySource>,
        vault: Arc<dyn KeyVault>,
    ) -> Result<Self, CryptoError> {
        let now = Utc::now();
        let handle = KeyHandle::new(new_key_id(), key, now, now + config.rotation());
        vault.persist(&handle.info(true, None), handle.key())?;
        Ok(Self {
            config,
            source,
            vault,
            state: RwLock::new(RingState {
                active: Arc::new(handle),
                retired: Vec::new(),
            }),
            rotation: Mutex::new(()),
        })
    }

    /// A ring using OS randomness and an in-memory vault.
    pub fn in_memory(config: KeyringConfig) -> Result<Self, CryptoError> {
        Self::generate(config, Arc::new(OsKeySource), Arc::new(MemoryKeyVault::default()))
    }

    /// A ring rebuilt from keys persisted by an earlier process.
    ///
    /// `retired` pairs each retained key with the end of its retention
    /// window. Nothing is written to the vault.
    pub fn restore(
        config: KeyringConfig,
        active: KeyHandle,
        retired: Vec<(KeyHandle, DateTime<Utc>)>,
        source: Arc<dyn KeySource>,
        vault: Arc<dyn KeyVault>,
    ) -> Self {
        let retired = retired
            .into_iter()
            .map(|(handle, retain_until)| Retired {
                handle: Arc::new(handle),
                retain_until,
            })
            .collect();
        Self {
            config,
            source,
            vault,
            state: RwLock::new(RingState {
                active: Arc::new(active),
                retired,
            }),
            rotation: Mutex::new(()),
        }
    }

    pub fn config(&self) -> KeyringConfig {
        self.config
    }

    /// The key new work should encrypt with.
    pub fn active(&self) -> Arc<KeyHandle> {
        Arc::clone(&self.state.read().active)
    }

    /// Look up the active key or a retained one by id.
    pub fn find(&self, id: &str) -> Option<Arc<KeyHandle>> {
        let state = self.state.read();
        if state.active.id() == id {
            return Some(Arc::clone(&state.active));
        }
        state
            .retired
            .iter()
            .find(|r| r.handle.id() == id)
            .map(|r| Arc::clone(&r.handle))
    }

    /// Whether the active key has reached its rotation date.
    pub fn rotation_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.state.read().active.expires_at()
    }

    /// Replace the active key.
    ///
    /// Returns metadata for the new key. On error the previous key stays
    /// active.
    pub fn rotate(&self, now: DateTime<Utc>) -> Result<KeyInfo, CryptoError> {
        let _guard = self.rotation.lock();
        self.rotate_locked(now)
    }

    /// Rotate when due. Returns the new key's metadata if a rotation happened.
    pub fn rotate_if_due(&self, now: DateTime<Utc>) -> Result<Option<KeyInfo>, CryptoError> {
        let _guard = self.rotation.lock();
        if !self.rotation_due(now) {
            return Ok(None);
        }
        self.rotate_locked(now).map(Some)
    }

    fn rotate_locked(&self, now: DateTime<Utc>) -> Result<KeyInfo, CryptoError> {
        let key = self.source.generate()?;
        let handle = KeyHandle::new(new_key_id(), key, now, now + self.config.rotation());
        let info = handle.info(true, None);
        self.vault.persist(&info, handle.key())?;

        let mut state = self.state.write();
        let previous = std::mem::replace(&mut state.active, Arc::new(handle));
        info!(new_key = %info.id, retired_key = %previous.id(), "encryption key rotated");
        state.retired.push(Retired {
            handle: previous,
            retain_until: now + self.config.retention(),
        });
        Ok(info)
    }

    /// Drop retired keys whose retention window has closed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write();
        let before = state.retired.len();
        state.retired.retain(|r| r.retain_until > now);
        let removed = before - state.retired.len();
        if removed > 0 {
            info!(removed, "pruned retired encryption keys");
        }
        removed
    }

    /// Metadata for the active key followed by retained keys, newest first.
    pub fn keys(&self) -> Vec<KeyInfo> {
        let state = self.state.read();
        let mut keys = vec![state.active.info(true, None)];
        keys.extend(
            state
                .retired
                .iter()
                .rev()
                .map(|r| r.handle.info(false, Some(r.retain_until))),
        );
        keys
    }

    /// A decryptor that picks whichever retained key the archive names.
    pub fn decryptor(&self) -> StreamDecryptor {
        let state = self.state.read();
        let mut handles = vec![Arc::clone(&state.active)];
        handles.extend(state.retired.iter().map(|r| Arc::clone(&r.handle)));
        StreamDecryptor::any_of(handles)
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyring")
            .field("config", &self.config)
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

fn new_key_id() -> String {
    format!("k-{}", uuid::Uuid::now_v7().simple())
}
