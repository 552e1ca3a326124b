//! Framed AES-256-GCM archive format.
//!
//! ```text
//! header: "VLTA" | version u8 | kid_len u8 | kid
//! frame:  flag u8 | len u32 BE | nonce [12] | ciphertext+tag [len]
//! ```
//!
//! `flag` is 0 for data frames and 1 for the closing frame, which carries no
//! plaintext. Every frame is authenticated with `kid || index u64 BE || flag`
//! as associated data, so frames cannot be reordered, dropped, or moved
//! between archives, and an archive without its closing frame is rejected as
//! truncated.

use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::CryptoError;
use crate::keyring::KeyHandle;

const MAGIC: &[u8; 4] = b"VLTA";
const VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const FRAME_HEADER_LEN: usize = 1 + 4 + NONCE_LEN;

/// Largest plaintext placed in one frame.
pub const MAX_FRAME_PLAINTEXT: usize = 1024 * 1024;

const FLAG_DATA: u8 = 0;
const FLAG_FINAL: u8 = 1;

fn aad(kid: &str, index: u64, flag: u8) -> Vec<u8> {
    let mut aad = Vec::with_capacity(kid.len() + 9);
    aad.extend_from_slice(kid.as_bytes());
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(flag);
    aad
}

fn cipher_for(handle: &KeyHandle) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(handle.key().as_bytes())
        .map_err(|e| CryptoError::InvalidKey(format!("invalid AES key: {e}")))
}

/// Encrypts a byte stream chunk by chunk.
pub struct StreamEncryptor {
    cipher: Aes256Gcm,
    kid: String,
    index: u64,
    header_written: bool,
    finished: bool,
}

impl StreamEncryptor {
    pub fn new(handle: &KeyHandle) -> Result<Self, CryptoError> {
        let kid = handle.id().to_owned();
        if kid.len() > usize::from(u8::MAX) {
            return Err(CryptoError::InvalidKey("key id longer than 255 bytes".to_owned()));
        }
        Ok(Self {
            cipher: cipher_for(handle)?,
            kid,
            index: 0,
            header_written: false,
            finished: false,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.kid
    }

    /// Encrypt the next piece of plaintext. The first call also emits the
    /// archive header.
    pub fn update(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.finished {
            return Err(CryptoError::EncryptionFailed("stream already finished".to_owned()));
        }
        let mut out = Vec::with_capacity(plaintext.len() + FRAME_HEADER_LEN + TAG_LEN + 32);
        self.write_header(&mut out);
        for piece in plaintext.chunks(MAX_FRAME_PLAINTEXT) {
            self.write_frame(&mut out, FLAG_DATA, piece)?;
        }
        Ok(out)
    }

    /// Emit the closing frame. Further updates are rejected.
    pub fn finish(&mut self) -> Result<Vec<u8>, CryptoError> {
        if self.finished {
            return Err(CryptoError::EncryptionFailed("stream already finished".to_owned()));
        }
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + TAG_LEN + 32);
        self.write_header(&mut out);
        self.write_frame(&mut out, FLAG_FINAL, &[])?;
        self.finished = true;
        Ok(out)
    }

    fn write_header(&mut self, out: &mut Vec<u8>) {
        if self.header_written {
            return;
        }
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        #[allow(clippy::cast_possible_truncation)]
        out.push(self.kid.len() as u8);
        out.extend_from_slice(self.kid.as_bytes());
        self.header_written = true;
    }

    fn write_frame(&mut self, out: &mut Vec<u8>, flag: u8, plaintext: &[u8]) -> Result<(), CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = aad(&self.kid, self.index, flag);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad: &aad })
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let len = u32::try_from(ciphertext.len())
            .map_err(|_| CryptoError::EncryptionFailed("frame too large".to_owned()))?;

        out.push(flag);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        self.index += 1;
        Ok(())
    }
}

enum KeySelection {
    /// Only this key may be used.
    Exact(Arc<KeyHandle>),
    /// Use whichever key the header names.
    AnyOf(Vec<Arc<KeyHandle>>),
}

/// Decrypts an archive fed in arbitrary slices.
pub struct StreamDecryptor {
    keys: KeySelection,
    buf: Vec<u8>,
    active: Option<(Aes256Gcm, String)>,
    index: u64,
    finished: bool,
}

impl StreamDecryptor {
    /// Decrypt with `handle` only. An archive naming another key fails with
    /// [`CryptoError::KeyMismatch`].
    pub fn with_key(handle: Arc<KeyHandle>) -> Self {
        Self::from_selection(KeySelection::Exact(handle))
    }

    /// Decrypt with whichever of `handles` the archive names.
    pub fn any_of(handles: Vec<Arc<KeyHandle>>) -> Self {
        Self::from_selection(KeySelection::AnyOf(handles))
    }

    fn from_selection(keys: KeySelection) -> Self {
        Self {
            keys,
            buf: Vec::new(),
            active: None,
            index: 0,
            finished: false,
        }
    }

    /// Key id from the archive header, once it has been read.
    pub fn key_id(&self) -> Option<&str> {
        self.active.as_ref().map(|(_, kid)| kid.as_str())
    }

    /// Feed more archive bytes. Returns whatever plaintext became available.
    pub fn update(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();
        let mut consumed = 0;

        if self.active.is_none() {
            match self.parse_header()? {
                Some(n) => consumed = n,
                None => return Ok(out),
            }
        }

        loop {
            let rest = &self.buf[consumed..];
            if rest.is_empty() {
                break;
            }
            if self.finished {
                return Err(CryptoError::InvalidFormat("data after final frame".to_owned()));
            }
            if rest.len() < FRAME_HEADER_LEN {
                break;
            }
            let flag = rest[0];
            let len = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
            if len < TAG_LEN || len > MAX_FRAME_PLAINTEXT + TAG_LEN {
                return Err(CryptoError::InvalidFormat(format!("frame length {len} out of range")));
            }
            if flag != FLAG_DATA && flag != FLAG_FINAL {
                return Err(CryptoError::InvalidFormat(format!("unknown frame flag {flag}")));
            }
            if rest.len() < FRAME_HEADER_LEN + len {
                break;
            }
            let nonce = Nonce::from_slice(&rest[5..FRAME_HEADER_LEN]);
            let ciphertext = &rest[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len];

            let (cipher, kid) = self
                .active
                .as_ref()
                .ok_or_else(|| CryptoError::InvalidFormat("missing header".to_owned()))?;
            let aad = aad(kid, self.index, flag);
            let plaintext = cipher
                .decrypt(nonce, Payload { msg: ciphertext, aad: &aad })
                .map_err(|_| CryptoError::DecryptionFailed)?;

            out.extend_from_slice(&plaintext);
            self.index += 1;
            consumed += FRAME_HEADER_LEN + len;
            if flag == FLAG_FINAL {
                if !plaintext.is_empty() {
                    return Err(CryptoError::InvalidFormat("final frame carries data".to_owned()));
                }
                self.finished = true;
            }
        }

        self.buf.drain(..consumed);
        Ok(out)
    }

    /// Confirm the archive was complete.
    pub fn finish(self) -> Result<(), CryptoError> {
        if !self.finished {
            return Err(CryptoError::Truncated);
        }
        if !self.buf.is_empty() {
            return Err(CryptoError::InvalidFormat("data after final frame".to_owned()));
        }
        Ok(())
    }

    /// Returns the number of header bytes consumed, or `None` if more input
    /// is needed.
    fn parse_header(&mut self) -> Result<Option<usize>, CryptoError> {
        let check = MAGIC.len().min(self.buf.len());
        if self.buf[..check] != MAGIC[..check] {
            return Err(CryptoError::InvalidFormat("not a vaultline archive".to_owned()));
        }
        if self.buf.len() < MAGIC.len() + 2 {
            return Ok(None);
        }
        let version = self.buf[4];
        if version != VERSION {
            return Err(CryptoError::InvalidFormat(format!("unsupported version {version}")));
        }
        let kid_len = usize::from(self.buf[5]);
        let header_len = MAGIC.len() + 2 + kid_len;
        if self.buf.len() < header_len {
            return Ok(None);
        }
        let kid = std::str::from_utf8(&self.buf[6..header_len])
            .map_err(|_| CryptoError::InvalidFormat("key id is not UTF-8".to_owned()))?
            .to_owned();

        let handle = match &self.keys {
            KeySelection::Exact(handle) => {
                if handle.id() != kid {
                    return Err(CryptoError::KeyMismatch {
                        archive: kid,
                        provided: handle.id().to_owned(),
                    });
                }
                Arc::clone(handle)
            }
            KeySelection::AnyOf(handles) => handles
                .iter()
                .find(|h| h.id() == kid)
                .cloned()
                .ok_or_else(|| CryptoError::UnknownKey(kid.clone()))?,
        };
        self.active = Some((cipher_for(&handle)?, kid));
        Ok(Some(header_len))
    }
}

/// Encrypt a whole buffer into an archive.
pub fn encrypt_archive(handle: &KeyHandle, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut enc = StreamEncryptor::new(handle)?;
    let mut out = enc.update(plaintext)?;
    out.extend(enc.finish()?);
    Ok(out)
}

/// Decrypt a whole archive with `decryptor`.
pub fn decrypt_archive(mut decryptor: StreamDecryptor, archive: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let out = decryptor.update(archive)?;
    decryptor.finish()?;
    Ok(out)
}
