//! Per-file streaming transform: gzip, then encrypt, then checksum.

use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use thiserror::Error;
use vaultline_crypto::{CryptoError, KeyHandle, StreamEncryptor};

/// Suffix appended to compressed destination files.
pub const GZIP_SUFFIX: &str = ".gz";
/// Suffix appended to encrypted destination files.
pub const ENCRYPTED_SUFFIX: &str = ".vlt";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error(transparent)]
    Encryption(#[from] CryptoError),
}

/// Totals for one file once its stream is sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Bytes handed to the destination.
    pub bytes_out: u64,
    /// Hex SHA-256 of those bytes.
    pub sha256: String,
}

/// Transforms one file's plaintext into the bytes written to the destination.
pub struct Pipeline {
    gzip: Option<GzEncoder<Vec<u8>>>,
    encryptor: Option<StreamEncryptor>,
    digest: Sha256,
    bytes_out: u64,
}

impl Pipeline {
    /// `key` enables encryption with that key for the whole file.
    pub fn new(compress: bool, key: Option<&KeyHandle>) -> Result<Self, TransformError> {
        Ok(Self {
            gzip: compress.then(|| GzEncoder::new(Vec::new(), Compression::default())),
            encryptor: key.map(StreamEncryptor::new).transpose()?,
            digest: Sha256::new(),
            bytes_out: 0,
        })
    }

    /// Feed a plaintext chunk. Returns whatever output is ready, possibly
    /// nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Bytes, TransformError> {
        let compressed;
        let stage: &[u8] = match self.gzip.as_mut() {
            Some(gz) => {
                gz.write_all(chunk)?;
                compressed = std::mem::take(gz.get_mut());
                &compressed
            }
            None => chunk,
        };
        let out = match self.encryptor.as_mut() {
            Some(enc) if !stage.is_empty() => enc.update(stage)?,
            Some(_) => Vec::new(),
            None => stage.to_vec(),
        };
        Ok(self.emit(out))
    }

    /// Flush everything. Returns the trailing output and the file totals.
    pub fn finish(mut self) -> Result<(Bytes, Sealed), TransformError> {
        let stage = match self.gzip.take() {
            Some(gz) => gz.finish()?,
            None => Vec::new(),
        };
        let out = match self.encryptor.as_mut() {
            Some(enc) => {
                let mut out = if stage.is_empty() { Vec::new() } else { enc.update(&stage)? };
                out.extend(enc.finish()?);
                out
            }
            None => stage,
        };
        let tail = self.emit(out);
        let sealed = Sealed {
            bytes_out: self.bytes_out,
            sha256: hex::encode(self.digest.finalize()),
        };
        Ok((tail, sealed))
    }

    fn emit(&mut self, out: Vec<u8>) -> Bytes {
        self.digest.update(&out);
        self.bytes_out += out.len() as u64;
        Bytes::from(out)
    }
}

/// Destination file name for `relative` under `destination`.
pub fn destination_path(destination: &str, relative: &str, compress: bool, encrypted: bool) -> String {
    let mut path = format!(
        "{}/{}",
        destination.trim_end_matches('/'),
        relative.trim_start_matches('/')
    );
    if compress {
        path.push_str(GZIP_SUFFIX);
    }
    if encrypted {
        path.push_str(ENCRYPTED_SUFFIX);
    }
    path
}
