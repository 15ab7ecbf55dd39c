//! Cache entry envelope.
//!
//! A stored entry is a small JSON document:
//!
//! ```json
//! {"written_at":"2026-01-01T00:00:00.000001Z","hash":"abc","cipher":"A256GCM","data":"<base64>"}
//! ```
//!
//! `data` is `base64(encrypt?(zlib(json(value))))`.
use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::services::cache::cipher::{CIPHER_ALGORITHM, CipherError, CipherKey};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("envelope is not valid: {0}")]
    Envelope(serde_json::Error),
    #[error("payload serialization failed: {0}")]
    Serialize(serde_json::Error),
    #[error("payload deserialization failed: {0}")]
    Deserialize(serde_json::Error),
    #[error("payload is not valid base64")]
    Encoding,
    #[error("compression failed: {0}")]
    Compression(std::io::Error),
    #[error("payload is encrypted and no key was given")]
    KeyRequired,
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub written_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    pub data: String,
}

impl Envelope {
    /// Serialize, compress and (optionally) encrypt `value`.
    pub fn seal<T: Serialize + ?Sized>(
        value: &T,
        hash: Option<&str>,
        cipher: Option<&CipherKey>,
        now: DateTime<Utc>,
    ) -> Result<Self, CodecError> {
        let json = serde_json::to_vec(value).map_err(CodecError::Serialize)?;
        let mut bytes = compress(&json)?;

        if let Some(key) = cipher {
            bytes = key.encrypt(&bytes)?;
        }

        Ok(Self {
            written_at: now,
            hash: hash.map(str::to_string),
            cipher: cipher.map(|_| CIPHER_ALGORITHM.to_string()),
            data: STANDARD.encode(bytes),
        })
    }

    /// Reverse of [`Envelope::seal`].
    ///
    /// With a key, a decryption failure and a deserialization failure after decryption
    /// are both reported as `CodecError::Cipher`, since either means the key is wrong.
    /// Without a key an encrypted payload is `CodecError::KeyRequired`.
    pub fn open<T: DeserializeOwned>(&self, cipher: Option<&CipherKey>) -> Result<T, CodecError> {
        let raw = STANDARD
            .decode(self.data.as_bytes())
            .map_err(|_| CodecError::Encoding)?;

        match cipher {
            Some(key) => {
                let plain = key.decrypt(&raw)?;
                decompress(&plain)
                    .ok()
                    .and_then(|json| serde_json::from_slice(&json).ok())
                    .ok_or(CodecError::Cipher(CipherError::Decrypt))
            }
            None if self.cipher.is_some() => Err(CodecError::KeyRequired),
            None => {
                let json = decompress(&raw)?;
                serde_json::from_slice(&json).map_err(CodecError::Deserialize)
            }
        }
    }

    pub fn to_json(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Envelope)
    }

    pub fn from_json(raw: &str) -> Result<Self, CodecError> {
        serde_json::from_str(raw).map_err(CodecError::Envelope)
    }

    /// Time elapsed since the write. Clock skew into the future counts as zero.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.written_at).to_std().unwrap_or_default()
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CodecError::Compression)?;
    encoder.finish().map_err(CodecError::Compression)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CodecError::Compression)?;
    Ok(out)
}
