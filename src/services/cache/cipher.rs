//! Symmetric encryption of cache payloads.
//!
//! The caller supplies a secret key and a secret IV as free-form strings (the same pair
//! must be used on read). Key material is derived as:
//! - AES-256 key = sha256(secret_key)
//! - associated data = sha256(secret_iv)
//!
//! A fresh 96-bit nonce is generated per write and stored in front of the ciphertext,
//! so the same pair can safely encrypt many entries. A wrong key *or* a wrong IV makes
//! the GCM tag check fail.
use aes_gcm::{
    AeadCore, Aes256Gcm, KeyInit,
    aead::{Aead, OsRng, Payload, generic_array::GenericArray},
};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Algorithm marker recorded in the envelope.
pub const CIPHER_ALGORITHM: &str = "A256GCM";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext is too short")]
    Truncated,
    #[error("encryption failed")]
    Encrypt,
    // Wrong key/IV or tampered ciphertext. Treated as a security event by the store.
    #[error("decryption failed")]
    Decrypt,
}

/// Secret key/IV pair used to encrypt a cache entry.
///
/// Key material is intentionally not printable via Debug.
#[derive(Clone)]
pub struct CipherKey {
    key: [u8; 32],
    aad: [u8; 32],
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey").finish_non_exhaustive()
    }
}

impl CipherKey {
    /// Returns `None` when either half is empty (no encryption requested).
    pub fn new(secret_key: &str, secret_iv: &str) -> Option<Self> {
        if secret_key.is_empty() || secret_iv.is_empty() {
            return None;
        }
        Some(Self {
            key: Sha256::digest(secret_key.as_bytes()).into(),
            aad: Sha256::digest(secret_iv.as_bytes()).into(),
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &self.aad,
                },
            )
            .map_err(|_| CipherError::Encrypt)?;

        // nonce || ciphertext+tag
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));

        cipher
            .decrypt(
                GenericArray::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &self.aad,
                },
            )
            .map_err(|_| CipherError::Decrypt)
    }
}
