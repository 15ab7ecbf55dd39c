//! Backend interface used by the cache store (identity sessions, config caches, etc.).
use async_trait::async_trait;
use thiserror::Error;

use crate::services::cache::factory::BackendKind;
use crate::services::context::RequestFingerprint;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-layer errors (transport/command/serialization).
///
/// Note:
/// - We keep this independent from `AppError` and `SessionError` so callers can decide how
///   to fail (a disabled cache is always-cold for reads, but a failed write is surfaced).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    BackendConnection(String),
    #[error("cache command error: {0}")]
    BackendCommand(String),
    #[error("cache value error: {0}")]
    InvalidValue(String),
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache backend is disabled")]
    Disabled,
}

/// A minimal, string-based backend interface.
///
/// Backends only move opaque envelopes around; TTL, hash and cipher checks live in
/// `CacheStore`. Keys handed to a backend are already fully namespaced.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    // Which registry entry built this backend (used in the physical key prefix).
    fn kind(&self) -> BackendKind;

    // Get the raw envelope stored under `key`.
    async fn get_string(&self, key: &str) -> CacheResult<Option<String>>;

    // Unconditionally write `value` under `key`.
    //
    // `origin` is the fingerprint of the request performing the write. Only the
    // document store persists it.
    async fn set_string(
        &self,
        key: &str,
        value: &str,
        origin: &RequestFingerprint,
    ) -> CacheResult<()>;

    // Write `value` only if the current value equals `expected`
    // (`None` means "the key must not exist").
    //
    // Returns:
    // - `Ok(true)`  if the value was replaced
    // - `Ok(false)` if somebody else wrote in between
    async fn replace_if(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        origin: &RequestFingerprint,
    ) -> CacheResult<bool>;

    // Delete a key. Returns number of deleted keys.
    async fn del(&self, key: &str) -> CacheResult<u64>;

    // List physical keys matching a glob pattern (`*` and `?`).
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;
}

/// Translate a glob (`*`, `?`) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<regex::Regex, CacheError> {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    regex::Regex::new(&out).map_err(|e| CacheError::InvalidValue(e.to_string()))
}
