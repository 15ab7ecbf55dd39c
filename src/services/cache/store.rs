//! Namespaced cache store with lazy TTL / hash / cipher invalidation.
//!
//! Physical keys look like `{app_prefix}_{backend}_{space}-{key}`, so switching the
//! backend type or the space name never reads data written under another namespace.
//!
//! Nothing expires in the background: every check happens when an entry is read, and
//! an entry that fails a check is deleted on the spot.
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::services::cache::cipher::CipherKey;
use crate::services::cache::client::{CacheBackend, CacheError, CacheResult};
use crate::services::cache::codec::{CodecError, Envelope};
use crate::services::context::RequestContext;

pub const DEFAULT_APP_PREFIX: &str = "CloudFrameWork";

/// Naming of the store's partition inside the backend.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub app_prefix: String,
    pub space: String,
}

impl CacheSettings {
    pub fn new(space: impl Into<String>) -> Self {
        Self {
            app_prefix: DEFAULT_APP_PREFIX.to_string(),
            space: space.into(),
        }
    }

    pub fn with_app_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.app_prefix = prefix.into();
        self
    }
}

/// Constraints checked when reading an entry.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub ttl: Option<Duration>,
    pub hash: Option<String>,
    pub cipher: Option<CipherKey>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Negative values mean "never expire by time".
    #[must_use]
    pub fn ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl = u64::try_from(seconds).ok().map(Duration::from_secs);
        self
    }

    /// Empty hashes are ignored.
    #[must_use]
    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        let hash = hash.into();
        self.hash = (!hash.is_empty()).then_some(hash);
        self
    }

    #[must_use]
    pub fn cipher(mut self, cipher: Option<CipherKey>) -> Self {
        self.cipher = cipher;
        self
    }
}

/// Metadata attached when writing an entry.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub hash: Option<String>,
    pub cipher: Option<CipherKey>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        let hash = hash.into();
        self.hash = (!hash.is_empty()).then_some(hash);
        self
    }

    #[must_use]
    pub fn cipher(mut self, cipher: Option<CipherKey>) -> Self {
        self.cipher = cipher;
        self
    }
}

/// Why a read did not produce a value. Callers usually treat all of them alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    Absent,
    Expired,
    HashMismatch,
    // Wrong cipher key/IV. The entry was deleted and the security flag raised.
    Security,
    Corrupt,
    Disabled,
    Backend,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    Miss(Miss),
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit(v) => Some(v),
            Lookup::Miss(_) => None,
        }
    }

    pub fn miss(&self) -> Option<Miss> {
        match self {
            Lookup::Hit(_) => None,
            Lookup::Miss(m) => Some(*m),
        }
    }
}

/// Opaque stamp of what was stored when an entry was read for update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision(Option<String>);

impl Revision {
    pub fn absent() -> Self {
        Self(None)
    }
}

/// Result of [`CacheStore::fetch_for_update`].
#[derive(Debug)]
pub struct Versioned<T> {
    pub lookup: Lookup<T>,
    pub revision: Revision,
}

#[derive(Debug, Default)]
struct LastRead {
    hash: Option<String>,
    age: Option<Duration>,
}

pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
    ctx: RequestContext,
    security_alert: AtomicBool,
    last_read: Mutex<LastRead>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.kind())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl CacheStore {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        settings: &CacheSettings,
        ctx: RequestContext,
    ) -> Self {
        let prefix = space_prefix(&settings.app_prefix, backend.kind().as_str(), &settings.space);
        Self {
            backend,
            prefix,
            ctx,
            security_alert: AtomicBool::new(false),
            last_read: Mutex::new(LastRead::default()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn physical_key(&self, key: &str) -> String {
        format!("{}-{}", self.prefix, key)
    }

    /// True once any read on this store detected a wrong cipher key/IV.
    pub fn security_alert(&self) -> bool {
        self.security_alert.load(Ordering::Relaxed)
    }

    /// Hash stored with the last entry found by a read.
    pub fn last_hash(&self) -> Option<String> {
        self.last_read.lock().ok().and_then(|l| l.hash.clone())
    }

    /// Age of the last entry found by a read.
    pub fn last_age(&self) -> Option<Duration> {
        self.last_read.lock().ok().and_then(|l| l.age)
    }

    /// Read `key`, reporting why it missed.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str, opts: &ReadOptions) -> Lookup<T> {
        if key.trim().is_empty() {
            return Lookup::Miss(Miss::Absent);
        }
        let physical = self.physical_key(key);

        match self.backend.get_string(&physical).await {
            Ok(raw) => self.evaluate(&physical, raw.as_deref(), opts).await.0,
            Err(CacheError::Disabled) => Lookup::Miss(Miss::Disabled),
            Err(e) => {
                error!(key = %physical, error = %e, "cache read failed");
                Lookup::Miss(Miss::Backend)
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str, opts: &ReadOptions) -> Option<T> {
        self.lookup(key, opts).await.into_option()
    }

    pub async fn get_by_hash<T: DeserializeOwned>(&self, key: &str, hash: &str) -> Option<T> {
        self.get(key, &ReadOptions::new().hash(hash)).await
    }

    pub async fn get_by_expire_time<T: DeserializeOwned>(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Option<T> {
        self.get(key, &ReadOptions::new().ttl(ttl)).await
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        opts: &WriteOptions,
    ) -> CacheResult<()> {
        let physical = self.checked_key(key)?;
        let raw = seal(value, opts)?;

        self.backend
            .set_string(&physical, &raw, &self.ctx.fingerprint)
            .await
            .inspect_err(|e| warn!(key = %physical, error = %e, "cache write failed"))?;

        debug!(key = %physical, hash = ?opts.hash, "cache set");
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let physical = self.checked_key(key)?;
        let n = self.backend.del(&physical).await?;
        debug!(key = %physical, removed = n, "cache delete");
        Ok(n > 0)
    }

    /// Keys of this namespace matching `pattern`, without the namespace prefix.
    ///
    /// An error (including a disabled backend) is distinct from an empty listing.
    pub async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let pattern = if pattern.is_empty() { "*" } else { pattern };
        let scope = format!("{}-", self.prefix);
        let keys = self.backend.keys(&format!("{scope}{pattern}")).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&scope).map(str::to_string))
            .collect())
    }

    /// Read `key` and remember exactly what was stored, for a later
    /// [`CacheStore::set_if_unchanged`].
    ///
    /// Unlike `lookup`, backend failures are returned as errors.
    pub async fn fetch_for_update<T: DeserializeOwned>(
        &self,
        key: &str,
        opts: &ReadOptions,
    ) -> CacheResult<Versioned<T>> {
        let physical = self.checked_key(key)?;
        let raw = match self.backend.get_string(&physical).await {
            Ok(raw) => raw,
            Err(CacheError::Disabled) => {
                return Ok(Versioned {
                    lookup: Lookup::Miss(Miss::Disabled),
                    revision: Revision::absent(),
                });
            }
            Err(e) => return Err(e),
        };

        let (lookup, still_stored) = self.evaluate(&physical, raw.as_deref(), opts).await;
        let revision = if still_stored {
            Revision(raw)
        } else {
            Revision::absent()
        };
        Ok(Versioned { lookup, revision })
    }

    /// Write only when the stored entry is still the one described by `revision`.
    ///
    /// Returns `Ok(false)` when another writer got there first.
    pub async fn set_if_unchanged<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        revision: &Revision,
        opts: &WriteOptions,
    ) -> CacheResult<bool> {
        let physical = self.checked_key(key)?;
        let raw = seal(value, opts)?;

        let replaced = self
            .backend
            .replace_if(
                &physical,
                revision.0.as_deref(),
                &raw,
                &self.ctx.fingerprint,
            )
            .await?;

        if !replaced {
            debug!(key = %physical, "cache compare-and-swap lost the race");
        }
        Ok(replaced)
    }

    /// Deleting an entry that failed a check. Failures only get logged; the read
    /// result is a miss either way.
    async fn invalidate(&self, physical: &str) {
        if let Err(e) = self.backend.del(physical).await {
            warn!(key = %physical, error = %e, "failed to delete invalidated cache entry");
        }
    }

    // Returns the lookup and whether the raw entry is still stored afterwards.
    async fn evaluate<T: DeserializeOwned>(
        &self,
        physical: &str,
        raw: Option<&str>,
        opts: &ReadOptions,
    ) -> (Lookup<T>, bool) {
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            debug!(key = %physical, "cache miss (absent)");
            return (Lookup::Miss(Miss::Absent), false);
        };

        let envelope = match Envelope::from_json(raw) {
            Ok(env) => env,
            Err(e) => {
                warn!(key = %physical, error = %e, "cache entry is not a valid envelope");
                return (Lookup::Miss(Miss::Corrupt), true);
            }
        };

        let now = Utc::now();
        let age = envelope.age(now);
        if let Ok(mut last) = self.last_read.lock() {
            last.hash = envelope.hash.clone();
            last.age = Some(age);
        }

        if let Some(ttl) = opts.ttl
            && age >= ttl
        {
            self.invalidate(physical).await;
            debug!(key = %physical, ?age, ?ttl, "cache miss (expired)");
            return (Lookup::Miss(Miss::Expired), false);
        }

        if let Some(expected) = opts.hash.as_deref()
            && envelope.hash.as_deref() != Some(expected)
        {
            self.invalidate(physical).await;
            debug!(
                key = %physical,
                stored = ?envelope.hash,
                expected,
                "cache miss (hash does not match)"
            );
            return (Lookup::Miss(Miss::HashMismatch), false);
        }

        match envelope.open::<T>(opts.cipher.as_ref()) {
            Ok(value) => {
                debug!(key = %physical, ?age, "cache hit");
                (Lookup::Hit(value), true)
            }
            Err(CodecError::Cipher(e)) => {
                self.security_alert.store(true, Ordering::Relaxed);
                self.invalidate(physical).await;
                error!(key = %physical, error = %e, "cache entry could not be decrypted; entry deleted");
                (Lookup::Miss(Miss::Security), false)
            }
            Err(e) => {
                warn!(key = %physical, error = %e, "cache entry could not be decoded");
                (Lookup::Miss(Miss::Corrupt), true)
            }
        }
    }

    fn checked_key(&self, key: &str) -> CacheResult<String> {
        if key.trim().is_empty() {
            return Err(CacheError::InvalidValue("cache key is empty".into()));
        }
        Ok(self.physical_key(key))
    }
}

fn seal<T: Serialize + ?Sized>(value: &T, opts: &WriteOptions) -> CacheResult<String> {
    Envelope::seal(value, opts.hash.as_deref(), opts.cipher.as_ref(), Utc::now())
        .and_then(|env| env.to_json())
        .map_err(|e| CacheError::InvalidValue(e.to_string()))
}

/// `{app}_{backend}_{space}` with anything but `[A-Za-z0-9_-]` replaced by `_`.
pub fn space_prefix(app_prefix: &str, backend: &str, space: &str) -> String {
    let raw = if space.trim().is_empty() {
        format!("{}_{}", app_prefix.trim(), backend)
    } else {
        format!("{}_{}_{}", app_prefix.trim(), backend, space.trim())
    };
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
