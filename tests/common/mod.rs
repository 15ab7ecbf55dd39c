#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cached_auth::services::auth::{
    AuthorityError, IdentityAuthority, RemoteIdentity, SessionPolicy, SignedIn, TokenSessions,
};
use cached_auth::services::cache::{
    BackendKind, CacheBackend, CacheResult, CacheSettings, MemoryBackend,
};
use cached_auth::services::context::{RequestContext, RequestFingerprint};
use serde_json::json;
use tokio::sync::Barrier;

/// In-process identity authority with call counters.
///
/// Accepts every well-formed remote token unless switched to failing. With a barrier,
/// each check waits until `n` checks are in flight.
pub struct ScriptedAuthority {
    checks: AtomicUsize,
    sign_ins: AtomicUsize,
    failing: AtomicBool,
    expires_at: Mutex<Option<DateTime<Utc>>>,
    barrier: Option<Barrier>,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        Self {
            checks: AtomicUsize::new(0),
            sign_ins: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            expires_at: Mutex::new(None),
            barrier: None,
        }
    }

    pub fn with_barrier(n: usize) -> Self {
        Self {
            barrier: Some(Barrier::new(n)),
            ..Self::new()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Absolute deadline reported with every accepted token.
    pub fn set_expires_at(&self, expires_at: Option<DateTime<Utc>>) {
        *self.expires_at.lock().unwrap() = expires_at;
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn sign_ins(&self) -> usize {
        self.sign_ins.load(Ordering::SeqCst)
    }

    fn identity(&self, user: &str) -> RemoteIdentity {
        RemoteIdentity {
            key_name: user.to_string(),
            expires_at: *self.expires_at.lock().unwrap(),
            claims: json!({
                "User": {
                    "KeyName": user,
                    "UserPrivileges": ["read"],
                    "UserLicenses": ["erp"],
                }
            }),
        }
    }
}

#[async_trait]
impl IdentityAuthority for ScriptedAuthority {
    async fn check(
        &self,
        _namespace: &str,
        token: &str,
        _integration_key: Option<&str>,
        _fingerprint: &RequestFingerprint,
    ) -> Result<RemoteIdentity, AuthorityError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthorityError::Status {
                status: 401,
                body: "token rejected".into(),
            });
        }
        let user = token.split("__").nth(1).unwrap_or_default();
        Ok(self.identity(user))
    }

    async fn sign_in(
        &self,
        namespace: &str,
        user: &str,
        password: &str,
        _integration_key: Option<&str>,
        _fingerprint: &RequestFingerprint,
    ) -> Result<SignedIn, AuthorityError> {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);
        if password != "secret" {
            return Err(AuthorityError::Status {
                status: 401,
                body: "wrong password".into(),
            });
        }
        Ok(SignedIn {
            token: format!("{namespace}__{user}__{}", uuid::Uuid::new_v4().simple()),
            identity: self.identity(user),
        })
    }
}

/// Memory backend that counts every call.
#[derive(Default)]
pub struct CountingBackend {
    inner: MemoryBackend,
    calls: AtomicUsize,
}

impl CountingBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheBackend for CountingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        self.hit();
        self.inner.get_string(key).await
    }

    async fn set_string(
        &self,
        key: &str,
        value: &str,
        origin: &RequestFingerprint,
    ) -> CacheResult<()> {
        self.hit();
        self.inner.set_string(key, value, origin).await
    }

    async fn replace_if(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        origin: &RequestFingerprint,
    ) -> CacheResult<bool> {
        self.hit();
        self.inner.replace_if(key, expected, value, origin).await
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        self.hit();
        self.inner.del(key).await
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.hit();
        self.inner.keys(pattern).await
    }
}

/// Memory backend on which every compare-and-swap loses.
#[derive(Default)]
pub struct ContendedBackend {
    inner: MemoryBackend,
    swaps: AtomicUsize,
}

impl ContendedBackend {
    pub fn swaps(&self) -> usize {
        self.swaps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheBackend for ContendedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        self.inner.get_string(key).await
    }

    async fn set_string(
        &self,
        key: &str,
        value: &str,
        origin: &RequestFingerprint,
    ) -> CacheResult<()> {
        self.inner.set_string(key, value, origin).await
    }

    async fn replace_if(
        &self,
        _key: &str,
        _expected: Option<&str>,
        _value: &str,
        _origin: &RequestFingerprint,
    ) -> CacheResult<bool> {
        self.swaps.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        self.inner.del(key).await
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.inner.keys(pattern).await
    }
}

pub fn sessions(
    backend: Arc<dyn CacheBackend>,
    authority: Option<Arc<ScriptedAuthority>>,
    policy: SessionPolicy,
) -> TokenSessions {
    TokenSessions::new(
        backend,
        &CacheSettings::new("sessions").with_app_prefix("test"),
        authority.map(|a| a as Arc<dyn IdentityAuthority>),
        policy,
        RequestContext::local(),
    )
}

pub fn policy(max_tokens: usize) -> SessionPolicy {
    SessionPolicy {
        max_tokens,
        ..SessionPolicy::default()
    }
}
