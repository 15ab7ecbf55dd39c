/*
 * Responsibility
 * - Issue, validate, refresh and revoke bearer tokens
 * - Keep one bounded, insertion-ordered token set per (namespace, identity) in the cache
 * - Re-validate remote tokens against the identity authority lazily
 * - Every mutation is read whole state -> mutate -> write whole state
 */
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::services::auth::authority::{IdentityAuthority, RemoteIdentity};
use crate::services::auth::error::{SessionError, SessionErrorKind};
use crate::services::auth::identity::{self, EvictionPolicy, IdentityState, TokenRecord};
use crate::services::auth::token::{self, TokenRef};
use crate::services::cache::store::{CacheSettings, CacheStore, Revision};
use crate::services::cache::{
    CacheBackend, CacheError, CipherKey, Lookup, Miss, ReadOptions, WriteOptions,
};
use crate::services::context::RequestContext;

pub const DEFAULT_MAX_TOKENS: usize = 10;
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(3600);

// Compare-and-swap attempts before an update is reported as failed.
const OPTIMISTIC_ATTEMPTS: usize = 5;

/// How the identity state is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Plain overwrite. Concurrent writers of the same identity can lose updates.
    #[default]
    LastWriteWins,
    /// Write only if the state is unchanged since it was read, otherwise re-read and retry.
    Optimistic,
}

impl FromStr for LockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-write-wins" | "last_write_wins" | "lww" | "none" => Ok(Self::LastWriteWins),
            "optimistic" | "cas" => Ok(Self::Optimistic),
            other => Err(format!("unknown lock mode: {other}")),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evict-oldest" | "evict_oldest" | "oldest" | "fifo" => Ok(Self::EvictOldest),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub max_tokens: usize,
    // Sliding window measured from a token's creation or last refresh.
    pub expiration: Duration,
    pub eviction: EvictionPolicy,
    pub lock_mode: LockMode,
    pub cipher: Option<CipherKey>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            expiration: DEFAULT_EXPIRATION,
            eviction: EvictionPolicy::default(),
            lock_mode: LockMode::default(),
            cipher: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Force a remote re-validation (remote tokens) or restart the window (self-issued).
    pub refresh: bool,
    pub integration_key: Option<String>,
}

/// What a caller gets back for an authenticated token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub token: String,
    pub namespace: String,
    pub identity_id: String,
    pub claims: Value,
    pub active_tokens: usize,
    pub max_tokens: usize,
    /// Seconds.
    pub expiration: u64,
    /// Seconds left for this token.
    pub token_expires_in: i64,
}

impl Session {
    pub fn has_privilege(&self, privilege: &str) -> bool {
        identity::has_privilege(&self.claims, privilege)
    }

    pub fn has_any_privilege(&self, privileges: &[&str]) -> bool {
        identity::has_any_privilege(&self.claims, privileges)
    }

    pub fn has_license(&self, license: &str) -> bool {
        identity::has_license(&self.claims, license)
    }

    /// In memory only; see [`TokenSessions::update_cache`].
    pub fn set_privilege(&mut self, privilege: &str) {
        identity::set_privilege(&mut self.claims, privilege);
    }

    /// In memory only; see [`TokenSessions::update_cache`].
    pub fn unset_privilege(&mut self, privilege: &str) {
        identity::unset_privilege(&mut self.claims, privilege);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Presence {
    Absent,
    Active,
    Errored,
    Expired,
}

struct Snapshot {
    state: Option<IdentityState>,
    revision: Revision,
}

pub struct TokenSessions {
    store: CacheStore,
    authority: Option<Arc<dyn IdentityAuthority>>,
    policy: SessionPolicy,
    ctx: RequestContext,
}

impl TokenSessions {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        settings: &CacheSettings,
        authority: Option<Arc<dyn IdentityAuthority>>,
        policy: SessionPolicy,
        ctx: RequestContext,
    ) -> Self {
        let store = CacheStore::new(backend, settings, ctx.clone());
        Self {
            store,
            authority,
            policy,
            ctx,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Issue a self-issued token for `identity` and store `claims` with it.
    pub async fn create_token(
        &self,
        identity: &str,
        namespace: &str,
        claims: Value,
    ) -> Result<Session, SessionError> {
        let token = token::generate(identity, namespace)?;
        let key = token::identity_key(namespace, identity);
        let snapshot = self.load(&key).await?;

        let session = self
            .commit(&key, snapshot, |state, now| {
                let s = state.get_or_insert_with(|| IdentityState::new(namespace, identity));
                self.sweep(s, now);
                let evicted = s.insert_token(
                    TokenRecord::new(&token, now),
                    self.policy.max_tokens,
                    self.policy.eviction,
                )?;
                if !evicted.is_empty() {
                    debug!(key = %key, evicted = evicted.len(), "evicted oldest tokens");
                }
                s.claims = claims.clone();
                Ok(self.view(s, &token, now))
            })
            .await?;

        info!(namespace, identity, active = session.active_tokens, "token created");
        Ok(session)
    }

    /// Sign in against the authority and keep the token it issues.
    pub async fn sign_in(
        &self,
        namespace: &str,
        user: &str,
        password: &str,
        integration_key: Option<&str>,
    ) -> Result<Session, SessionError> {
        let authority = self.authority()?;
        let signed = authority
            .sign_in(namespace, user, password, integration_key, &self.ctx.fingerprint)
            .await?;

        let tref = token::parse(&signed.token).map_err(|e| {
            warn!(namespace, "authority issued a token in an unknown format");
            SessionError::new(
                SessionErrorKind::RemoteAuthority,
                "authority issued a token in an unknown format",
            )
            .with_message(e.to_string())
        })?;

        let key = tref.identity_key();
        let snapshot = self.load(&key).await?;
        let session = self.accept_remote(&key, snapshot, &tref, &signed.identity).await?;

        info!(namespace, user = %tref.identity, "signed in with authority");
        Ok(session)
    }

    /// Check `token` and return its session.
    ///
    /// Active tokens are served from the cache. Remote tokens go to the authority when
    /// they are unknown, or when `refresh` is set. A token in error stays in error until
    /// it is refreshed or cleared.
    pub async fn validate(
        &self,
        token: &str,
        opts: &ValidateOptions,
    ) -> Result<Session, SessionError> {
        let tref = token::parse(token)?;
        let key = tref.identity_key();
        let snapshot = self.load(&key).await?;

        let presence = self.presence(snapshot.state.as_ref(), &tref.raw, Utc::now());
        let remote_needed = tref.is_remote()
            && match presence {
                Presence::Absent => true,
                Presence::Active | Presence::Errored | Presence::Expired => opts.refresh,
            };

        if !remote_needed {
            return self
                .commit(&key, snapshot, |state, now| {
                    Ok(self.settle_local(state, &tref, opts.refresh, now))
                })
                .await?;
        }

        let authority = self.authority()?;
        let checked = authority
            .check(
                &tref.namespace,
                &tref.raw,
                opts.integration_key.as_deref(),
                &self.ctx.fingerprint,
            )
            .await;

        match checked {
            Ok(identity) => self.accept_remote(&key, snapshot, &tref, &identity).await,
            Err(e) => {
                let err = SessionError::from(e);
                warn!(key = %key, error = %err, "remote token validation failed");
                let message = err.to_string();
                // Known tokens are marked; unknown ones are not added.
                self.commit(&key, snapshot, |state, now| {
                    if let Some(s) = state.as_mut() {
                        self.sweep(s, now);
                        if let Some(record) = s.token_mut(&tref.raw) {
                            record.last_error = Some(message.clone());
                        }
                    }
                    Ok(())
                })
                .await?;
                Err(err)
            }
        }
    }

    /// Remove `token`, or with `all` every token (and the claims) of its identity.
    pub async fn revoke(&self, token: &str, all: bool) -> Result<(), SessionError> {
        let tref = token::parse(token)?;
        let key = tref.identity_key();
        let snapshot = self.load(&key).await?;

        let known = snapshot
            .state
            .as_ref()
            .is_some_and(|s| s.token(&tref.raw).is_some());
        if !known {
            return Err(SessionError::not_valid("token is not registered"));
        }

        if all {
            self.store.delete(&key).await?;
            info!(key = %key, "all tokens revoked");
            return Ok(());
        }

        self.commit(&key, snapshot, |state, _| {
            if let Some(s) = state.as_mut() {
                s.remove_token(&tref.raw);
            }
            Ok(())
        })
        .await?;
        info!(key = %key, "token revoked");
        Ok(())
    }

    /// Reset the error of `token` without asking the authority.
    pub async fn clear_token_error(&self, token: &str) -> Result<Session, SessionError> {
        let tref = token::parse(token)?;
        let key = tref.identity_key();
        let snapshot = self.load(&key).await?;

        self.commit(&key, snapshot, |state, now| {
            let s = state
                .as_mut()
                .ok_or_else(|| SessionError::not_valid("token is not registered"))?;
            let record = s
                .token_mut(&tref.raw)
                .ok_or_else(|| SessionError::not_valid("token is not registered"))?;
            record.last_error = None;
            Ok(self.view(s, &tref.raw, now))
        })
        .await
    }

    /// Merge `key: value` into the session claims and persist them while the
    /// identity still holds the session's token. Returns whether anything was stored.
    pub async fn add_identity_data(
        &self,
        session: &mut Session,
        key: &str,
        value: Value,
    ) -> Result<bool, SessionError> {
        identity::merge_claim(&mut session.claims, key, value.clone());

        let cache_key = token::identity_key(&session.namespace, &session.identity_id);
        let snapshot = self.load(&cache_key).await?;
        self.commit(&cache_key, snapshot, |state, _| {
            Ok(match state.as_mut() {
                Some(s) if s.token(&session.token).is_some() => {
                    identity::merge_claim(&mut s.claims, key, value.clone());
                    true
                }
                _ => false,
            })
        })
        .await
    }

    /// Persist in-memory claim changes (privileges etc.) of `session`.
    pub async fn update_cache(&self, session: &Session) -> Result<bool, SessionError> {
        let key = token::identity_key(&session.namespace, &session.identity_id);
        let snapshot = self.load(&key).await?;
        self.commit(&key, snapshot, |state, _| {
            Ok(match state.as_mut() {
                Some(s) if s.token(&session.token).is_some() => {
                    s.claims = session.claims.clone();
                    true
                }
                _ => false,
            })
        })
        .await
    }

    fn authority(&self) -> Result<&Arc<dyn IdentityAuthority>, SessionError> {
        self.authority.as_ref().ok_or_else(|| {
            SessionError::new(
                SessionErrorKind::RemoteAuthority,
                "identity authority is not configured",
            )
        })
    }

    fn read_opts(&self) -> ReadOptions {
        ReadOptions::new().cipher(self.policy.cipher.clone())
    }

    fn write_opts(&self) -> WriteOptions {
        WriteOptions::new().cipher(self.policy.cipher.clone())
    }

    async fn load(&self, key: &str) -> Result<Snapshot, SessionError> {
        let versioned = self
            .store
            .fetch_for_update::<IdentityState>(key, &self.read_opts())
            .await?;

        match versioned.lookup {
            Lookup::Hit(state) => Ok(Snapshot {
                state: Some(state),
                revision: versioned.revision,
            }),
            Lookup::Miss(Miss::Security) => Err(SessionError::new(
                SessionErrorKind::SecurityCipher,
                "cached identity could not be decrypted; it has been removed",
            )),
            Lookup::Miss(_) => Ok(Snapshot {
                state: None,
                revision: versioned.revision,
            }),
        }
    }

    /// Apply `mutate` and write the result back per the lock mode.
    ///
    /// `Err` from `mutate` aborts without writing. An unchanged state is not written.
    async fn commit<R, F>(
        &self,
        key: &str,
        mut snapshot: Snapshot,
        mut mutate: F,
    ) -> Result<R, SessionError>
    where
        F: FnMut(&mut Option<IdentityState>, DateTime<Utc>) -> Result<R, SessionError> + Send,
        R: Send,
    {
        let mut attempt = 1;
        loop {
            let before = snapshot.state.clone();
            let mut state = snapshot.state.take();
            let out = mutate(&mut state, Utc::now())?;

            let Some(state) = state.filter(|s| Some(s) != before.as_ref()) else {
                return Ok(out);
            };

            let written = match self.policy.lock_mode {
                LockMode::LastWriteWins => self
                    .store
                    .set(key, &state, &self.write_opts())
                    .await
                    .map(|()| true),
                LockMode::Optimistic => {
                    self.store
                        .set_if_unchanged(key, &state, &snapshot.revision, &self.write_opts())
                        .await
                }
            };

            match written {
                Ok(true) => return Ok(out),
                // Always-cold cache: the answer stands, nothing is kept.
                Err(CacheError::Disabled) => {
                    debug!(key, "cache disabled, identity state not kept");
                    return Ok(out);
                }
                Err(e) => return Err(e.into()),
                Ok(false) => {}
            }

            if attempt >= OPTIMISTIC_ATTEMPTS {
                return Err(SessionError::new(
                    SessionErrorKind::Backend,
                    format!("identity {key} kept changing; update abandoned"),
                ));
            }
            debug!(key, attempt, "identity changed concurrently, retrying");
            attempt += 1;
            snapshot = self.load(key).await?;
        }
    }

    async fn accept_remote(
        &self,
        key: &str,
        snapshot: Snapshot,
        tref: &TokenRef,
        remote: &RemoteIdentity,
    ) -> Result<Session, SessionError> {
        self.commit(key, snapshot, |state, now| {
            let mut record = state
                .as_ref()
                .and_then(|s| s.token(&tref.raw))
                .cloned()
                .unwrap_or_else(|| TokenRecord::new(&tref.raw, now));
            record.created_at = now;
            record.last_error = None;
            record.expires_at = remote.expires_at;

            // The authority may vouch for a token whose deadline already passed.
            if record.is_expired(self.policy.expiration, now) {
                if let Some(s) = state.as_mut() {
                    self.sweep(s, now);
                    s.remove_token(&tref.raw);
                }
                return Ok(Err(SessionError::expired(&tref.raw)));
            }

            let s = state.get_or_insert_with(|| IdentityState::new(&tref.namespace, &tref.identity));
            self.sweep(s, now);
            s.insert_token(record, self.policy.max_tokens, self.policy.eviction)?;
            s.claims = remote.claims.clone();
            Ok(Ok(self.view(s, &tref.raw, now)))
        })
        .await?
    }

    // Resolve a validation from cached state only. The outer `Result` of `commit`
    // decides whether the state is written; this inner one is the caller's answer.
    fn settle_local(
        &self,
        state: &mut Option<IdentityState>,
        tref: &TokenRef,
        refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let Some(s) = state.as_mut() else {
            return Err(SessionError::not_valid("token is not registered"));
        };

        let was_expired = s
            .token(&tref.raw)
            .is_some_and(|r| r.is_expired(self.policy.expiration, now));
        self.sweep(s, now);
        if was_expired {
            return Err(SessionError::expired(&tref.raw));
        }

        let Some(record) = s.token_mut(&tref.raw) else {
            return Err(SessionError::not_valid("token is not registered"));
        };
        if let Some(last_error) = &record.last_error {
            return Err(SessionError::not_valid("token is in error state")
                .with_message(last_error.clone()));
        }
        if refresh {
            record.created_at = now;
        }

        debug!(key = %tref.identity_key(), "token served from cache");
        Ok(self.view(s, &tref.raw, now))
    }

    fn presence(&self, state: Option<&IdentityState>, token: &str, now: DateTime<Utc>) -> Presence {
        match state.and_then(|s| s.token(token)) {
            None => Presence::Absent,
            Some(r) if r.is_expired(self.policy.expiration, now) => Presence::Expired,
            Some(r) if r.is_errored() => Presence::Errored,
            Some(_) => Presence::Active,
        }
    }

    fn sweep(&self, state: &mut IdentityState, now: DateTime<Utc>) {
        let swept = state.sweep_expired(self.policy.expiration, now);
        if !swept.is_empty() {
            debug!(identity = %state.identity_id, swept = swept.len(), "expired tokens removed");
        }
    }

    fn view(&self, state: &IdentityState, token: &str, now: DateTime<Utc>) -> Session {
        let token_expires_in = state
            .token(token)
            .map(|r| (r.expires_on(self.policy.expiration) - now).num_seconds())
            .unwrap_or_default();

        Session {
            token: token.to_string(),
            namespace: state.namespace.clone(),
            identity_id: state.identity_id.clone(),
            claims: state.claims.clone(),
            active_tokens: state.tokens.len(),
            max_tokens: self.policy.max_tokens,
            expiration: self.policy.expiration.as_secs(),
            token_expires_in,
        }
    }
}
