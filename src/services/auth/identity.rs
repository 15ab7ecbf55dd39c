//! Cached per-identity state: the bounded token set plus the identity claims.
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::services::auth::error::{SessionError, SessionErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Drop the oldest tokens to make room.
    #[default]
    EvictOldest,
    /// Refuse new tokens once the set is full.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
    // Absolute expiration reported by the authority; wins over the sliding window.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn new(token: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            created_at: now,
            last_error: None,
            expires_at: None,
        }
    }

    pub fn expires_on(&self, window: Duration) -> DateTime<Utc> {
        self.expires_at.unwrap_or_else(|| {
            let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
            self.created_at
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    pub fn is_expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now >= self.expires_on(window)
    }

    pub fn is_errored(&self) -> bool {
        self.last_error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityState {
    pub identity_id: String,
    pub namespace: String,
    // Insertion order is eviction order.
    pub tokens: IndexMap<String, TokenRecord>,
    pub claims: Value,
}

impl IdentityState {
    pub fn new(namespace: impl Into<String>, identity_id: impl Into<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            namespace: namespace.into(),
            tokens: IndexMap::new(),
            claims: Value::Object(Map::new()),
        }
    }

    pub fn token(&self, token: &str) -> Option<&TokenRecord> {
        self.tokens.get(token)
    }

    pub fn token_mut(&mut self, token: &str) -> Option<&mut TokenRecord> {
        self.tokens.get_mut(token)
    }

    /// Drop expired tokens and return them.
    pub fn sweep_expired(&mut self, window: Duration, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .tokens
            .values()
            .filter(|r| r.is_expired(window, now))
            .map(|r| r.token.clone())
            .collect();
        for token in &expired {
            self.tokens.shift_remove(token);
        }
        expired
    }

    /// Insert or replace a token record, making room per `policy`.
    ///
    /// Replacing keeps the token's position. Returns the evicted tokens.
    pub fn insert_token(
        &mut self,
        record: TokenRecord,
        max_tokens: usize,
        policy: EvictionPolicy,
    ) -> Result<Vec<String>, SessionError> {
        if let Some(existing) = self.tokens.get_mut(&record.token) {
            *existing = record;
            return Ok(Vec::new());
        }

        let max_tokens = max_tokens.max(1);
        let mut evicted = Vec::new();
        while self.tokens.len() >= max_tokens {
            if policy == EvictionPolicy::Reject {
                return Err(SessionError::new(
                    SessionErrorKind::MaxTokensReached,
                    format!(
                        "identity {} already holds {} tokens",
                        self.identity_id,
                        self.tokens.len()
                    ),
                ));
            }
            match self.tokens.shift_remove_index(0) {
                Some((token, _)) => evicted.push(token),
                None => break,
            }
        }

        self.tokens.insert(record.token.clone(), record);
        Ok(evicted)
    }

    pub fn remove_token(&mut self, token: &str) -> Option<TokenRecord> {
        self.tokens.shift_remove(token)
    }
}

/// Merge `key: value` into a claims object (a non-object claims value is replaced).
pub fn merge_claim(claims: &mut Value, key: &str, value: Value) {
    if !claims.is_object() {
        *claims = Value::Object(Map::new());
    }
    if let Value::Object(map) = claims {
        map.insert(key.to_string(), value);
    }
}

// Privileges and licenses follow the authority payload: `User.UserPrivileges` and
// `User.UserLicenses` are arrays of names.

const USER: &str = "User";
const PRIVILEGES: &str = "UserPrivileges";
const LICENSES: &str = "UserLicenses";

fn names<'a>(claims: &'a Value, field: &str) -> impl Iterator<Item = &'a str> {
    claims
        .get(USER)
        .and_then(|u| u.get(field))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

pub fn has_privilege(claims: &Value, privilege: &str) -> bool {
    names(claims, PRIVILEGES).any(|p| p == privilege)
}

pub fn has_any_privilege(claims: &Value, privileges: &[&str]) -> bool {
    names(claims, PRIVILEGES).any(|p| privileges.contains(&p))
}

pub fn has_license(claims: &Value, license: &str) -> bool {
    names(claims, LICENSES).any(|l| l == license)
}

fn privileges_mut(claims: &mut Value) -> Option<&mut Vec<Value>> {
    if !claims.is_object() {
        *claims = Value::Object(Map::new());
    }
    let user = claims
        .as_object_mut()?
        .entry(USER)
        .or_insert_with(|| Value::Object(Map::new()));
    if !user.is_object() {
        *user = Value::Object(Map::new());
    }
    let list = user
        .as_object_mut()?
        .entry(PRIVILEGES)
        .or_insert_with(|| Value::Array(Vec::new()));
    if !list.is_array() {
        *list = Value::Array(Vec::new());
    }
    list.as_array_mut()
}

pub fn set_privilege(claims: &mut Value, privilege: &str) {
    if let Some(list) = privileges_mut(claims)
        && !list.iter().any(|p| p.as_str() == Some(privilege))
    {
        list.push(Value::String(privilege.to_string()));
    }
}

pub fn unset_privilege(claims: &mut Value, privilege: &str) {
    if let Some(list) = claims
        .get_mut(USER)
        .and_then(|u| u.get_mut(PRIVILEGES))
        .and_then(Value::as_array_mut)
    {
        list.retain(|p| p.as_str() != Some(privilege));
    }
}
