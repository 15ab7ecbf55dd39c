//! Client side of the remote identity authority.
//!
//! `POST {base}/{namespace}/check` validates a token, `POST {base}/{namespace}/in`
//! signs a user in. Both answer `{ "data": { "User": { "KeyName": .. }, .. } }`.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::services::context::RequestFingerprint;

pub const HEADER_WEB_KEY: &str = "X-WEB-KEY";
pub const HEADER_DS_TOKEN: &str = "X-DS-TOKEN";
pub const HEADER_EXTRA_INFO: &str = "X-EXTRA-INFO";

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority url error: {0}")]
    Url(String),
    #[error("authority request failed: {0}")]
    Transport(String),
    #[error("authority rejected the request with status {status}")]
    Status { status: u16, body: String },
    #[error("authority response is invalid: {0}")]
    InvalidResponse(String),
}

impl AuthorityError {
    /// The authority answered but refused the credentials.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Status { status, .. } if (400..500).contains(status))
            || matches!(self, Self::InvalidResponse(_))
    }
}

/// Identity data returned by the authority.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteIdentity {
    pub key_name: String,
    pub expires_at: Option<DateTime<Utc>>,
    // The whole `data` object.
    pub claims: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedIn {
    pub token: String,
    pub identity: RemoteIdentity,
}

#[async_trait]
pub trait IdentityAuthority: Send + Sync + 'static {
    async fn check(
        &self,
        namespace: &str,
        token: &str,
        integration_key: Option<&str>,
        fingerprint: &RequestFingerprint,
    ) -> Result<RemoteIdentity, AuthorityError>;

    async fn sign_in(
        &self,
        namespace: &str,
        user: &str,
        password: &str,
        integration_key: Option<&str>,
        fingerprint: &RequestFingerprint,
    ) -> Result<SignedIn, AuthorityError>;
}

#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub base_url: Url,
    pub web_key: Option<String>,
    pub timeout: Duration,
}

impl AuthorityConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            web_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpIdentityAuthority {
    http: reqwest::Client,
    config: AuthorityConfig,
}

#[derive(Serialize)]
struct SignInBody<'a> {
    user: &'a str,
    password: &'a str,
    #[serde(flatten)]
    fingerprint: &'a RequestFingerprint,
}

impl HttpIdentityAuthority {
    pub fn new(config: AuthorityConfig) -> Result<Self, AuthorityError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AuthorityError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, namespace: &str, action: &str) -> Result<Url, AuthorityError> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AuthorityError::Url(format!("{} cannot be a base", self.config.base_url)))?
            .pop_if_empty()
            .push(namespace)
            .push(action);
        Ok(url)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: Url,
        token: Option<&str>,
        integration_key: Option<&str>,
        body: &B,
    ) -> Result<Value, AuthorityError> {
        let mut req = self.http.post(url.clone()).json(body);
        if let Some(key) = self.config.web_key.as_deref() {
            req = req.header(HEADER_WEB_KEY, key);
        }
        if let Some(token) = token {
            req = req.header(HEADER_DS_TOKEN, token);
        }
        if let Some(info) = integration_key {
            req = req.header(HEADER_EXTRA_INFO, info);
        }

        let resp = req.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "identity authority unreachable");
            AuthorityError::Transport(e.to_string())
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(url = %url, status = status.as_u16(), "identity authority refused");
            return Err(AuthorityError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| AuthorityError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl IdentityAuthority for HttpIdentityAuthority {
    async fn check(
        &self,
        namespace: &str,
        token: &str,
        integration_key: Option<&str>,
        fingerprint: &RequestFingerprint,
    ) -> Result<RemoteIdentity, AuthorityError> {
        let url = self.endpoint(namespace, "check")?;
        let body = self
            .post(url, Some(token), integration_key, fingerprint)
            .await?;
        let identity = parse_identity(body)?;
        debug!(namespace, user = %identity.key_name, "token checked with authority");
        Ok(identity)
    }

    async fn sign_in(
        &self,
        namespace: &str,
        user: &str,
        password: &str,
        integration_key: Option<&str>,
        fingerprint: &RequestFingerprint,
    ) -> Result<SignedIn, AuthorityError> {
        let url = self.endpoint(namespace, "in")?;
        let body = SignInBody {
            user,
            password,
            fingerprint,
        };
        let body = self.post(url, None, integration_key, &body).await?;

        let token = body
            .pointer("/data/dstoken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AuthorityError::InvalidResponse("missing data.dstoken".into()))?;
        let identity = parse_identity(body)?;
        debug!(namespace, user = %identity.key_name, "signed in with authority");
        Ok(SignedIn { token, identity })
    }
}

/// Extract the identity from a success body. `data.User.KeyName` is mandatory.
pub fn parse_identity(body: Value) -> Result<RemoteIdentity, AuthorityError> {
    let Some(mut data) = body.get("data").cloned() else {
        return Err(AuthorityError::InvalidResponse("missing data".into()));
    };
    let key_name = data
        .pointer("/User/KeyName")
        .and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| AuthorityError::InvalidResponse("missing data.User.KeyName".into()))?;

    let expires_at = data.pointer("/User/Expires").and_then(parse_expires);

    // The issued token is not part of the identity claims.
    if let Some(obj) = data.as_object_mut() {
        obj.remove("dstoken");
    }

    Ok(RemoteIdentity {
        key_name,
        expires_at,
        claims: data,
    })
}

/// `Expires` arrives as RFC 3339, unix seconds or `YYYY-MM-DD HH:MM:SS` (UTC).
fn parse_expires(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => n.as_i64().and_then(|s| DateTime::from_timestamp(s, 0)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|n| n.and_utc())
            })
            .or_else(|| s.parse::<i64>().ok().and_then(|n| DateTime::from_timestamp(n, 0))),
        _ => None,
    }
}
