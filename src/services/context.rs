//! Explicit per-request context.
//!
//! Everything the cache and the session manager need to know about the caller is
//! carried here instead of being looked up from process-wide state.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Caller fingerprint sent to the identity authority and stored next to
/// document-store cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub user_agent: String,
    pub host: Option<String>,
    pub software: String,
    // sha256(user_agent, host, software); stable for the same client/server pair.
    pub hash: String,
    pub ip: Option<String>,
    pub http_referer: String,
    pub time: String,
    pub uri: Option<String>,
}

impl RequestFingerprint {
    pub fn new(
        user_agent: Option<&str>,
        host: Option<&str>,
        ip: Option<&str>,
        http_referer: Option<&str>,
        uri: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let user_agent = user_agent.unwrap_or("unknown").to_string();
        let host = host.map(str::to_string);
        let software = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

        let mut hasher = Sha256::new();
        hasher.update(user_agent.as_bytes());
        hasher.update(b",");
        hasher.update(host.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b",");
        hasher.update(software.as_bytes());
        let hash = hex::encode(hasher.finalize());

        Self {
            user_agent,
            host,
            software,
            hash,
            ip: ip.map(str::to_string),
            http_referer: http_referer.unwrap_or("unknown").to_string(),
            time: now.format("%Y%m%d%H%M%S").to_string(),
            uri: uri.map(str::to_string),
        }
    }

    /// Fingerprint for work that is not triggered by an HTTP request (scripts, tests).
    pub fn local() -> Self {
        Self::new(None, None, None, None, None, Utc::now())
    }
}

/// Context handed to `CacheStore` and `TokenSessions` constructors.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub fingerprint: RequestFingerprint,
}

impl RequestContext {
    pub fn new(fingerprint: RequestFingerprint) -> Self {
        Self { fingerprint }
    }

    pub fn local() -> Self {
        Self::new(RequestFingerprint::local())
    }
}
