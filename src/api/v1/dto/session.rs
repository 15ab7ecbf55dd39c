/*
 * Responsibility
 * - request/response DTOs of the basic and erp session endpoints
 * - shape checks via validate()
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::auth::Session;

#[derive(Debug, Deserialize)]
pub struct BasicAuthRequest {
    pub user: String,
    pub password: String,
}

impl BasicAuthRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.user.trim().is_empty() {
            return Err("user is required");
        }
        if self.password.is_empty() {
            return Err("password is required");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ErpAuthRequest {
    pub user: String,
    pub password: String,
    pub namespace: String,
    pub integration_key: String,
}

impl ErpAuthRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.user.trim().is_empty() {
            return Err("user is required");
        }
        if self.password.is_empty() {
            return Err("password is required");
        }
        if self.namespace.trim().is_empty() {
            return Err("namespace is required");
        }
        if self.integration_key.trim().is_empty() {
            return Err("integration_key is required");
        }
        Ok(())
    }
}

/// `?_update` forces a remote re-validation.
#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    #[serde(rename = "_update")]
    pub update: Option<String>,
}

/// `?_delete_all_tokens` revokes every token of the identity.
#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    #[serde(rename = "_delete_all_tokens")]
    pub delete_all_tokens: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    /// Seconds until the token expires.
    pub expires: i64,
    pub max_tokens: usize,
    pub expiration_time: u64,
    pub data: Value,
}

impl From<Session> for TokenResponse {
    fn from(s: Session) -> Self {
        Self {
            token: s.token,
            expires: s.token_expires_in,
            max_tokens: s.max_tokens,
            expiration_time: s.expiration,
            data: s.claims,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub is_auth: bool,
    #[serde(flatten)]
    pub session: Session,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub is_auth: bool,
    pub delete_all_tokens: bool,
}
