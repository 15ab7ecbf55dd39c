use std::fmt;

use thiserror::Error;

use crate::services::auth::authority::AuthorityError;
use crate::services::cache::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    WrongTokenFormat,
    TokenNotValid,
    MaxTokensReached,
    TokenExpired,
    SecurityCipher,
    Backend,
    RemoteAuthority,
}

impl SessionErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::WrongTokenFormat => "WRONG_TOKEN_FORMAT",
            Self::TokenNotValid => "TOKEN_NOT_VALID",
            Self::MaxTokensReached => "MAX_TOKENS_REACHED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::SecurityCipher => "SECURITY_CIPHER",
            Self::Backend => "BACKEND",
            Self::RemoteAuthority => "REMOTE_AUTHORITY",
        }
    }
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Expected failure of a session operation: a code plus human readable messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {}", messages.join("; "))]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub messages: Vec<String>,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            messages: vec![message.into()],
        }
    }

    pub fn wrong_format(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::WrongTokenFormat, message)
    }

    pub fn not_valid(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::TokenNotValid, message)
    }

    pub fn expired(token: &str) -> Self {
        Self::new(
            SessionErrorKind::TokenExpired,
            format!("token has expired: {token}"),
        )
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }
}

impl From<CacheError> for SessionError {
    fn from(e: CacheError) -> Self {
        Self::new(SessionErrorKind::Backend, e.to_string())
    }
}

impl From<AuthorityError> for SessionError {
    fn from(e: AuthorityError) -> Self {
        let kind = if e.is_rejection() {
            SessionErrorKind::TokenNotValid
        } else {
            SessionErrorKind::RemoteAuthority
        };
        Self::new(kind, e.to_string())
    }
}
