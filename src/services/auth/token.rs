//! Token shapes and how they map to an identity.
//!
//! - self-issued: `token__{identity}__{namespace}__{32 hex}`
//! - remote (issued by the identity authority): `{namespace}__{identity}__{suffix}`
use uuid::Uuid;

use crate::services::auth::error::SessionError;

const SEPARATOR: &str = "__";
const SELF_ISSUED_MARKER: &str = "token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOrigin {
    SelfIssued,
    Remote,
}

/// A token that passed the format check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRef {
    pub origin: TokenOrigin,
    pub namespace: String,
    pub identity: String,
    pub raw: String,
}

impl TokenRef {
    /// Cache key of the identity state this token belongs to.
    pub fn identity_key(&self) -> String {
        identity_key(&self.namespace, &self.identity)
    }

    pub fn is_remote(&self) -> bool {
        self.origin == TokenOrigin::Remote
    }
}

pub fn identity_key(namespace: &str, identity: &str) -> String {
    format!("{namespace}_{identity}")
}

/// Parse without touching the cache or the network.
pub fn parse(token: &str) -> Result<TokenRef, SessionError> {
    let token = token.trim();
    let parts: Vec<&str> = token.split(SEPARATOR).collect();

    let (origin, namespace, identity) = match parts.as_slice() {
        [SELF_ISSUED_MARKER, identity, namespace, random] => {
            if random.len() != 32 || !random.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(SessionError::wrong_format(
                    "self-issued token must end with 32 hex characters",
                ));
            }
            (TokenOrigin::SelfIssued, *namespace, *identity)
        }
        [namespace, identity, _suffix] => (TokenOrigin::Remote, *namespace, *identity),
        _ => {
            return Err(SessionError::wrong_format(format!(
                "token has {} segments separated by '{SEPARATOR}'",
                parts.len()
            )));
        }
    };

    if namespace.is_empty() || identity.is_empty() {
        return Err(SessionError::wrong_format(
            "token namespace and identity must not be empty",
        ));
    }

    Ok(TokenRef {
        origin,
        namespace: namespace.to_string(),
        identity: identity.to_string(),
        raw: token.to_string(),
    })
}

/// New self-issued token for `identity` in `namespace`.
pub fn generate(identity: &str, namespace: &str) -> Result<String, SessionError> {
    for (what, value) in [("identity", identity), ("namespace", namespace)] {
        if value.trim().is_empty() {
            return Err(SessionError::wrong_format(format!("{what} must not be empty")));
        }
        if value.contains(SEPARATOR) {
            return Err(SessionError::wrong_format(format!(
                "{what} must not contain '{SEPARATOR}'"
            )));
        }
    }
    Ok(format!(
        "{SELF_ISSUED_MARKER}{SEPARATOR}{identity}{SEPARATOR}{namespace}{SEPARATOR}{}",
        Uuid::new_v4().simple()
    ))
}
