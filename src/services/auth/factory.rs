/// Factory: build the identity authority client from application `Config`.
use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;
use crate::services::auth::authority::{AuthorityConfig, HttpIdentityAuthority, IdentityAuthority};

/// `None` when no authority URL is configured; remote tokens are then refused.
pub fn build_authority(config: &Config) -> Result<Option<Arc<dyn IdentityAuthority>>, AppError> {
    let Some(base_url) = config.authority_url.clone() else {
        tracing::warn!("AUTHORITY_URL not set: remote tokens cannot be validated");
        return Ok(None);
    };

    let mut authority = AuthorityConfig::new(base_url);
    authority.web_key = config.authority_web_key.clone();
    authority.timeout = config.authority_timeout;

    let client = HttpIdentityAuthority::new(authority).map_err(|e| {
        tracing::error!(error = %e, "failed to build identity authority client");
        AppError::Internal
    })?;

    Ok(Some(Arc::new(client)))
}
