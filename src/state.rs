/*
 * Responsibility
 * - Shared context bound to the Router (AppState)
 *   - cache backend, identity authority, session settings
 * - Cheap to clone (everything behind Arc)
 * - Builds the per-request TokenSessions
 */
use std::sync::Arc;

use crate::services::auth::{IdentityAuthority, SessionPolicy, TokenSessions};
use crate::services::cache::{CacheBackend, CacheSettings};
use crate::services::context::RequestContext;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn CacheBackend>,
    pub authority: Option<Arc<dyn IdentityAuthority>>,
    pub cache: CacheSettings,
    pub policy: SessionPolicy,
    pub basic: Arc<BasicCredentials>,
}

#[derive(Debug)]
pub struct BasicCredentials {
    pub user: String,
    pub password: String,
    pub namespace: String,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        authority: Option<Arc<dyn IdentityAuthority>>,
        cache: CacheSettings,
        policy: SessionPolicy,
        basic: BasicCredentials,
    ) -> Self {
        Self {
            backend,
            authority,
            cache,
            policy,
            basic: Arc::new(basic),
        }
    }

    /// Session manager bound to one request.
    pub fn sessions(&self, ctx: RequestContext) -> TokenSessions {
        TokenSessions::new(
            self.backend.clone(),
            &self.cache,
            self.authority.clone(),
            self.policy.clone(),
            ctx,
        )
    }
}
