use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::services::cache::client::{CacheBackend, CacheError, CacheResult};
use crate::services::cache::factory::BackendKind;
use crate::services::context::RequestFingerprint;

// Atomic "replace only if unchanged" (ARGV[1] == "1" means an expected value is given).
const REPLACE_IF_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if cur ~= ARGV[2] then return 0 end
else
  if cur then return 0 end
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
"#;

/// Valkey/Redis-backed cache client.
///
/// The connection is opened on first use and reused for the rest of the process.
/// Missing `host`/`port` or a failed connection leaves the backend *disabled*: every
/// command returns `CacheError::Disabled`, which the store treats as an always-cold
/// cache rather than as a failure.
#[derive(Debug)]
pub struct ValkeyClient {
    url: Option<String>,
    manager: OnceCell<Option<redis::aio::ConnectionManager>>,
}

impl ValkeyClient {
    pub fn new(host: Option<&str>, port: Option<u16>) -> Self {
        let url = match (host, port) {
            (Some(host), Some(port)) if !host.trim().is_empty() => {
                Some(format!("redis://{}:{}", host.trim(), port))
            }
            _ => None,
        };
        Self::from_url(url)
    }

    // Create a Valkey client from a URL like `redis://localhost:6379`
    pub fn from_url(url: Option<String>) -> Self {
        Self {
            url,
            manager: OnceCell::new(),
        }
    }

    async fn connection(&self) -> CacheResult<redis::aio::ConnectionManager> {
        let manager = self
            .manager
            .get_or_init(|| async {
                let Some(url) = self.url.as_deref() else {
                    warn!("valkey cache disabled: host/port not configured");
                    return None;
                };
                match open(url).await {
                    Ok(manager) => {
                        debug!(url, "valkey cache connected");
                        Some(manager)
                    }
                    Err(e) => {
                        warn!(url, error = %e, "valkey cache disabled: connection failed");
                        None
                    }
                }
            })
            .await;

        // Use a clone of the connection manager
        manager.clone().ok_or(CacheError::Disabled)
    }
}

async fn open(url: &str) -> Result<redis::aio::ConnectionManager, CacheError> {
    let client =
        redis::Client::open(url).map_err(|e| CacheError::BackendConnection(e.to_string()))?;

    client
        .get_connection_manager()
        .await
        .map_err(|e| CacheError::BackendConnection(e.to_string()))
}

#[async_trait]
impl CacheBackend for ValkeyClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Valkey
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection().await?;

        let resp: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendCommand(e.to_string()))?;

        Ok(resp)
    }

    async fn set_string(
        &self,
        key: &str,
        value: &str,
        _origin: &RequestFingerprint,
    ) -> CacheResult<()> {
        let mut conn = self.connection().await?;

        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendCommand(e.to_string()))?;

        Ok(())
    }

    async fn replace_if(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        _origin: &RequestFingerprint,
    ) -> CacheResult<bool> {
        let mut conn = self.connection().await?;

        let replaced: i64 = redis::cmd("EVAL")
            .arg(REPLACE_IF_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendCommand(e.to_string()))?;

        Ok(replaced == 1)
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.connection().await?;

        // DEL returns number of keys removed (0 or 1 for a single key).
        let n: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendCommand(e.to_string()))?;

        Ok(n)
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection().await?;

        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendCommand(e.to_string()))?;

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_is_disabled() {
        let client = ValkeyClient::new(None, Some(6379));
        assert!(matches!(
            client.get_string("k").await,
            Err(CacheError::Disabled)
        ));
        assert!(matches!(
            client
                .set_string("k", "v", &RequestFingerprint::local())
                .await,
            Err(CacheError::Disabled)
        ));

        let blank_host = ValkeyClient::new(Some("  "), Some(6379));
        assert!(matches!(blank_host.del("k").await, Err(CacheError::Disabled)));
    }
}
