use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::services::cache::client::{CacheBackend, CacheError, CacheResult, glob_to_regex};
use crate::services::cache::factory::BackendKind;
use crate::services::context::RequestFingerprint;

/// Process-local backend.
///
/// Used for development and tests. Nothing survives a restart and nothing is shared
/// between processes.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| CacheError::BackendCommand("memory cache lock poisoned".into()))
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set_string(
        &self,
        key: &str,
        value: &str,
        _origin: &RequestFingerprint,
    ) -> CacheResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn replace_if(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        _origin: &RequestFingerprint,
    ) -> CacheResult<bool> {
        let mut entries = self.lock()?;
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        Ok(self.lock()?.remove(key).map_or(0, |_| 1))
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let re = glob_to_regex(pattern)?;
        let mut keys: Vec<String> = self
            .lock()?
            .keys()
            .filter(|k| re.is_match(k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replace_if_compares_current_value() {
        let backend = MemoryBackend::new();
        let origin = RequestFingerprint::local();

        assert!(backend.replace_if("k", None, "v1", &origin).await.unwrap());
        assert!(!backend.replace_if("k", None, "v2", &origin).await.unwrap());
        assert!(!backend.replace_if("k", Some("x"), "v2", &origin).await.unwrap());
        assert!(backend.replace_if("k", Some("v1"), "v2", &origin).await.unwrap());
        assert_eq!(backend.get_string("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn del_reports_removed_count() {
        let backend = MemoryBackend::new();
        backend
            .set_string("k", "v", &RequestFingerprint::local())
            .await
            .unwrap();
        assert_eq!(backend.del("k").await.unwrap(), 1);
        assert_eq!(backend.del("k").await.unwrap(), 0);
    }
}
