/// Factory: resolve a `BackendKind` into a concrete backend at startup.
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::services::cache::client::{CacheBackend, CacheError};
use crate::services::cache::directory::DirectoryBackend;
use crate::services::cache::document::{DEFAULT_TABLE, DocumentStore};
use crate::services::cache::memory::MemoryBackend;
use crate::services::cache::valkey::ValkeyClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Valkey,
    Directory,
    Document,
    Memory,
}

impl BackendKind {
    /// Short name used inside physical keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valkey => "redis",
            Self::Directory => "directory",
            Self::Document => "datastore",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" | "valkey" => Ok(Self::Valkey),
            "directory" | "dir" | "file" => Ok(Self::Directory),
            "datastore" | "document" | "postgres" => Ok(Self::Document),
            "memory" | "local" => Ok(Self::Memory),
            other => Err(CacheError::InvalidValue(format!(
                "unknown cache backend: {other}"
            ))),
        }
    }
}

/// Everything needed to build any backend. Only the fields of the selected kind are read.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    pub directory: Option<PathBuf>,
    pub database_url: Option<String>,
    pub document_table: String,
}

impl BackendSettings {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            redis_host: None,
            redis_port: None,
            directory: None,
            database_url: None,
            document_table: DEFAULT_TABLE.to_string(),
        }
    }
}

pub fn build_backend(settings: &BackendSettings) -> Result<Arc<dyn CacheBackend>, CacheError> {
    let backend: Arc<dyn CacheBackend> = match settings.kind {
        // Never fails: missing host/port degrades to a disabled cache.
        BackendKind::Valkey => Arc::new(ValkeyClient::new(
            settings.redis_host.as_deref(),
            settings.redis_port,
        )),
        BackendKind::Directory => {
            let dir = settings
                .directory
                .as_ref()
                .ok_or_else(|| CacheError::InvalidValue("CACHE_DIR is required".into()))?;
            Arc::new(DirectoryBackend::new(dir)?)
        }
        BackendKind::Document => {
            let url = settings
                .database_url
                .as_deref()
                .ok_or_else(|| CacheError::InvalidValue("DATABASE_URL is required".into()))?;
            Arc::new(DocumentStore::connect_lazy(url, &settings.document_table)?)
        }
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };
    Ok(backend)
}
