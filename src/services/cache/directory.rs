use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::services::cache::client::{CacheBackend, CacheError, CacheResult, glob_to_regex};
use crate::services::cache::factory::BackendKind;
use crate::services::context::RequestFingerprint;

/// One file per key inside a directory.
///
/// Consistency across hosts is not guaranteed; `replace_if` is only atomic among
/// tasks of this process.
#[derive(Debug)]
pub struct DirectoryBackend {
    dir: PathBuf,
    // Serializes compare-and-swap against plain writes from this process.
    write_lock: Mutex<()>,
}

impl DirectoryBackend {
    /// The directory is created when missing and must be writable.
    pub fn new(dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        // Probe writability the cheap way: create and remove a scratch entry.
        let probe = dir.join("__tmp__");
        std::fs::create_dir(&probe).or_else(|e| match e.kind() {
            ErrorKind::AlreadyExists => Ok(()),
            _ => Err(e),
        })?;
        std::fs::remove_dir(&probe)?;

        debug!(dir = %dir.display(), "directory cache ready");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }

    async fn read(&self, key: &str) -> CacheResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    // Write through a temporary file so readers never observe a half-written entry.
    async fn write(&self, key: &str, value: &str) -> CacheResult<()> {
        let target = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}", file_name(key), uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::Io(e));
        }
        Ok(())
    }
}

/// Map a physical key to a file name (path separators and dots are not allowed).
pub fn file_name(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | '.' | ';' => '_',
            c => c,
        })
        .collect()
}

#[async_trait]
impl CacheBackend for DirectoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Directory
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        self.read(key).await
    }

    async fn set_string(
        &self,
        key: &str,
        value: &str,
        _origin: &RequestFingerprint,
    ) -> CacheResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write(key, value).await
    }

    async fn replace_if(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        _origin: &RequestFingerprint,
    ) -> CacheResult<bool> {
        let _guard = self.write_lock.lock().await;
        if self.read(key).await?.as_deref() != expected {
            return Ok(false);
        }
        self.write(key, value).await?;
        Ok(true)
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(1),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let re = glob_to_regex(&file_name(pattern))?;
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Temporary files of in-flight writes start with a dot.
            if !name.starts_with('.') && re.is_match(&name) {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }
}
