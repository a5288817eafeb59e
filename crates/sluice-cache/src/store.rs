//! Cache storage backends.

use crate::blob::CacheBlob;
use crate::keys::sanitize_key;
use async_trait::async_trait;
use sluice_core::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Storage backend for cache blobs.
///
/// `restore` returning `Ok(None)` is a miss, never an error. `save` is
/// idempotent: the first writer wins and later saves of the same key are
/// no-ops, so concurrent instances racing to populate a key never
/// conflict.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn restore(&self, key: &str) -> Result<Option<Arc<CacheBlob>>>;

    /// Returns true when this call stored the blob, false when the key
    /// already existed.
    async fn save(&self, key: &str, blob: CacheBlob) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// In-memory store, used by tests and single-process runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Arc<CacheBlob>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn restore(&self, key: &str) -> Result<Option<Arc<CacheBlob>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, blob: CacheBlob) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            debug!(key, "cache key already present, save is a no-op");
            return Ok(false);
        }
        entries.insert(key.to_string(), Arc::new(blob));
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }
}

/// Filesystem-backed store for local runs. One JSON-encoded blob per key;
/// writes go to a temp file first so a crash never leaves a torn entry.
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root_dir.join(sanitize_key(key))
    }
}

#[async_trait]
impl CacheStore for FilesystemStore {
    async fn restore(&self, key: &str) -> Result<Option<Arc<CacheBlob>>> {
        let path = self.key_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::CacheBackend(format!("read {}: {}", path.display(), e))),
        };
        let blob: CacheBlob = serde_json::from_slice(&bytes)
            .map_err(|e| Error::CacheBackend(format!("decode {}: {}", path.display(), e)))?;
        Ok(Some(Arc::new(blob)))
    }

    async fn save(&self, key: &str, blob: CacheBlob) -> Result<bool> {
        let path = self.key_path(key);
        if path.exists() {
            debug!(key, "cache key already present, save is a no-op");
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(|e| Error::CacheBackend(format!("create cache dir: {}", e)))?;

        let bytes = serde_json::to_vec(&blob)
            .map_err(|e| Error::CacheBackend(format!("encode blob: {}", e)))?;
        let tmp = path.with_extension(format!("tmp.{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::CacheBackend(format!("write {}: {}", tmp.display(), e)))?;

        // Recheck before the rename: a racing writer may have landed first.
        if path.exists() {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Ok(false);
        }
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::CacheBackend(format!("rename {}: {}", path.display(), e)))?;
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.key_path(key).exists())
    }
}
