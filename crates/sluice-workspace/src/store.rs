//! Shared workspace store keyed by producing instance.

use sluice_core::{Error, InstanceId, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Path relative to the producer's working directory.
    pub path: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Default)]
struct Layer {
    files: Vec<StoredFile>,
}

/// Concurrency-safe store of per-instance workspace layers.
///
/// `persist` uses first-writer-wins rather than locking across
/// instances; a repeat persist for the same producer is a no-op.
#[derive(Default)]
pub struct WorkspaceStore {
    layers: RwLock<HashMap<InstanceId, Layer>>,
}

impl WorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the declared paths from the producer's working directory.
    /// Called once, after the producer reports success. Returns the
    /// number of files stored (zero on a repeat persist).
    pub async fn persist(
        &self,
        producer: &InstanceId,
        root: &Path,
        paths: &[String],
    ) -> Result<usize> {
        let mut files = Vec::new();
        for declared in paths {
            let full = root.join(declared);
            let mut stack = vec![full.clone()];
            let mut found = false;

            while let Some(path) = stack.pop() {
                let meta = match tokio::fs::metadata(&path).await {
                    Ok(meta) => meta,
                    Err(_) => continue,
                };
                found = true;
                if meta.is_dir() {
                    let mut entries = tokio::fs::read_dir(&path).await?;
                    while let Some(entry) = entries.next_entry().await? {
                        stack.push(entry.path());
                    }
                } else {
                    let contents = tokio::fs::read(&path).await?;
                    let rel = path.strip_prefix(root).map_err(|_| {
                        Error::Internal(format!("path escapes root: {}", path.display()))
                    })?;
                    files.push(StoredFile {
                        path: rel.to_string_lossy().into_owned(),
                        contents,
                    });
                }
            }

            if !found {
                warn!(producer = %producer, path = %declared, "declared workspace path not found");
            }
        }

        let mut layers = self.layers.write().await;
        if layers.contains_key(producer) {
            debug!(producer = %producer, "workspace layer already persisted, ignoring");
            return Ok(0);
        }
        let count = files.len();
        layers.insert(producer.clone(), Layer { files });
        debug!(producer = %producer, files = count, "persisted workspace layer");
        Ok(count)
    }

    /// Materialize the producer's persisted files under `dest_root`.
    /// Called before a dependent starts; the scheduler only calls this
    /// for producers that reached success, so a missing layer is an
    /// invariant breach, not a recoverable condition.
    pub async fn attach(&self, producer: &InstanceId, dest_root: &Path) -> Result<usize> {
        let layers = self.layers.read().await;
        let layer = layers.get(producer).ok_or_else(|| Error::ArtifactMissing {
            producer: producer.to_string(),
        })?;

        for file in &layer.files {
            let dest = dest_root.join(&file.path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, &file.contents).await?;
        }
        Ok(layer.files.len())
    }

    /// Whether the producer has persisted a layer.
    pub async fn has_layer(&self, producer: &InstanceId) -> bool {
        self.layers.read().await.contains_key(producer)
    }

    /// Relative paths in the producer's layer, for reporting.
    pub async fn artifact_paths(&self, producer: &InstanceId) -> Vec<String> {
        self.layers
            .read()
            .await
            .get(producer)
            .map(|layer| layer.files.iter().map(|f| f.path.clone()).collect())
            .unwrap_or_default()
    }
}
