//! Opaque cache blobs: packed snapshots of declared paths.

use serde::{Deserialize, Serialize};
use sluice_core::{Error, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFile {
    /// Path relative to the instance working directory.
    pub path: String,
    pub contents: Vec<u8>,
}

/// A packed snapshot of the declared cache paths. Immutable once saved;
/// changed inputs produce a new key and a new blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheBlob {
    pub files: Vec<CachedFile>,
}

impl CacheBlob {
    /// Snapshot the declared paths under `root`. Files are read directly;
    /// directories are walked recursively. Missing paths are skipped --
    /// a job that produced nothing still gets an (empty) blob.
    pub async fn pack(root: &Path, paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut files = Vec::new();
        let mut stack: Vec<PathBuf> = paths.iter().map(|p| root.join(p.as_ref())).collect();

        while let Some(path) = stack.pop() {
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if meta.is_dir() {
                let mut entries = tokio::fs::read_dir(&path).await?;
                while let Some(entry) = entries.next_entry().await? {
                    stack.push(entry.path());
                }
            } else {
                let contents = tokio::fs::read(&path).await?;
                let rel = path
                    .strip_prefix(root)
                    .map_err(|_| Error::Internal(format!("path escapes root: {}", path.display())))?;
                files.push(CachedFile {
                    path: rel.to_string_lossy().into_owned(),
                    contents,
                });
            }
        }

        // Stable order keeps packed blobs comparable across runs.
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { files })
    }

    /// Materialize the snapshot under `root`.
    pub async fn unpack(&self, root: &Path) -> Result<()> {
        for file in &self.files {
            let dest = root.join(&file.path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, &file.contents).await?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.contents.len() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pack_unpack_roundtrip() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("deps/nested")).unwrap();
        std::fs::write(src.path().join("deps/a.txt"), b"alpha").unwrap();
        std::fs::write(src.path().join("deps/nested/b.txt"), b"beta").unwrap();

        let blob = CacheBlob::pack(src.path(), &["deps"]).await.unwrap();
        assert_eq!(blob.files.len(), 2);

        let dest = tempfile::tempdir().unwrap();
        blob.unpack(dest.path()).await.unwrap();
        assert_eq!(
            std::fs::read(dest.path().join("deps/nested/b.txt")).unwrap(),
            b"beta"
        );
    }

    #[tokio::test]
    async fn test_pack_missing_path_is_empty() {
        let src = tempfile::tempdir().unwrap();
        let blob = CacheBlob::pack(src.path(), &["does-not-exist"]).await.unwrap();
        assert!(blob.is_empty());
    }
}
