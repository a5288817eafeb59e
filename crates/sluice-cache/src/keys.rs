//! Cache key generation.

use sha2::{Digest, Sha256};
use sluice_core::definition::CacheSpec;
use std::path::Path;

/// Compute a cache key from a namespace, a version token, and the content
/// fingerprints of the declared key-input paths.
///
/// Per-input digests are sorted before the final hash, so two jobs
/// declaring the same inputs in different order produce the same key.
/// A missing input is fingerprinted with an explicit absent marker rather
/// than skipped, so its later appearance changes the key.
pub fn compute_key(namespace: &str, version: u32, key_inputs: &[impl AsRef<Path>], root: &Path) -> String {
    let mut digests: Vec<[u8; 32]> = key_inputs
        .iter()
        .map(|input| {
            let rel = input.as_ref();
            let mut hasher = Sha256::new();
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            match std::fs::read(root.join(rel)) {
                Ok(contents) => hasher.update(&contents),
                Err(_) => hasher.update(b"\0absent"),
            }
            hasher.finalize().into()
        })
        .collect();
    digests.sort_unstable();

    let mut hasher = Sha256::new();
    for digest in &digests {
        hasher.update(digest);
    }
    let hash = hasher.finalize();

    format!("{}-v{}-{}", namespace, version, hex::encode(&hash[..8]))
}

/// Compute the key for a job's cache spec.
pub fn key_for_spec(spec: &CacheSpec, job: &str, root: &Path) -> String {
    compute_key(&spec.namespace_for(job), spec.version, &spec.key_inputs, root)
}

/// Sanitize a key for use in filenames.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}
