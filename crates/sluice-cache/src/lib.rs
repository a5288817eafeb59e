//! Cache manager for sluice.
//!
//! Computes deterministic content-derived keys and stores opaque blobs.
//! A restore miss is a cache-cold signal, never an error; saves are
//! idempotent with first-writer-wins semantics so racing instances never
//! block each other.

pub mod blob;
pub mod keys;
pub mod store;

pub use blob::CacheBlob;
pub use store::{CacheStore, FilesystemStore, MemoryStore};
