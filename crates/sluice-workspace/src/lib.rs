//! Workspace artifact store.
//!
//! A producing instance persists its declared output paths exactly once,
//! after it reports success; downstream instances that declare a
//! dependency on the producer get those paths attached under their own
//! mount root before they start. Layers are immutable after persist.

mod store;

pub use store::{StoredFile, WorkspaceStore};
