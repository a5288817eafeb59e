//! Step execution adapters.
//!
//! The orchestration core treats steps as opaque; this crate provides the
//! built-in `run` executor that runs shell commands on the host.

mod shell;

pub use shell::ShellExecutor;
