//! Integration test infrastructure for sluice.
//!
//! Provides a scripted step executor and a preassembled harness wiring
//! the scheduler to in-memory cache, workspace, and result-sink
//! backends, so end-to-end tests can drive whole workflow runs without
//! touching a real shell.

pub mod fixtures;

pub use fixtures::{ScriptedExecutor, TestHarness};

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
