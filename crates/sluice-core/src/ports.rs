//! Port traits between the orchestration core and external adapters.

use crate::Result;
use crate::definition::StepSpec;
use crate::report::InstanceReport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Execution context handed to a step executor for one instance.
///
/// The execution image and attached workspace mounts are explicit fields
/// here, never ambient state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub image: Option<String>,
    /// Matrix assignment of the instance, rendered as strings.
    pub matrix: HashMap<String, String>,
    /// Roots under which required producers' workspaces were attached.
    pub mounts: Vec<PathBuf>,
}

impl ExecutionContext {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            env: HashMap::new(),
            image: None,
            matrix: HashMap::new(),
            mounts: vec![],
        }
    }
}

/// Result contract of an opaque step execution.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl StepOutcome {
    pub fn success(duration_ms: u64) -> Self {
        Self {
            success: true,
            exit_code: 0,
            duration_ms,
        }
    }

    pub fn failure(exit_code: i32, duration_ms: u64) -> Self {
        Self {
            success: false,
            exit_code,
            duration_ms,
        }
    }
}

/// Opaque step executor. The core only consumes the success/failure
/// signal; what the step actually does is outside the orchestration
/// boundary.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &StepSpec, ctx: &ExecutionContext) -> Result<StepOutcome>;
}

/// Sink for per-instance results, consumed by an external results
/// store or UI.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, report: InstanceReport) -> Result<()>;
}

/// In-memory sink, used by tests and as the default when no external
/// store is wired up.
#[derive(Default)]
pub struct MemorySink {
    reports: RwLock<Vec<InstanceReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reports(&self) -> Vec<InstanceReport> {
        self.reports.read().await.clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn record(&self, report: InstanceReport) -> Result<()> {
        self.reports.write().await.push(report);
        Ok(())
    }
}
