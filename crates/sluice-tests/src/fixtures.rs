//! Scripted executor and scheduler harness.

use async_trait::async_trait;
use sluice_cache::MemoryStore;
use sluice_core::context::InvocationContext;
use sluice_core::definition::{StepSpec, WorkflowDefinition};
use sluice_core::ports::{ExecutionContext, MemorySink, StepExecutor, StepOutcome};
use sluice_core::report::RunReport;
use sluice_core::{Error, Result};
use sluice_scheduler::{GraphBuilder, Scheduler, SchedulerConfig, SkipPolicy};
use sluice_workspace::WorkspaceStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Step executor driven by `with` keys instead of a shell.
///
/// Supported keys, checked in order:
/// - `fail: true` fails the step with exit code 1
/// - `sleep_ms: N` sleeps before reporting success
/// - `write: PATH` with optional `contents` writes a file under the
///   working directory (parent directories created)
/// - `exists: PATH` succeeds only when the path exists
/// - `absent: PATH` succeeds only when the path does not exist
///
/// Every executed step name is recorded for later assertions.
#[derive(Default)]
pub struct ScriptedExecutor {
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn ran(&self, step: &str) -> bool {
        self.executed.lock().unwrap().iter().any(|s| s == step)
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, step: &StepSpec, ctx: &ExecutionContext) -> Result<StepOutcome> {
        self.executed.lock().unwrap().push(step.name.clone());

        if step.with.get("fail").and_then(|v| v.as_bool()) == Some(true) {
            return Ok(StepOutcome::failure(1, 1));
        }
        if let Some(ms) = step.with.get("sleep_ms").and_then(|v| v.as_u64()) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(path) = step.with.get("write").and_then(|v| v.as_str()) {
            let contents = step
                .with
                .get("contents")
                .and_then(|v| v.as_str())
                .unwrap_or("x");
            let dest = ctx.working_dir.join(path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, contents).await?;
        }
        if let Some(path) = step.with.get("exists").and_then(|v| v.as_str())
            && !ctx.working_dir.join(path).exists()
        {
            return Ok(StepOutcome::failure(2, 1));
        }
        if let Some(path) = step.with.get("absent").and_then(|v| v.as_str())
            && ctx.working_dir.join(path).exists()
        {
            return Ok(StepOutcome::failure(3, 1));
        }

        Ok(StepOutcome::success(1))
    }
}

/// Scheduler plus shared in-memory backends. Running two workflows on
/// the same harness shares the cache store, which is what warm-cache
/// tests want.
pub struct TestHarness {
    pub executor: Arc<ScriptedExecutor>,
    pub cache: Arc<MemoryStore>,
    pub workspaces: Arc<WorkspaceStore>,
    pub sink: Arc<MemorySink>,
    scheduler: Scheduler,
    _work: tempfile::TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_policy(SkipPolicy::default())
    }

    pub fn with_policy(skip_policy: SkipPolicy) -> Self {
        let work = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let cache = Arc::new(MemoryStore::new());
        let workspaces = Arc::new(WorkspaceStore::new());
        let sink = Arc::new(MemorySink::new());
        let scheduler = Scheduler::new(
            executor.clone(),
            cache.clone(),
            workspaces.clone(),
            sink.clone(),
            SchedulerConfig {
                slots: 4,
                skip_policy,
                work_root: work.path().to_path_buf(),
            },
        );
        Self {
            executor,
            cache,
            workspaces,
            sink,
            scheduler,
            _work: work,
        }
    }

    /// Build the workflow from YAML and run it to completion.
    pub async fn run(&self, yaml: &str, ctx: InvocationContext) -> RunReport {
        let definition = WorkflowDefinition::from_yaml(yaml).unwrap();
        let run = GraphBuilder::new().build(&definition).unwrap();
        self.scheduler.run(run, ctx).await.unwrap()
    }

    /// Build and run with an external cancellation signal.
    pub async fn run_with_cancel(
        &self,
        yaml: &str,
        ctx: InvocationContext,
        cancel: tokio::sync::watch::Receiver<bool>,
    ) -> RunReport {
        let definition = WorkflowDefinition::from_yaml(yaml).unwrap();
        let run = GraphBuilder::new().build(&definition).unwrap();
        self.scheduler.run_with_cancel(run, ctx, cancel).await.unwrap()
    }

    /// Build the workflow and expect the graph build itself to fail.
    pub fn build_error(&self, yaml: &str) -> Error {
        let definition = WorkflowDefinition::from_yaml(yaml).unwrap();
        GraphBuilder::new()
            .build(&definition)
            .map(|_| ())
            .unwrap_err()
            .into()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
