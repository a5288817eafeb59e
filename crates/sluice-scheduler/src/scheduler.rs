//! Concurrent DAG executor.
//!
//! Drives a `WorkflowRun` to completion: evaluates filters and conditions
//! up front, then repeatedly promotes instances whose requirements are
//! settled and spawns them on a bounded set of execution slots. Failure
//! propagates along requires-edges as cancellation; instances on
//! unrelated paths keep running.

use crate::conditions::ConditionEvaluator;
use chrono::Utc;
use sluice_cache::keys::{key_for_spec, sanitize_key};
use sluice_cache::{CacheBlob, CacheStore};
use sluice_core::context::InvocationContext;
use sluice_core::ports::{ExecutionContext, ResultSink, StepExecutor};
use sluice_core::report::{CacheUsage, InstanceReport, RunReport, StepReport};
use sluice_core::run::{InstanceState, JobInstance, RunStatus, WorkflowRun};
use sluice_core::{Error, InstanceId, Result};
use sluice_workspace::WorkspaceStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// How a skipped requirement affects its dependents.
///
/// Skips default to satisfying dependents, so a job turned off by a
/// condition does not silently disable everything downstream of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipPolicy {
    #[default]
    SatisfiesDependents,
    FailsDependents,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum instances running at once.
    pub slots: usize,
    pub skip_policy: SkipPolicy,
    /// Root under which per-instance working directories are created.
    pub work_root: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slots: 4,
            skip_policy: SkipPolicy::default(),
            work_root: std::env::temp_dir().join("sluice"),
        }
    }
}

/// Completion event sent back from an instance task.
struct InstanceDone {
    id: InstanceId,
    state: InstanceState,
    report: InstanceReport,
}

pub struct Scheduler {
    executor: Arc<dyn StepExecutor>,
    cache: Arc<dyn CacheStore>,
    workspaces: Arc<WorkspaceStore>,
    sink: Arc<dyn ResultSink>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        cache: Arc<dyn CacheStore>,
        workspaces: Arc<WorkspaceStore>,
        sink: Arc<dyn ResultSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            executor,
            cache,
            workspaces,
            sink,
            config,
        }
    }

    /// Run to completion without external cancellation.
    pub async fn run(&self, run: WorkflowRun, ctx: InvocationContext) -> Result<RunReport> {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.run_with_cancel(run, ctx, cancel_rx).await
    }

    /// Run to completion, honoring a cancellation signal.
    ///
    /// Cancellation is cooperative: in-flight steps finish, no further
    /// steps start, and every instance that never ran ends `Canceled`.
    pub async fn run_with_cancel(
        &self,
        mut run: WorkflowRun,
        mut ctx: InvocationContext,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let slots = self.config.slots.max(1);

        // Declared parameter defaults apply only where the invocation
        // did not set a value.
        for (key, value) in &run.parameters {
            ctx.parameters
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        let evaluator = ConditionEvaluator::new(&ctx);
        let mut skip_notes: HashMap<InstanceId, String> = HashMap::new();

        if !evaluator.filters_match(run.filters.as_ref()) {
            info!(
                run_id = %run.id,
                ref_name = %ctx.ref_name,
                "workflow filters do not match, skipping all instances"
            );
            for id in run.order.clone() {
                if let Some(instance) = run.instance_mut(&id) {
                    instance.state = InstanceState::Skipped;
                }
            }
        } else {
            // Conditions read only invocation context and matrix values,
            // so all of them are decidable before anything executes.
            for id in run.order.clone() {
                let decision = {
                    let instance = &run.instances[&id];
                    evaluator.evaluate(instance.condition.as_ref(), &instance.matrix_strings())
                };
                match decision {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(instance = %id, "condition not met, skipping");
                        if let Some(instance) = run.instance_mut(&id) {
                            instance.state = InstanceState::Skipped;
                        }
                    }
                    Err(e) => {
                        warn!(instance = %id, error = %e, "condition evaluation failed, skipping");
                        skip_notes.insert(id.clone(), e.to_string());
                        if let Some(instance) = run.instance_mut(&id) {
                            instance.state = InstanceState::Skipped;
                        }
                    }
                }
            }
        }

        let (done_tx, mut done_rx) = mpsc::channel::<InstanceDone>(64);
        let mut reports: HashMap<InstanceId, InstanceReport> = HashMap::new();
        let mut running = 0usize;
        let mut externally_canceled = *cancel.borrow();

        loop {
            apply_transitions(&mut run, self.config.skip_policy);

            if externally_canceled {
                for id in run.order.clone() {
                    if let Some(instance) = run.instance_mut(&id)
                        && !instance.state.is_terminal()
                        && instance.state != InstanceState::Running
                    {
                        instance.state = InstanceState::Canceled;
                    }
                }
            } else {
                for id in run.in_state(InstanceState::Ready) {
                    if running >= slots {
                        break;
                    }
                    self.spawn_instance(&mut run, &id, done_tx.clone(), cancel.clone());
                    running += 1;
                }
            }

            if running == 0 && run.all_terminal() {
                break;
            }

            tokio::select! {
                Some(done) = done_rx.recv() => {
                    running -= 1;
                    if let Some(instance) = run.instance_mut(&done.id) {
                        instance.state = done.state;
                    }
                    reports.insert(done.id, done.report);
                }
                _ = cancel_requested(cancel.clone()), if !externally_canceled => {
                    info!(run_id = %run.id, "cancellation requested, draining running instances");
                    externally_canceled = true;
                }
            }
        }

        let completed_at = Utc::now();
        let status = if externally_canceled {
            RunStatus::Canceled
        } else if run.order.iter().any(|id| {
            let instance = &run.instances[id];
            instance.state == InstanceState::Failed && !instance.optional
        }) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let mut instance_reports = Vec::with_capacity(run.order.len());
        for id in &run.order {
            let instance = &run.instances[id];
            let report = reports.remove(id).unwrap_or_else(|| {
                let mut report =
                    InstanceReport::new(id.clone(), instance.template.clone(), instance.state);
                report.error = skip_notes.remove(id);
                report
            });
            instance_reports.push(report);
        }

        for report in &instance_reports {
            if let Err(e) = self.sink.record(report.clone()).await {
                warn!(instance = %report.instance, error = %e, "result sink rejected report");
            }
        }

        info!(
            run_id = %run.id,
            status = ?status,
            instances = instance_reports.len(),
            "workflow run finished"
        );

        Ok(RunReport {
            run_id: run.id,
            name: run.name.clone(),
            status,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
            instances: instance_reports,
        })
    }

    fn spawn_instance(
        &self,
        run: &mut WorkflowRun,
        id: &InstanceId,
        done_tx: mpsc::Sender<InstanceDone>,
        cancel: watch::Receiver<bool>,
    ) {
        let instance = run.instances[id].clone();

        // Producers whose workspace layers this instance may attach:
        // succeeded requirements that declared persisted paths.
        let producers: Vec<InstanceId> = instance
            .requires
            .iter()
            .filter(|req| {
                let producer = &run.instances[req];
                producer.state == InstanceState::Succeeded
                    && producer
                        .workspace
                        .as_ref()
                        .is_some_and(|w| !w.persist.is_empty())
            })
            .cloned()
            .collect();

        if let Some(entry) = run.instance_mut(id) {
            entry.state = InstanceState::Running;
        }
        debug!(instance = %id, "starting instance");

        let task = InstanceTask {
            executor: self.executor.clone(),
            cache: self.cache.clone(),
            workspaces: self.workspaces.clone(),
            work_root: self.config.work_root.join(run.id.to_string()),
            base_env: run.env.clone(),
            cancel,
        };
        tokio::spawn(async move {
            let done = task.execute(instance, producers).await;
            let _ = done_tx.send(done).await;
        });
    }
}

/// Resolves when cancellation is requested; never resolves once the
/// sender side is gone.
async fn cancel_requested(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Promote instances whose requirements have settled, to fixpoint.
///
/// An instance becomes `Ready` when every requirement reached a
/// satisfying terminal state, `Canceled` when any requirement failed or
/// was itself canceled, and `Blocked` while requirements are still in
/// flight. Under `SkipPolicy::FailsDependents` a skipped requirement
/// counts as a failed one.
fn apply_transitions(run: &mut WorkflowRun, policy: SkipPolicy) {
    loop {
        let mut changed = false;
        for id in run.order.clone() {
            let current = run.instances[&id].state;
            if !matches!(current, InstanceState::Pending | InstanceState::Blocked) {
                continue;
            }

            let requires = run.instances[&id].requires.clone();
            let mut next = InstanceState::Ready;
            for req in &requires {
                match run.instances[req].state {
                    InstanceState::Succeeded => {}
                    InstanceState::Skipped if policy == SkipPolicy::SatisfiesDependents => {}
                    InstanceState::Skipped | InstanceState::Failed | InstanceState::Canceled => {
                        next = InstanceState::Canceled;
                        break;
                    }
                    _ => {
                        if next == InstanceState::Ready {
                            next = InstanceState::Blocked;
                        }
                    }
                }
            }

            if next != current {
                if next == InstanceState::Canceled {
                    debug!(instance = %id, "requirement not satisfied, canceling");
                }
                if let Some(instance) = run.instance_mut(&id) {
                    instance.state = next;
                }
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Everything one instance execution needs, moved onto its task.
struct InstanceTask {
    executor: Arc<dyn StepExecutor>,
    cache: Arc<dyn CacheStore>,
    workspaces: Arc<WorkspaceStore>,
    work_root: PathBuf,
    base_env: HashMap<String, String>,
    cancel: watch::Receiver<bool>,
}

impl InstanceTask {
    async fn execute(self, instance: JobInstance, producers: Vec<InstanceId>) -> InstanceDone {
        let id = instance.id.clone();
        let started = Utc::now();
        let mut report =
            InstanceReport::new(id.clone(), instance.template.clone(), InstanceState::Running);
        report.started_at = Some(started);

        let state = match self.run_instance(&instance, &producers, &mut report).await {
            Ok(()) => InstanceState::Succeeded,
            Err(Error::Canceled) => InstanceState::Canceled,
            Err(e) => {
                warn!(instance = %id, error = %e, "instance failed");
                report.error = Some(e.to_string());
                InstanceState::Failed
            }
        };

        let completed = Utc::now();
        report.completed_at = Some(completed);
        report.duration_ms = Some((completed - started).num_milliseconds().max(0) as u64);
        report.state = state;
        InstanceDone { id, state, report }
    }

    async fn run_instance(
        &self,
        instance: &JobInstance,
        producers: &[InstanceId],
        report: &mut InstanceReport,
    ) -> Result<()> {
        let work_dir = self.work_root.join(sanitize_key(instance.id.as_str()));
        tokio::fs::create_dir_all(&work_dir).await?;

        let mut mounts = Vec::new();
        if let Some(attach_at) = instance.workspace.as_ref().and_then(|w| w.attach_at.as_ref()) {
            let dest = work_dir.join(attach_at);
            for producer in producers {
                match self.workspaces.attach(producer, &dest).await {
                    Ok(files) => {
                        debug!(instance = %instance.id, producer = %producer, files, "attached workspace");
                    }
                    Err(e @ Error::ArtifactMissing { .. }) => {
                        // Dependency ordering guarantees the layer exists
                        // once the producer succeeded; reaching this is a
                        // broken invariant, not a user error.
                        error!(
                            instance = %instance.id,
                            producer = %producer,
                            "succeeded producer has no workspace layer"
                        );
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                }
            }
            mounts.push(dest);
        }

        let mut cache_state = None;
        if let Some(spec) = &instance.cache {
            let key = key_for_spec(spec, &instance.template, &work_dir);
            let hit = match self.cache.restore(&key).await {
                Ok(Some(blob)) => {
                    debug!(instance = %instance.id, key = %key, files = blob.files.len(), "cache hit");
                    blob.unpack(&work_dir).await?;
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(instance = %instance.id, key = %key, error = %e, "cache restore failed, continuing cold");
                    false
                }
            };
            report.cache = Some(CacheUsage {
                key: key.clone(),
                hit,
                saved: false,
            });
            cache_state = Some((key, hit));
        }

        let mut exec_ctx = ExecutionContext::new(work_dir.clone());
        exec_ctx.env = self.base_env.clone();
        exec_ctx.env.extend(instance.env.clone());
        exec_ctx.image = instance.image.clone();
        exec_ctx.matrix = instance.matrix_strings();
        exec_ctx.mounts = mounts;

        match instance.timeout_minutes {
            Some(minutes) => {
                let limit = Duration::from_secs(u64::from(minutes) * 60);
                match tokio::time::timeout(limit, self.run_steps(instance, &exec_ctx, report)).await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(Error::InstanceTimeout {
                            instance: instance.id.to_string(),
                            minutes,
                        });
                    }
                }
            }
            None => self.run_steps(instance, &exec_ctx, report).await?,
        }

        if let Some(workspace) = &instance.workspace
            && !workspace.persist.is_empty()
        {
            self.workspaces
                .persist(&instance.id, &work_dir, &workspace.persist)
                .await?;
            report.artifacts = self.workspaces.artifact_paths(&instance.id).await;
        }

        if let Some((key, false)) = &cache_state
            && let Some(spec) = &instance.cache
        {
            let blob = CacheBlob::pack(&work_dir, &spec.paths).await?;
            match self.cache.save(key, blob).await {
                Ok(saved) => {
                    if let Some(usage) = report.cache.as_mut() {
                        usage.saved = saved;
                    }
                }
                Err(e) => {
                    warn!(instance = %instance.id, key = %key, error = %e, "cache save failed, result unaffected");
                }
            }
        }

        Ok(())
    }

    async fn run_steps(
        &self,
        instance: &JobInstance,
        ctx: &ExecutionContext,
        report: &mut InstanceReport,
    ) -> Result<()> {
        for step in &instance.steps {
            if *self.cancel.borrow() {
                return Err(Error::Canceled);
            }
            debug!(instance = %instance.id, step = %step.name, "executing step");
            match self.executor.execute(step, ctx).await {
                Ok(outcome) => {
                    report.steps.push(StepReport {
                        name: step.name.clone(),
                        success: outcome.success,
                        exit_code: outcome.exit_code,
                        duration_ms: outcome.duration_ms,
                    });
                    if !outcome.success {
                        return Err(Error::StepFailed {
                            step: step.name.clone(),
                            exit_code: outcome.exit_code,
                        });
                    }
                }
                Err(e) => {
                    report.steps.push(StepReport {
                        name: step.name.clone(),
                        success: false,
                        exit_code: -1,
                        duration_ms: 0,
                    });
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
