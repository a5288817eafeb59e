//! Run and instance runtime types.

use crate::definition::{CacheSpec, ConditionExpression, StepSpec, WorkflowFilters, WorkspaceSpec};
use crate::ids::{InstanceId, RunId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-instance state machine.
///
/// `Pending -> {Skipped | Blocked | Ready} -> Running ->
/// {Succeeded | Failed | Canceled}`. `Skipped` is terminal and not a
/// failure. A failed instance never retries; a retry would be a new
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Skipped,
    Blocked,
    Ready,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Skipped
                | InstanceState::Succeeded
                | InstanceState::Failed
                | InstanceState::Canceled
        )
    }
}

/// One concrete, schedulable unit: a job template bound to a matrix
/// assignment (empty when the template is not matrixed).
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: InstanceId,
    /// Name of the template this instance was expanded from.
    pub template: String,
    /// Steps after fragment substitution, executed strictly in order.
    pub steps: Vec<StepSpec>,
    pub matrix: HashMap<String, serde_json::Value>,
    pub requires: Vec<InstanceId>,
    pub condition: Option<ConditionExpression>,
    pub cache: Option<CacheSpec>,
    pub workspace: Option<WorkspaceSpec>,
    pub optional: bool,
    pub timeout_minutes: Option<u32>,
    pub image: Option<String>,
    pub env: HashMap<String, String>,
    pub state: InstanceState,
}

impl JobInstance {
    /// Matrix assignment rendered as strings, for env export and
    /// condition interpolation.
    pub fn matrix_strings(&self) -> HashMap<String, String> {
        self.matrix
            .iter()
            .map(|(k, v)| {
                let s = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), s)
            })
            .collect()
    }
}

/// Aggregated result of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// The top-level unit: one concrete DAG of job instances plus the
/// invocation it was built for.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub id: RunId,
    pub name: String,
    pub instances: HashMap<InstanceId, JobInstance>,
    /// Deterministic (topological) iteration order over `instances`.
    pub order: Vec<InstanceId>,
    /// Workflow-level ref filters, evaluated once per run.
    pub filters: Option<WorkflowFilters>,
    /// Declared parameter defaults; invocation parameters override them.
    pub parameters: HashMap<String, String>,
    /// Environment defaults merged into every instance's execution context.
    pub env: HashMap<String, String>,
}

impl WorkflowRun {
    pub fn instance(&self, id: &InstanceId) -> Option<&JobInstance> {
        self.instances.get(id)
    }

    pub fn instance_mut(&mut self, id: &InstanceId) -> Option<&mut JobInstance> {
        self.instances.get_mut(id)
    }

    /// Instances currently in a given state, in topological order.
    pub fn in_state(&self, state: InstanceState) -> Vec<InstanceId> {
        self.order
            .iter()
            .filter(|id| self.instances[id].state == state)
            .cloned()
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.instances.values().all(|i| i.state.is_terminal())
    }
}
