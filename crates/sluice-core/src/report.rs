//! Result reporting types.
//!
//! Emitted per finished instance and aggregated per run, in a form
//! consumable by an external results store or UI.

use crate::ids::{InstanceId, RunId};
use crate::run::{InstanceState, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub success: bool,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Cache participation of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheUsage {
    pub key: String,
    pub hit: bool,
    /// Whether this instance's save actually stored the blob
    /// (false on first-writer-wins races and after a hit).
    pub saved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    pub instance: InstanceId,
    pub template: String,
    pub state: InstanceState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub steps: Vec<StepReport>,
    pub cache: Option<CacheUsage>,
    /// Workspace paths persisted by this instance.
    pub artifacts: Vec<String>,
    /// Error message for failures outside plain step exit codes.
    pub error: Option<String>,
}

impl InstanceReport {
    pub fn new(instance: InstanceId, template: impl Into<String>, state: InstanceState) -> Self {
        Self {
            instance,
            template: template.into(),
            state,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            steps: vec![],
            cache: None,
            artifacts: vec![],
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub instances: Vec<InstanceReport>,
}

impl RunReport {
    pub fn instance(&self, name: &str) -> Option<&InstanceReport> {
        self.instances.iter().find(|i| i.instance.as_str() == name)
    }

    pub fn states(&self) -> impl Iterator<Item = (&str, InstanceState)> {
        self.instances.iter().map(|i| (i.instance.as_str(), i.state))
    }
}
