//! Workflow definition types.
//!
//! These types represent the user-authored declarative job-graph document.
//! The document carries no executable logic; steps are opaque references to
//! external executors.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "default_version")]
    pub version: String,
    pub name: String,
    /// Pipeline parameters visible to condition predicates.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Environment defaults merged into every instance's execution context.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Reusable step fragments, referenced by name from job steps and
    /// resolved by structural substitution at graph-build time.
    #[serde(default)]
    pub fragments: HashMap<String, Vec<StepDefinition>>,
    /// Workflow-level branch/tag filters.
    #[serde(default)]
    pub filters: Option<WorkflowFilters>,
    pub jobs: Vec<JobTemplate>,
}

fn default_version() -> String {
    "1".to_string()
}

impl WorkflowDefinition {
    /// Parse a workflow definition from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Definition(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    /// Names of job templates that must succeed before this job starts.
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub condition: Option<ConditionExpression>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    #[serde(default)]
    pub cache: Option<CacheSpec>,
    #[serde(default)]
    pub workspace: Option<WorkspaceSpec>,
    /// Optional jobs may fail without failing the workflow run.
    #[serde(default)]
    pub optional: bool,
    /// Wall-clock limit enforced by the scheduler on this instance alone.
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    /// Execution image, passed through to the step executor rather than
    /// kept as ambient state.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// A single execution step: either an inline spec or a reference to a
/// reusable fragment declared at the workflow level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepDefinition {
    Fragment { fragment: String },
    Run(StepSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    /// Executor reference. The core treats this as opaque; the only
    /// built-in executor handles `run`.
    pub uses: String,
    #[serde(default)]
    pub with: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Parameter name to ordered value list. The Cartesian product of all
    /// lists yields one instance per combination.
    pub parameters: HashMap<String, Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSpec {
    /// Key namespace; defaults to the job name when omitted.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Explicit invalidation knob: bumping the version changes every key.
    #[serde(default = "default_cache_version")]
    pub version: u32,
    /// Files whose content fingerprints feed the cache key.
    pub key_inputs: Vec<PathBuf>,
    /// Paths snapshotted into the cache blob and restored on a hit.
    pub paths: Vec<PathBuf>,
}

fn default_cache_version() -> u32 {
    1
}

impl CacheSpec {
    pub fn namespace_for(&self, job: &str) -> String {
        self.namespace.clone().unwrap_or_else(|| job.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSpec {
    /// Relative paths persisted after this job succeeds.
    #[serde(default)]
    pub persist: Vec<String>,
    /// Mount root under which required producers' persisted paths are
    /// attached before this job starts. No attachment when omitted.
    #[serde(default)]
    pub attach_at: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionExpression {
    Simple(String),
    Structured {
        #[serde(rename = "if")]
        if_expr: Option<String>,
        unless: Option<String>,
    },
}

/// Workflow-level ref filters. Empty branch list matches every branch;
/// tags match only when patterns are explicitly listed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowFilters {
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}
