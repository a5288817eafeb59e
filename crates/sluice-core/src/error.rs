//! Error types for sluice.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Build-time errors: the run never starts.
    #[error("invalid workflow definition: {0}")]
    Definition(String),

    // Condition errors: treated as condition-false by the scheduler.
    #[error("condition references undefined context field: {0}")]
    ConditionEvaluation(String),

    // Per-instance errors: local to the instance, propagate along
    // requires-edges only.
    #[error("step '{step}' failed with exit code {exit_code}")]
    StepFailed { step: String, exit_code: i32 },

    #[error("step executor error: {0}")]
    StepExecution(String),

    #[error("no executor for step kind '{0}'")]
    UnknownExecutor(String),

    #[error("instance '{instance}' timed out after {minutes} minutes")]
    InstanceTimeout { instance: String, minutes: u32 },

    // Workspace: only reachable when dependency enforcement is violated.
    #[error("workspace artifacts missing for producer '{producer}'")]
    ArtifactMissing { producer: String },

    // Cache backend failures are soft; a plain miss is not an error.
    #[error("cache backend error: {0}")]
    CacheBackend(String),

    #[error("run canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
