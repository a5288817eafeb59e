//! Orchestration for sluice: graph build, matrix expansion, condition
//! evaluation, and the concurrent scheduler/executor.

pub mod conditions;
pub mod graph;
pub mod matrix;
pub mod report;
pub mod scheduler;

pub use conditions::{ConditionError, ConditionEvaluator};
pub use graph::{DefinitionError, GraphBuilder};
pub use matrix::MatrixExpander;
pub use report::RunSummary;
pub use scheduler::{Scheduler, SchedulerConfig, SkipPolicy};
