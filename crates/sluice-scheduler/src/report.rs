//! Aggregate views over a finished run report.

use sluice_core::report::RunReport;
use sluice_core::run::InstanceState;

/// Per-state instance counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub canceled: usize,
    pub cache_hits: usize,
}

impl RunSummary {
    pub fn from_report(report: &RunReport) -> Self {
        let mut summary = Self {
            total: report.instances.len(),
            ..Self::default()
        };
        for instance in &report.instances {
            match instance.state {
                InstanceState::Succeeded => summary.succeeded += 1,
                InstanceState::Failed => summary.failed += 1,
                InstanceState::Skipped => summary.skipped += 1,
                InstanceState::Canceled => summary.canceled += 1,
                _ => {}
            }
            if instance.cache.as_ref().is_some_and(|c| c.hit) {
                summary.cache_hits += 1;
            }
        }
        summary
    }
}
