//! End-of-run tallies. Reporting only; never consulted for control flow.
use std::time::Duration;

use super::runner::{ActionOutcome, Disposition};
use crate::actions::ActionCategory;

/// What happened during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Packages installed.
    pub installed: Vec<String>,
    /// Packages and capabilities removed.
    pub removed: Vec<String>,
    /// Registry and service changes applied.
    pub configured: Vec<String>,
    /// Actions whose desired state already held.
    pub already_satisfied: Vec<String>,
    /// Actions only logged in a dry run.
    pub simulated: Vec<String>,
    /// Actions never attempted (halted run, missing hive).
    pub skipped: Vec<String>,
    /// Compensations performed.
    pub rollbacks: Vec<String>,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
    /// Action failures, hard and soft.
    pub errors: Vec<String>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl ExecutionSummary {
    /// File an action outcome under the matching list.
    pub fn record(&mut self, category: ActionCategory, item: String, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Success { disposition, .. } => match disposition {
                Disposition::AlreadySatisfied => self.already_satisfied.push(item),
                Disposition::Simulated => self.simulated.push(item),
                Disposition::Applied => match category {
                    ActionCategory::PackageInstall => self.installed.push(item),
                    ActionCategory::PackageRemoval | ActionCategory::Capability => {
                        self.removed.push(item);
                    }
                    ActionCategory::Registry | ActionCategory::Service => {
                        self.configured.push(item);
                    }
                },
            },
            ActionOutcome::SoftFailure { error } | ActionOutcome::HardFailure { error } => {
                self.errors.push(error.to_string());
            }
        }
    }

    /// Count of actions that reached their desired state.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.installed.len()
            + self.removed.len()
            + self.configured.len()
            + self.already_satisfied.len()
            + self.simulated.len()
    }
}
