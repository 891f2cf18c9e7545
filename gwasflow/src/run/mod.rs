//! Run planning and control.
//!
//! The controller drives planned stages through the per-stage state
//! machine: a ready queue of stages whose dependencies are satisfied is
//! drained through a bounded worker pool, failures are isolated per
//! branch, and the invocation ends with a report instead of a panic.

mod controller;
mod planner;
mod report;
mod state;


pub use controller::RunController;
pub use planner::{plan, RunPlan};
pub use report::{NotAttempted, RunReport, StageFailure};
pub use state::StageState;

use crate::config::Rebuild;

/// What the caller asked this invocation to bring up to date.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Requested terminal stages; empty means every terminal stage.
    pub end: Vec<String>,
    /// Stages rerun regardless of timestamps.
    pub force: Vec<String>,
    /// How the stage set to execute is computed.
    pub rebuild: Rebuild,
}

impl RunRequest {
    /// Creates a run request.
    #[must_use]
    pub fn new(end: Vec<String>, force: Vec<String>, rebuild: Rebuild) -> Self {
        Self { end, force, rebuild }
    }

    /// A request for the given end targets with defaults otherwise.
    #[must_use]
    pub fn for_targets(end: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            end: end.into_iter().map(Into::into).collect(),
            force: Vec::new(),
            rebuild: Rebuild::default(),
        }
    }

    /// Returns true if `stage` is in the forced-rerun set.
    #[must_use]
    pub fn is_forced(&self, stage: &str) -> bool {
        self.force.iter().any(|name| name == stage)
    }
}
