//! The final summary of a pipeline invocation.
//!
//! Execution errors are collected here rather than raised on first
//! failure, so one invocation does as much useful work as it can and
//! then says exactly what happened.

use super::StageState;
use crate::dispatch::StageOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One recorded stage failure.
#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    /// The failing stage.
    pub stage: String,
    /// The rendered error.
    pub error: String,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

impl StageFailure {
    /// Creates a failure record stamped with the current time.
    #[must_use]
    pub fn new(stage: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            error: error.into(),
            at: Utc::now(),
        }
    }
}

/// A stage that was never scheduled because an ancestor failed.
#[derive(Debug, Clone, Serialize)]
pub struct NotAttempted {
    /// The unscheduled stage.
    pub stage: String,
    /// The failed ancestor that blocked it, when one is known.
    pub blocked_by: Option<String>,
}

/// Everything a caller needs to know about one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// The run identifier.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// Final state of every planned stage.
    pub states: BTreeMap<String, StageState>,
    /// Successful dispatch outcomes, in completion order.
    pub outcomes: Vec<StageOutcome>,
    /// Recorded failures, in completion order.
    pub failures: Vec<StageFailure>,
    /// Stages never attempted due to upstream failure.
    pub not_attempted: Vec<NotAttempted>,
    /// Total wall-clock time in milliseconds.
    pub duration_ms: f64,
}

impl RunReport {
    /// Stage names currently in `state`, sorted.
    #[must_use]
    pub fn stages_in(&self, state: StageState) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Returns true if every planned stage succeeded or was skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.not_attempted.is_empty()
    }

    /// How many stages actually ran.
    #[must_use]
    pub fn ran(&self) -> usize {
        self.outcomes.len()
    }

    /// Renders the human-readable summary.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "pipeline '{}' run {} finished in {:.0} ms\n",
            self.pipeline, self.run_id, self.duration_ms
        );

        let succeeded = self.stages_in(StageState::Succeeded);
        let skipped = self.stages_in(StageState::Skipped);
        out.push_str(&format!(
            "  succeeded ({}): {}\n",
            succeeded.len(),
            succeeded.join(", ")
        ));
        out.push_str(&format!(
            "  skipped   ({}): {}\n",
            skipped.len(),
            skipped.join(", ")
        ));

        if !self.failures.is_empty() {
            out.push_str(&format!("  failed    ({}):\n", self.failures.len()));
            for failure in &self.failures {
                out.push_str(&format!("    {}: {}\n", failure.stage, failure.error));
            }
        }
        if !self.not_attempted.is_empty() {
            out.push_str(&format!(
                "  not attempted ({}):\n",
                self.not_attempted.len()
            ));
            for blocked in &self.not_attempted {
                match &blocked.blocked_by {
                    Some(upstream) => out.push_str(&format!(
                        "    {}: upstream failure in '{}'\n",
                        blocked.stage, upstream
                    )),
                    None => out.push_str(&format!("    {}: not scheduled\n", blocked.stage)),
                }
            }
        }
        out
    }
}
