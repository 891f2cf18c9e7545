//! Per-stage execution states.

use serde::{Deserialize, Serialize};

/// The state machine each planned stage moves through.
///
/// `Pending → Running` when every dependency is satisfied and the stage
/// is stale; `Pending → Skipped` when it is up to date; `Running`
/// resolves to `Succeeded` or `Failed` per the dispatcher. A stage whose
/// ancestor failed is never scheduled and stays `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    /// Not yet scheduled.
    Pending,
    /// Dispatched and not yet finished.
    Running,
    /// Ran to completion.
    Succeeded,
    /// Ran and failed.
    Failed,
    /// Up to date; nothing to do.
    Skipped,
}

impl StageState {
    /// Returns true for states the stage will never leave.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if a dependent may start once this dependency is in
    /// this state.
    #[must_use]
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_satisfying_states() {
        assert!(StageState::Succeeded.is_terminal());
        assert!(StageState::Skipped.is_terminal());
        assert!(StageState::Failed.is_terminal());
        assert!(!StageState::Pending.is_terminal());
        assert!(!StageState::Running.is_terminal());

        assert!(StageState::Succeeded.satisfies_dependency());
        assert!(StageState::Skipped.satisfies_dependency());
        assert!(!StageState::Failed.satisfies_dependency());
    }
}
