//! Error types for the gwasflow executor.
//!
//! Configuration errors are fatal and surface before any stage runs.
//! Stage execution errors are local to the failing branch: they are
//! recorded in the run report and block dependents without aborting
//! unrelated branches.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for gwasflow operations.
#[derive(Debug, Error)]
pub enum GwasflowError {
    /// A configuration error occurred.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A stage execution error.
    #[error("{0}")]
    StageExecution(#[from] StageExecutionError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for GwasflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when the stage graph or run configuration is invalid.
///
/// All variants abort the invocation before any execution starts.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A stage name was declared more than once.
    #[error("Stage '{stage}' is declared more than once")]
    DuplicateStage {
        /// The duplicated stage name.
        stage: String,
    },

    /// A dependency or end target names a stage that does not exist.
    #[error("Unknown stage '{stage}' referenced by {referenced_by}")]
    UnknownStage {
        /// The missing stage name.
        stage: String,
        /// Where the reference came from (a stage's dependency list,
        /// the end targets, or the force set).
        referenced_by: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected: {}", cycle_path.join(" -> "))]
    Cycle {
        /// The stages forming the cycle, first stage repeated at the end.
        cycle_path: Vec<String>,
    },

    /// A command template references a placeholder that cannot be resolved.
    #[error("Stage '{stage}' command references unknown placeholder '{{{placeholder}}}'")]
    UnknownPlaceholder {
        /// The stage whose command is invalid.
        stage: String,
        /// The unresolved placeholder name.
        placeholder: String,
    },

    /// An option value is out of range or inconsistent.
    #[error("Invalid value for option '{option}': {reason}")]
    InvalidOption {
        /// The option name.
        option: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("Failed to load configuration from {}: {message}", path.display())]
    Load {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying read/parse failure.
        message: String,
    },
}

impl ConfigurationError {
    /// Stage names involved in the error, for diagnostics.
    #[must_use]
    pub fn stages(&self) -> Vec<String> {
        match self {
            Self::DuplicateStage { stage }
            | Self::UnknownPlaceholder { stage, .. } => vec![stage.clone()],
            Self::UnknownStage { stage, .. } => vec![stage.clone()],
            Self::Cycle { cycle_path } => cycle_path.clone(),
            Self::InvalidOption { .. } | Self::Load { .. } => Vec::new(),
        }
    }
}

/// Error raised when a single stage fails to execute.
///
/// Missing executables and unloadable environment modules surface here
/// too: they are fatal for the stage, not for the run.
#[derive(Debug, Error)]
pub enum StageExecutionError {
    /// The stage command exited with a non-zero status.
    #[error("Stage '{stage}' exited with status {code}")]
    NonZeroExit {
        /// The failing stage.
        stage: String,
        /// The process exit code.
        code: i32,
    },

    /// The stage command was terminated without an exit code.
    #[error("Stage '{stage}' was terminated by a signal")]
    Terminated {
        /// The failing stage.
        stage: String,
    },

    /// The stage process could not be started at all.
    #[error("Stage '{stage}' could not start: {source}")]
    Spawn {
        /// The failing stage.
        stage: String,
        /// The underlying spawn failure.
        #[source]
        source: std::io::Error,
    },

    /// Submission to the batch queue was rejected.
    #[error("Stage '{stage}' could not be submitted to the queue: {reason}")]
    Submission {
        /// The failing stage.
        stage: String,
        /// The queue client's reason.
        reason: String,
    },

    /// The batch queue reported the job as failed.
    #[error("Stage '{stage}' failed on the queue (job {job_id}): {reason}")]
    QueueJobFailed {
        /// The failing stage.
        stage: String,
        /// The queue-assigned job identifier.
        job_id: String,
        /// The queue client's reason.
        reason: String,
    },

    /// The execution environment for the stage is broken.
    #[error("Stage '{stage}' environment error: {reason}")]
    Environment {
        /// The failing stage.
        stage: String,
        /// What is missing or broken.
        reason: String,
    },

    /// The checkpoint record for a completed stage could not be written.
    #[error("Stage '{stage}' completed but its checkpoint could not be written: {reason}")]
    Checkpoint {
        /// The affected stage.
        stage: String,
        /// The underlying store failure.
        reason: String,
    },
}

impl StageExecutionError {
    /// The stage this error belongs to.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::NonZeroExit { stage, .. }
            | Self::Terminated { stage }
            | Self::Spawn { stage, .. }
            | Self::Submission { stage, .. }
            | Self::QueueJobFailed { stage, .. }
            | Self::Environment { stage, .. }
            | Self::Checkpoint { stage, .. } => stage,
        }
    }
}

/// Errors surfaced by a batch queue client.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The job could not be submitted.
    #[error("submission rejected: {0}")]
    Submission(String),

    /// The job status could not be polled.
    #[error("poll failed: {0}")]
    Poll(String),

    /// The job could not be cancelled.
    #[error("cancel failed: {0}")]
    Cancel(String),
}
