//! Staleness resolution: deciding whether a stage needs to (re)run.
//!
//! A stage is up to date only when file evidence proves it: every
//! declared output exists, no output predates any declared input, and a
//! checkpoint recorded for the same command is itself no older than the
//! inputs. Timestamp ties count as up to date, so coarse filesystem
//! clocks do not cause spurious reruns.

use crate::checkpoint::CheckpointStore;
use crate::errors::GwasflowError;
use crate::registry::StageDef;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Why a stage must (re)run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The stage is in the forced-rerun set.
    Forced,
    /// No declared outputs, so completion cannot be proven by files.
    NoDeclaredOutputs,
    /// A declared output is missing.
    MissingOutput(PathBuf),
    /// A declared input is missing (an upstream stage must produce it).
    MissingInput(PathBuf),
    /// An output is strictly older than an input.
    OutputOlderThanInput {
        /// The out-of-date output.
        output: PathBuf,
        /// The newer input.
        input: PathBuf,
    },
    /// No checkpoint record exists for the stage.
    NoCheckpoint,
    /// The checkpoint was recorded for a different command.
    CommandChanged,
    /// The checkpoint predates an input.
    CheckpointOlderThanInput(PathBuf),
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forced => write!(f, "forced rerun"),
            Self::NoDeclaredOutputs => write!(f, "no declared outputs"),
            Self::MissingOutput(path) => {
                write!(f, "missing output {}", path.display())
            }
            Self::MissingInput(path) => {
                write!(f, "missing input {}", path.display())
            }
            Self::OutputOlderThanInput { output, input } => write!(
                f,
                "output {} is older than input {}",
                output.display(),
                input.display()
            ),
            Self::NoCheckpoint => write!(f, "no checkpoint"),
            Self::CommandChanged => write!(f, "command changed since last run"),
            Self::CheckpointOlderThanInput(path) => {
                write!(f, "checkpoint predates input {}", path.display())
            }
        }
    }
}

/// The resolver's verdict for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// All file evidence is current; the stage can be skipped.
    UpToDate,
    /// The stage must run, for the given reason.
    Stale(StaleReason),
}

impl Freshness {
    /// Returns true if the stage must run.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

/// Decides per stage whether declared outputs are current.
#[derive(Debug, Clone)]
pub struct StalenessResolver {
    store: Arc<dyn CheckpointStore>,
    base_dir: PathBuf,
}

impl StalenessResolver {
    /// Creates a resolver reading checkpoints from `store` and resolving
    /// relative paths against `base_dir`.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            base_dir: base_dir.into(),
        }
    }

    /// Assesses one stage.
    ///
    /// `command_digest` is the digest of the fully substituted command
    /// that would run now; `forced` short-circuits everything.
    pub fn assess(
        &self,
        stage: &StageDef,
        command_digest: &str,
        forced: bool,
    ) -> Result<Freshness, GwasflowError> {
        if forced {
            return Ok(Freshness::Stale(StaleReason::Forced));
        }
        if stage.outputs.is_empty() {
            return Ok(Freshness::Stale(StaleReason::NoDeclaredOutputs));
        }

        let mut outputs = Vec::with_capacity(stage.outputs.len());
        for declared in &stage.outputs {
            let path = self.resolve(declared);
            match mtime(&path)? {
                Some(time) => outputs.push((path, time)),
                None => return Ok(Freshness::Stale(StaleReason::MissingOutput(path))),
            }
        }

        let mut inputs = Vec::with_capacity(stage.inputs.len());
        for declared in &stage.inputs {
            let path = self.resolve(declared);
            match mtime(&path)? {
                Some(time) => inputs.push((path, time)),
                None => return Ok(Freshness::Stale(StaleReason::MissingInput(path))),
            }
        }

        // Non-strict comparison: equal timestamps are current.
        for (out_path, out_time) in &outputs {
            for (in_path, in_time) in &inputs {
                if out_time < in_time {
                    return Ok(Freshness::Stale(StaleReason::OutputOlderThanInput {
                        output: out_path.clone(),
                        input: in_path.clone(),
                    }));
                }
            }
        }

        let Some(record) = self.store.load(&stage.name)? else {
            return Ok(Freshness::Stale(StaleReason::NoCheckpoint));
        };
        if record.command_digest != command_digest {
            return Ok(Freshness::Stale(StaleReason::CommandChanged));
        }
        let completed = record.completed_at_system();
        for (in_path, in_time) in &inputs {
            if completed < *in_time {
                return Ok(Freshness::Stale(StaleReason::CheckpointOlderThanInput(
                    in_path.clone(),
                )));
            }
        }

        Ok(Freshness::UpToDate)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

fn mtime(path: &Path) -> Result<Option<SystemTime>, GwasflowError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
