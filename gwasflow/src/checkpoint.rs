//! Stage completion checkpoints.
//!
//! A checkpoint is persisted evidence that a stage previously completed
//! successfully. The filesystem store keeps one JSON record file per
//! stage, so concurrent terminal outcomes of distinct stages never touch
//! the same file.

use crate::errors::GwasflowError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Hashes a fully substituted command for checkpoint comparison.
///
/// A checkpoint recorded for a different command text does not count as
/// completion evidence, so editing a stage's command invalidates its
/// checkpoint even when file timestamps look fresh.
#[must_use]
pub fn command_digest(command: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(command.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Per-stage completion marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The stage this record belongs to.
    pub stage: String,
    /// The run that produced the record.
    pub run_id: Uuid,
    /// When the stage completed.
    pub completed_at: DateTime<Utc>,
    /// The process exit status (0 for success).
    pub exit_code: i32,
    /// Digest of the command that ran.
    pub command_digest: String,
}

impl CheckpointRecord {
    /// Creates a success record stamped with the current time.
    #[must_use]
    pub fn new(stage: impl Into<String>, run_id: Uuid, command_digest: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            run_id,
            completed_at: Utc::now(),
            exit_code: 0,
            command_digest: command_digest.into(),
        }
    }

    /// Sets the exit code.
    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// The completion time as a filesystem-comparable instant.
    #[must_use]
    pub fn completed_at_system(&self) -> std::time::SystemTime {
        self.completed_at.into()
    }
}

/// Storage backend for checkpoint records.
pub trait CheckpointStore: Send + Sync + std::fmt::Debug {
    /// Loads the record for a stage, if any.
    fn load(&self, stage: &str) -> Result<Option<CheckpointRecord>, GwasflowError>;

    /// Writes (or replaces) the record for a stage.
    fn record(&self, record: &CheckpointRecord) -> Result<(), GwasflowError>;

    /// Removes the record for a stage.
    fn forget(&self, stage: &str) -> Result<(), GwasflowError>;
}

/// Filesystem checkpoint store, one record file per stage.
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, GwasflowError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The store's root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, stage: &str) -> PathBuf {
        self.dir.join(format!("{stage}.checkpoint.json"))
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn load(&self, stage: &str) -> Result<Option<CheckpointRecord>, GwasflowError> {
        match std::fs::read(self.record_path(stage)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn record(&self, record: &CheckpointRecord) -> Result<(), GwasflowError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        std::fs::write(self.record_path(&record.stage), bytes)?;
        Ok(())
    }

    fn forget(&self, stage: &str) -> Result<(), GwasflowError> {
        match std::fs::remove_file(self.record_path(stage)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory checkpoint store for tests.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: DashMap<String, CheckpointRecord>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, stage: &str) -> Result<Option<CheckpointRecord>, GwasflowError> {
        Ok(self.entries.get(stage).map(|entry| entry.value().clone()))
    }

    fn record(&self, record: &CheckpointRecord) -> Result<(), GwasflowError> {
        self.entries.insert(record.stage.clone(), record.clone());
        Ok(())
    }

    fn forget(&self, stage: &str) -> Result<(), GwasflowError> {
        self.entries.remove(stage);
        Ok(())
    }
}
