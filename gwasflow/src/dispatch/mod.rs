//! Stage dispatch: running or submitting stale stages.
//!
//! The dispatcher is handed a stage and its fully substituted command.
//! It loads environment modules, executes locally or drives the batch
//! queue to completion, and writes the checkpoint record on success.

mod local;
mod queue;

pub use queue::{BatchQueue, JobHandle, JobRequest, JobState, LocalQueue};

use crate::checkpoint::{command_digest, CheckpointRecord, CheckpointStore};
use crate::config::Style;
use crate::errors::StageExecutionError;
use crate::project::JobLog;
use crate::registry::StageDef;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What the dispatcher does with a stale stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStyle {
    /// Execute (or submit) for real.
    Execute,
    /// Log the command without executing; leaves no checkpoint.
    Print,
    /// Touch declared outputs and checkpoint without executing.
    Touch,
}

impl DispatchStyle {
    /// Maps a configured run style to a dispatch style. `Flowchart`
    /// never dispatches, so it has no mapping.
    #[must_use]
    pub fn from_run_style(style: Style) -> Option<Self> {
        match style {
            Style::Run => Some(Self::Execute),
            Style::Print => Some(Self::Print),
            Style::Touchfiles => Some(Self::Touch),
            Style::Flowchart => None,
        }
    }
}

/// How a successful stage was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    /// Ran as a local subprocess.
    Executed,
    /// Ran via batch-queue submission.
    Submitted,
    /// Dry run: command logged only.
    Printed,
    /// Outputs touched, command not run.
    Touched,
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    /// The stage that ran.
    pub stage: String,
    /// How it was carried out.
    pub action: DispatchAction,
    /// Exit code, when something actually ran.
    pub exit_code: Option<i32>,
    /// Queue job identifier, for submitted stages.
    pub job_id: Option<String>,
    /// Wall-clock dispatch time in milliseconds.
    pub duration_ms: f64,
}

/// Executes stale stages and records their checkpoints.
#[derive(Debug)]
pub struct Dispatcher {
    style: DispatchStyle,
    queue: Arc<dyn BatchQueue>,
    checkpoints: Arc<dyn CheckpointStore>,
    log_dir: PathBuf,
    base_dir: PathBuf,
    job_log: Option<Arc<JobLog>>,
    poll_interval: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// `log_dir` receives per-stage stdout/stderr dumps; `base_dir`
    /// anchors relative output paths for `touchfiles`.
    #[must_use]
    pub fn new(
        style: DispatchStyle,
        queue: Arc<dyn BatchQueue>,
        checkpoints: Arc<dyn CheckpointStore>,
        log_dir: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            style,
            queue,
            checkpoints,
            log_dir: log_dir.into(),
            base_dir: base_dir.into(),
            job_log: None,
            poll_interval: Duration::from_secs(10),
        }
    }

    /// Attaches the job log.
    #[must_use]
    pub fn with_job_log(mut self, job_log: Arc<JobLog>) -> Self {
        self.job_log = Some(job_log);
        self
    }

    /// Sets the queue polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Dispatches one stale stage.
    ///
    /// `command` is the fully substituted command (before module
    /// prefixing). On success a checkpoint is written for every style
    /// except `Print`.
    pub async fn dispatch(
        &self,
        stage: &StageDef,
        command: &str,
        run_id: Uuid,
    ) -> Result<StageOutcome, StageExecutionError> {
        let start = Instant::now();

        match self.style {
            DispatchStyle::Print => {
                self.log_job(stage, "would run", command);
                tracing::info!(stage = %stage.name, command, "dry run");
                Ok(StageOutcome {
                    stage: stage.name.clone(),
                    action: DispatchAction::Printed,
                    exit_code: None,
                    job_id: None,
                    duration_ms: elapsed_ms(start),
                })
            }
            DispatchStyle::Touch => {
                self.touch_outputs(stage)?;
                self.write_checkpoint(stage, command, run_id)?;
                self.log_job(stage, "touched", command);
                tracing::info!(stage = %stage.name, "outputs touched");
                Ok(StageOutcome {
                    stage: stage.name.clone(),
                    action: DispatchAction::Touched,
                    exit_code: None,
                    job_id: None,
                    duration_ms: elapsed_ms(start),
                })
            }
            DispatchStyle::Execute => {
                let full_command = with_modules(&stage.modules, command);
                let (action, exit_code, job_id) = if stage.distributed {
                    let job_id = self.submit_and_wait(stage, &full_command).await?;
                    (DispatchAction::Submitted, Some(0), Some(job_id))
                } else {
                    self.log_job(stage, "run", &full_command);
                    let code = local::run_local(&stage.name, &full_command, &self.log_dir).await?;
                    (DispatchAction::Executed, Some(code), None)
                };

                self.write_checkpoint(stage, command, run_id)?;
                Ok(StageOutcome {
                    stage: stage.name.clone(),
                    action,
                    exit_code,
                    job_id,
                    duration_ms: elapsed_ms(start),
                })
            }
        }
    }

    /// Submits to the queue and polls until the job reaches a terminal
    /// state. Returns the queue job id.
    async fn submit_and_wait(
        &self,
        stage: &StageDef,
        command: &str,
    ) -> Result<String, StageExecutionError> {
        let job = JobRequest {
            name: stage.label().to_string(),
            command: command.to_string(),
            resources: stage.resources.clone(),
            modules: stage.modules.clone(),
            log_dir: self.log_dir.clone(),
        };
        self.log_job(stage, "submit", command);

        let handle = self
            .queue
            .submit(job)
            .await
            .map_err(|err| StageExecutionError::Submission {
                stage: stage.name.clone(),
                reason: err.to_string(),
            })?;
        tracing::info!(stage = %stage.name, job_id = %handle.id, "job submitted");

        loop {
            let state =
                self.queue
                    .poll(&handle)
                    .await
                    .map_err(|err| StageExecutionError::QueueJobFailed {
                        stage: stage.name.clone(),
                        job_id: handle.id.clone(),
                        reason: err.to_string(),
                    })?;
            match state {
                JobState::Completed { exit_code: 0 } => return Ok(handle.id),
                JobState::Completed { exit_code } => {
                    return Err(StageExecutionError::NonZeroExit {
                        stage: stage.name.clone(),
                        code: exit_code,
                    });
                }
                JobState::Failed { reason } => {
                    return Err(StageExecutionError::QueueJobFailed {
                        stage: stage.name.clone(),
                        job_id: handle.id.clone(),
                        reason,
                    });
                }
                JobState::Queued | JobState::Running => {
                    tracing::debug!(stage = %stage.name, job_id = %handle.id, ?state, "waiting on queue");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    fn touch_outputs(&self, stage: &StageDef) -> Result<(), StageExecutionError> {
        for declared in &stage.outputs {
            let path = if declared.is_absolute() {
                declared.clone()
            } else {
                self.base_dir.join(declared)
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    StageExecutionError::Environment {
                        stage: stage.name.clone(),
                        reason: format!("cannot create {}: {err}", parent.display()),
                    }
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| StageExecutionError::Environment {
                    stage: stage.name.clone(),
                    reason: format!("cannot touch {}: {err}", path.display()),
                })?;
            file.set_modified(std::time::SystemTime::now()).map_err(|err| {
                StageExecutionError::Environment {
                    stage: stage.name.clone(),
                    reason: format!("cannot touch {}: {err}", path.display()),
                }
            })?;
        }
        Ok(())
    }

    fn write_checkpoint(
        &self,
        stage: &StageDef,
        command: &str,
        run_id: Uuid,
    ) -> Result<(), StageExecutionError> {
        let record = CheckpointRecord::new(&stage.name, run_id, command_digest(command));
        self.checkpoints
            .record(&record)
            .map_err(|err| StageExecutionError::Checkpoint {
                stage: stage.name.clone(),
                reason: err.to_string(),
            })
    }

    fn log_job(&self, stage: &StageDef, action: &str, command: &str) {
        if let Some(job_log) = &self.job_log {
            if let Err(err) = job_log.record(&stage.name, action, command) {
                tracing::warn!(stage = %stage.name, error = %err, "job log write failed");
            }
        }
    }
}

/// Prefixes `module load` calls for each required environment module.
fn with_modules(modules: &[String], command: &str) -> String {
    if modules.is_empty() {
        return command.to_string();
    }
    let mut parts: Vec<String> = modules
        .iter()
        .map(|module| format!("module load {module}"))
        .collect();
    parts.push(command.to_string());
    parts.join(" && ")
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::testing::RecordingQueue;

    fn dispatcher(
        dir: &std::path::Path,
        style: DispatchStyle,
        queue: Arc<RecordingQueue>,
    ) -> (Dispatcher, Arc<InMemoryCheckpointStore>) {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        (
            Dispatcher::new(style, queue, checkpoints.clone(), dir, dir)
                .with_poll_interval(Duration::from_millis(5)),
            checkpoints,
        )
    }

    #[test]
    fn module_prefixing() {
        assert_eq!(with_modules(&[], "plink"), "plink");
        assert_eq!(
            with_modules(&["gwaspipe".to_string(), "R/4.2".to_string()], "plink"),
            "module load gwaspipe && module load R/4.2 && plink"
        );
    }

    #[tokio::test]
    async fn local_execution_writes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, checkpoints) =
            dispatcher(dir.path(), DispatchStyle::Execute, Arc::new(RecordingQueue::new()));

        let stage = StageDef::new("task1", "echo done");
        let outcome = dispatcher
            .dispatch(&stage, "echo done", Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.action, DispatchAction::Executed);
        assert_eq!(outcome.exit_code, Some(0));
        let record = checkpoints.load("task1").unwrap().unwrap();
        assert_eq!(record.command_digest, command_digest("echo done"));
    }

    #[tokio::test]
    async fn failed_command_leaves_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, checkpoints) =
            dispatcher(dir.path(), DispatchStyle::Execute, Arc::new(RecordingQueue::new()));

        let stage = StageDef::new("bad", "exit 2");
        let err = dispatcher
            .dispatch(&stage, "exit 2", Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, StageExecutionError::NonZeroExit { code: 2, .. }));
        assert!(checkpoints.is_empty());
    }

    #[tokio::test]
    async fn print_style_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("should_not_exist");
        let (dispatcher, checkpoints) =
            dispatcher(dir.path(), DispatchStyle::Print, Arc::new(RecordingQueue::new()));

        let command = format!("touch {}", marker.display());
        let stage = StageDef::new("dry", command.as_str());
        let outcome = dispatcher
            .dispatch(&stage, &command, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.action, DispatchAction::Printed);
        assert!(!marker.exists());
        assert!(checkpoints.is_empty());
    }

    #[tokio::test]
    async fn touch_style_creates_outputs_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, checkpoints) =
            dispatcher(dir.path(), DispatchStyle::Touch, Arc::new(RecordingQueue::new()));

        let stage = StageDef::new("mk", "false").with_output("nested/out.txt");
        let outcome = dispatcher
            .dispatch(&stage, "false", Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.action, DispatchAction::Touched);
        assert!(dir.path().join("nested/out.txt").is_file());
        assert_eq!(checkpoints.len(), 1);
    }

    #[tokio::test]
    async fn distributed_stage_goes_through_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(RecordingQueue::new());
        let (dispatcher, checkpoints) =
            dispatcher(dir.path(), DispatchStyle::Execute, queue.clone());

        let stage = StageDef::new("assoc", "plink --assoc")
            .distributed(crate::registry::ResourceRequest {
                walltime: "2:00:00".to_string(),
                mem_in_gb: 8,
                queue: Some("batch".to_string()),
            })
            .with_modules(["plink/1.9"]);
        let outcome = dispatcher
            .dispatch(&stage, "plink --assoc", Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.action, DispatchAction::Submitted);
        assert!(outcome.job_id.is_some());
        assert_eq!(checkpoints.len(), 1);

        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].resources.mem_in_gb, 8);
        // Module prefixing happened before submission.
        assert!(jobs[0].command.starts_with("module load plink/1.9 && "));
    }

    #[tokio::test]
    async fn queue_failure_is_reported_per_stage() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(RecordingQueue::new().with_exit_code(9));
        let (dispatcher, checkpoints) =
            dispatcher(dir.path(), DispatchStyle::Execute, queue);

        let stage = StageDef::new("assoc", "plink --assoc")
            .distributed(crate::registry::ResourceRequest::default());
        let err = dispatcher
            .dispatch(&stage, "plink --assoc", Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, StageExecutionError::NonZeroExit { code: 9, .. }));
        assert!(checkpoints.is_empty());
    }

    #[tokio::test]
    async fn rejected_submission_is_a_submission_error() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(RecordingQueue::new().rejecting_submissions());
        let (dispatcher, _checkpoints) =
            dispatcher(dir.path(), DispatchStyle::Execute, queue);

        let stage = StageDef::new("assoc", "plink --assoc")
            .distributed(crate::registry::ResourceRequest::default());
        let err = dispatcher
            .dispatch(&stage, "plink --assoc", Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, StageExecutionError::Submission { .. }));
    }
}
