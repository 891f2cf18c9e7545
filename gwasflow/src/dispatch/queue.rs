//! Batch queue capability interface.
//!
//! The queue-system protocol itself is an external collaborator; the
//! dispatcher only needs submit/poll/cancel semantics from it. Local and
//! distributed execution share the rest of the run logic.

use crate::errors::QueueError;
use crate::registry::ResourceRequest;
use async_trait::async_trait;
use std::path::PathBuf;

/// A job description handed to the queue client.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Job name shown by the queue system.
    pub name: String,
    /// The fully substituted command.
    pub command: String,
    /// Walltime/memory/queue request.
    pub resources: ResourceRequest,
    /// Environment modules to load before the command runs.
    pub modules: Vec<String>,
    /// Where the queue system should put stdout/stderr dumps.
    pub log_dir: PathBuf,
}

impl JobRequest {
    /// Renders the job as a submission script.
    ///
    /// Queue clients are free to ignore this and build their own
    /// payload, but it keeps simple clients trivial.
    #[must_use]
    pub fn script(&self) -> String {
        let mut script = String::from("#!/bin/sh\n");
        script.push_str(&format!("#PBS -N {}\n", self.name));
        script.push_str(&format!("#PBS -l walltime={}\n", self.resources.walltime));
        script.push_str(&format!("#PBS -l mem={}gb\n", self.resources.mem_in_gb));
        if let Some(queue) = &self.resources.queue {
            script.push_str(&format!("#PBS -q {queue}\n"));
        }
        script.push_str(&format!("#PBS -o {}\n", self.log_dir.display()));
        script.push_str(&format!("#PBS -e {}\n", self.log_dir.display()));
        for module in &self.modules {
            script.push_str(&format!("module load {module}\n"));
        }
        script.push_str(&self.command);
        script.push('\n');
        script
    }
}

/// Identifier the queue system assigned to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    /// The queue-assigned job identifier.
    pub id: String,
}

impl JobHandle {
    /// Creates a handle from a queue-assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Observed state of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in the queue.
    Queued,
    /// Running on a node.
    Running,
    /// Finished with the given exit code.
    Completed {
        /// The job's exit code.
        exit_code: i32,
    },
    /// The queue system gave up on the job.
    Failed {
        /// The queue system's reason.
        reason: String,
    },
}

impl JobState {
    /// Returns true once the queue will report nothing further.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Submit/poll/cancel capability of a batch queue system.
#[async_trait]
pub trait BatchQueue: Send + Sync + std::fmt::Debug {
    /// Submits a job, returning its handle.
    async fn submit(&self, job: JobRequest) -> Result<JobHandle, QueueError>;

    /// Polls a submitted job's state.
    async fn poll(&self, handle: &JobHandle) -> Result<JobState, QueueError>;

    /// Cancels a submitted job.
    async fn cancel(&self, handle: &JobHandle) -> Result<(), QueueError>;
}

/// Runs "distributed" jobs as local subprocesses.
///
/// Stands in for a cluster client when none is configured: submission
/// returns immediately and polling reports completion, so the
/// dispatcher's submit/poll loop is exercised unchanged. Stdout and
/// stderr land in `<name>.o<id>` / `<name>.e<id>` under the job's log
/// directory, mirroring queue-system conventions.
#[derive(Debug, Default)]
pub struct LocalQueue {
    jobs: std::sync::Arc<dashmap::DashMap<u64, JobState>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl LocalQueue {
    /// Creates an empty local queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchQueue for LocalQueue {
    async fn submit(&self, job: JobRequest) -> Result<JobHandle, QueueError> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        self.jobs.insert(id, JobState::Queued);

        let jobs = std::sync::Arc::clone(&self.jobs);
        let stdout_path = job.log_dir.join(format!("{}.o{id}", job.name));
        let stderr_path = job.log_dir.join(format!("{}.e{id}", job.name));
        let command = job.command;
        tokio::spawn(async move {
            jobs.insert(id, JobState::Running);
            let state = match run_job(&command, &stdout_path, &stderr_path).await {
                Ok(exit_code) => JobState::Completed { exit_code },
                Err(reason) => JobState::Failed { reason },
            };
            jobs.insert(id, state);
        });

        Ok(JobHandle::new(id.to_string()))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobState, QueueError> {
        let id: u64 = handle
            .id
            .parse()
            .map_err(|_| QueueError::Poll(format!("unknown job '{}'", handle.id)))?;
        self.jobs
            .get(&id)
            .map(|state| state.clone())
            .ok_or_else(|| QueueError::Poll(format!("unknown job '{}'", handle.id)))
    }

    async fn cancel(&self, _handle: &JobHandle) -> Result<(), QueueError> {
        Ok(())
    }
}

async fn run_job(
    command: &str,
    stdout_path: &std::path::Path,
    stderr_path: &std::path::Path,
) -> Result<i32, String> {
    let stdout = std::fs::File::create(stdout_path).map_err(|err| err.to_string())?;
    let stderr = std::fs::File::create(stderr_path).map_err(|err| err.to_string())?;
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::from(stdout))
        .stderr(std::process::Stdio::from(stderr))
        .status()
        .await
        .map_err(|err| err.to_string())?;
    status
        .code()
        .ok_or_else(|| "terminated by a signal".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_renders_resources_and_modules() {
        let job = JobRequest {
            name: "assoc_test".to_string(),
            command: "plink --assoc".to_string(),
            resources: ResourceRequest {
                walltime: "6:00:00".to_string(),
                mem_in_gb: 16,
                queue: Some("WitsLong".to_string()),
            },
            modules: vec!["gwaspipe".to_string(), "plink/1.9".to_string()],
            log_dir: PathBuf::from("/proj/log"),
        };

        let script = job.script();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("#PBS -N assoc_test"));
        assert!(script.contains("#PBS -l walltime=6:00:00"));
        assert!(script.contains("#PBS -l mem=16gb"));
        assert!(script.contains("#PBS -q WitsLong"));
        assert!(script.contains("module load gwaspipe\nmodule load plink/1.9\n"));
        assert!(script.ends_with("plink --assoc\n"));
    }

    #[test]
    fn script_omits_queue_when_unset() {
        let job = JobRequest {
            name: "local-ish".to_string(),
            command: "true".to_string(),
            resources: ResourceRequest::default(),
            modules: Vec::new(),
            log_dir: PathBuf::from("log"),
        };
        assert!(!job.script().contains("#PBS -q"));
    }

    #[tokio::test]
    async fn local_queue_runs_jobs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let queue = LocalQueue::new();
        let handle = queue
            .submit(JobRequest {
                name: "hello".to_string(),
                command: "echo hi".to_string(),
                resources: ResourceRequest::default(),
                modules: Vec::new(),
                log_dir: dir.path().to_path_buf(),
            })
            .await
            .unwrap();

        let state = wait_terminal(&queue, &handle).await;
        assert_eq!(state, JobState::Completed { exit_code: 0 });

        let dumped = std::fs::read_to_string(dir.path().join(format!("hello.o{}", handle.id)))
            .unwrap();
        assert_eq!(dumped.trim(), "hi");
    }

    #[tokio::test]
    async fn local_queue_reports_nonzero_exits() {
        let dir = tempfile::tempdir().unwrap();
        let queue = LocalQueue::new();
        let handle = queue
            .submit(JobRequest {
                name: "bad".to_string(),
                command: "exit 4".to_string(),
                resources: ResourceRequest::default(),
                modules: Vec::new(),
                log_dir: dir.path().to_path_buf(),
            })
            .await
            .unwrap();

        let state = wait_terminal(&queue, &handle).await;
        assert_eq!(state, JobState::Completed { exit_code: 4 });
    }

    #[tokio::test]
    async fn polling_an_unknown_job_fails() {
        let queue = LocalQueue::new();
        let err = queue.poll(&JobHandle::new("999")).await.unwrap_err();
        assert!(matches!(err, QueueError::Poll(_)));
    }

    async fn wait_terminal(queue: &LocalQueue, handle: &JobHandle) -> JobState {
        loop {
            let state = queue.poll(handle).await.unwrap();
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed { exit_code: 1 }.is_terminal());
        assert!(JobState::Failed {
            reason: "node died".to_string()
        }
        .is_terminal());
    }
}
