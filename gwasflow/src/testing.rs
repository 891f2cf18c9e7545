//! Test doubles for the queue and other collaborators.
//!
//! These live in the library (not behind `cfg(test)`) so downstream
//! pipelines can drive the controller in their own tests.

use crate::dispatch::{BatchQueue, JobHandle, JobRequest, JobState};
use crate::errors::QueueError;
use async_trait::async_trait;
use parking_lot::Mutex;

/// A queue client that records submissions and completes them
/// immediately with a configurable exit code.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<JobRequest>>,
    exit_code: i32,
    reject_submissions: bool,
}

impl RecordingQueue {
    /// Creates a queue whose jobs complete with exit code 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every job complete with the given exit code.
    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Makes every submission fail.
    #[must_use]
    pub fn rejecting_submissions(mut self) -> Self {
        self.reject_submissions = true;
        self
    }

    /// The job requests submitted so far.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobRequest> {
        self.jobs.lock().clone()
    }

    /// How many jobs were submitted.
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.jobs.lock().len()
    }
}

#[async_trait]
impl BatchQueue for RecordingQueue {
    async fn submit(&self, job: JobRequest) -> Result<JobHandle, QueueError> {
        if self.reject_submissions {
            return Err(QueueError::Submission("queue unavailable".to_string()));
        }
        let mut jobs = self.jobs.lock();
        jobs.push(job);
        Ok(JobHandle::new(format!("job-{}", jobs.len())))
    }

    async fn poll(&self, _handle: &JobHandle) -> Result<JobState, QueueError> {
        Ok(JobState::Completed {
            exit_code: self.exit_code,
        })
    }

    async fn cancel(&self, _handle: &JobHandle) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceRequest;
    use std::path::PathBuf;

    fn job(name: &str) -> JobRequest {
        JobRequest {
            name: name.to_string(),
            command: "true".to_string(),
            resources: ResourceRequest::default(),
            modules: Vec::new(),
            log_dir: PathBuf::from("log"),
        }
    }

    #[test]
    fn records_submissions_in_order() {
        tokio_test::block_on(async {
            let queue = RecordingQueue::new();
            let first = queue.submit(job("a")).await.unwrap();
            let second = queue.submit(job("b")).await.unwrap();

            assert_ne!(first.id, second.id);
            assert_eq!(queue.submitted(), 2);
            assert_eq!(queue.jobs()[0].name, "a");
        });
    }

    #[test]
    fn scripted_exit_code_is_returned_on_poll() {
        tokio_test::block_on(async {
            let queue = RecordingQueue::new().with_exit_code(7);
            let handle = queue.submit(job("a")).await.unwrap();
            let state = queue.poll(&handle).await.unwrap();
            assert_eq!(state, JobState::Completed { exit_code: 7 });
        });
    }
}
