//! Per-run project context and filesystem layout.
//!
//! One `RunContext` is created per pipeline invocation and passed
//! explicitly to every component that needs it. It owns the timestamped
//! project directory, the log/plots/checkpoint subdirectories, the
//! start flag file, and the run-scoped template variables.

use crate::errors::GwasflowError;
use crate::registry::StageDef;
use crate::template::TemplateVars;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Run-scoped placeholder names available to every stage command.
pub const RUN_CONTEXT_KEYS: &[&str] = &[
    "project_dir",
    "log_dir",
    "plots_dir",
    "timestamp",
    "allowed_samples",
];

/// Builder for [`RunContext`]; `build` creates the directory layout.
#[derive(Debug)]
pub struct RunContextBuilder {
    projects_root: PathBuf,
    project: String,
    pipeline: String,
    log_dir: PathBuf,
    restrict_samples: bool,
    allowed_samples: Vec<String>,
}

impl RunContextBuilder {
    /// Starts a builder for the given project and pipeline names.
    #[must_use]
    pub fn new(
        projects_root: impl Into<PathBuf>,
        project: impl Into<String>,
        pipeline: impl Into<String>,
    ) -> Self {
        Self {
            projects_root: projects_root.into(),
            project: project.into(),
            pipeline: pipeline.into(),
            log_dir: PathBuf::from("log"),
            restrict_samples: false,
            allowed_samples: Vec::new(),
        }
    }

    /// Sets the log directory (relative paths resolve against the
    /// project directory).
    #[must_use]
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Sets the sample restriction surface.
    #[must_use]
    pub fn samples(mut self, restrict: bool, allowed: Vec<String>) -> Self {
        self.restrict_samples = restrict;
        self.allowed_samples = allowed;
        self
    }

    /// Creates the project directory tree and the start flag file.
    pub fn build(self) -> Result<RunContext, GwasflowError> {
        let started_at = Local::now();
        let dir_name = format!(
            "{}-{}-{}",
            self.project,
            self.pipeline,
            started_at.format("%Y-%m-%d_%H-%M-%S")
        );
        let project_dir = self.projects_root.join(dir_name);

        let log_dir = if self.log_dir.is_absolute() {
            self.log_dir.clone()
        } else {
            project_dir.join(&self.log_dir)
        };
        let plots_dir = project_dir.join(format!("{}_plots", self.pipeline));
        let checkpoint_dir = project_dir.join("checkpoints");

        std::fs::create_dir_all(&project_dir)?;
        std::fs::create_dir_all(&log_dir)?;
        std::fs::create_dir_all(&plots_dir)?;
        std::fs::create_dir_all(&checkpoint_dir)?;

        // Flag file signalling that the pipeline has started.
        let start_flag = project_dir.join(format!("{}.Start", self.pipeline));
        std::fs::write(&start_flag, b"")?;

        Ok(RunContext {
            run_id: Uuid::new_v4(),
            project: self.project,
            pipeline: self.pipeline,
            started_at,
            project_dir,
            log_dir,
            plots_dir,
            checkpoint_dir,
            start_flag,
            restrict_samples: self.restrict_samples,
            allowed_samples: self.allowed_samples,
        })
    }
}

/// Everything scoped to one pipeline invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    project: String,
    pipeline: String,
    started_at: DateTime<Local>,
    project_dir: PathBuf,
    log_dir: PathBuf,
    plots_dir: PathBuf,
    checkpoint_dir: PathBuf,
    start_flag: PathBuf,
    restrict_samples: bool,
    allowed_samples: Vec<String>,
}

impl RunContext {
    /// The unique identifier of this run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The project name.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// The timestamped project directory for this run.
    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Where queue scripts and per-stage stdout/stderr dumps go.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Where plotting stages put their output.
    #[must_use]
    pub fn plots_dir(&self) -> &Path {
        &self.plots_dir
    }

    /// Where checkpoint record files live.
    #[must_use]
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// The flag file written when the pipeline starts.
    #[must_use]
    pub fn start_flag(&self) -> &Path {
        &self.start_flag
    }

    /// Resolves a declared stage path against the project directory.
    #[must_use]
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    /// Run-scoped timestamp, as used in the project directory name.
    #[must_use]
    pub fn timestamp(&self) -> String {
        self.started_at.format("%Y-%m-%d_%H-%M-%S").to_string()
    }

    /// Template variables for one stage's command.
    ///
    /// Declared inputs/outputs are exposed resolved: `{input}` (alias of
    /// `{input1}`), `{input2}`, ... plus space-joined `{inputs}`, and the
    /// same for outputs.
    #[must_use]
    pub fn stage_vars(&self, stage: &StageDef) -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.set("project_dir", self.project_dir.display().to_string());
        vars.set("log_dir", self.log_dir.display().to_string());
        vars.set("plots_dir", self.plots_dir.display().to_string());
        vars.set("timestamp", self.timestamp());
        vars.set(
            "allowed_samples",
            if self.restrict_samples {
                self.allowed_samples.join(",")
            } else {
                String::new()
            },
        );
        vars.set("name", stage.name.clone());

        let inputs: Vec<String> = stage
            .inputs
            .iter()
            .map(|p| self.resolve_path(p).display().to_string())
            .collect();
        let outputs: Vec<String> = stage
            .outputs
            .iter()
            .map(|p| self.resolve_path(p).display().to_string())
            .collect();

        vars.set("inputs", inputs.join(" "));
        vars.set("outputs", outputs.join(" "));
        if let Some(first) = inputs.first() {
            vars.set("input", first.clone());
        }
        for (i, path) in inputs.iter().enumerate() {
            vars.set(format!("input{}", i + 1), path.clone());
        }
        if let Some(first) = outputs.first() {
            vars.set("output", first.clone());
        }
        for (i, path) in outputs.iter().enumerate() {
            vars.set(format!("output{}", i + 1), path.clone());
        }
        vars
    }
}

/// Append-only log of every job the pipeline dispatches.
#[derive(Debug)]
pub struct JobLog {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JobLog {
    /// Opens (or creates) the job log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GwasflowError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// The log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry for a dispatched stage.
    pub fn record(&self, stage: &str, action: &str, command: &str) -> Result<(), GwasflowError> {
        let mut file = self.file.lock();
        writeln!(
            file,
            "[{}] {stage} {action}: {command}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        Ok(())
    }
}
