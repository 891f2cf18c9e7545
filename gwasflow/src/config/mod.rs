//! Typed run configuration.
//!
//! The configuration file is TOML with four sections: `working_files`
//! (project naming and the projects root), `stage_defaults` (options
//! applied to every stage unless overridden), `pipeline` (invocation
//! options) and `stages` (the stage table). Everything is validated at
//! load time; execution never sees an unchecked mapping.

mod loader;
mod pipeline;
mod stage;

pub use loader::load;
pub use pipeline::{PipelineOptions, Rebuild, Style, Verbosity};
pub use stage::{StageDefaults, StageOptions};

use crate::errors::ConfigurationError;
use crate::registry::StageDef;
use crate::run::RunRequest;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

fn default_pipeline_name() -> String {
    "gwasflow".to_string()
}

/// Project naming and input organisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkingFiles {
    /// Used to generate the timestamped project directory.
    pub project_name: String,
    /// Recorded in the banner; optional.
    #[serde(default)]
    pub project_author: Option<String>,
    /// Root under which project directories are created.
    pub projects_dir: PathBuf,
}

/// The complete, validated configuration for one pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Pipeline name, used in directory and flag-file naming.
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    /// Project naming and roots.
    pub working_files: WorkingFiles,
    /// Defaults applied to every stage.
    #[serde(default)]
    pub stage_defaults: StageDefaults,
    /// Invocation options.
    #[serde(default)]
    pub pipeline: PipelineOptions,
    /// The stage table, keyed by stage name. A `BTreeMap` keeps
    /// declaration handling deterministic.
    pub stages: BTreeMap<String, StageOptions>,
}

impl PipelineConfig {
    /// Checks everything that can be checked without a filesystem.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.pipeline.validate()?;

        if self.pipeline_name.is_empty() || !valid_name(&self.pipeline_name) {
            return Err(ConfigurationError::InvalidOption {
                option: "pipeline_name".to_string(),
                reason: "must be non-empty and use only letters, digits, '.', '_' or '-'"
                    .to_string(),
            });
        }
        if self.stages.is_empty() {
            return Err(ConfigurationError::InvalidOption {
                option: "stages".to_string(),
                reason: "at least one stage is required".to_string(),
            });
        }
        for (name, options) in &self.stages {
            if !valid_name(name) {
                return Err(ConfigurationError::InvalidOption {
                    option: format!("stages.{name}"),
                    reason: "stage names may use only letters, digits, '.', '_' or '-'"
                        .to_string(),
                });
            }
            if options.command.trim().is_empty() {
                return Err(ConfigurationError::InvalidOption {
                    option: format!("stages.{name}.command"),
                    reason: "command must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Merges stage options with the defaults into stage definitions.
    #[must_use]
    pub fn stage_defs(&self) -> Vec<StageDef> {
        self.stages
            .iter()
            .map(|(name, options)| options.clone().into_def(name, &self.stage_defaults))
            .collect()
    }

    /// The run request encoded in the pipeline options.
    #[must_use]
    pub fn run_request(&self) -> RunRequest {
        RunRequest::new(
            self.pipeline.end.clone(),
            self.pipeline.force.clone(),
            self.pipeline.rebuild,
        )
    }
}

/// Stage and pipeline names end up in file names; keep them boring.
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
