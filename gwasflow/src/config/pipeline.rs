//! Pipeline-level run options.

use crate::errors::ConfigurationError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a pipeline invocation actually does with the stale stage set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    /// Render the stage graph as Graphviz DOT and stop.
    Flowchart,
    /// Log the commands that would run, without executing anything.
    Print,
    /// Execute (or submit) the stale stages.
    #[default]
    Run,
    /// Touch declared outputs and write checkpoints without running
    /// commands.
    Touchfiles,
}

/// How the stage set to execute is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Rebuild {
    /// The full dependency closure of the end targets; staleness
    /// propagates forward from the earliest out-of-date ancestor. The
    /// conservative default: brings all intermediates current.
    #[default]
    #[value(name = "fromstart")]
    FromStart,
    /// Walk backward from the end targets, expanding dependencies only
    /// while they are stale.
    #[value(name = "fromend")]
    FromEnd,
}

/// Log chattiness: 0 quiet, 1 normal, 2 chatty.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    /// Stage-level progress.
    #[default]
    Normal,
    /// Everything, including staleness decisions.
    Chatty,
}

impl TryFrom<u8> for Verbosity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Quiet),
            1 => Ok(Self::Normal),
            2 => Ok(Self::Chatty),
            other => Err(format!("verbosity must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<Verbosity> for u8 {
    fn from(value: Verbosity) -> Self {
        match value {
            Verbosity::Quiet => 0,
            Verbosity::Normal => 1,
            Verbosity::Chatty => 2,
        }
    }
}

/// Options governing one pipeline invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineOptions {
    /// Directory for queue scripts and stdout/stderr dumps, relative to
    /// the project directory unless absolute.
    pub log_dir: PathBuf,
    /// File logging every job that is run, inside `log_dir`.
    pub log_file: String,
    /// What to do with the stale stage set.
    pub style: Style,
    /// Maximum simultaneously active stages. For distributed stages this
    /// also bounds jobs submitted to the queue at one time.
    pub procs: usize,
    /// Log chattiness.
    pub verbosity: Verbosity,
    /// Requested terminal stages; empty means every terminal stage.
    pub end: Vec<String>,
    /// Stages rerun regardless of timestamps.
    pub force: Vec<String>,
    /// How the stage set to execute is computed.
    pub rebuild: Rebuild,
    /// Whether analysis is restricted to `allowed_samples`.
    pub restrict_samples: bool,
    /// Sample identifiers exposed to commands when restriction is on.
    pub allowed_samples: Vec<String>,
    /// Seconds between queue status polls for distributed stages.
    pub poll_interval_secs: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("log"),
            log_file: "pipeline.log".to_string(),
            style: Style::default(),
            procs: 4,
            verbosity: Verbosity::default(),
            end: Vec::new(),
            force: Vec::new(),
            rebuild: Rebuild::default(),
            restrict_samples: false,
            allowed_samples: Vec::new(),
            poll_interval_secs: 10,
        }
    }
}

impl PipelineOptions {
    /// Checks option values for consistency.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.procs < 1 {
            return Err(ConfigurationError::InvalidOption {
                option: "procs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval_secs < 1 {
            return Err(ConfigurationError::InvalidOption {
                option: "poll_interval_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.restrict_samples && self.allowed_samples.is_empty() {
            return Err(ConfigurationError::InvalidOption {
                option: "restrict_samples".to_string(),
                reason: "sample restriction is on but allowed_samples is empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(PipelineOptions::default().validate().is_ok());
    }

    #[test]
    fn zero_procs_is_rejected() {
        let options = PipelineOptions {
            procs: 0,
            ..PipelineOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ConfigurationError::InvalidOption { ref option, .. }) if option == "procs"
        ));
    }

    #[test]
    fn restriction_without_samples_is_rejected() {
        let options = PipelineOptions {
            restrict_samples: true,
            ..PipelineOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn verbosity_deserializes_from_integers() {
        #[derive(Deserialize)]
        struct Wrap {
            verbosity: Verbosity,
        }
        let wrap: Wrap = toml::from_str("verbosity = 2").unwrap();
        assert_eq!(wrap.verbosity, Verbosity::Chatty);
        assert!(toml::from_str::<Wrap>("verbosity = 3").is_err());
    }

    #[test]
    fn style_and_rebuild_use_lowercase_names() {
        #[derive(Deserialize)]
        struct Wrap {
            style: Style,
            rebuild: Rebuild,
        }
        let wrap: Wrap =
            toml::from_str("style = \"touchfiles\"\nrebuild = \"fromend\"").unwrap();
        assert_eq!(wrap.style, Style::Touchfiles);
        assert_eq!(wrap.rebuild, Rebuild::FromEnd);
    }
}
