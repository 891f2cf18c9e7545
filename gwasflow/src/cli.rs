//! Command-line interface.
//!
//! Flags override their counterparts in the configuration file; the
//! file remains the source of truth for everything else.

use crate::config::{PipelineConfig, Rebuild, Style};
use clap::Parser;
use std::path::PathBuf;

/// Dependency-aware stage graph executor for GWAS pipelines.
#[derive(Parser, Debug)]
#[command(name = "gwasflow")]
#[command(about = "Dependency-aware stage graph executor for GWAS pipelines", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the pipeline configuration file.
    #[arg(short, long, default_value = "gwasflow.toml")]
    pub config: PathBuf,

    /// Override the configured style.
    #[arg(long, value_enum)]
    pub style: Option<Style>,

    /// Override the configured end targets.
    #[arg(long, value_delimiter = ',')]
    pub end: Option<Vec<String>>,

    /// Override the configured forced-rerun set.
    #[arg(long, value_delimiter = ',')]
    pub force: Option<Vec<String>>,

    /// Override the configured rebuild direction.
    #[arg(long, value_enum)]
    pub rebuild: Option<Rebuild>,

    /// Override the configured verbosity (0 quiet, 1 normal, 2 chatty).
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub verbose: Option<u8>,

    /// Override the configured parallelism.
    #[arg(long)]
    pub procs: Option<usize>,
}

impl Cli {
    /// Applies the overrides to a loaded configuration.
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(style) = self.style {
            config.pipeline.style = style;
        }
        if let Some(end) = &self.end {
            config.pipeline.end = end.clone();
        }
        if let Some(force) = &self.force {
            config.pipeline.force = force.clone();
        }
        if let Some(rebuild) = self.rebuild {
            config.pipeline.rebuild = rebuild;
        }
        if let Some(verbose) = self.verbose {
            // The range parser already bounds the value.
            if let Ok(verbosity) = crate::config::Verbosity::try_from(verbose) {
                config.pipeline.verbosity = verbosity;
            }
        }
        if let Some(procs) = self.procs {
            config.pipeline.procs = procs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Verbosity;

    fn minimal_config() -> PipelineConfig {
        toml::from_str(
            r#"
                [working_files]
                project_name = "p"
                projects_dir = "/tmp"

                [stages.task1]
                command = "true"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "gwasflow",
            "--config",
            "pipe.toml",
            "--style",
            "print",
            "--end",
            "task2,task3",
            "--force",
            "task1",
            "--rebuild",
            "fromend",
            "-v",
            "2",
            "--procs",
            "16",
        ]);
        assert_eq!(cli.config, PathBuf::from("pipe.toml"));

        let mut config = minimal_config();
        cli.apply_overrides(&mut config);
        assert_eq!(config.pipeline.style, Style::Print);
        assert_eq!(config.pipeline.end, ["task2", "task3"]);
        assert_eq!(config.pipeline.force, ["task1"]);
        assert_eq!(config.pipeline.rebuild, Rebuild::FromEnd);
        assert_eq!(config.pipeline.verbosity, Verbosity::Chatty);
        assert_eq!(config.pipeline.procs, 16);
    }

    #[test]
    fn defaults_leave_config_untouched() {
        let cli = Cli::parse_from(["gwasflow"]);
        let mut config = minimal_config();
        let before_procs = config.pipeline.procs;
        cli.apply_overrides(&mut config);
        assert_eq!(config.pipeline.procs, before_procs);
        assert_eq!(config.pipeline.style, Style::Run);
    }

    #[test]
    fn out_of_range_verbosity_is_rejected_at_parse() {
        assert!(Cli::try_parse_from(["gwasflow", "-v", "3"]).is_err());
    }
}
