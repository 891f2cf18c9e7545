//! Per-stage options and the defaults they merge with.

use crate::registry::{ResourceRequest, StageDef};
use crate::template::CommandTemplate;
use serde::Deserialize;
use std::path::PathBuf;

/// Default options applied to every stage unless overridden.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StageDefaults {
    /// Submit stages to the batch queue by default.
    pub distributed: bool,
    /// Default walltime request.
    pub walltime: Option<String>,
    /// Default memory request in gigabytes.
    pub mem_in_gb: Option<u32>,
    /// Default queue name.
    pub queue: Option<String>,
    /// Default environment modules. A stage that sets its own module
    /// list overrides this entirely; the lists are never merged.
    pub modules: Vec<String>,
}

/// Options for a single stage, as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageOptions {
    /// The command template for the stage.
    pub command: String,
    /// Declared input paths.
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    /// Declared output paths.
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
    /// Upstream stages that must finish first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the default execution mode.
    #[serde(default)]
    pub distributed: Option<bool>,
    /// Overrides the default walltime request.
    #[serde(default)]
    pub walltime: Option<String>,
    /// Overrides the default memory request.
    #[serde(default)]
    pub mem_in_gb: Option<u32>,
    /// Overrides the default queue.
    #[serde(default)]
    pub queue: Option<String>,
    /// Overrides (replaces) the default module list.
    #[serde(default)]
    pub modules: Option<Vec<String>>,
    /// Human-readable name for reports and job submission.
    #[serde(default)]
    pub name: Option<String>,
}

impl StageOptions {
    /// Merges these options with the defaults into a stage definition.
    #[must_use]
    pub fn into_def(self, stage_name: &str, defaults: &StageDefaults) -> StageDef {
        let fallback = ResourceRequest::default();
        StageDef {
            name: stage_name.to_string(),
            display_name: self.name,
            command: CommandTemplate::new(self.command),
            inputs: self.inputs,
            outputs: self.outputs,
            depends_on: self.depends_on,
            distributed: self.distributed.unwrap_or(defaults.distributed),
            resources: ResourceRequest {
                walltime: self
                    .walltime
                    .or_else(|| defaults.walltime.clone())
                    .unwrap_or(fallback.walltime),
                mem_in_gb: self.mem_in_gb.or(defaults.mem_in_gb).unwrap_or(fallback.mem_in_gb),
                queue: self.queue.or_else(|| defaults.queue.clone()),
            },
            modules: self.modules.unwrap_or_else(|| defaults.modules.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> StageDefaults {
        StageDefaults {
            distributed: true,
            walltime: Some("6:00:00".to_string()),
            mem_in_gb: Some(16),
            queue: Some("WitsLong".to_string()),
            modules: vec!["gwaspipe".to_string()],
        }
    }

    fn bare(command: &str) -> StageOptions {
        StageOptions {
            command: command.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
            distributed: None,
            walltime: None,
            mem_in_gb: None,
            queue: None,
            modules: None,
            name: None,
        }
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let def = bare("plink --assoc").into_def("assoc", &defaults());
        assert!(def.distributed);
        assert_eq!(def.resources.walltime, "6:00:00");
        assert_eq!(def.resources.mem_in_gb, 16);
        assert_eq!(def.resources.queue.as_deref(), Some("WitsLong"));
        assert_eq!(def.modules, ["gwaspipe"]);
    }

    #[test]
    fn stage_modules_override_not_merge() {
        let mut options = bare("R --vanilla");
        options.modules = Some(vec!["R/4.2".to_string()]);
        let def = options.into_def("plots", &defaults());
        assert_eq!(def.modules, ["R/4.2"]);
    }

    #[test]
    fn empty_stage_module_list_still_overrides() {
        let mut options = bare("true");
        options.modules = Some(Vec::new());
        let def = options.into_def("bare", &defaults());
        assert!(def.modules.is_empty());
    }

    #[test]
    fn explicit_local_beats_distributed_default() {
        let mut options = bare("gzip {input}");
        options.distributed = Some(false);
        options.inputs.push(PathBuf::from("assoc.txt"));
        let def = options.into_def("compress", &defaults());
        assert!(!def.distributed);
    }
}
