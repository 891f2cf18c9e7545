//! Stage definitions and the validated stage registry.
//!
//! The registry holds the immutable stage graph for one run. Validation
//! happens once, up front: duplicate names, unknown dependency
//! references, cycles (reported with the full cycle path), and
//! unresolvable command placeholders all fail before anything executes.

use crate::errors::ConfigurationError;
use crate::project::RUN_CONTEXT_KEYS;
use crate::template::{CommandTemplate, TemplateKeys};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Batch-queue resource request for a distributed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Maximum allowed runtime, `HH:MM:SS`.
    pub walltime: String,
    /// Requested memory in gigabytes.
    pub mem_in_gb: u32,
    /// Queue to submit to. Local stages ignore this.
    pub queue: Option<String>,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            walltime: "1:00:00".to_string(),
            mem_in_gb: 4,
            queue: None,
        }
    }
}

/// A named unit of work: command template, declared files, dependencies,
/// and execution requirements.
#[derive(Debug, Clone)]
pub struct StageDef {
    /// Unique stage name.
    pub name: String,
    /// Optional human-readable name for reports and job submission.
    pub display_name: Option<String>,
    /// The command to run, with `{placeholder}` markers.
    pub command: CommandTemplate,
    /// Declared input paths (relative paths resolve against the project
    /// directory).
    pub inputs: Vec<PathBuf>,
    /// Declared output paths.
    pub outputs: Vec<PathBuf>,
    /// Names of upstream stages that must finish first.
    pub depends_on: Vec<String>,
    /// Whether to submit to the batch queue instead of running locally.
    pub distributed: bool,
    /// Queue resource request.
    pub resources: ResourceRequest,
    /// Environment modules to load before the command runs.
    pub modules: Vec<String>,
}

impl StageDef {
    /// Creates a stage with defaults: local, no files, no dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<CommandTemplate>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            command: command.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
            distributed: false,
            resources: ResourceRequest::default(),
            modules: Vec::new(),
        }
    }

    /// Adds an input path.
    #[must_use]
    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    /// Adds an output path.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Adds a dependency on an upstream stage.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    /// Marks the stage for batch-queue submission.
    #[must_use]
    pub fn distributed(mut self, resources: ResourceRequest) -> Self {
        self.distributed = true;
        self.resources = resources;
        self
    }

    /// Sets the environment modules.
    #[must_use]
    pub fn with_modules(mut self, modules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.modules = modules.into_iter().map(Into::into).collect();
        self
    }

    /// Name used in reports and job submission.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Placeholder names resolvable for this stage's command.
    #[must_use]
    pub fn template_keys(&self) -> TemplateKeys {
        let mut keys = TemplateKeys::new();
        for key in RUN_CONTEXT_KEYS {
            keys.add(*key);
        }
        keys.add("name");
        keys.add("inputs");
        keys.add("outputs");
        if !self.inputs.is_empty() {
            keys.add("input");
        }
        for i in 1..=self.inputs.len() {
            keys.add(format!("input{i}"));
        }
        if !self.outputs.is_empty() {
            keys.add("output");
        }
        for i in 1..=self.outputs.len() {
            keys.add(format!("output{i}"));
        }
        keys
    }
}

/// The validated, immutable stage graph for one run.
#[derive(Debug)]
pub struct StageRegistry {
    stages: HashMap<String, StageDef>,
    /// Insertion order, for deterministic traversal.
    order: Vec<String>,
    /// Topologically sorted stage names (dependencies first).
    topo: Vec<String>,
    /// Direct dependents of each stage.
    dependents: HashMap<String, Vec<String>>,
}

impl StageRegistry {
    /// Builds and validates a registry from stage definitions.
    ///
    /// # Errors
    ///
    /// Fails on duplicate names, unknown dependency references, cycles
    /// (naming the cycle path), and unresolvable command placeholders.
    pub fn from_defs(
        defs: impl IntoIterator<Item = StageDef>,
    ) -> Result<Self, ConfigurationError> {
        let mut stages: HashMap<String, StageDef> = HashMap::new();
        let mut order = Vec::new();

        for def in defs {
            if stages.contains_key(&def.name) {
                return Err(ConfigurationError::DuplicateStage { stage: def.name });
            }
            order.push(def.name.clone());
            stages.insert(def.name.clone(), def);
        }

        for name in &order {
            let def = &stages[name];
            for dep in &def.depends_on {
                if !stages.contains_key(dep) {
                    return Err(ConfigurationError::UnknownStage {
                        stage: dep.clone(),
                        referenced_by: format!("dependencies of '{name}'"),
                    });
                }
            }
            def.command.validate(name, &def.template_keys())?;
        }

        if let Some(cycle_path) = detect_cycle(&stages, &order) {
            return Err(ConfigurationError::Cycle { cycle_path });
        }

        let topo = topological_sort(&stages, &order);

        let mut dependents: HashMap<String, Vec<String>> =
            order.iter().map(|name| (name.clone(), Vec::new())).collect();
        for name in &order {
            for dep in &stages[name].depends_on {
                if let Some(children) = dependents.get_mut(dep) {
                    children.push(name.clone());
                }
            }
        }

        Ok(Self {
            stages,
            order,
            topo,
            dependents,
        })
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StageDef> {
        self.stages.get(name)
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the registry holds no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in declaration order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Stage names in dependency order (dependencies first).
    #[must_use]
    pub fn topological_order(&self) -> &[String] {
        &self.topo
    }

    /// Direct dependents of a stage.
    #[must_use]
    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map_or(&[], Vec::as_slice)
    }

    /// Stages no other stage depends on, in declaration order.
    #[must_use]
    pub fn terminal_stages(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| self.dependents(name).is_empty())
            .cloned()
            .collect()
    }

    /// The targets plus their transitive dependencies, in dependency
    /// order.
    ///
    /// # Errors
    ///
    /// Fails if a target names a stage that does not exist;
    /// `referenced_by` says where the name came from.
    pub fn closure(
        &self,
        targets: &[String],
        referenced_by: &str,
    ) -> Result<Vec<String>, ConfigurationError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut work: Vec<&str> = Vec::new();

        for target in targets {
            let Some(def) = self.stages.get(target) else {
                return Err(ConfigurationError::UnknownStage {
                    stage: target.clone(),
                    referenced_by: referenced_by.to_string(),
                });
            };
            if seen.insert(def.name.as_str()) {
                work.push(def.name.as_str());
            }
        }

        while let Some(name) = work.pop() {
            for dep in &self.stages[name].depends_on {
                if seen.insert(dep.as_str()) {
                    work.push(dep.as_str());
                }
            }
        }

        Ok(self
            .topo
            .iter()
            .filter(|name| seen.contains(name.as_str()))
            .cloned()
            .collect())
    }
}

/// Depth-first cycle search. Returns the cycle path (first stage repeated
/// at the end) if one exists.
fn detect_cycle(
    stages: &HashMap<String, StageDef>,
    order: &[String],
) -> Option<Vec<String>> {
    const GREY: u8 = 1;
    const BLACK: u8 = 2;

    fn visit(
        node: &str,
        stages: &HashMap<String, StageDef>,
        state: &mut HashMap<String, u8>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match state.get(node) {
            Some(&BLACK) => return None,
            Some(&GREY) => {
                let pos = stack.iter().position(|n| n == node).unwrap_or(0);
                let mut path = stack[pos..].to_vec();
                path.push(node.to_string());
                return Some(path);
            }
            _ => {}
        }

        state.insert(node.to_string(), GREY);
        stack.push(node.to_string());

        if let Some(def) = stages.get(node) {
            for dep in &def.depends_on {
                if let Some(cycle) = visit(dep, stages, state, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        state.insert(node.to_string(), BLACK);
        None
    }

    let mut state = HashMap::new();
    let mut stack = Vec::new();
    for name in order {
        if let Some(cycle) = visit(name, stages, &mut state, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// Performs topological sort on a validated (acyclic) stage graph.
fn topological_sort(
    stages: &HashMap<String, StageDef>,
    order: &[String],
) -> Vec<String> {
    let mut result = Vec::new();
    let mut visited = HashSet::new();

    fn visit(
        node: &str,
        stages: &HashMap<String, StageDef>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(node) {
            return;
        }
        visited.insert(node.to_string());

        if let Some(def) = stages.get(node) {
            for dep in &def.depends_on {
                visit(dep, stages, visited, result);
            }
        }

        result.push(node.to_string());
    }

    // Visit in declaration order for determinism.
    for name in order {
        visit(name, stages, &mut visited, &mut result);
    }

    result
}
