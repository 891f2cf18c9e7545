//! Computing the stage set one invocation will examine.

use super::RunRequest;
use crate::checkpoint::command_digest;
use crate::config::Rebuild;
use crate::errors::{ConfigurationError, GwasflowError};
use crate::project::RunContext;
use crate::registry::StageRegistry;
use crate::staleness::StalenessResolver;
use std::collections::HashSet;

/// The planned stage set, in dependency order.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Stages this invocation will examine, dependencies first.
    pub stages: Vec<String>,
    /// The resolved end targets.
    pub end: Vec<String>,
}

impl RunPlan {
    /// Returns true if `stage` is part of the plan.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.stages.iter().any(|name| name == stage)
    }
}

/// Computes the stage set for a request.
///
/// `fromstart` takes the full dependency closure of the end targets and
/// leaves staleness to execution time, where it propagates forward as
/// upstream stages rewrite their outputs. `fromend` walks backward from
/// the targets and stops expanding at an up-to-date frontier; stages
/// beyond the frontier are not examined at all.
pub fn plan(
    registry: &StageRegistry,
    resolver: &StalenessResolver,
    ctx: &RunContext,
    request: &RunRequest,
) -> Result<RunPlan, GwasflowError> {
    let end = if request.end.is_empty() {
        registry.terminal_stages()
    } else {
        request.end.clone()
    };

    for forced in &request.force {
        if registry.get(forced).is_none() {
            return Err(ConfigurationError::UnknownStage {
                stage: forced.clone(),
                referenced_by: "the force set".to_string(),
            }
            .into());
        }
    }

    let stages = match request.rebuild {
        Rebuild::FromStart => registry.closure(&end, "end targets")?,
        Rebuild::FromEnd => backward_walk(registry, resolver, ctx, request, &end)?,
    };

    Ok(RunPlan { stages, end })
}

fn backward_walk(
    registry: &StageRegistry,
    resolver: &StalenessResolver,
    ctx: &RunContext,
    request: &RunRequest,
    end: &[String],
) -> Result<Vec<String>, GwasflowError> {
    for target in end {
        if registry.get(target).is_none() {
            return Err(ConfigurationError::UnknownStage {
                stage: target.clone(),
                referenced_by: "end targets".to_string(),
            }
            .into());
        }
    }

    let mut included: HashSet<String> = HashSet::new();
    let mut work: Vec<String> = end.to_vec();

    while let Some(name) = work.pop() {
        if !included.insert(name.clone()) {
            continue;
        }
        let Some(stage) = registry.get(&name) else {
            continue;
        };
        let rendered = stage.command.render(&name, &ctx.stage_vars(stage))?;
        let verdict = resolver.assess(stage, &command_digest(&rendered), request.is_forced(&name))?;
        if verdict.is_stale() {
            for dep in &stage.depends_on {
                work.push(dep.clone());
            }
        }
    }

    Ok(registry
        .topological_order()
        .iter()
        .filter(|name| included.contains(name.as_str()))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointRecord, CheckpointStore, InMemoryCheckpointStore};
    use crate::project::RunContextBuilder;
    use crate::registry::StageDef;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        registry: StageRegistry,
        resolver: StalenessResolver,
        store: Arc<InMemoryCheckpointStore>,
        ctx: RunContext,
        _dir: tempfile::TempDir,
    }

    fn chain_fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContextBuilder::new(dir.path(), "proj", "pipe")
            .build()
            .unwrap();
        let registry = StageRegistry::from_defs(vec![
            StageDef::new("task1", "printf one > {output}").with_output("one.txt"),
            StageDef::new("task2", "cat {input} > {output}")
                .with_input("one.txt")
                .with_output("two.txt")
                .with_dependency("task1"),
            StageDef::new("task3", "cat {input} > {output}")
                .with_input("two.txt")
                .with_output("three.txt")
                .with_dependency("task2"),
        ])
        .unwrap();
        let store = Arc::new(InMemoryCheckpointStore::new());
        let resolver = StalenessResolver::new(store.clone(), ctx.project_dir());
        Fixture {
            registry,
            resolver,
            store,
            ctx,
            _dir: dir,
        }
    }

    /// Writes outputs and checkpoints as if the whole chain already ran.
    fn bring_current(fixture: &Fixture) {
        for name in ["task1", "task2", "task3"] {
            let stage = fixture.registry.get(name).unwrap();
            for output in &stage.outputs {
                std::fs::write(fixture.ctx.project_dir().join(output), name).unwrap();
            }
            let rendered = stage
                .command
                .render(name, &fixture.ctx.stage_vars(stage))
                .unwrap();
            fixture
                .store
                .record(&CheckpointRecord::new(
                    name,
                    Uuid::new_v4(),
                    command_digest(&rendered),
                ))
                .unwrap();
        }
    }

    #[test]
    fn fromstart_plans_the_full_closure() {
        let fixture = chain_fixture();
        let request = RunRequest::for_targets(["task3"]);
        let plan = plan(&fixture.registry, &fixture.resolver, &fixture.ctx, &request).unwrap();
        assert_eq!(plan.stages, ["task1", "task2", "task3"]);
    }

    #[test]
    fn empty_end_means_all_terminal_stages() {
        let fixture = chain_fixture();
        let request = RunRequest::new(Vec::new(), Vec::new(), Rebuild::FromStart);
        let plan = plan(&fixture.registry, &fixture.resolver, &fixture.ctx, &request).unwrap();
        assert_eq!(plan.end, ["task3"]);
        assert_eq!(plan.stages.len(), 3);
    }

    #[test]
    fn fromend_stops_at_an_up_to_date_frontier() {
        let fixture = chain_fixture();
        bring_current(&fixture);
        // Only the final output is gone; task2 is still current.
        std::fs::remove_file(fixture.ctx.project_dir().join("three.txt")).unwrap();

        let request = RunRequest::new(
            vec!["task3".to_string()],
            Vec::new(),
            Rebuild::FromEnd,
        );
        let plan = plan(&fixture.registry, &fixture.resolver, &fixture.ctx, &request).unwrap();

        // task2 is included (as the up-to-date frontier) but task1 is
        // never examined.
        assert!(plan.contains("task3"));
        assert!(plan.contains("task2"));
        assert!(!plan.contains("task1"));
    }

    #[test]
    fn fromend_expands_through_stale_ancestors() {
        let fixture = chain_fixture();
        let request = RunRequest::new(
            vec!["task3".to_string()],
            Vec::new(),
            Rebuild::FromEnd,
        );
        // Nothing has ever run, so the walk reaches the root.
        let plan = plan(&fixture.registry, &fixture.resolver, &fixture.ctx, &request).unwrap();
        assert_eq!(plan.stages, ["task1", "task2", "task3"]);
    }

    #[test]
    fn unknown_end_target_is_rejected() {
        let fixture = chain_fixture();
        let request = RunRequest::for_targets(["nope"]);
        let err = plan(&fixture.registry, &fixture.resolver, &fixture.ctx, &request).unwrap_err();
        assert!(matches!(
            err,
            GwasflowError::Configuration(ConfigurationError::UnknownStage { .. })
        ));
    }

    #[test]
    fn unknown_forced_stage_is_rejected() {
        let fixture = chain_fixture();
        let request = RunRequest::new(
            vec!["task3".to_string()],
            vec!["ghost".to_string()],
            Rebuild::FromStart,
        );
        let err = plan(&fixture.registry, &fixture.resolver, &fixture.ctx, &request).unwrap_err();
        assert!(err.to_string().contains("force set"));
    }

    #[test]
    fn forced_target_expands_even_when_current() {
        let fixture = chain_fixture();
        bring_current(&fixture);

        let request = RunRequest::new(
            vec!["task3".to_string()],
            vec!["task3".to_string()],
            Rebuild::FromEnd,
        );
        let plan = plan(&fixture.registry, &fixture.resolver, &fixture.ctx, &request).unwrap();
        // task3 is forced stale, so its dependency is examined; task2 is
        // current, so the walk stops there.
        assert!(plan.contains("task2"));
        assert!(!plan.contains("task1"));
    }
}
