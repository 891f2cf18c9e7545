//! The run controller.
//!
//! Drains a ready queue of stages whose dependencies are satisfied
//! through a bounded worker pool. Stages are assessed for staleness at
//! the moment they become ready, after their dependencies have rewritten
//! any outputs, so forward propagation falls out of the timestamps.

use super::planner::plan;
use super::report::{NotAttempted, RunReport, StageFailure};
use super::{RunRequest, StageState};
use crate::checkpoint::command_digest;
use crate::dispatch::{Dispatcher, StageOutcome};
use crate::errors::{GwasflowError, StageExecutionError};
use crate::project::RunContext;
use crate::registry::StageRegistry;
use crate::staleness::{Freshness, StalenessResolver};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

type StageTask = tokio::task::JoinHandle<(String, Result<StageOutcome, StageExecutionError>)>;

enum Scheduled {
    Dispatched(StageTask),
    Skipped,
}

/// Orchestrates one pipeline invocation.
#[derive(Debug)]
pub struct RunController {
    registry: Arc<StageRegistry>,
    resolver: StalenessResolver,
    dispatcher: Arc<Dispatcher>,
    ctx: Arc<RunContext>,
    procs: usize,
}

impl RunController {
    /// Creates a controller with a worker pool of `procs` slots.
    #[must_use]
    pub fn new(
        registry: Arc<StageRegistry>,
        resolver: StalenessResolver,
        dispatcher: Arc<Dispatcher>,
        ctx: Arc<RunContext>,
        procs: usize,
    ) -> Self {
        Self {
            registry,
            resolver,
            dispatcher,
            ctx,
            procs: procs.max(1),
        }
    }

    /// Runs the request to completion and reports what happened.
    ///
    /// Stage failures do not abort the invocation: dependents of a
    /// failed stage are never scheduled, unrelated branches continue,
    /// and everything is surfaced in the report. Only configuration and
    /// internal errors return `Err`.
    pub async fn run(&self, request: &RunRequest) -> Result<RunReport, GwasflowError> {
        let started = Instant::now();
        let run_plan = plan(self.registry.as_ref(), &self.resolver, self.ctx.as_ref(), request)?;
        let planned: HashSet<String> = run_plan.stages.iter().cloned().collect();
        tracing::info!(
            pipeline = %self.ctx.pipeline(),
            stages = run_plan.stages.len(),
            procs = self.procs,
            "run planned"
        );

        let mut states: BTreeMap<String, StageState> = run_plan
            .stages
            .iter()
            .map(|name| (name.clone(), StageState::Pending))
            .collect();
        let mut in_degree: HashMap<String, usize> = run_plan
            .stages
            .iter()
            .map(|name| {
                let deps = self.registry.get(name).map_or(0, |stage| {
                    stage
                        .depends_on
                        .iter()
                        .filter(|dep| planned.contains(dep.as_str()))
                        .count()
                });
                (name.clone(), deps)
            })
            .collect();

        let mut ready: VecDeque<String> = run_plan
            .stages
            .iter()
            .filter(|name| in_degree[name.as_str()] == 0)
            .cloned()
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.procs));
        let mut active: FuturesUnordered<StageTask> = FuturesUnordered::new();
        let mut outcomes: Vec<StageOutcome> = Vec::new();
        let mut failures: Vec<StageFailure> = Vec::new();
        let mut fatal: Option<GwasflowError> = None;

        loop {
            // Schedule everything ready, unless a fatal error stopped
            // the run; already-dispatched stages still drain below.
            while fatal.is_none() {
                let Some(name) = ready.pop_front() else { break };
                match self.schedule(&name, request, &semaphore) {
                    Ok(Scheduled::Dispatched(task)) => {
                        states.insert(name, StageState::Running);
                        active.push(task);
                    }
                    Ok(Scheduled::Skipped) => {
                        states.insert(name.clone(), StageState::Skipped);
                        ready.extend(release_dependents(
                            &name,
                            self.registry.as_ref(),
                            &planned,
                            &mut in_degree,
                        ));
                    }
                    Err(err) => fatal = Some(err),
                }
            }

            if active.is_empty() {
                break;
            }

            match active.next().await {
                Some(Ok((name, Ok(outcome)))) => {
                    tracing::info!(stage = %name, duration_ms = outcome.duration_ms, "stage succeeded");
                    states.insert(name.clone(), StageState::Succeeded);
                    outcomes.push(outcome);
                    if fatal.is_none() {
                        ready.extend(release_dependents(
                            &name,
                            self.registry.as_ref(),
                            &planned,
                            &mut in_degree,
                        ));
                    }
                }
                Some(Ok((name, Err(err)))) => {
                    tracing::error!(stage = %name, error = %err, "stage failed");
                    states.insert(name.clone(), StageState::Failed);
                    failures.push(StageFailure::new(name, err.to_string()));
                }
                Some(Err(join_err)) => {
                    fatal = Some(GwasflowError::Internal(format!(
                        "stage task aborted: {join_err}"
                    )));
                }
                None => break,
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        let not_attempted = self.collect_blocked(&states);
        let report = RunReport {
            run_id: self.ctx.run_id(),
            pipeline: self.ctx.pipeline().to_string(),
            states,
            outcomes,
            failures,
            not_attempted,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        tracing::info!(
            succeeded = report.stages_in(StageState::Succeeded).len(),
            skipped = report.stages_in(StageState::Skipped).len(),
            failed = report.failures.len(),
            "run finished"
        );
        Ok(report)
    }

    /// Assesses one ready stage and either skips it or spawns its
    /// dispatch task. The semaphore bounds actual execution; the task
    /// waits for a slot after being spawned.
    fn schedule(
        &self,
        name: &str,
        request: &RunRequest,
        semaphore: &Arc<Semaphore>,
    ) -> Result<Scheduled, GwasflowError> {
        let stage = self.registry.get(name).ok_or_else(|| {
            GwasflowError::Internal(format!("planned stage '{name}' missing from registry"))
        })?;
        let rendered = stage.command.render(name, &self.ctx.stage_vars(stage))?;
        let digest = command_digest(&rendered);

        match self.resolver.assess(stage, &digest, request.is_forced(name))? {
            Freshness::UpToDate => {
                tracing::info!(stage = %name, "up to date, skipping");
                Ok(Scheduled::Skipped)
            }
            Freshness::Stale(reason) => {
                tracing::debug!(stage = %name, reason = %reason, "stale, dispatching");
                let stage = stage.clone();
                let dispatcher = Arc::clone(&self.dispatcher);
                let semaphore = Arc::clone(semaphore);
                let run_id = self.ctx.run_id();
                Ok(Scheduled::Dispatched(tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (
                                stage.name.clone(),
                                Err(StageExecutionError::Environment {
                                    stage: stage.name.clone(),
                                    reason: "worker pool shut down".to_string(),
                                }),
                            );
                        }
                    };
                    let result = dispatcher.dispatch(&stage, &rendered, run_id).await;
                    (stage.name, result)
                })))
            }
        }
    }

    /// Stages still pending at the end were blocked by an upstream
    /// failure; name the failed ancestor for the report.
    fn collect_blocked(&self, states: &BTreeMap<String, StageState>) -> Vec<NotAttempted> {
        states
            .iter()
            .filter(|(_, state)| **state == StageState::Pending)
            .map(|(name, _)| NotAttempted {
                stage: name.clone(),
                blocked_by: self.find_failed_ancestor(name, states),
            })
            .collect()
    }

    fn find_failed_ancestor(
        &self,
        name: &str,
        states: &BTreeMap<String, StageState>,
    ) -> Option<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut work = vec![name.to_string()];
        while let Some(current) = work.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(stage) = self.registry.get(&current) else {
                continue;
            };
            for dep in &stage.depends_on {
                if states.get(dep) == Some(&StageState::Failed) {
                    return Some(dep.clone());
                }
                work.push(dep.clone());
            }
        }
        None
    }
}

/// Decrements dependents' unsatisfied-dependency counts and returns the
/// newly ready ones.
fn release_dependents(
    name: &str,
    registry: &StageRegistry,
    planned: &HashSet<String>,
    in_degree: &mut HashMap<String, usize>,
) -> Vec<String> {
    let mut ready = Vec::new();
    for child in registry.dependents(name) {
        if !planned.contains(child) {
            continue;
        }
        if let Some(count) = in_degree.get_mut(child) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                ready.push(child.clone());
            }
        }
    }
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StageDef;

    #[test]
    fn release_dependents_waits_for_every_parent() {
        let registry = StageRegistry::from_defs(vec![
            StageDef::new("left", "true"),
            StageDef::new("right", "true"),
            StageDef::new("join", "true")
                .with_dependency("left")
                .with_dependency("right"),
        ])
        .unwrap();
        let planned: HashSet<String> =
            ["left", "right", "join"].iter().map(|s| s.to_string()).collect();
        let mut in_degree: HashMap<String, usize> = HashMap::from([
            ("left".to_string(), 0),
            ("right".to_string(), 0),
            ("join".to_string(), 2),
        ]);

        assert!(release_dependents("left", &registry, &planned, &mut in_degree).is_empty());
        assert_eq!(
            release_dependents("right", &registry, &planned, &mut in_degree),
            ["join"]
        );
    }

    #[test]
    fn unplanned_dependents_are_ignored() {
        let registry = StageRegistry::from_defs(vec![
            StageDef::new("a", "true"),
            StageDef::new("b", "true").with_dependency("a"),
        ])
        .unwrap();
        let planned: HashSet<String> = ["a".to_string()].into_iter().collect();
        let mut in_degree: HashMap<String, usize> = HashMap::from([("a".to_string(), 0)]);

        assert!(release_dependents("a", &registry, &planned, &mut in_degree).is_empty());
    }
}
