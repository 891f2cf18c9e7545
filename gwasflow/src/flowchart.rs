//! Graphviz rendering of the stage graph.
//!
//! The `flowchart` style renders the registry as DOT instead of running
//! anything; stages in the current plan are filled so the stale frontier
//! is visible at a glance.

use crate::registry::StageRegistry;
use crate::run::RunPlan;
use std::fmt::Write as _;

/// Renders the registry as a DOT digraph, highlighting planned stages.
#[must_use]
pub fn render(registry: &StageRegistry, plan: &RunPlan) -> String {
    let mut dot = String::from("digraph pipeline {\n");
    dot.push_str("  rankdir=LR;\n");
    dot.push_str("  node [shape=box, fontname=\"Helvetica\"];\n");

    for name in registry.topological_order() {
        let Some(stage) = registry.get(name) else {
            continue;
        };
        if plan.contains(name) {
            let _ = writeln!(
                dot,
                "  \"{name}\" [label=\"{}\", style=filled, fillcolor=lightgoldenrod];",
                stage.label()
            );
        } else {
            let _ = writeln!(dot, "  \"{name}\" [label=\"{}\"];", stage.label());
        }
    }

    for name in registry.topological_order() {
        if let Some(stage) = registry.get(name) {
            for dep in &stage.depends_on {
                let _ = writeln!(dot, "  \"{dep}\" -> \"{name}\";");
            }
        }
    }

    dot.push_str("}\n");
    dot
}
