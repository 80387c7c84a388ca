//! Execution-order computation by repeated stratification.
//!
//! A step enters the current level once every one of its dependencies has been
//! placed in an earlier level. Levels are built until every step is placed.
//! Step names must be unique. When an iteration places nothing, the remaining
//! steps contain a cycle; `petgraph`'s strongly connected components name the
//! steps on it.

use std::collections::{HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use stratum_types::workflow::StepDefinition;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// Group steps into ordered levels.
///
/// Every step's dependencies appear in a strictly earlier level and every step
/// appears in exactly one level. Within a level, steps keep their definition
/// order. Returns no partial plan on error.
pub fn execution_order(
    steps: &[StepDefinition],
) -> Result<Vec<Vec<&StepDefinition>>, WorkflowError> {
    let mut names: HashSet<&str> = HashSet::with_capacity(steps.len());
    for step in steps {
        if !names.insert(step.name.as_str()) {
            return Err(WorkflowError::DuplicateStep(step.name.clone()));
        }
    }
    for step in steps {
        if let Some(dep) = step.depends_on.iter().find(|d| !names.contains(d.as_str())) {
            return Err(WorkflowError::UnknownDependency {
                step: step.name.clone(),
                dependency: dep.clone(),
            });
        }
    }

    let mut placed: HashSet<&str> = HashSet::with_capacity(steps.len());
    let mut levels: Vec<Vec<&StepDefinition>> = Vec::new();

    while placed.len() < steps.len() {
        let level: Vec<&StepDefinition> = steps
            .iter()
            .filter(|s| !placed.contains(s.name.as_str()))
            .filter(|s| s.depends_on.iter().all(|d| placed.contains(d.as_str())))
            .collect();

        if level.is_empty() {
            let remaining: Vec<&StepDefinition> = steps
                .iter()
                .filter(|s| !placed.contains(s.name.as_str()))
                .collect();
            return Err(WorkflowError::CircularDependency {
                steps: cycle_members(&remaining),
            });
        }

        placed.extend(level.iter().map(|s| s.name.as_str()));
        levels.push(level);
    }

    Ok(levels)
}

/// Index of the level that contains `step_name`.
pub fn level_of(levels: &[Vec<&StepDefinition>], step_name: &str) -> Option<usize> {
    levels
        .iter()
        .position(|level| level.iter().any(|s| s.name == step_name))
}

/// Names of the steps that sit on a cycle, in definition order.
///
/// `remaining` is the set stratification could not place: cycle members plus
/// anything downstream of them. Only the former are reported.
fn cycle_members(remaining: &[&StepDefinition]) -> Vec<String> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, _> = remaining
        .iter()
        .map(|s| (s.name.as_str(), graph.add_node(s.name.as_str())))
        .collect();

    for step in remaining {
        for dep in &step.depends_on {
            if let Some(&from) = indices.get(dep.as_str()) {
                graph.add_edge(from, indices[step.name.as_str()], ());
            }
        }
    }

    let on_cycle: HashSet<&str> = tarjan_scc(&graph)
        .into_iter()
        .filter(|component| {
            component.len() > 1 || graph.contains_edge(component[0], component[0])
        })
        .flatten()
        .map(|idx| graph[idx])
        .collect();

    let members: Vec<String> = remaining
        .iter()
        .filter(|s| on_cycle.contains(s.name.as_str()))
        .map(|s| s.name.clone())
        .collect();

    if members.is_empty() {
        remaining.iter().map(|s| s.name.clone()).collect()
    } else {
        members
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
