//! Pure dependency-resolution functions over a task snapshot.
//!
//! Nothing here performs I/O or mutates state: callers load a fresh
//! snapshot of an execution's tasks, ask these functions for decisions,
//! and act on the results. Deeper deadlocks propagate naturally across
//! calls as the driver marks blocked tasks terminal.

use crate::types::{TaskExecution, TaskSpec, TaskStatus};
use crewkit_core::{CrewError, CrewResult};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Tasks that are ready to dispatch: Pending, with every `depends_on`
/// entry naming a Validated task. Returned in `sort_order` order, so the
/// Sequential strategy can take the first element.
pub fn ready(tasks: &[TaskExecution]) -> Vec<&TaskExecution> {
    let validated: HashSet<u32> = tasks
        .iter()
        .filter(|t| t.is_validated())
        .map(|t| t.sort_order)
        .collect();

    let mut result: Vec<&TaskExecution> = tasks
        .iter()
        .filter(|t| t.is_pending() && t.depends_on.iter().all(|dep| validated.contains(dep)))
        .collect();
    result.sort_by_key(|t| t.sort_order);
    result
}

/// True iff every task has reached a permanent state
/// (Validated, QaFailed, Failed, or Skipped).
pub fn all_terminal(tasks: &[TaskExecution]) -> bool {
    tasks.iter().all(|t| t.is_terminal())
}

/// True iff some Pending task directly depends on a task that can never
/// become Validated (QaFailed or Skipped).
///
/// This is a one-hop check, not full graph reachability: a Pending task
/// blocked behind a deeper deadlock is only caught once its own
/// dependency is marked QaFailed/Skipped by the outer loop.
pub fn has_deadlock(tasks: &[TaskExecution]) -> bool {
    let blocked: HashSet<u32> = tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::QaFailed | TaskStatus::Skipped))
        .map(|t| t.sort_order)
        .collect();

    if blocked.is_empty() {
        return false;
    }

    tasks
        .iter()
        .filter(|t| t.is_pending())
        .any(|t| t.depends_on.iter().any(|dep| blocked.contains(dep)))
}

/// Number of tasks whose output passed the quality gate.
pub fn validated_count(tasks: &[TaskExecution]) -> usize {
    tasks.iter().filter(|t| t.is_validated()).count()
}

/// Outputs of a task's dependencies, keyed by dependency title, for the
/// task's input context. Dependencies without an output are skipped.
pub fn dependency_outputs(task: &TaskExecution, all_tasks: &[TaskExecution]) -> Map<String, Value> {
    let mut outputs = Map::new();
    if task.depends_on.is_empty() {
        return outputs;
    }

    let by_order: HashMap<u32, &TaskExecution> =
        all_tasks.iter().map(|t| (t.sort_order, t)).collect();

    for dep in &task.depends_on {
        if let Some(dep_task) = by_order.get(dep) {
            if let Some(output) = &dep_task.output {
                outputs.insert(dep_task.title.clone(), output.clone());
            }
        }
    }

    outputs
}

/// Validate a planned graph before any task is persisted.
///
/// Rejects duplicate `sort_order` values, dependencies on unknown nodes,
/// self-references, and cycles. A cyclic plan would otherwise leave its
/// members permanently Pending with no deadlock signal, since
/// [`has_deadlock`] only inspects QaFailed/Skipped dependencies.
pub fn validate_acyclic(specs: &[TaskSpec]) -> CrewResult<()> {
    let mut edges: HashMap<u32, &[u32]> = HashMap::new();
    for spec in specs {
        if edges.insert(spec.sort_order, &spec.depends_on).is_some() {
            return Err(CrewError::Orchestrator(format!(
                "duplicate sort_order {} in task plan",
                spec.sort_order
            )));
        }
    }

    for spec in specs {
        for dep in &spec.depends_on {
            if *dep == spec.sort_order {
                return Err(CrewError::Orchestrator(format!(
                    "task {} depends on itself",
                    spec.sort_order
                )));
            }
            if !edges.contains_key(dep) {
                return Err(CrewError::Orchestrator(format!(
                    "task {} depends on unknown task {}",
                    spec.sort_order, dep
                )));
            }
        }
    }

    // Three-color DFS: 1 = in progress, 2 = done.
    let mut visited: HashMap<u32, u8> = HashMap::new();
    for &node in edges.keys() {
        if dfs_cycle(node, &edges, &mut visited) {
            return Err(CrewError::Orchestrator(
                "dependency cycle detected in task plan".to_string(),
            ));
        }
    }

    Ok(())
}

fn dfs_cycle(node: u32, edges: &HashMap<u32, &[u32]>, visited: &mut HashMap<u32, u8>) -> bool {
    match visited.get(&node) {
        Some(1) => return true,
        Some(2) => return false,
        _ => {}
    }
    visited.insert(node, 1);
    if let Some(deps) = edges.get(&node) {
        for dep in *deps {
            if dfs_cycle(*dep, edges, visited) {
                return true;
            }
        }
    }
    visited.insert(node, 2);
    false
}
