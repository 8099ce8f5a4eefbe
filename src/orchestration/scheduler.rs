//! Readiness computation and hierarchical completion.
//!
//! The scheduler is stateless: every function reads (or, for the promotion
//! and propagation passes, writes) the workflow it is given. Graph validation
//! happens once at workflow construction; nothing here re-checks for cycles.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::agent::AgentId;
use crate::core::{effective_dependencies, Task, TaskId, TaskStatus};
use crate::error::Result;
use crate::workflow::Workflow;

/// Whether an atomic task has every effective dependency completed.
pub fn is_ready(workflow: &Workflow, task: &Task) -> bool {
    if task.is_aggregate() || !task.can_start() {
        return false;
    }
    effective_dependencies(workflow.task_map(), &task.id)
        .iter()
        .all(|dep| workflow.task(dep).map(Task::is_completed).unwrap_or(false))
}

/// Tasks eligible to run, in registration order.
///
/// A task is eligible when it is Pending (or already promoted to Ready), has
/// no subtasks, and every dependency, own or inherited from an ancestor, is
/// Completed. Does not mutate the workflow.
pub fn ready_tasks(workflow: &Workflow) -> Vec<TaskId> {
    workflow
        .tasks()
        .filter(|t| is_ready(workflow, t))
        .map(|t| t.id)
        .collect()
}

/// Mark every eligible Pending task as Ready so the manager can see it.
///
/// Returns the ids that changed status.
pub fn promote_ready(workflow: &mut Workflow) -> Result<Vec<TaskId>> {
    let mut promoted = Vec::new();
    for id in ready_tasks(workflow) {
        if let Some(task) = workflow.task_mut(&id) {
            if task.status == TaskStatus::Pending {
                task.mark_ready()?;
                promoted.push(id);
            }
        }
    }
    if !promoted.is_empty() {
        debug!(count = promoted.len(), "promoted tasks to ready");
    }
    Ok(promoted)
}

/// Complete every aggregation task whose subtasks have all completed.
///
/// Repeats until nothing changes, so a chain of nested aggregates resolves
/// in a single call. Returns the ids completed, innermost first.
pub fn propagate_completion(workflow: &mut Workflow) -> Result<Vec<TaskId>> {
    let mut completed = Vec::new();
    loop {
        let candidates: Vec<TaskId> = workflow
            .tasks()
            .filter(|t| t.is_aggregate() && t.can_start())
            .filter(|t| {
                t.subtasks
                    .iter()
                    .all(|c| workflow.task(c).map(Task::is_completed).unwrap_or(false))
            })
            .map(|t| t.id)
            .collect();
        if candidates.is_empty() {
            break;
        }
        for id in candidates {
            if let Some(task) = workflow.task_mut(&id) {
                task.complete_aggregate()?;
                trace!(task = %id, name = %task.name, "aggregate task completed");
                completed.push(id);
            }
        }
    }
    Ok(completed)
}

/// Pick which ready tasks to start this timestep.
///
/// Walks `ready` in order and takes each task that has an assigned agent with
/// a free slot, stopping once `global_free` slots are used. Ready tasks
/// without an agent are skipped and stay Ready.
pub fn select_dispatch(
    workflow: &Workflow,
    ready: &[TaskId],
    global_free: Option<usize>,
) -> Vec<(TaskId, AgentId)> {
    let mut free: HashMap<&AgentId, usize> = workflow
        .agents()
        .map(|a| (&a.id, a.free_slots()))
        .collect();
    let mut remaining = global_free;
    let mut selected = Vec::new();

    for id in ready {
        if remaining == Some(0) {
            break;
        }
        let Some(task) = workflow.task(id) else {
            continue;
        };
        let Some(agent) = &task.assigned_agent else {
            continue;
        };
        let Some(slots) = free.get_mut(agent) else {
            continue;
        };
        if *slots == 0 {
            continue;
        }
        *slots -= 1;
        if let Some(r) = remaining.as_mut() {
            *r -= 1;
        }
        selected.push((*id, agent.clone()));
    }
    selected
}
