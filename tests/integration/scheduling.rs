//! Readiness and dispatch selection through the public scheduler API.

use workgym::agent::{AgentId, AgentKind, AgentPublicState};
use workgym::core::{Task, TaskStatus};
use workgym::orchestration::{ready_tasks, select_dispatch};
use workgym::workflow::WorkflowBuilder;
use workgym::Error;

use crate::fixtures::{diamond, independent, test_task};

fn completed(mut task: Task) -> Task {
    task.status = TaskStatus::Completed;
    task
}

/// Test: Readiness follows completed dependencies
/// Given a diamond where only A is completed
/// Then B and C are ready and D is not
#[test]
fn test_diamond_readiness_after_root() {
    let a = completed(test_task("A", None));
    let b = test_task("B", None).with_dependencies(vec![a.id]);
    let c = test_task("C", None).with_dependencies(vec![a.id]);
    let d = test_task("D", None).with_dependencies(vec![b.id, c.id]);
    let (b_id, c_id) = (b.id, c.id);
    let workflow = WorkflowBuilder::new("diamond")
        .task(a)
        .task(b)
        .task(c)
        .task(d)
        .build()
        .unwrap();

    assert_eq!(ready_tasks(&workflow), vec![b_id, c_id]);
}

#[test]
fn test_fresh_diamond_has_single_root() {
    let (workflow, ids) = diamond(None);
    assert_eq!(ready_tasks(&workflow), vec![ids[0]]);
}

/// Test: Subtasks inherit their parent's dependencies
#[test]
fn test_subtask_waits_for_parent_dependency() {
    let gate = test_task("gate", None);
    let parent = Task::new("parent", "").with_dependencies(vec![gate.id]);
    let (gate_id, parent_id) = (gate.id, parent.id);
    let child = test_task("child", None);
    let child_id = child.id;

    let workflow = WorkflowBuilder::new("inherit")
        .task(gate)
        .task(parent)
        .subtask(parent_id, child)
        .build()
        .unwrap();

    let ready = ready_tasks(&workflow);
    assert_eq!(ready, vec![gate_id]);
    assert!(!ready.contains(&child_id));
    assert!(!ready.contains(&parent_id));
}

#[test]
fn test_cycle_rejected_at_construction() {
    let mut a = test_task("A", None);
    let b = test_task("B", None).with_dependencies(vec![a.id]);
    a.dependencies.push(b.id);

    let err = WorkflowBuilder::new("cycle").task(a).task(b).build().unwrap_err();
    assert!(matches!(err, Error::CyclicDependency { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_unknown_dependency_rejected() {
    let ghost = Task::new("ghost", "");
    let task = test_task("A", None).with_dependencies(vec![ghost.id]);
    let err = WorkflowBuilder::new("unknown").task(task).build().unwrap_err();
    assert!(matches!(err, Error::UnknownTask { .. }));
}

#[test]
fn test_unknown_assigned_agent_rejected() {
    let err = WorkflowBuilder::new("agentless")
        .task(test_task("A", Some("nobody")))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::UnknownAgent { .. }));
}

/// Test: Dispatch selection honors agent slots and the global cap
#[test]
fn test_select_dispatch_respects_slots_and_global_cap() {
    let (workflow, ids) = independent(5, Some("worker"));
    // "worker" is registered with a single slot.
    let ready = ready_tasks(&workflow);
    assert_eq!(ready.len(), 5);
    let picked = select_dispatch(&workflow, &ready, None);
    assert_eq!(picked, vec![(ids[0], AgentId::from("worker"))]);

    let state = AgentPublicState::new(AgentId::from("wide"), AgentKind::Ai, 4);
    let mut builder = WorkflowBuilder::new("wide").agent_state(state);
    let mut wide_ids = Vec::new();
    for i in 0..5 {
        let task = test_task(&format!("t{}", i), Some("wide"));
        wide_ids.push(task.id);
        builder = builder.task(task);
    }
    let workflow = builder.build().unwrap();
    let ready = ready_tasks(&workflow);

    assert_eq!(select_dispatch(&workflow, &ready, None).len(), 4);
    let capped = select_dispatch(&workflow, &ready, Some(2));
    assert_eq!(
        capped.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        wide_ids[..2].to_vec()
    );
}

#[test]
fn test_unassigned_ready_tasks_are_skipped() {
    let (workflow, _) = independent(3, None);
    let ready = ready_tasks(&workflow);
    assert_eq!(ready.len(), 3);
    assert!(select_dispatch(&workflow, &ready, None).is_empty());
}
