//! Full-run tests: from the first timestep to a terminal outcome.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use workgym::agent::{Agent, AgentId, AgentKind, TaskOutcome};
use workgym::config::{EngineConfig, EvaluationCadence, EvaluationConfig};
use workgym::core::{Resource, Task, TaskStatus};
use workgym::engine::{ExecutionEngine, RunOutcome};
use workgym::evaluation::StagedEvaluator;
use workgym::manager::{Action, GreedyManager, NoOpManager, ScriptedManager, SubtaskSpec};
use workgym::workflow::WorkflowBuilder;
use workgym::Error;

use crate::fixtures::{chain, completion_rubric, diamond, fixed_scores, test_config, test_task, MockAgent};

/// Test: Unassigned diamond never dispatches
/// Given a 4-node diamond with no agent assignments
/// When the engine runs with a 5-timestep budget
/// Then the run times out with nothing started
#[tokio::test]
async fn test_unassigned_diamond_times_out() {
    let (workflow, ids) = diamond(None);
    let agent = MockAgent::new("worker");
    let probe = agent.probe();

    let engine =
        ExecutionEngine::new(test_config(5), workflow, vec![agent.shared()], Box::new(NoOpManager))
            .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert_eq!(report.timesteps_executed, 5);
    assert_eq!(probe.executions(), 0);
    assert!(report.records.iter().all(|r| r.dispatched.is_empty()));

    let wf = report.final_workflow().unwrap();
    assert_eq!(wf.task(&ids[0]).unwrap().status, TaskStatus::Ready);
    for id in &ids[1..] {
        assert_eq!(wf.task(id).unwrap().status, TaskStatus::Pending);
    }
}

/// Test: Assigned diamond runs level by level
/// Given a diamond assigned to one agent with two slots
/// When the engine runs
/// Then A, then B and C together, then D complete, and D sees both inputs
#[tokio::test]
async fn test_assigned_diamond_completes() {
    let (workflow, [a, b, c, d]) = diamond(Some("worker"));
    let agent = MockAgent::new("worker").with_slots(2);

    let engine =
        ExecutionEngine::new(test_config(10), workflow, vec![agent.shared()], Box::new(NoOpManager))
            .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.timesteps_executed, 3);
    assert_eq!(report.records[0].committed, vec![a]);
    let middle: HashSet<_> = report.records[1].committed.iter().copied().collect();
    assert_eq!(middle, HashSet::from([b, c]));
    assert_eq!(report.records[2].committed, vec![d]);

    let wf = report.final_workflow().unwrap();
    let d_output = wf.resources().produced_by(&d);
    assert_eq!(d_output.len(), 1);
    assert_eq!(d_output[0].content, "D built from 2 inputs");
    assert_eq!(wf.total_cost, 4.0);
    assert_eq!(wf.total_simulated_hours, 4.0);
    assert_eq!(wf.agent(&AgentId::from("worker")).unwrap().tasks_completed, 4);
}

/// Test: Greedy manager assigns work as it becomes ready
#[tokio::test]
async fn test_greedy_manager_drives_chain() {
    let (workflow, ids) = chain(3, None);
    let agent = MockAgent::new("worker");

    let engine =
        ExecutionEngine::new(test_config(10), workflow, vec![agent.shared()], Box::new(GreedyManager))
            .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.timesteps_executed, 3);
    for (record, id) in report.records.iter().zip(&ids) {
        assert!(record.action.success);
        assert_eq!(record.action.action_type, "assign_task");
        assert_eq!(record.committed, vec![*id]);
    }
}

/// Test: Bulk assignment falls back to the first agent
#[tokio::test]
async fn test_assign_all_pending_then_run() {
    let (workflow, ids) = chain(3, None);
    let manager = ScriptedManager::new(vec![Action::AssignAllPending { agent_id: None }]);

    let engine = ExecutionEngine::new(
        test_config(10),
        workflow,
        vec![MockAgent::new("worker").shared()],
        Box::new(manager),
    )
    .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.records[0].action.side_effect_ids.len(), 3);
    let wf = report.final_workflow().unwrap();
    for id in &ids {
        assert_eq!(
            wf.task(id).unwrap().assigned_agent,
            Some(AgentId::from("worker"))
        );
    }
}

/// Test: A failed task blocks its dependents
/// Given a 3-step chain whose first step fails
/// When the engine runs
/// Then the failure is recorded and the rest never start
#[tokio::test]
async fn test_failure_blocks_dependents() {
    let (workflow, ids) = chain(3, Some("worker"));
    let agent = MockAgent::new("worker").failing_on("step-0");
    let probe = agent.probe();

    let engine =
        ExecutionEngine::new(test_config(4), workflow, vec![agent.shared()], Box::new(NoOpManager))
            .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert_eq!(probe.executions(), 1);

    let wf = report.final_workflow().unwrap();
    let failed = wf.task(&ids[0]).unwrap();
    assert!(matches!(&failed.status, TaskStatus::Failed { error } if error.contains("step-0")));
    assert!(failed.execution_notes.iter().any(|n| n.starts_with("Failed:")));
    assert_eq!(wf.status_counts().pending, 2);
    assert_eq!(wf.agent(&AgentId::from("worker")).unwrap().tasks_failed, 1);
    assert!(wf.resources().is_empty());
}

/// Test: Manager-created tasks join the run
#[tokio::test]
async fn test_created_task_is_scheduled() {
    let (workflow, ids) = chain(1, Some("worker"));
    let manager = ScriptedManager::new(vec![Action::CreateTask {
        name: "review".to_string(),
        description: "review the first step".to_string(),
        dependencies: vec![ids[0]],
        estimated_duration_hours: 1.0,
        estimated_cost: 1.0,
        assigned_agent: Some(AgentId::from("worker")),
    }]);

    let engine = ExecutionEngine::new(
        test_config(10),
        workflow,
        vec![MockAgent::new("worker").shared()],
        Box::new(manager),
    )
    .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let wf = report.final_workflow().unwrap();
    assert_eq!(wf.task_count(), 2);
    assert!(wf.find_task_by_name("review").unwrap().is_completed());
}

/// Test: Hierarchies resolve bottom-up within one commit
/// Given P with subtasks S1 and S2, S2 with subtask S2a, and Q after P
/// When S1 and S2a complete in the first commit
/// Then S2 and P complete in that same commit and Q runs next
#[tokio::test]
async fn test_nested_aggregates_complete_in_same_commit() {
    let parent = Task::new("P", "parent");
    let p = parent.id;
    let s1 = test_task("S1", Some("worker"));
    let s2 = Task::new("S2", "nested parent");
    let s2a = test_task("S2a", Some("worker"));
    let q = test_task("Q", Some("worker")).with_dependencies(vec![p]);
    let (s1_id, s2_id, s2a_id, q_id) = (s1.id, s2.id, s2a.id, q.id);

    let workflow = WorkflowBuilder::new("nested")
        .agent("worker", AgentKind::Ai, 1)
        .task(parent)
        .subtask(p, s1)
        .subtask(p, s2)
        .subtask(s2_id, s2a)
        .task(q)
        .build()
        .unwrap();

    let agent = MockAgent::new("worker").with_slots(2);
    let engine =
        ExecutionEngine::new(test_config(10), workflow, vec![agent.shared()], Box::new(NoOpManager))
            .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.timesteps_executed, 2);

    let first = &report.records[0];
    let committed: HashSet<_> = first.committed.iter().copied().collect();
    assert_eq!(committed, HashSet::from([s1_id, s2a_id]));
    for id in [s2_id, p] {
        assert!(first.workflow.task(&id).unwrap().is_completed());
    }
    assert_eq!(report.records[1].committed, vec![q_id]);
}

/// Test: A decomposed task completes through its subtasks
/// Given a 2-step chain whose second step is split into two sequential subtasks
/// When the engine runs
/// Then the subtasks run one per timestep and the parent completes by propagation
#[tokio::test]
async fn test_decomposed_task_completes_via_subtasks() {
    let (workflow, ids) = chain(2, Some("worker"));
    let manager = ScriptedManager::new(vec![Action::DecomposeTask {
        task_id: ids[1],
        subtasks: vec![
            SubtaskSpec::new("compile", "build the sources"),
            SubtaskSpec::new("package", "bundle the build"),
        ],
        sequential: true,
    }]);

    let engine = ExecutionEngine::new(
        test_config(10),
        workflow,
        vec![MockAgent::new("worker").shared()],
        Box::new(manager),
    )
    .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.records[0].action.success);
    assert_eq!(report.timesteps_executed, 3);

    let wf = report.final_workflow().unwrap();
    let compile = wf.find_task_by_name("compile").unwrap().id;
    let package = wf.find_task_by_name("package").unwrap().id;
    let dispatched: Vec<_> = report.records.iter().map(|r| r.dispatched.clone()).collect();
    assert_eq!(dispatched, vec![vec![ids[0]], vec![compile], vec![package]]);

    let parent = wf.task(&ids[1]).unwrap();
    assert!(parent.is_completed());
    assert_eq!(parent.subtasks, vec![compile, package]);
}

/// Test: Request end cancels even with work outstanding
#[tokio::test]
async fn test_request_end_cancels_run() {
    let (workflow, _) = chain(3, Some("worker"));
    let manager = ScriptedManager::new(vec![
        Action::NoOp,
        Action::RequestEnd {
            reason: "budget spent".to_string(),
        },
    ]);

    let engine = ExecutionEngine::new(
        test_config(10),
        workflow,
        vec![MockAgent::new("worker").shared()],
        Box::new(manager),
    )
    .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.timesteps_executed, 2);
    assert!(report.records[1].dispatched.is_empty());
    assert!(!report.final_workflow().unwrap().active);
}

/// Test: Halt stops dispatch but commits arrived completions
/// Given a slow task dispatched in timestep 1 that outlives the commit window
/// When the halt token fires after the task has reported
/// Then timestep 2 dispatches nothing, commits the task and ends halted
#[tokio::test(start_paused = true)]
async fn test_halt_commits_arrived_completions() {
    let (workflow, ids) = chain(2, Some("worker"));
    let agent = MockAgent::new("worker").with_latency(Duration::from_millis(300));
    let mut engine =
        ExecutionEngine::new(test_config(10), workflow, vec![agent.shared()], Box::new(NoOpManager))
            .unwrap();

    assert_eq!(engine.step().await.unwrap(), None);
    assert_eq!(engine.records()[0].dispatched, vec![ids[0]]);
    assert!(engine.records()[0].committed.is_empty());
    assert_eq!(engine.workflow().task(&ids[0]).unwrap().status, TaskStatus::Running);

    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.halt_token().cancel();

    assert_eq!(engine.step().await.unwrap(), Some(RunOutcome::Halted));
    let record = &engine.records()[1];
    assert!(record.dispatched.is_empty());
    assert_eq!(record.committed, vec![ids[0]]);
    // Promotion ran before this commit, so the dependent is still pending.
    assert_eq!(engine.workflow().task(&ids[1]).unwrap().status, TaskStatus::Pending);
}

/// Test: Halt cuts the commit window short
/// Given a run spawned on its own task with a 10s commit window
/// When the halt token fires while the only task is still executing
/// Then the run ends halted at once and the late result is never committed
#[tokio::test(start_paused = true)]
async fn test_halt_during_commit_window() {
    let (workflow, ids) = chain(1, Some("worker"));
    let agent = MockAgent::new("worker").with_latency(Duration::from_millis(500));
    let config = EngineConfig {
        commit_window_ms: 10_000,
        ..test_config(10)
    };
    let engine =
        ExecutionEngine::new(config, workflow, vec![agent.shared()], Box::new(NoOpManager)).unwrap();
    let halt = engine.halt_token();

    let start = tokio::time::Instant::now();
    let run = tokio::spawn(engine.run());
    tokio::time::sleep(Duration::from_millis(100)).await;
    halt.cancel();
    let report = run.await.unwrap().unwrap();

    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(report.outcome, RunOutcome::Halted);
    assert_eq!(report.timesteps_executed, 1);
    assert_eq!(report.records[0].dispatched, vec![ids[0]]);
    assert!(report.records[0].committed.is_empty());
    let wf = report.final_workflow().unwrap();
    assert_eq!(wf.task(&ids[0]).unwrap().status, TaskStatus::Running);
}

/// Test: Work spans timesteps when agents are slower than the commit window
#[tokio::test(start_paused = true)]
async fn test_slow_task_commits_in_later_timestep() {
    let (workflow, ids) = chain(1, Some("worker"));
    let agent = MockAgent::new("worker").with_latency(Duration::from_millis(500));

    let engine =
        ExecutionEngine::new(test_config(10), workflow, vec![agent.shared()], Box::new(NoOpManager))
            .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.timesteps_executed, 3);
    assert_eq!(report.records[0].dispatched, vec![ids[0]]);
    assert!(report.records[1].dispatched.is_empty());
    assert_eq!(report.records[2].committed, vec![ids[0]]);
}

/// Test: Evaluation cadence each timestep plus on completion
#[tokio::test]
async fn test_evaluation_each_timestep_and_final() {
    let (workflow, _) = chain(2, Some("worker"));
    let config = EngineConfig {
        evaluation_cadence: EvaluationCadence::Both,
        ..test_config(10)
    };
    let evaluator = StagedEvaluator::new(EvaluationConfig::default(), Arc::new(fixed_scores(&[])));

    let engine = ExecutionEngine::new(
        config,
        workflow,
        vec![MockAgent::new("worker").shared()],
        Box::new(NoOpManager),
    )
    .unwrap()
    .with_evaluation(evaluator, vec![completion_rubric()])
    .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let first = report.records[0].evaluation.as_ref().unwrap();
    assert_eq!(first["completion"].total_score, 1.5);
    let last = report.records[1].evaluation.as_ref().unwrap();
    assert_eq!(last["completion"].normalized_score, 1.0);
    assert_eq!(report.final_evaluation.as_ref(), Some(last));
    assert!(report.records.iter().all(|r| r.utility.is_none()));
    assert!(report.final_utility.is_none());
}

/// Test: Stakeholder preferences turn evaluations into a utility
/// Given weights completion=1 and speed=1, normalized to one half each
/// When only the completion category is evaluated
/// Then each record's utility is half the completion score
#[tokio::test]
async fn test_preferences_weight_utility() {
    let (workflow, _) = chain(2, Some("worker"));
    let config = EngineConfig {
        evaluation_cadence: EvaluationCadence::Both,
        ..test_config(10)
    };
    let manager = ScriptedManager::new(vec![Action::UpdatePreferences {
        weights: BTreeMap::from([("completion".to_string(), 1.0), ("speed".to_string(), 1.0)]),
    }]);
    let evaluator = StagedEvaluator::new(EvaluationConfig::default(), Arc::new(fixed_scores(&[])));

    let engine = ExecutionEngine::new(
        config,
        workflow,
        vec![MockAgent::new("worker").shared()],
        Box::new(manager),
    )
    .unwrap()
    .with_evaluation(evaluator, vec![completion_rubric()])
    .unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!((report.records[0].utility.unwrap() - 0.375).abs() < 1e-9);
    assert!((report.records[1].utility.unwrap() - 0.5).abs() < 1e-9);
    assert_eq!(report.final_utility, report.records[1].utility);
}

/// Test: Selected timesteps are evaluated even when the cadence is never
#[tokio::test]
async fn test_selected_timesteps_only() {
    let (workflow, _) = diamond(None);
    let config = EngineConfig {
        evaluation_cadence: EvaluationCadence::Never,
        selected_timesteps: vec![2],
        ..test_config(3)
    };
    let evaluator = StagedEvaluator::new(EvaluationConfig::default(), Arc::new(fixed_scores(&[])));

    let engine = ExecutionEngine::new(
        config,
        workflow,
        vec![MockAgent::new("worker").shared()],
        Box::new(NoOpManager),
    )
    .unwrap()
    .with_evaluation(evaluator, vec![completion_rubric()])
    .unwrap();
    let report = engine.run().await.unwrap();

    let evaluated: Vec<u64> = report
        .records
        .iter()
        .filter(|r| r.evaluation.is_some())
        .map(|r| r.timestep)
        .collect();
    assert_eq!(evaluated, vec![2]);
    assert!(report.final_evaluation.is_none());
}

/// Returns the same resource twice, which collides in the resource store.
struct DuplicatingAgent;

#[async_trait]
impl Agent for DuplicatingAgent {
    fn id(&self) -> AgentId {
        AgentId::from("dup")
    }

    fn kind(&self) -> AgentKind {
        AgentKind::HumanSimulated
    }

    async fn execute(&self, _task: Task, _inputs: Vec<Resource>) -> TaskOutcome {
        let resource = Resource::new("report", "twice");
        TaskOutcome::success(vec![resource.clone(), resource], 1.0, 1.0)
    }
}

/// Test: A duplicate resource id at commit is fatal
#[tokio::test]
async fn test_duplicate_resource_is_fatal() {
    let (workflow, _) = chain(1, Some("dup"));
    let engine = ExecutionEngine::new(
        test_config(5),
        workflow,
        vec![Arc::new(DuplicatingAgent)],
        Box::new(NoOpManager),
    )
    .unwrap();

    let err = engine.run().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, Error::EngineFatal { .. }));
}

/// Test: Invalid rubrics are rejected before the first timestep
#[tokio::test]
async fn test_invalid_rubric_rejected_up_front() {
    let (workflow, _) = chain(1, Some("worker"));
    let mut rubric = completion_rubric();
    rubric.stages[0].max_points = 0.0;
    let evaluator = StagedEvaluator::new(EvaluationConfig::default(), Arc::new(fixed_scores(&[])));

    let err = ExecutionEngine::new(
        test_config(5),
        workflow,
        vec![MockAgent::new("worker").shared()],
        Box::new(NoOpManager),
    )
    .unwrap()
    .with_evaluation(evaluator, vec![rubric])
    .unwrap_err();
    assert!(matches!(err, Error::InvalidRubric { .. }));
}
