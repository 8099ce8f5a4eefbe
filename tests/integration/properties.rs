//! Property tests for readiness and score bounds.

use std::sync::Arc;

use proptest::prelude::*;

use workgym::config::EvaluationConfig;
use workgym::core::{Task, TaskId, TaskStatus};
use workgym::evaluation::{OnFailureAction, StagedEvaluator};
use workgym::orchestration::ready_tasks;
use workgym::workflow::{Workflow, WorkflowBuilder};

use crate::fixtures::{fixed_scores, three_stage_rubric};

/// One generated task: candidate dependencies, completed flag and parent.
type NodeSpec = (Vec<usize>, bool, Option<usize>);

/// Random task hierarchy. Task `i` may have a parent with a lower index and
/// only keeps dependencies on earlier tasks with the same parent, so
/// dependency, subtask and inherited edges can never close a cycle.
fn dag_strategy() -> impl Strategy<Value = Vec<NodeSpec>> {
    (1usize..12).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                let parent = if i == 0 {
                    Just(None::<usize>).boxed()
                } else {
                    proptest::option::of(0..i).boxed()
                };
                (
                    proptest::sample::subsequence((0..i).collect::<Vec<_>>(), 0..=i),
                    any::<bool>(),
                    parent,
                )
            })
            .collect::<Vec<_>>()
    })
}

/// Dependencies task `i` actually declares after the sibling filter.
fn declared(spec: &[NodeSpec], i: usize) -> Vec<usize> {
    spec[i].0.iter().copied().filter(|d| spec[*d].2 == spec[i].2).collect()
}

/// Own dependencies plus those of every ancestor.
fn inherited(spec: &[NodeSpec], i: usize) -> Vec<usize> {
    let mut deps = Vec::new();
    let mut current = Some(i);
    while let Some(k) = current {
        deps.extend(declared(spec, k));
        current = spec[k].2;
    }
    deps
}

fn build(spec: &[NodeSpec]) -> (Workflow, Vec<TaskId>) {
    let mut ids = Vec::new();
    let mut builder = WorkflowBuilder::new("random");
    for (i, (_, done, parent)) in spec.iter().enumerate() {
        let mut task = Task::new(&format!("t{}", i), "")
            .with_dependencies(declared(spec, i).iter().map(|d| ids[*d]).collect());
        if *done {
            task.status = TaskStatus::Completed;
        }
        ids.push(task.id);
        builder = match parent {
            Some(p) => builder.subtask(ids[*p], task),
            None => builder.task(task),
        };
    }
    (builder.build().unwrap(), ids)
}

fn gate_action() -> impl Strategy<Value = OnFailureAction> {
    prop_oneof![
        Just(OnFailureAction::SkipRemaining),
        Just(OnFailureAction::Continue),
        (0.0f64..1.0).prop_map(|on_failure_score| OnFailureAction::ZeroCategory { on_failure_score }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: A task is ready exactly when it is unfinished, has no
    /// subtasks, and every dependency, own or inherited, is completed.
    #[test]
    fn prop_ready_set_matches_dependencies(spec in dag_strategy()) {
        let (workflow, ids) = build(&spec);
        let ready = ready_tasks(&workflow);

        for (i, (_, done, _)) in spec.iter().enumerate() {
            let aggregate = spec.iter().any(|(_, _, parent)| *parent == Some(i));
            let expected = !done && !aggregate && inherited(&spec, i).iter().all(|d| spec[*d].1);
            prop_assert_eq!(ready.contains(&ids[i]), expected, "task t{}", i);
        }
    }

    /// Property: Ready tasks come back in registration order.
    #[test]
    fn prop_ready_set_is_ordered(spec in dag_strategy()) {
        let (workflow, ids) = build(&spec);
        let ready = ready_tasks(&workflow);
        let positions: Vec<usize> = ready
            .iter()
            .map(|r| ids.iter().position(|id| id == r).unwrap())
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    /// Property: Category totals stay within [0, max] for any rule output.
    #[test]
    fn prop_scores_stay_in_bounds(
        s1 in -2.0f64..3.0,
        s2 in -10.0f64..20.0,
        s3 in -10.0f64..20.0,
        action in gate_action(),
    ) {
        let evaluator = StagedEvaluator::new(
            EvaluationConfig::default(),
            Arc::new(fixed_scores(&[("s1", s1), ("s2", s2), ("s3", s3)])),
        );
        let rubric = three_stage_rubric(action);
        let result = tokio_test::block_on(
            evaluator.evaluate_staged_rubric(Arc::new(Workflow::new("bounds")), &rubric),
        )
        .unwrap();

        prop_assert!(result.total_score >= 0.0);
        prop_assert!(result.total_score <= result.max_score);
        prop_assert!((0.0..=1.0).contains(&result.normalized_score));
        prop_assert!(result.stages_passed <= result.stages_evaluated);
        for stage in &result.stages {
            prop_assert!(stage.raw_score >= 0.0 && stage.raw_score <= stage.max_points);
        }
    }
}
