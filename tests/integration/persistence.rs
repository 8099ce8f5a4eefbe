//! Snapshot persistence and resuming runs from disk.

use std::time::Duration;

use tempfile::TempDir;

use workgym::config::{Config, EvaluationCadence};
use workgym::core::TaskStatus;
use workgym::engine::{ExecutionEngine, JsonlSink, RunOutcome};
use workgym::manager::NoOpManager;
use workgym::Error;

use crate::fixtures::{chain, diamond, test_config, MockAgent};

/// Test: Every timestep lands in the JSONL file
/// Given a diamond run writing to a JSONL sink
/// Then the file holds one record per timestep and the last one matches the report
#[tokio::test]
async fn test_jsonl_sink_mirrors_report() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("runs").join("diamond.jsonl");
    let (workflow, _) = diamond(Some("worker"));

    let engine = ExecutionEngine::new(
        test_config(10),
        workflow,
        vec![MockAgent::new("worker").with_slots(2).shared()],
        Box::new(NoOpManager),
    )
    .unwrap()
    .with_sink(Box::new(JsonlSink::new(&path).unwrap()));
    let report = engine.run().await.unwrap();

    let records = JsonlSink::read_records(&path).unwrap();
    assert_eq!(records.len() as u64, report.timesteps_executed);
    assert_eq!(records, report.records);
    let timesteps: Vec<u64> = records.iter().map(|r| r.timestep).collect();
    assert_eq!(timesteps, vec![1, 2, 3]);

    let latest = JsonlSink::load_latest(&path).unwrap().unwrap();
    assert_eq!(Some(&latest), report.final_workflow());
    assert!(latest.all_tasks_terminal());
}

/// Test: A run interrupted mid-task resumes from its last snapshot
/// Given a snapshot taken while the first task of a chain is running
/// When the run resumes with a fresh agent under the same id
/// Then the running task is started again and the chain completes
#[tokio::test(start_paused = true)]
async fn test_resume_restarts_running_task() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chain.jsonl");
    let (workflow, ids) = chain(2, Some("worker"));

    let slow = MockAgent::new("worker").with_latency(Duration::from_secs(60));
    let slow_probe = slow.probe();
    let mut engine =
        ExecutionEngine::new(test_config(10), workflow, vec![slow.shared()], Box::new(NoOpManager))
            .unwrap()
            .with_sink(Box::new(JsonlSink::new(&path).unwrap()));
    assert_eq!(engine.step().await.unwrap(), None);
    drop(engine);
    assert_eq!(slow_probe.executions(), 1);

    let snapshot = JsonlSink::load_latest(&path).unwrap().unwrap();
    assert_eq!(snapshot.timestep, 1);
    assert_eq!(snapshot.task(&ids[0]).unwrap().status, TaskStatus::Running);

    let fresh = MockAgent::new("worker");
    let fresh_probe = fresh.probe();
    let resumed =
        ExecutionEngine::resume(test_config(10), snapshot, vec![fresh.shared()], Box::new(NoOpManager))
            .unwrap();
    let report = resumed.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.records[0].timestep, 2);
    assert_eq!(report.records[0].dispatched, vec![ids[0]]);
    assert_eq!(fresh_probe.executions(), 2);
    let wf = report.final_workflow().unwrap();
    assert!(ids.iter().all(|id| wf.task(id).unwrap().is_completed()));
}

#[tokio::test(start_paused = true)]
async fn test_resume_requires_every_agent() {
    let (workflow, _) = chain(1, Some("worker"));
    let mut engine = ExecutionEngine::new(
        test_config(10),
        workflow,
        vec![MockAgent::new("worker")
            .with_latency(Duration::from_secs(60))
            .shared()],
        Box::new(NoOpManager),
    )
    .unwrap();
    engine.step().await.unwrap();
    let snapshot = engine.workflow().clone();
    drop(engine);

    let err = ExecutionEngine::resume(
        test_config(10),
        snapshot.clone(),
        vec![MockAgent::new("someone-else").shared()],
        Box::new(NoOpManager),
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnknownAgent { ref id, .. } if id == "worker"));

    // A snapshot with running work cannot start a fresh run.
    let err = ExecutionEngine::new(
        test_config(10),
        snapshot,
        vec![MockAgent::new("worker").shared()],
        Box::new(NoOpManager),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

/// Test: Config survives a save and load
#[test]
fn test_config_round_trip_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("workgym.toml");

    let mut config = Config::default();
    config.engine.max_timesteps = 12;
    config.engine.evaluation_cadence = EvaluationCadence::Both;
    config.engine.selected_timesteps = vec![3, 6];
    config.evaluation.max_concurrent_rules = 8;
    config.evaluation.count_continued_gate_as_passed = true;
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.engine.max_timesteps, 12);
    assert_eq!(loaded.engine.evaluation_cadence, EvaluationCadence::Both);
    assert_eq!(loaded.engine.selected_timesteps, vec![3, 6]);
    assert_eq!(loaded.evaluation.max_concurrent_rules, 8);
    assert!(loaded.evaluation.count_continued_gate_as_passed);
}

#[test]
fn test_invalid_config_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("workgym.toml");
    std::fs::write(&path, "[evaluation]\nmax_concurrent_rules = 0\n").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}
