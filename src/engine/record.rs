//! Per-timestep records and the run report.

use serde::{Deserialize, Serialize};

use crate::core::TaskId;
use crate::evaluation::EvaluationMap;
use crate::manager::ActionResult;
use crate::workflow::Workflow;

/// One self-contained persisted record: the full committed workflow plus the
/// evaluation that ran against it, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestepRecord {
    pub timestep: u64,
    pub workflow: Workflow,
    pub evaluation: Option<EvaluationMap>,
    /// Set when an evaluation started but was abandoned.
    #[serde(default)]
    pub evaluation_error: Option<String>,
    /// Preference-weighted utility of `evaluation`.
    #[serde(default)]
    pub utility: Option<f64>,
    pub action: ActionResult,
    pub dispatched: Vec<TaskId>,
    pub committed: Vec<TaskId>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every task reached a terminal state and the manager had nothing left to do.
    Completed,
    /// The timestep budget ran out first.
    TimedOut,
    /// The manager asked to end the run.
    Cancelled,
    /// An external halt signal stopped the run.
    Halted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::TimedOut => write!(f, "timed_out"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
            RunOutcome::Halted => write!(f, "halted"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub timesteps_executed: u64,
    pub records: Vec<TimestepRecord>,
    /// Evaluation of the final committed state, when one ran.
    pub final_evaluation: Option<EvaluationMap>,
    /// Preference-weighted utility of `final_evaluation`.
    pub final_utility: Option<f64>,
    /// Most agent executions in flight at once during the run.
    pub peak_task_concurrency: usize,
}

impl RunReport {
    pub fn final_workflow(&self) -> Option<&Workflow> {
        self.records.last().map(|r| &r.workflow)
    }
}
