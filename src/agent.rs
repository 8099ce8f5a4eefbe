//! Agent port: the interface through which workers execute tasks.
//!
//! Agent internals (a policy, a script, a language model) live outside this
//! crate. The engine only needs identity, capacity, a capability check and an
//! async `execute`.

use crate::core::resource::Resource;
use crate::core::task::{Task, TaskId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique identifier for an agent, chosen by whoever registers it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broad category of worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Ai,
    HumanSimulated,
    Stakeholder,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::Ai => write!(f, "ai"),
            AgentKind::HumanSimulated => write!(f, "human_simulated"),
            AgentKind::Stakeholder => write!(f, "stakeholder"),
        }
    }
}

/// What an agent reports when it finishes a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    /// New resources; the engine stamps the producing task and stores them.
    pub output_resources: Vec<Resource>,
    pub cost: f64,
    pub duration_hours: f64,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success(outputs: Vec<Resource>, cost: f64, duration_hours: f64) -> Self {
        Self {
            success: true,
            output_resources: outputs,
            cost,
            duration_hours,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output_resources: Vec::new(),
            cost: 0.0,
            duration_hours: 0.0,
            error: Some(error.into()),
        }
    }
}

/// A worker that can execute tasks.
///
/// `execute` may take arbitrarily long; the engine spawns it and picks the
/// outcome up at a later commit phase.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> AgentId;

    fn kind(&self) -> AgentKind;

    /// How many tasks this agent may run at once.
    fn max_concurrent_tasks(&self) -> usize {
        1
    }

    /// Capability check used when the manager assigns a task.
    fn can_handle(&self, _task: &Task) -> bool {
        true
    }

    async fn execute(&self, task: Task, inputs: Vec<Resource>) -> TaskOutcome;
}

/// Snapshot of an agent visible to the manager and persisted per timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPublicState {
    pub id: AgentId,
    pub kind: AgentKind,
    pub max_concurrent_tasks: usize,
    pub in_flight: BTreeSet<TaskId>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

impl AgentPublicState {
    pub fn new(id: AgentId, kind: AgentKind, max_concurrent_tasks: usize) -> Self {
        Self {
            id,
            kind,
            max_concurrent_tasks,
            in_flight: BTreeSet::new(),
            tasks_completed: 0,
            tasks_failed: 0,
        }
    }

    pub fn of(agent: &dyn Agent) -> Self {
        Self::new(agent.id(), agent.kind(), agent.max_concurrent_tasks())
    }

    pub fn free_slots(&self) -> usize {
        self.max_concurrent_tasks.saturating_sub(self.in_flight.len())
    }

    pub fn has_capacity(&self) -> bool {
        self.free_slots() > 0
    }
}
