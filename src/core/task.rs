//! Task data model for the workflow graph.
//!
//! Tasks are the units of work a manager assigns to agents. Atomic tasks are
//! executed by an agent; aggregation tasks own subtasks and complete only when
//! all of them have completed.

use crate::agent::AgentId;
use crate::core::resource::ResourceId;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker prefix for the manager-instructions note on a task.
pub const MANAGER_INSTRUCTIONS_MARKER: &str = "MANAGER_INSTRUCTIONS:";

/// Unique identifier for a task within a workflow.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// Statuses only move forward: Pending -> Ready -> Running -> Completed or
/// Failed. Aggregation tasks skip Running and complete straight from
/// Pending or Ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created, dependencies not yet known to be satisfied.
    Pending,
    /// Dependencies satisfied; waiting for an agent assignment or capacity.
    Ready,
    /// Task is currently being executed by an agent.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed with an error.
    Failed {
        /// Error message reported by the agent.
        error: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// Short name without payload, used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// A single task in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable name for the task.
    pub name: String,
    /// Detailed description of what the task should accomplish.
    pub description: String,
    /// Current execution status.
    pub status: TaskStatus,
    /// Tasks that must complete before this one may run, in declared order.
    pub dependencies: Vec<TaskId>,
    /// Owned child tasks, in declared order. Non-empty makes this an
    /// aggregation task.
    pub subtasks: Vec<TaskId>,
    /// Owning aggregation task, if this is a subtask.
    pub parent: Option<TaskId>,
    /// ID of the agent assigned to this task.
    pub assigned_agent: Option<AgentId>,
    pub estimated_duration_hours: f64,
    pub estimated_cost: f64,
    pub actual_duration_hours: Option<f64>,
    pub actual_cost: Option<f64>,
    /// Resources handed to the agent on dispatch.
    pub input_resource_ids: Vec<ResourceId>,
    /// Resources produced when the task completed.
    pub output_resource_ids: Vec<ResourceId>,
    /// Manager instructions and failure notes.
    pub execution_notes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with the given name and description.
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            subtasks: Vec::new(),
            parent: None,
            assigned_agent: None,
            estimated_duration_hours: 0.0,
            estimated_cost: 0.0,
            actual_duration_hours: None,
            actual_cost: None,
            input_resource_ids: Vec::new(),
            output_resource_ids: Vec::new(),
            execution_notes: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_estimates(mut self, duration_hours: f64, cost: f64) -> Self {
        self.estimated_duration_hours = duration_hours;
        self.estimated_cost = cost;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<ResourceId>) -> Self {
        self.input_resource_ids = inputs;
        self
    }

    pub fn assigned_to(mut self, agent: impl Into<AgentId>) -> Self {
        self.assigned_agent = Some(agent.into());
        self
    }

    /// An aggregation task owns subtasks and is never dispatched.
    pub fn is_aggregate(&self) -> bool {
        !self.subtasks.is_empty()
    }

    /// Check if the task is in a terminal state (Completed or Failed).
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed { .. }
        )
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Check if the task can still be started (Pending or Ready).
    pub fn can_start(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Ready)
    }

    /// Promote a pending task to Ready. Already-ready tasks are left alone.
    pub fn mark_ready(&mut self) -> Result<()> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Ready;
                Ok(())
            }
            TaskStatus::Ready => Ok(()),
            _ => Err(self.invalid(TaskStatus::Ready)),
        }
    }

    /// Start the task execution.
    ///
    /// Transitions status to Running and records the start time.
    pub fn start(&mut self) -> Result<()> {
        if !self.can_start() || self.is_aggregate() {
            return Err(self.invalid(TaskStatus::Running));
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark a running task as successfully completed.
    pub fn complete(&mut self) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(self.invalid(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Complete an aggregation task whose subtasks have all completed.
    pub fn complete_aggregate(&mut self) -> Result<()> {
        if !self.is_aggregate() || !self.can_start() {
            return Err(self.invalid(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark a running task as failed with an error message.
    pub fn fail(&mut self, error: &str) -> Result<()> {
        let target = TaskStatus::Failed {
            error: error.to_string(),
        };
        if self.status != TaskStatus::Running {
            return Err(self.invalid(target));
        }
        self.status = target;
        self.completed_at = Some(Utc::now());
        self.execution_notes.push(format!("Failed: {}", error));
        Ok(())
    }

    /// Assign an agent to this task.
    pub fn assign_agent(&mut self, agent_id: AgentId) {
        self.assigned_agent = Some(agent_id);
    }

    /// Set or replace the single manager-instructions note.
    ///
    /// Returns the note that was replaced, if any.
    pub fn set_manager_instructions(&mut self, instructions: &str) -> Option<String> {
        let note = format!("{} {}", MANAGER_INSTRUCTIONS_MARKER, instructions);
        match self
            .execution_notes
            .iter()
            .position(|n| n.starts_with(MANAGER_INSTRUCTIONS_MARKER))
        {
            Some(index) => Some(std::mem::replace(&mut self.execution_notes[index], note)),
            None => {
                self.execution_notes.push(note);
                None
            }
        }
    }

    fn invalid(&self, to: TaskStatus) -> Error {
        Error::InvalidTransition {
            task: self.id.to_string(),
            from: self.status.name().to_string(),
            to: to.name().to_string(),
        }
    }
}
