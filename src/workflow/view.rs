//! Owned, read-only snapshot handed to the manager each timestep.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentPublicState};
use crate::core::{Resource, Task, TaskId, TaskStatus};
use crate::manager::ActionResult;

use super::{Message, StatusCounts, Workflow, WorkflowId};

/// How many trailing action results a view carries.
pub const RECENT_ACTIONS: usize = 10;

/// A point-in-time copy of the workflow, detached from the live aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowView {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub timestep: u64,
    /// All tasks, in registration order.
    pub tasks: Vec<Task>,
    /// Tasks the scheduler considers ready right now.
    pub ready_task_ids: Vec<TaskId>,
    pub resources: Vec<Resource>,
    pub agents: Vec<AgentPublicState>,
    pub messages: Vec<Message>,
    pub recent_actions: Vec<ActionResult>,
    pub preferences: BTreeMap<String, f64>,
    pub status_counts: StatusCounts,
    pub total_cost: f64,
    pub total_simulated_hours: f64,
}

impl WorkflowView {
    pub fn capture(workflow: &Workflow, ready: Vec<TaskId>) -> Self {
        let log = workflow.action_log();
        let recent = log[log.len().saturating_sub(RECENT_ACTIONS)..].to_vec();
        Self {
            workflow_id: workflow.id,
            name: workflow.name.clone(),
            timestep: workflow.timestep,
            tasks: workflow.tasks().cloned().collect(),
            ready_task_ids: ready,
            resources: workflow.resources().iter().cloned().collect(),
            agents: workflow.agents().cloned().collect(),
            messages: workflow.messages().to_vec(),
            recent_actions: recent,
            preferences: workflow.preferences().clone(),
            status_counts: workflow.status_counts(),
            total_cost: workflow.total_cost,
            total_simulated_hours: workflow.total_simulated_hours,
        }
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn task_by_name(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Ready tasks that still need an agent.
    pub fn ready_unassigned(&self) -> Vec<&Task> {
        self.ready_task_ids
            .iter()
            .filter_map(|id| self.task(id))
            .filter(|t| t.assigned_agent.is_none())
            .collect()
    }

    /// Atomic tasks that have not started and have no agent yet.
    pub fn pending_unassigned(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| {
                !t.is_aggregate()
                    && matches!(t.status, TaskStatus::Pending | TaskStatus::Ready)
                    && t.assigned_agent.is_none()
            })
            .collect()
    }

    pub fn agent(&self, id: &AgentId) -> Option<&AgentPublicState> {
        self.agents.iter().find(|a| &a.id == id)
    }

    /// Agents with at least one free execution slot.
    pub fn available_agents(&self) -> Vec<&AgentPublicState> {
        self.agents.iter().filter(|a| a.has_capacity()).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(Task::is_finished)
    }
}
