//! The workflow aggregate: tasks, resources, agents and the run logs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{AgentId, AgentPublicState};
use crate::core::{
    Resource, ResourceId, ResourceStore, Task, TaskGraph, TaskId, TaskMap, TaskStatus,
};
use crate::error::{Error, Result};
use crate::manager::ActionResult;

/// Unique identifier for a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A message in the workflow's communication log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub timestep: u64,
    pub sender: String,
    /// `None` broadcasts to every agent.
    pub recipient: Option<AgentId>,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Number of tasks in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.ready + self.running + self.completed + self.failed
    }
}

/// Aggregate root for one simulation run.
///
/// Tasks live in a flat registry (subtasks included) with their registration
/// order kept separately. Only the execution engine and manager actions routed
/// through it mutate a workflow; everything else reads a clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    tasks: TaskMap,
    task_order: Vec<TaskId>,
    resources: ResourceStore,
    agents: BTreeMap<AgentId, AgentPublicState>,
    messages: Vec<Message>,
    action_log: Vec<ActionResult>,
    /// Last timestep that has been executed; 0 before the first.
    pub timestep: u64,
    pub active: bool,
    preferences: BTreeMap<String, f64>,
    pub total_cost: f64,
    pub total_simulated_hours: f64,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            tasks: TaskMap::new(),
            task_order: Vec::new(),
            resources: ResourceStore::new(),
            agents: BTreeMap::new(),
            messages: Vec::new(),
            action_log: Vec::new(),
            timestep: 0,
            active: true,
            preferences: BTreeMap::new(),
            total_cost: 0.0,
            total_simulated_hours: 0.0,
        }
    }

    // Construction

    /// Register a task. The graph is not re-validated here.
    pub fn add_task(&mut self, task: Task) -> Result<TaskId> {
        let id = task.id;
        if self.tasks.contains_key(&id) {
            return Err(Error::Configuration(format!(
                "task id {} registered twice",
                id
            )));
        }
        self.tasks.insert(id, task);
        self.task_order.push(id);
        Ok(id)
    }

    /// Register `child` as the next subtask of an already registered `parent`.
    pub fn add_subtask(&mut self, parent: TaskId, mut child: Task) -> Result<TaskId> {
        if !self.tasks.contains_key(&parent) {
            return Err(Error::UnknownTask {
                id: parent.to_string(),
                referenced_by: format!("subtask '{}'", child.name),
            });
        }
        child.parent = Some(parent);
        let child_id = self.add_task(child)?;
        if let Some(p) = self.tasks.get_mut(&parent) {
            p.subtasks.push(child_id);
        }
        Ok(child_id)
    }

    pub fn register_agent(&mut self, state: AgentPublicState) -> Result<()> {
        if self.agents.contains_key(&state.id) {
            return Err(Error::Configuration(format!(
                "agent {} registered twice",
                state.id
            )));
        }
        self.agents.insert(state.id.clone(), state);
        Ok(())
    }

    /// Check every structural invariant and return the validated graph.
    ///
    /// # Errors
    /// Any configuration-class error: cycles, unknown task, agent or resource
    /// references.
    pub fn validate(&self) -> Result<TaskGraph> {
        let graph = TaskGraph::build(&self.tasks)?;
        for task in self.tasks() {
            if let Some(agent) = &task.assigned_agent {
                if !self.agents.contains_key(agent) {
                    return Err(Error::UnknownAgent {
                        id: agent.to_string(),
                        referenced_by: format!("task '{}'", task.name),
                    });
                }
            }
            for input in &task.input_resource_ids {
                if !self.resources.contains(input) {
                    return Err(Error::UnknownResource {
                        id: input.to_string(),
                        referenced_by: format!("task '{}'", task.name),
                    });
                }
            }
        }
        Ok(graph)
    }

    // Task queries

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub(crate) fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.task_order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn task_ids(&self) -> &[TaskId] {
        &self.task_order
    }

    pub fn task_map(&self) -> &TaskMap {
        &self.tasks
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn find_task_by_name(&self, name: &str) -> Option<&Task> {
        self.tasks().find(|t| t.name == name)
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Ready => counts.ready += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    /// Every task is Completed or Failed. Vacuously true with no tasks.
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.values().all(Task::is_finished)
    }

    // Resources

    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<ResourceId> {
        self.resources.insert(resource)
    }

    /// Resources handed to a task on dispatch: its declared inputs followed by
    /// the outputs of its direct dependencies.
    ///
    /// A declared input missing from the store is an engine fatal error.
    pub fn input_resources_for(&self, id: &TaskId) -> Result<Vec<Resource>> {
        let task = self
            .tasks
            .get(id)
            .ok_or_else(|| Error::fatal("dispatch", id, "task not present in workflow"))?;
        let mut inputs = Vec::new();
        for rid in &task.input_resource_ids {
            let resource = self.resources.get(rid).ok_or_else(|| {
                Error::fatal("dispatch", rid, format!("input of task {} missing", id))
            })?;
            inputs.push(resource.clone());
        }
        for dep in &task.dependencies {
            if let Some(dep_task) = self.tasks.get(dep) {
                for rid in &dep_task.output_resource_ids {
                    if task.input_resource_ids.contains(rid) {
                        continue;
                    }
                    if let Some(resource) = self.resources.get(rid) {
                        inputs.push(resource.clone());
                    }
                }
            }
        }
        Ok(inputs)
    }

    // Agents

    pub fn agents(&self) -> impl Iterator<Item = &AgentPublicState> {
        self.agents.values()
    }

    pub fn agent(&self, id: &AgentId) -> Option<&AgentPublicState> {
        self.agents.get(id)
    }

    pub(crate) fn agent_mut(&mut self, id: &AgentId) -> Option<&mut AgentPublicState> {
        self.agents.get_mut(id)
    }

    // Logs

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn push_message(
        &mut self,
        sender: &str,
        recipient: Option<AgentId>,
        content: &str,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.messages.push(Message {
            id,
            timestep: self.timestep,
            sender: sender.to_string(),
            recipient,
            content: content.to_string(),
            sent_at: Utc::now(),
        });
        id
    }

    pub fn action_log(&self) -> &[ActionResult] {
        &self.action_log
    }

    pub(crate) fn log_action(&mut self, result: ActionResult) {
        self.action_log.push(result);
    }

    // Preferences

    pub fn preferences(&self) -> &BTreeMap<String, f64> {
        &self.preferences
    }

    /// Replace the stakeholder preference weights, normalized to sum to 1.
    pub fn set_preferences(&mut self, weights: BTreeMap<String, f64>) -> Result<()> {
        if weights.is_empty() {
            return Err(Error::Configuration(
                "preference weights must not be empty".to_string(),
            ));
        }
        if let Some((name, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(Error::Configuration(format!(
                "preference '{}' has invalid weight {}",
                name, w
            )));
        }
        let sum: f64 = weights.values().sum();
        if sum <= 0.0 {
            return Err(Error::Configuration(
                "preference weights sum to zero".to_string(),
            ));
        }
        self.preferences = weights.into_iter().map(|(k, w)| (k, w / sum)).collect();
        Ok(())
    }
}
