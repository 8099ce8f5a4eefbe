//! Manager actions and how they are applied to a workflow.
//!
//! Applying an action never fails the run: a rejected action is recorded as
//! an unsuccessful [`ActionResult`] and the workflow is left untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::AgentId;
use crate::core::{Resource, Task, TaskId, TaskStatus};
use crate::orchestration::AgentPool;
use crate::workflow::Workflow;

/// The single mutating decision a manager makes per timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    AssignTask {
        task_id: TaskId,
        agent_id: AgentId,
    },
    /// Assign every unassigned, unfinished atomic task to one agent. Without
    /// an agent id the first registered agent is used.
    AssignAllPending {
        #[serde(default)]
        agent_id: Option<AgentId>,
    },
    CreateTask {
        name: String,
        description: String,
        #[serde(default)]
        dependencies: Vec<TaskId>,
        #[serde(default)]
        estimated_duration_hours: f64,
        #[serde(default)]
        estimated_cost: f64,
        #[serde(default)]
        assigned_agent: Option<AgentId>,
    },
    RefineTask {
        task_id: TaskId,
        #[serde(default)]
        new_description: Option<String>,
        #[serde(default)]
        additional_instructions: Option<String>,
    },
    CreateResource {
        name: String,
        content: String,
        #[serde(default)]
        mime_type: Option<String>,
    },
    SendMessage {
        /// `None` broadcasts.
        #[serde(default)]
        recipient: Option<AgentId>,
        content: String,
    },
    UpdatePreferences {
        weights: BTreeMap<String, f64>,
    },
    RequestEnd {
        reason: String,
    },
    /// Split an atomic task that has not started into subtasks. The parent
    /// becomes an aggregate and completes once every subtask has.
    DecomposeTask {
        task_id: TaskId,
        subtasks: Vec<SubtaskSpec>,
        /// Chain the subtasks so each one waits on the one before it.
        #[serde(default)]
        sequential: bool,
    },
    InspectTask {
        task_id: TaskId,
    },
    GetWorkflowStatus,
    GetAvailableAgents,
    GetPendingTasks,
    NoOp,
}

/// One subtask of a [`Action::DecomposeTask`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_duration_hours: f64,
    #[serde(default)]
    pub estimated_cost: f64,
    /// Falls back to the parent's agent.
    #[serde(default)]
    pub assigned_agent: Option<AgentId>,
}

impl SubtaskSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            estimated_duration_hours: 0.0,
            estimated_cost: 0.0,
            assigned_agent: None,
        }
    }

    pub fn assigned_to(mut self, agent: impl Into<AgentId>) -> Self {
        self.assigned_agent = Some(agent.into());
        self
    }
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::AssignTask { .. } => "assign_task",
            Action::AssignAllPending { .. } => "assign_all_pending",
            Action::CreateTask { .. } => "create_task",
            Action::RefineTask { .. } => "refine_task",
            Action::CreateResource { .. } => "create_resource",
            Action::SendMessage { .. } => "send_message",
            Action::UpdatePreferences { .. } => "update_preferences",
            Action::RequestEnd { .. } => "request_end",
            Action::DecomposeTask { .. } => "decompose_task",
            Action::InspectTask { .. } => "inspect_task",
            Action::GetWorkflowStatus => "get_workflow_status",
            Action::GetAvailableAgents => "get_available_agents",
            Action::GetPendingTasks => "get_pending_tasks",
            Action::NoOp => "no_op",
        }
    }

    /// Read-only actions report on the workflow without changing it.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Action::InspectTask { .. }
                | Action::GetWorkflowStatus
                | Action::GetAvailableAgents
                | Action::GetPendingTasks
        )
    }
}

/// Outcome of applying one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_type: String,
    pub success: bool,
    pub message: String,
    /// Ids of tasks, resources or messages the action created or touched.
    pub side_effect_ids: Vec<String>,
    /// Report lines of a query action.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    pub timestep: u64,
}

impl ActionResult {
    fn ok(action: &Action, timestep: u64, effect: Effect) -> Self {
        Self {
            action_type: action.kind().to_string(),
            success: true,
            message: effect.message,
            side_effect_ids: effect.ids,
            details: effect.details,
            timestep,
        }
    }

    fn rejected(action: &Action, timestep: u64, message: String) -> Self {
        Self {
            action_type: action.kind().to_string(),
            success: false,
            message,
            side_effect_ids: Vec::new(),
            details: Vec::new(),
            timestep,
        }
    }
}

/// Apply `action` to the workflow and append the result to its action log.
///
/// `pool` supplies the capability checks for assignment.
pub fn apply(workflow: &mut Workflow, pool: &AgentPool, action: &Action) -> ActionResult {
    let timestep = workflow.timestep;
    let result = match apply_inner(workflow, pool, action) {
        Ok(effect) => ActionResult::ok(action, timestep, effect),
        Err(message) => ActionResult::rejected(action, timestep, message),
    };
    if result.success {
        info!(action = %result.action_type, timestep, message = %result.message, "manager action applied");
    } else {
        warn!(action = %result.action_type, timestep, message = %result.message, "manager action rejected");
    }
    workflow.log_action(result.clone());
    result
}

/// What a successful action did.
struct Effect {
    message: String,
    ids: Vec<String>,
    details: Vec<String>,
}

impl Effect {
    fn new(message: String, ids: Vec<String>) -> Self {
        Self {
            message,
            ids,
            details: Vec::new(),
        }
    }

    fn report(message: String, details: Vec<String>) -> Self {
        Self {
            message,
            ids: Vec::new(),
            details,
        }
    }
}

type Applied = std::result::Result<Effect, String>;

fn apply_inner(workflow: &mut Workflow, pool: &AgentPool, action: &Action) -> Applied {
    match action {
        Action::AssignTask { task_id, agent_id } => assign(workflow, pool, task_id, agent_id),
        Action::AssignAllPending { agent_id } => assign_all(workflow, pool, agent_id.as_ref()),
        Action::CreateTask {
            name,
            description,
            dependencies,
            estimated_duration_hours,
            estimated_cost,
            assigned_agent,
        } => {
            if let Some(missing) = dependencies.iter().find(|d| workflow.task(d).is_none()) {
                return Err(format!("dependency {} does not exist", missing));
            }
            if let Some(agent) = assigned_agent {
                if workflow.agent(agent).is_none() {
                    return Err(format!("agent {} does not exist", agent));
                }
            }
            let mut task = Task::new(name, description)
                .with_dependencies(dependencies.clone())
                .with_estimates(*estimated_duration_hours, *estimated_cost);
            task.assigned_agent = assigned_agent.clone();
            let id = workflow.add_task(task).map_err(|e| e.to_string())?;
            Ok(Effect::new(
                format!("created task '{}' ({})", name, id.short()),
                vec![id.to_string()],
            ))
        }
        Action::RefineTask {
            task_id,
            new_description,
            additional_instructions,
        } => {
            let task = workflow
                .task_mut(task_id)
                .ok_or_else(|| format!("task {} does not exist", task_id))?;
            if task.is_finished() {
                return Err(format!("task '{}' is already {}", task.name, task.status.name()));
            }
            if new_description.is_none() && additional_instructions.is_none() {
                return Err("nothing to refine".to_string());
            }
            if let Some(description) = new_description {
                task.description = description.clone();
            }
            if let Some(instructions) = additional_instructions {
                task.set_manager_instructions(instructions);
            }
            Ok(Effect::new(
                format!("refined task '{}'", task.name),
                vec![task_id.to_string()],
            ))
        }
        Action::CreateResource {
            name,
            content,
            mime_type,
        } => {
            let mut resource = Resource::new(name.clone(), content.clone());
            resource.mime_type = mime_type.clone();
            let id = workflow.add_resource(resource).map_err(|e| e.to_string())?;
            Ok(Effect::new(format!("created resource '{}'", name), vec![id.to_string()]))
        }
        Action::SendMessage { recipient, content } => {
            if let Some(agent) = recipient {
                if workflow.agent(agent).is_none() {
                    return Err(format!("recipient {} does not exist", agent));
                }
            }
            let id = workflow.push_message("manager", recipient.clone(), content);
            let to = recipient
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "all agents".to_string());
            Ok(Effect::new(format!("message sent to {}", to), vec![id.to_string()]))
        }
        Action::UpdatePreferences { weights } => {
            workflow
                .set_preferences(weights.clone())
                .map_err(|e| e.to_string())?;
            Ok(Effect::new(
                format!("updated {} preference weights", weights.len()),
                Vec::new(),
            ))
        }
        Action::RequestEnd { reason } => {
            workflow.active = false;
            Ok(Effect::new(format!("end requested: {}", reason), Vec::new()))
        }
        Action::DecomposeTask {
            task_id,
            subtasks,
            sequential,
        } => decompose(workflow, pool, task_id, subtasks, *sequential),
        Action::InspectTask { task_id } => inspect(workflow, task_id),
        Action::GetWorkflowStatus => Ok(workflow_status(workflow)),
        Action::GetAvailableAgents => Ok(available_agents(workflow)),
        Action::GetPendingTasks => Ok(pending_tasks(workflow)),
        Action::NoOp => Ok(Effect::new("no action taken".to_string(), Vec::new())),
    }
}

fn assign(workflow: &mut Workflow, pool: &AgentPool, task_id: &TaskId, agent_id: &AgentId) -> Applied {
    if workflow.agent(agent_id).is_none() {
        return Err(format!("agent {} does not exist", agent_id));
    }
    let task = workflow
        .task(task_id)
        .ok_or_else(|| format!("task {} does not exist", task_id))?;
    if task.is_aggregate() {
        return Err(format!("task '{}' has subtasks and cannot be assigned", task.name));
    }
    if !task.can_start() {
        return Err(format!("task '{}' is already {}", task.name, task.status.name()));
    }
    if let Some(agent) = pool.agent(agent_id) {
        if !agent.can_handle(task) {
            return Err(format!("agent {} cannot handle task '{}'", agent_id, task.name));
        }
    }
    let name = task.name.clone();
    if let Some(task) = workflow.task_mut(task_id) {
        task.assign_agent(agent_id.clone());
    }
    Ok(Effect::new(
        format!("assigned '{}' to {}", name, agent_id),
        vec![task_id.to_string()],
    ))
}

fn assign_all(workflow: &mut Workflow, pool: &AgentPool, agent_id: Option<&AgentId>) -> Applied {
    let target = match agent_id {
        Some(id) if workflow.agent(id).is_some() => id.clone(),
        Some(id) => return Err(format!("agent {} does not exist", id)),
        None => workflow
            .agents()
            .next()
            .map(|a| a.id.clone())
            .ok_or_else(|| "no agents registered".to_string())?,
    };
    let candidates: Vec<TaskId> = workflow
        .tasks()
        .filter(|t| {
            !t.is_aggregate()
                && t.assigned_agent.is_none()
                && matches!(t.status, TaskStatus::Pending | TaskStatus::Ready)
        })
        .filter(|t| pool.agent(&target).map(|a| a.can_handle(t)).unwrap_or(true))
        .map(|t| t.id)
        .collect();
    for id in &candidates {
        if let Some(task) = workflow.task_mut(id) {
            task.assign_agent(target.clone());
        }
    }
    Ok(Effect::new(
        format!("assigned {} pending tasks to {}", candidates.len(), target),
        candidates.iter().map(|id| id.to_string()).collect(),
    ))
}

/// Turn an atomic task into an aggregate of new subtasks.
///
/// The children inherit the parent's dependencies through the hierarchy and
/// only ever gain edges among themselves, so the graph stays acyclic.
fn decompose(
    workflow: &mut Workflow,
    pool: &AgentPool,
    task_id: &TaskId,
    subtasks: &[SubtaskSpec],
    sequential: bool,
) -> Applied {
    let parent = workflow
        .task(task_id)
        .ok_or_else(|| format!("task {} does not exist", task_id))?;
    if parent.is_aggregate() {
        return Err(format!("task '{}' is already decomposed", parent.name));
    }
    if !parent.can_start() {
        return Err(format!("task '{}' is already {}", parent.name, parent.status.name()));
    }
    if subtasks.is_empty() {
        return Err("decomposition needs at least one subtask".to_string());
    }
    let parent_name = parent.name.clone();
    let parent_agent = parent.assigned_agent.clone();

    let mut children = Vec::with_capacity(subtasks.len());
    let mut previous: Option<TaskId> = None;
    for spec in subtasks {
        let mut child = Task::new(&spec.name, &spec.description)
            .with_estimates(spec.estimated_duration_hours, spec.estimated_cost);
        if let (true, Some(prev)) = (sequential, previous) {
            child = child.with_dependencies(vec![prev]);
        }
        child.assigned_agent = spec.assigned_agent.clone().or_else(|| parent_agent.clone());
        if let Some(agent_id) = &child.assigned_agent {
            if workflow.agent(agent_id).is_none() {
                return Err(format!("agent {} does not exist", agent_id));
            }
            if let Some(agent) = pool.agent(agent_id) {
                if !agent.can_handle(&child) {
                    return Err(format!("agent {} cannot handle subtask '{}'", agent_id, child.name));
                }
            }
        }
        previous = Some(child.id);
        children.push(child);
    }

    let mut ids = Vec::with_capacity(children.len());
    for child in children {
        ids.push(workflow.add_subtask(*task_id, child).map_err(|e| e.to_string())?);
    }
    if let Some(parent) = workflow.task_mut(task_id) {
        parent.assigned_agent = None;
    }
    Ok(Effect::new(
        format!("decomposed '{}' into {} subtasks", parent_name, ids.len()),
        ids.iter().map(|id| id.to_string()).collect(),
    ))
}

fn inspect(workflow: &Workflow, task_id: &TaskId) -> Applied {
    let task = workflow
        .task(task_id)
        .ok_or_else(|| format!("task {} does not exist", task_id))?;
    let agent = task
        .assigned_agent
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unassigned".to_string());
    let mut details = vec![
        format!("id: {}", task.id),
        format!("status: {}", task.status),
        format!("agent: {}", agent),
        format!("description: {}", task.description),
        format!(
            "estimate: {:.1}h, ${:.2}",
            task.estimated_duration_hours, task.estimated_cost
        ),
    ];
    details.extend(task.dependencies.iter().map(|d| format!("depends on: {}", d)));
    details.extend(task.subtasks.iter().map(|c| format!("subtask: {}", c)));
    details.extend(task.execution_notes.iter().map(|n| format!("note: {}", n)));
    Ok(Effect::report(
        format!("task '{}' is {}", task.name, task.status.name()),
        details,
    ))
}

fn workflow_status(workflow: &Workflow) -> Effect {
    let counts = workflow.status_counts();
    let details = workflow
        .tasks()
        .map(|t| format!("{} [{}]: {}", t.name, t.id.short(), t.status.name()))
        .collect();
    Effect::report(
        format!(
            "timestep {}: {} pending, {} ready, {} running, {} completed, {} failed; cost {:.2}",
            workflow.timestep,
            counts.pending,
            counts.ready,
            counts.running,
            counts.completed,
            counts.failed,
            workflow.total_cost
        ),
        details,
    )
}

fn available_agents(workflow: &Workflow) -> Effect {
    let details: Vec<String> = workflow
        .agents()
        .filter(|a| a.has_capacity())
        .map(|a| {
            format!(
                "{} ({}): {}/{} slots free",
                a.id,
                a.kind,
                a.free_slots(),
                a.max_concurrent_tasks
            )
        })
        .collect();
    Effect::report(format!("{} agents have free slots", details.len()), details)
}

fn pending_tasks(workflow: &Workflow) -> Effect {
    let details: Vec<String> = workflow
        .tasks()
        .filter(|t| !t.is_aggregate() && t.can_start())
        .map(|t| {
            let agent = t
                .assigned_agent
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unassigned".to_string());
            format!("{} [{}]: {}, {}", t.name, t.id.short(), t.status.name(), agent)
        })
        .collect();
    Effect::report(format!("{} tasks not yet started", details.len()), details)
}
