//! Fluent construction of validated workflows.

use std::collections::BTreeMap;

use crate::agent::{AgentId, AgentKind, AgentPublicState};
use crate::core::{Resource, Task, TaskId};
use crate::error::{Error, Result};

use super::Workflow;

/// Builds a [`Workflow`] and validates it once in [`WorkflowBuilder::build`].
///
/// Errors from individual steps are deferred to `build` so the chain reads
/// top to bottom.
pub struct WorkflowBuilder {
    workflow: Workflow,
    deferred: Option<Error>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            workflow: Workflow::new(name),
            deferred: None,
        }
    }

    pub fn agent(mut self, id: impl Into<AgentId>, kind: AgentKind, max_concurrent: usize) -> Self {
        let state = AgentPublicState::new(id.into(), kind, max_concurrent);
        let result = self.workflow.register_agent(state);
        self.defer(result);
        self
    }

    pub fn agent_state(mut self, state: AgentPublicState) -> Self {
        let result = self.workflow.register_agent(state);
        self.defer(result);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        let result = self.workflow.add_task(task);
        self.defer(result);
        self
    }

    pub fn subtask(mut self, parent: TaskId, task: Task) -> Self {
        let result = self.workflow.add_subtask(parent, task);
        self.defer(result);
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        let result = self.workflow.add_resource(resource);
        self.defer(result);
        self
    }

    pub fn preferences(mut self, weights: BTreeMap<String, f64>) -> Self {
        let result = self.workflow.set_preferences(weights);
        self.defer(result);
        self
    }

    pub fn build(self) -> Result<Workflow> {
        if let Some(err) = self.deferred {
            return Err(err);
        }
        self.workflow.validate()?;
        Ok(self.workflow)
    }

    fn defer<T>(&mut self, result: Result<T>) {
        if let (Err(err), None) = (result, &self.deferred) {
            self.deferred = Some(err);
        }
    }
}
