//! Built-in managers: scripted, greedy and no-op.

use std::collections::VecDeque;

use async_trait::async_trait;

use super::{Action, ActionResult, Manager};
use crate::workflow::WorkflowView;

/// Does nothing, every timestep.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpManager;

#[async_trait]
impl Manager for NoOpManager {
    async fn observe(&mut self, _view: &WorkflowView) -> Action {
        Action::NoOp
    }
}

/// Replays a fixed list of actions, one per timestep, then no-ops.
#[derive(Debug, Default, Clone)]
pub struct ScriptedManager {
    script: VecDeque<Action>,
    results: Vec<ActionResult>,
}

impl ScriptedManager {
    pub fn new(actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            script: actions.into_iter().collect(),
            results: Vec::new(),
        }
    }

    /// Results of every action applied so far, in order.
    pub fn results(&self) -> &[ActionResult] {
        &self.results
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

#[async_trait]
impl Manager for ScriptedManager {
    async fn observe(&mut self, _view: &WorkflowView) -> Action {
        self.script.pop_front().unwrap_or(Action::NoOp)
    }

    fn on_action_result(&mut self, result: &ActionResult) {
        self.results.push(result.clone());
    }

    fn has_pending_actions(&self) -> bool {
        !self.script.is_empty()
    }
}

/// Assigns the first unassigned ready task to the least-loaded agent with a
/// free slot. One assignment per timestep.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedyManager;

#[async_trait]
impl Manager for GreedyManager {
    async fn observe(&mut self, view: &WorkflowView) -> Action {
        let Some(task) = view.ready_unassigned().into_iter().next() else {
            return Action::NoOp;
        };
        view.available_agents()
            .into_iter()
            .max_by_key(|a| (a.free_slots(), std::cmp::Reverse(a.id.clone())))
            .map(|agent| Action::AssignTask {
                task_id: task.id,
                agent_id: agent.id.clone(),
            })
            .unwrap_or(Action::NoOp)
    }
}
