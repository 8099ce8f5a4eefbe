//! Manager port: the privileged decision-maker driving a run.
//!
//! Each timestep the engine hands the manager an owned [`WorkflowView`] and
//! applies the single [`Action`] it returns before anything is dispatched.

mod action;
mod scripted;

pub use action::{apply, Action, ActionResult, SubtaskSpec};
pub use scripted::{GreedyManager, NoOpManager, ScriptedManager};

use async_trait::async_trait;

use crate::workflow::WorkflowView;

#[async_trait]
pub trait Manager: Send {
    /// Choose this timestep's action.
    async fn observe(&mut self, view: &WorkflowView) -> Action;

    /// Called with the result of the action returned by the last `observe`.
    fn on_action_result(&mut self, _result: &ActionResult) {}

    /// Whether the manager still intends to act. A run does not end as
    /// completed while this is true.
    fn has_pending_actions(&self) -> bool {
        false
    }
}
