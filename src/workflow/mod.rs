//! The workflow aggregate and the views handed to its readers.

mod builder;
mod types;
mod view;

pub use builder::WorkflowBuilder;
pub use types::{Message, StatusCounts, Workflow, WorkflowId};
pub use view::{WorkflowView, RECENT_ACTIONS};
