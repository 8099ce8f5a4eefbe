//! Scheduling and agent execution.
//!
//! [`scheduler`] decides which tasks may run; [`pool`] runs them on agents
//! and queues their completions until the engine commits.

pub mod pool;
pub mod scheduler;

pub use pool::{AgentPool, TaskCompletion, COMPLETION_BUFFER};
pub use scheduler::{is_ready, promote_ready, propagate_completion, ready_tasks, select_dispatch};
