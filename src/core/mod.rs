//! Core domain models: tasks, resources and the validated task graph.

pub mod dag;
pub mod resource;
pub mod task;

pub use dag::{effective_dependencies, EdgeKind, TaskGraph, TaskMap};
pub use resource::{Resource, ResourceId, ResourceStore};
pub use task::{Task, TaskId, TaskStatus, MANAGER_INSTRUCTIONS_MARKER};
