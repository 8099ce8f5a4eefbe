pub mod agent;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod log;
pub mod manager;
pub mod orchestration;
pub mod util;
pub mod workflow;

pub use agent::{Agent, AgentId, AgentKind, AgentPublicState, TaskOutcome};
pub use config::{Config, EngineConfig, EvaluationCadence, EvaluationConfig};
pub use engine::{ExecutionEngine, RunOutcome, RunReport};
pub use error::{Error, Result};
pub use workflow::{Workflow, WorkflowBuilder, WorkflowView};
