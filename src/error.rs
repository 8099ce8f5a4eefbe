use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration error: dependency cycle detected at task {task}")]
    CyclicDependency { task: String },

    #[error("Configuration error: unknown task {id} referenced by {referenced_by}")]
    UnknownTask { id: String, referenced_by: String },

    #[error("Configuration error: unknown agent {id} referenced by {referenced_by}")]
    UnknownAgent { id: String, referenced_by: String },

    #[error("Configuration error: unknown resource {id} referenced by {referenced_by}")]
    UnknownResource { id: String, referenced_by: String },

    #[error("Invalid rubric '{rubric}': {reason}")]
    InvalidRubric { rubric: String, reason: String },

    #[error("Invalid transition for task {task} from {from} to {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Engine fatal error in {component} (id {id}): {reason}")]
    EngineFatal {
        component: String,
        id: String,
        reason: String,
    },

    #[error("Rule evaluation failed: {0}")]
    RuleEvaluation(String),

    #[error("Evaluation abandoned after drain timeout of {0:?}")]
    EvaluationAbandoned(std::time::Duration),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Build an [`Error::EngineFatal`] naming the component and id that triggered it.
    pub fn fatal(component: &str, id: impl ToString, reason: impl Into<String>) -> Self {
        Self::EngineFatal {
            component: component.to_string(),
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error interrupts a simulation run.
    ///
    /// Configuration errors abort before the first timestep; engine fatal
    /// errors halt a run in progress. Everything else is recoverable at the
    /// call site.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::CyclicDependency { .. }
                | Error::UnknownTask { .. }
                | Error::UnknownAgent { .. }
                | Error::UnknownResource { .. }
                | Error::InvalidRubric { .. }
                | Error::EngineFatal { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
