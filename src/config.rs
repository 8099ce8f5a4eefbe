use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// Default timestep budget for a run.
pub const DEFAULT_MAX_TIMESTEPS: u64 = 50;

/// Default time the commit phase waits for in-flight tasks.
pub const DEFAULT_COMMIT_WINDOW_MS: u64 = 1_000;

/// Default cap on rule evaluations running at once.
pub const DEFAULT_MAX_CONCURRENT_RULES: usize = 100;

/// Default number of judge retries after the first attempt.
pub const DEFAULT_JUDGE_MAX_RETRIES: u32 = 2;

/// Default base delay for judge retry backoff.
pub const DEFAULT_JUDGE_RETRY_BASE_DELAY_MS: u64 = 500;

/// Default time in-flight rule evaluations may drain after a halt.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

/// When the engine runs staged evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationCadence {
    /// Never evaluate automatically.
    Never,
    /// Evaluate after every commit phase.
    EachTimestep,
    /// Evaluate once, after the run terminates.
    #[default]
    OnCompletion,
    /// Evaluate every timestep and once more after termination.
    Both,
}

impl EvaluationCadence {
    pub fn runs_each_timestep(&self) -> bool {
        matches!(self, EvaluationCadence::EachTimestep | EvaluationCadence::Both)
    }

    pub fn runs_on_completion(&self) -> bool {
        matches!(self, EvaluationCadence::OnCompletion | EvaluationCadence::Both)
    }
}

/// Execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timestep budget; exhausting it ends the run as timed out.
    pub max_timesteps: u64,
    /// How long each commit phase waits for in-flight tasks before applying
    /// whatever has arrived.
    pub commit_window_ms: u64,
    /// Optional cap on tasks executing at once across all agents.
    pub max_concurrent_tasks: Option<usize>,
    /// When staged evaluation runs.
    pub evaluation_cadence: EvaluationCadence,
    /// Extra timesteps that are evaluated even when the cadence does not
    /// evaluate every timestep.
    pub selected_timesteps: Vec<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_timesteps: DEFAULT_MAX_TIMESTEPS,
            commit_window_ms: DEFAULT_COMMIT_WINDOW_MS,
            max_concurrent_tasks: None,
            evaluation_cadence: EvaluationCadence::default(),
            selected_timesteps: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn commit_window(&self) -> Duration {
        Duration::from_millis(self.commit_window_ms)
    }

    /// Whether evaluation should run after the commit phase of `timestep`.
    pub fn evaluates_at(&self, timestep: u64) -> bool {
        self.evaluation_cadence.runs_each_timestep() || self.selected_timesteps.contains(&timestep)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_timesteps == 0 {
            return Err(Error::Configuration(
                "engine.max_timesteps must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_tasks == Some(0) {
            return Err(Error::Configuration(
                "engine.max_concurrent_tasks must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Staged evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Size of the rule worker pool shared by all rubrics in one call.
    pub max_concurrent_rules: usize,
    /// Judge retries after the first failed attempt.
    pub judge_max_retries: u32,
    /// Base delay for exponential judge backoff.
    pub judge_retry_base_delay_ms: u64,
    /// Per-rule time limit; a rule exceeding it scores 0 with an error.
    pub rule_timeout_ms: Option<u64>,
    /// How long in-flight rules may drain after a halt before the whole
    /// evaluation is abandoned.
    pub drain_timeout_ms: u64,
    /// Count a failed gate whose action is `continue` toward `stages_passed`.
    pub count_continued_gate_as_passed: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rules: DEFAULT_MAX_CONCURRENT_RULES,
            judge_max_retries: DEFAULT_JUDGE_MAX_RETRIES,
            judge_retry_base_delay_ms: DEFAULT_JUDGE_RETRY_BASE_DELAY_MS,
            rule_timeout_ms: None,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            count_continued_gate_as_passed: false,
        }
    }
}

impl EvaluationConfig {
    pub fn judge_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.judge_retry_base_delay_ms)
    }

    pub fn rule_timeout(&self) -> Option<Duration> {
        self.rule_timeout_ms.map(Duration::from_millis)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_rules == 0 {
            return Err(Error::Configuration(
                "evaluation.max_concurrent_rules must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl Config {
    pub fn workgym_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".workgym"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::workgym_dir()?.join("workgym.toml"))
    }

    /// Load the config from the default location, falling back to defaults
    /// when no file exists.
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        debug!(
            max_timesteps = config.engine.max_timesteps,
            max_concurrent_rules = config.evaluation.max_concurrent_rules,
            cadence = ?config.engine.evaluation_cadence,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.evaluation.validate()
    }
}
