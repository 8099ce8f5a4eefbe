//! Timestep phase tracking with transition validation.
//!
//! Every timestep walks the same sequence:
//!
//! Idle -> Observe -> Schedule -> Dispatch -> Commit -> (Evaluate) -> Idle
//!
//! Evaluate is optional; Commit may return straight to Idle. Anything else
//! is rejected so a phase can never run out of order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Phases within one timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestepPhase {
    /// Between timesteps.
    Idle,
    /// The manager observes a view and its action is applied.
    Observe,
    /// Ready tasks are promoted.
    Schedule,
    /// Assigned ready tasks are started.
    Dispatch,
    /// Completions are applied and aggregates propagated.
    Commit,
    /// Staged rubrics are scored against the committed state.
    Evaluate,
}

impl std::fmt::Display for TimestepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimestepPhase::Idle => write!(f, "idle"),
            TimestepPhase::Observe => write!(f, "observe"),
            TimestepPhase::Schedule => write!(f, "schedule"),
            TimestepPhase::Dispatch => write!(f, "dispatch"),
            TimestepPhase::Commit => write!(f, "commit"),
            TimestepPhase::Evaluate => write!(f, "evaluate"),
        }
    }
}

/// A phase entered at a given timestep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    pub timestep: u64,
    pub phase: TimestepPhase,
    pub entered_at: DateTime<Utc>,
}

/// Enforces phase ordering and records the phases of the current timestep.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: TimestepPhase,
    timestep: u64,
    history: Vec<PhaseHistoryEntry>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: TimestepPhase::Idle,
            timestep: 0,
            history: Vec::new(),
        }
    }

    pub fn can_transition(&self, target: TimestepPhase) -> bool {
        use TimestepPhase::*;
        matches!(
            (self.current, target),
            (Idle, Observe)
                | (Observe, Schedule)
                | (Schedule, Dispatch)
                | (Dispatch, Commit)
                | (Commit, Evaluate)
                | (Commit, Idle)
                | (Evaluate, Idle)
        )
    }

    /// Start timestep `timestep` by entering Observe. History is reset.
    pub fn begin(&mut self, timestep: u64) -> Result<()> {
        if self.current != TimestepPhase::Idle {
            return Err(self.invalid(TimestepPhase::Observe));
        }
        self.timestep = timestep;
        self.history.clear();
        self.enter(TimestepPhase::Observe);
        Ok(())
    }

    pub fn transition(&mut self, target: TimestepPhase) -> Result<()> {
        if !self.can_transition(target) || target == TimestepPhase::Observe {
            return Err(self.invalid(target));
        }
        self.enter(target);
        Ok(())
    }

    pub fn current(&self) -> TimestepPhase {
        self.current
    }

    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    /// Phases entered during the current timestep, in order.
    pub fn history(&self) -> &[PhaseHistoryEntry] {
        &self.history
    }

    fn enter(&mut self, phase: TimestepPhase) {
        self.current = phase;
        self.history.push(PhaseHistoryEntry {
            timestep: self.timestep,
            phase,
            entered_at: Utc::now(),
        });
    }

    fn invalid(&self, target: TimestepPhase) -> Error {
        Error::InvalidPhaseTransition {
            from: self.current.to_string(),
            to: target.to_string(),
        }
    }
}
