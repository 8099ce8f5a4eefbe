//! Timestep driver, run records and snapshot sinks.

pub mod phase;
pub mod record;
pub mod runner;
pub mod sink;

pub use phase::{PhaseHistoryEntry, PhaseTracker, TimestepPhase};
pub use record::{RunOutcome, RunReport, TimestepRecord};
pub use runner::ExecutionEngine;
pub use sink::{JsonlSink, MemorySink, SnapshotSink};
