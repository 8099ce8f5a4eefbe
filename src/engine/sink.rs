//! Where timestep records go.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::engine::record::TimestepRecord;
use crate::workflow::Workflow;
use crate::Result;

/// Receives one record per committed timestep.
pub trait SnapshotSink: Send {
    fn write(&mut self, record: &TimestepRecord) -> Result<()>;
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<TimestepRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[TimestepRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TimestepRecord> {
        self.records
    }
}

impl SnapshotSink for MemorySink {
    fn write(&mut self, record: &TimestepRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Records are appended; parent directories are created as needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record in `path`, skipping blank lines.
    pub fn read_records(path: &Path) -> Result<Vec<TimestepRecord>> {
        let contents = fs::read_to_string(path)?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }

    /// Workflow from the last record in `path`, ready for
    /// [`ExecutionEngine::resume`](crate::engine::ExecutionEngine::resume).
    pub fn load_latest(path: &Path) -> Result<Option<Workflow>> {
        Ok(Self::read_records(path)?.pop().map(|r| r.workflow))
    }
}

impl SnapshotSink for JsonlSink {
    fn write(&mut self, record: &TimestepRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        debug!(timestep = record.timestep, path = %self.path.display(), "record written");
        Ok(())
    }
}
