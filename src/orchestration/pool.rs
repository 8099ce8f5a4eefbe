//! Agent pool: runtime handles and in-flight task tracking.
//!
//! The pool owns the `Arc<dyn Agent>` handles registered for a run. Each
//! dispatched task runs in its own tokio task and reports back over an mpsc
//! channel; the engine collects those reports only during its commit phase,
//! so a task may stay in flight across any number of timesteps.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::agent::{Agent, AgentId, TaskOutcome};
use crate::core::{Resource, Task, TaskId};
use crate::error::{Error, Result};
use crate::util::ConcurrencyGauge;

/// Capacity of the completion channel.
pub const COMPLETION_BUFFER: usize = 256;

/// An agent's report for one dispatched task.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    /// Timestep at which the task was dispatched.
    pub dispatched_at: u64,
    pub outcome: TaskOutcome,
}

/// Manages the agents of one run and the tasks they are executing.
pub struct AgentPool {
    agents: BTreeMap<AgentId, Arc<dyn Agent>>,
    in_flight: HashMap<TaskId, JoinHandle<()>>,
    max_concurrent: Option<usize>,
    completion_tx: mpsc::Sender<TaskCompletion>,
    completion_rx: mpsc::Receiver<TaskCompletion>,
    gauge: Arc<ConcurrencyGauge>,
}

impl AgentPool {
    /// Create a pool from agent handles.
    ///
    /// # Arguments
    ///
    /// * `agents` - Agent handles; ids must be unique
    /// * `max_concurrent` - Optional cap on tasks in flight across all agents
    pub fn new(agents: Vec<Arc<dyn Agent>>, max_concurrent: Option<usize>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for agent in agents {
            let id = agent.id();
            if map.insert(id.clone(), agent).is_some() {
                return Err(Error::Configuration(format!(
                    "agent {} supplied twice",
                    id
                )));
            }
        }
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_BUFFER);
        Ok(Self {
            agents: map,
            in_flight: HashMap::new(),
            max_concurrent,
            completion_tx,
            completion_rx,
            gauge: Arc::new(ConcurrencyGauge::default()),
        })
    }

    pub fn agent(&self, id: &AgentId) -> Option<&Arc<dyn Agent>> {
        self.agents.get(id)
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Arc<dyn Agent>> {
        self.agents.values()
    }

    /// Number of tasks dispatched and not yet committed.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, task: &TaskId) -> bool {
        self.in_flight.contains_key(task)
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Free global slots, or `None` when there is no global cap.
    pub fn global_free(&self) -> Option<usize> {
        self.max_concurrent
            .map(|max| max.saturating_sub(self.in_flight.len()))
    }

    /// Highest number of tasks observed executing at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }

    /// Start `task` on `agent_id` in the background.
    ///
    /// The task must already be marked Running by the caller. A panicking
    /// agent is reported as a failed outcome.
    pub fn spawn(
        &mut self,
        agent_id: &AgentId,
        task: Task,
        inputs: Vec<Resource>,
        timestep: u64,
    ) -> Result<()> {
        let agent = self
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::fatal("dispatch", agent_id, "agent has no runtime handle"))?;
        let task_id = task.id;
        if self.in_flight.contains_key(&task_id) {
            return Err(Error::fatal("dispatch", task_id, "task is already in flight"));
        }

        let tx = self.completion_tx.clone();
        let gauge = Arc::clone(&self.gauge);
        let owner = agent_id.clone();
        trace!(task = %task_id, agent = %owner, inputs = inputs.len(), "spawning agent execution");

        let handle = tokio::spawn(async move {
            let outcome = {
                let _running = gauge.enter();
                AssertUnwindSafe(agent.execute(task, inputs))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| TaskOutcome::failure("agent panicked during execution"))
            };
            let completion = TaskCompletion {
                task_id,
                agent_id: owner,
                dispatched_at: timestep,
                outcome,
            };
            if tx.send(completion).await.is_err() {
                debug!(task = %task_id, "completion dropped, pool is gone");
            }
        });
        self.in_flight.insert(task_id, handle);
        Ok(())
    }

    /// Wait up to `window` for in-flight tasks, then return every completion
    /// that has arrived.
    ///
    /// Returns early once nothing is left in flight, or as soon as `halt`
    /// fires; in that case only completions already queued are returned.
    /// Completions arriving later stay queued for the next call.
    pub async fn collect(
        &mut self,
        window: Duration,
        halt: &CancellationToken,
    ) -> Vec<TaskCompletion> {
        let deadline = Instant::now() + window;
        let mut completions = Vec::new();
        let mut outstanding = self.in_flight.len();
        while outstanding > 0 {
            let received = tokio::select! {
                biased;
                _ = halt.cancelled() => {
                    debug!(received = completions.len(), outstanding, "halted during commit window");
                    break;
                }
                received = timeout_at(deadline, self.completion_rx.recv()) => received,
            };
            match received {
                Ok(Some(completion)) => {
                    if self.in_flight.contains_key(&completion.task_id) {
                        outstanding -= 1;
                    }
                    completions.push(completion);
                }
                Ok(None) | Err(_) => break,
            }
        }
        completions.extend(self.drain_now());
        self.settle(&completions);
        completions
    }

    /// Completions that have already arrived, without waiting.
    pub fn collect_ready(&mut self) -> Vec<TaskCompletion> {
        let completions = self.drain_now();
        self.settle(&completions);
        completions
    }

    /// Abort every task still in flight. Returns the aborted ids.
    pub fn abort_all(&mut self) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self.in_flight.keys().copied().collect();
        for (id, handle) in self.in_flight.drain() {
            warn!(task = %id, "aborting in-flight task");
            handle.abort();
        }
        ids
    }

    fn drain_now(&mut self) -> Vec<TaskCompletion> {
        let mut drained = Vec::new();
        while let Ok(completion) = self.completion_rx.try_recv() {
            drained.push(completion);
        }
        drained
    }

    fn settle(&mut self, completions: &[TaskCompletion]) {
        for completion in completions {
            self.in_flight.remove(&completion.task_id);
        }
    }
}

impl std::fmt::Debug for AgentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPool")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("in_flight", &self.in_flight.len())
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}
