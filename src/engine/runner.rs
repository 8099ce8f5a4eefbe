//! The discrete-timestep execution engine.
//!
//! One sequential driver owns the workflow. Each timestep it lets the
//! manager act, promotes ready tasks, dispatches them to agents, commits
//! whatever completions have arrived, optionally evaluates, and decides
//! whether the run is over. Agent work runs concurrently in the pool and may
//! span several timesteps; it only touches the workflow through commit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, AgentId, AgentPublicState};
use crate::config::EngineConfig;
use crate::core::{Resource, TaskId, TaskStatus};
use crate::engine::phase::{PhaseTracker, TimestepPhase};
use crate::engine::record::{RunOutcome, RunReport, TimestepRecord};
use crate::engine::sink::SnapshotSink;
use crate::error::{Error, Result};
use crate::evaluation::{weighted_preference_total, EvaluationMap, StagedEvaluator, StagedRubric};
use crate::manager::{self, Manager};
use crate::orchestration::pool::{AgentPool, TaskCompletion};
use crate::orchestration::scheduler;
use crate::workflow::{Workflow, WorkflowView};

pub struct ExecutionEngine {
    config: EngineConfig,
    workflow: Workflow,
    pool: AgentPool,
    manager: Box<dyn Manager>,
    evaluator: Option<StagedEvaluator>,
    rubrics: Vec<StagedRubric>,
    sink: Option<Box<dyn SnapshotSink>>,
    phases: PhaseTracker,
    halt: CancellationToken,
    /// Running tasks from a restored snapshot, started again on the next dispatch.
    redispatch: Vec<(TaskId, AgentId)>,
    records: Vec<TimestepRecord>,
    last_evaluation: Option<(u64, EvaluationMap)>,
}

impl ExecutionEngine {
    /// Set up a fresh run.
    ///
    /// Agents in `agents` that the workflow does not know yet are registered
    /// with it. The task graph is validated here, so every configuration
    /// error surfaces before the first timestep.
    pub fn new(
        config: EngineConfig,
        workflow: Workflow,
        agents: Vec<Arc<dyn Agent>>,
        manager: Box<dyn Manager>,
    ) -> Result<Self> {
        if let Some(task) = workflow
            .tasks()
            .find(|t| t.status == TaskStatus::Running)
        {
            return Err(Error::Configuration(format!(
                "task '{}' is already running; restore the workflow with resume",
                task.name
            )));
        }
        Self::assemble(config, workflow, agents, manager)
    }

    /// Continue a run from a persisted workflow snapshot.
    ///
    /// Every agent the snapshot references must be supplied again by id.
    /// Tasks that were running when the snapshot was taken are started again
    /// at the next dispatch.
    pub fn resume(
        config: EngineConfig,
        workflow: Workflow,
        agents: Vec<Arc<dyn Agent>>,
        manager: Box<dyn Manager>,
    ) -> Result<Self> {
        let mut engine = Self::assemble(config, workflow, agents, manager)?;
        let running: Vec<(TaskId, AgentId)> = engine
            .workflow
            .tasks()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| {
                t.assigned_agent
                    .clone()
                    .map(|agent| (t.id, agent))
                    .ok_or_else(|| Error::fatal("resume", t.id, "running task has no agent"))
            })
            .collect::<Result<_>>()?;

        let agent_ids: Vec<AgentId> = engine.workflow.agents().map(|a| a.id.clone()).collect();
        for id in agent_ids {
            if let Some(state) = engine.workflow.agent_mut(&id) {
                state.in_flight.clear();
            }
        }
        info!(
            workflow = %engine.workflow.id,
            timestep = engine.workflow.timestep,
            running = running.len(),
            "resuming run"
        );
        engine.redispatch = running;
        Ok(engine)
    }

    fn assemble(
        config: EngineConfig,
        mut workflow: Workflow,
        agents: Vec<Arc<dyn Agent>>,
        manager: Box<dyn Manager>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = AgentPool::new(agents, config.max_concurrent_tasks)?;

        // Runtime handles are authoritative for capability data.
        for agent in pool.agents() {
            match workflow.agent_mut(&agent.id()) {
                Some(state) => {
                    state.kind = agent.kind();
                    state.max_concurrent_tasks = agent.max_concurrent_tasks();
                }
                None => workflow.register_agent(AgentPublicState::of(agent.as_ref()))?,
            }
        }
        if let Some(orphan) = workflow.agents().find(|a| !pool.contains(&a.id)) {
            return Err(Error::UnknownAgent {
                id: orphan.id.to_string(),
                referenced_by: format!("workflow '{}'", workflow.name),
            });
        }
        let graph = workflow.validate()?;
        debug!(
            tasks = graph.task_count(),
            edges = graph.edge_count(),
            agents = pool.agents().count(),
            "workflow validated"
        );

        Ok(Self {
            config,
            workflow,
            pool,
            manager,
            evaluator: None,
            rubrics: Vec::new(),
            sink: None,
            phases: PhaseTracker::new(),
            halt: CancellationToken::new(),
            redispatch: Vec::new(),
            records: Vec::new(),
            last_evaluation: None,
        })
    }

    /// Attach staged evaluation. Rubrics are validated immediately.
    pub fn with_evaluation(
        mut self,
        evaluator: StagedEvaluator,
        rubrics: Vec<StagedRubric>,
    ) -> Result<Self> {
        for rubric in &rubrics {
            rubric.validate()?;
        }
        evaluator.config().validate()?;
        self.evaluator = Some(evaluator);
        self.rubrics = rubrics;
        Ok(self)
    }

    pub fn with_sink(mut self, sink: Box<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Token that halts the run when cancelled. Dispatch stops immediately;
    /// completions that already arrived are still committed.
    pub fn halt_token(&self) -> CancellationToken {
        self.halt.clone()
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn phase(&self) -> TimestepPhase {
        self.phases.current()
    }

    pub fn records(&self) -> &[TimestepRecord] {
        &self.records
    }

    /// Drive timesteps until the run terminates.
    ///
    /// A fatal error aborts every in-flight task and is returned as is.
    pub async fn run(mut self) -> Result<RunReport> {
        info!(
            workflow = %self.workflow.id,
            name = %self.workflow.name,
            tasks = self.workflow.task_count(),
            max_timesteps = self.config.max_timesteps,
            "run started"
        );

        let outcome = match self.drive().await {
            Ok(outcome) => outcome,
            Err(e) => {
                let aborted = self.pool.abort_all();
                error!(error = %e, aborted = aborted.len(), "run failed");
                return Err(e);
            }
        };

        let aborted = self.pool.abort_all();
        if !aborted.is_empty() {
            debug!(count = aborted.len(), "abandoned in-flight tasks at end of run");
        }

        let final_evaluation = if self.config.evaluation_cadence.runs_on_completion() {
            self.final_evaluation().await?
        } else {
            None
        };
        let final_utility = final_evaluation
            .as_ref()
            .and_then(|map| weighted_preference_total(map, self.workflow.preferences()));

        info!(
            outcome = %outcome,
            timesteps = self.workflow.timestep,
            total_cost = self.workflow.total_cost,
            "run finished"
        );
        Ok(RunReport {
            outcome,
            timesteps_executed: self.records.len() as u64,
            records: self.records,
            final_evaluation,
            final_utility,
            peak_task_concurrency: self.pool.peak_concurrency(),
        })
    }

    async fn drive(&mut self) -> Result<RunOutcome> {
        loop {
            if self.halt.is_cancelled() {
                return Ok(RunOutcome::Halted);
            }
            if self.workflow.timestep >= self.config.max_timesteps {
                warn!(max_timesteps = self.config.max_timesteps, "timestep budget exhausted");
                return Ok(RunOutcome::TimedOut);
            }
            if let Some(outcome) = self.step().await? {
                return Ok(outcome);
            }
        }
    }

    /// Execute one timestep. Returns the outcome when the run should end.
    pub async fn step(&mut self) -> Result<Option<RunOutcome>> {
        let timestep = self.workflow.timestep + 1;
        self.phases.begin(timestep)?;
        self.workflow.timestep = timestep;
        debug!(timestep, "timestep started");

        let ready = scheduler::ready_tasks(&self.workflow);
        let view = WorkflowView::capture(&self.workflow, ready);
        let action = self.manager.observe(&view).await;
        let action = manager::apply(&mut self.workflow, &self.pool, &action);
        self.manager.on_action_result(&action);
        let cancelled = !self.workflow.active;

        self.phases.transition(TimestepPhase::Schedule)?;
        scheduler::promote_ready(&mut self.workflow)?;

        self.phases.transition(TimestepPhase::Dispatch)?;
        let halted = self.halt.is_cancelled();
        let dispatched = if halted || cancelled {
            Vec::new()
        } else {
            self.dispatch(timestep)?
        };

        self.phases.transition(TimestepPhase::Commit)?;
        let completions = if halted {
            self.pool.collect_ready()
        } else {
            self.pool.collect(self.config.commit_window(), &self.halt).await
        };
        let committed = self.commit(completions)?;

        let mut evaluation = None;
        let mut evaluation_error = None;
        if let (Some(evaluator), true) = (&self.evaluator, self.config.evaluates_at(timestep)) {
            self.phases.transition(TimestepPhase::Evaluate)?;
            match evaluate(evaluator, &self.rubrics, &self.workflow, &self.halt).await {
                Ok(map) => {
                    self.last_evaluation = Some((timestep, map.clone()));
                    evaluation = Some(map);
                }
                Err(Error::EvaluationAbandoned(drain)) => {
                    warn!(timestep, ?drain, "evaluation abandoned");
                    evaluation_error = Some(Error::EvaluationAbandoned(drain).to_string());
                }
                Err(e) => return Err(e),
            }
        }
        self.phases.transition(TimestepPhase::Idle)?;
        let utility = evaluation
            .as_ref()
            .and_then(|map| weighted_preference_total(map, self.workflow.preferences()));

        let record = TimestepRecord {
            timestep,
            workflow: self.workflow.clone(),
            evaluation,
            evaluation_error,
            utility,
            action,
            dispatched,
            committed,
        };
        if let Some(sink) = self.sink.as_mut() {
            sink.write(&record)?;
        }
        self.records.push(record);

        let outcome = if self.halt.is_cancelled() {
            Some(RunOutcome::Halted)
        } else if cancelled {
            Some(RunOutcome::Cancelled)
        } else if self.workflow.all_tasks_terminal() && !self.manager.has_pending_actions() {
            Some(RunOutcome::Completed)
        } else {
            None
        };
        if let Some(outcome) = outcome {
            info!(timestep, outcome = %outcome, "run terminating");
        }
        Ok(outcome)
    }

    fn dispatch(&mut self, timestep: u64) -> Result<Vec<TaskId>> {
        let mut dispatched = Vec::new();

        for (task_id, agent_id) in std::mem::take(&mut self.redispatch) {
            let inputs = self.workflow.input_resources_for(&task_id)?;
            self.launch(task_id, &agent_id, inputs, timestep)?;
            dispatched.push(task_id);
        }

        let ready = scheduler::ready_tasks(&self.workflow);
        let selected = scheduler::select_dispatch(&self.workflow, &ready, self.pool.global_free());
        for (task_id, agent_id) in selected {
            let inputs = self.workflow.input_resources_for(&task_id)?;
            let task = self
                .workflow
                .task_mut(&task_id)
                .ok_or_else(|| Error::fatal("dispatch", task_id, "task not present in workflow"))?;
            task.start()
                .map_err(|e| Error::fatal("dispatch", task_id, e.to_string()))?;
            self.launch(task_id, &agent_id, inputs, timestep)?;
            dispatched.push(task_id);
        }

        if !dispatched.is_empty() {
            info!(
                timestep,
                count = dispatched.len(),
                in_flight = self.pool.in_flight_count(),
                "tasks dispatched"
            );
        }
        Ok(dispatched)
    }

    fn launch(
        &mut self,
        task_id: TaskId,
        agent_id: &AgentId,
        inputs: Vec<Resource>,
        timestep: u64,
    ) -> Result<()> {
        let task = self
            .workflow
            .task(&task_id)
            .cloned()
            .ok_or_else(|| Error::fatal("dispatch", task_id, "task not present in workflow"))?;
        debug!(task = %task_id, name = %task.name, agent = %agent_id, "dispatching");
        self.pool.spawn(agent_id, task, inputs, timestep)?;
        if let Some(state) = self.workflow.agent_mut(agent_id) {
            state.in_flight.insert(task_id);
        }
        Ok(())
    }

    /// Apply completions in arrival order, then propagate aggregate completion.
    ///
    /// A completion for a task that is already finished is ignored.
    fn commit(&mut self, completions: Vec<TaskCompletion>) -> Result<Vec<TaskId>> {
        let mut committed = Vec::new();
        for completion in completions {
            let task_id = completion.task_id;
            let finished = self
                .workflow
                .task(&task_id)
                .ok_or_else(|| Error::fatal("commit", task_id, "completion for unknown task"))?
                .is_finished();
            if finished {
                debug!(task = %task_id, "duplicate completion ignored");
                continue;
            }

            let outcome = completion.outcome;
            let mut output_ids = Vec::new();
            if outcome.success {
                for resource in outcome.output_resources {
                    output_ids.push(self.workflow.add_resource(resource.produced_by(task_id))?);
                }
            }

            let task = self
                .workflow
                .task_mut(&task_id)
                .ok_or_else(|| Error::fatal("commit", task_id, "completion for unknown task"))?;
            task.actual_cost = Some(outcome.cost);
            task.actual_duration_hours = Some(outcome.duration_hours);
            let transition = if outcome.success {
                task.output_resource_ids.extend(output_ids);
                task.complete()
            } else {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string());
                warn!(task = %task_id, name = %task.name, error = %reason, "task failed");
                task.fail(&reason)
            };
            transition.map_err(|e| Error::fatal("commit", task_id, e.to_string()))?;

            self.workflow.total_cost += outcome.cost;
            self.workflow.total_simulated_hours += outcome.duration_hours;
            if let Some(agent) = self.workflow.agent_mut(&completion.agent_id) {
                agent.in_flight.remove(&task_id);
                if outcome.success {
                    agent.tasks_completed += 1;
                } else {
                    agent.tasks_failed += 1;
                }
            }
            committed.push(task_id);
        }

        let aggregated = scheduler::propagate_completion(&mut self.workflow)?;
        if !committed.is_empty() || !aggregated.is_empty() {
            info!(
                timestep = self.workflow.timestep,
                committed = committed.len(),
                aggregated = aggregated.len(),
                "commit applied"
            );
        }
        Ok(committed)
    }

    async fn final_evaluation(&mut self) -> Result<Option<EvaluationMap>> {
        let Some(evaluator) = &self.evaluator else {
            return Ok(None);
        };
        if let Some((timestep, map)) = &self.last_evaluation {
            if *timestep == self.workflow.timestep {
                return Ok(Some(map.clone()));
            }
        }
        match evaluate(evaluator, &self.rubrics, &self.workflow, &self.halt).await {
            Ok(map) => Ok(Some(map)),
            Err(Error::EvaluationAbandoned(drain)) => {
                warn!(?drain, "final evaluation abandoned");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Score a copy of `workflow`.
///
/// Must not borrow the whole engine: the run future has to stay `Send`, and
/// the manager and sink handles are not `Sync`.
async fn evaluate(
    evaluator: &StagedEvaluator,
    rubrics: &[StagedRubric],
    workflow: &Workflow,
    halt: &CancellationToken,
) -> Result<EvaluationMap> {
    let snapshot = Arc::new(workflow.clone());
    evaluator.evaluate_with_halt(snapshot, rubrics, halt).await
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("workflow", &self.workflow.id)
            .field("timestep", &self.workflow.timestep)
            .field("phase", &self.phases.current())
            .field("in_flight", &self.pool.in_flight_count())
            .field("rubrics", &self.rubrics.len())
            .finish()
    }
}
