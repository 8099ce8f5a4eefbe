//! Staged rubric evaluation.
//!
//! All rules of all rubrics in one call share a single semaphore. Rubrics
//! run concurrently, stages within a rubric run in order, and rules within a
//! stage run concurrently. A rule that fails never fails the call: it scores
//! 0 and carries the error on its [`RuleResult`].

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EvaluationConfig;
use crate::error::{Error, Result};
use crate::evaluation::ports::{JudgePort, ResourceContext, RuleExecutor, RuleScore};
use crate::evaluation::result::{EvaluationMap, RuleResult, StageResult, StagedRubricResult};
use crate::evaluation::rubric::{OnFailureAction, Rule, RuleKind, StagedRubric};
use crate::util::{self, ConcurrencyGauge};
use crate::workflow::Workflow;

pub struct StagedEvaluator {
    config: EvaluationConfig,
    code: Arc<dyn RuleExecutor>,
    judge: Option<Arc<dyn JudgePort>>,
    gauge: Arc<ConcurrencyGauge>,
}

impl StagedEvaluator {
    pub fn new(config: EvaluationConfig, code: Arc<dyn RuleExecutor>) -> Self {
        Self {
            config,
            code,
            judge: None,
            gauge: Arc::new(ConcurrencyGauge::new()),
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn JudgePort>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Most rules ever scored at the same time by this evaluator.
    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }

    pub async fn evaluate_staged_rubric(
        &self,
        snapshot: Arc<Workflow>,
        rubric: &StagedRubric,
    ) -> Result<StagedRubricResult> {
        rubric.validate()?;
        let semaphore = self.semaphore();
        let context = Arc::new(ResourceContext::from_workflow(&snapshot));
        Ok(self
            .score_rubric(&snapshot, &context, rubric, &semaphore)
            .await)
    }

    /// Score every rubric against one snapshot. Rubrics are validated up
    /// front; an invalid rubric fails the call before any rule runs.
    pub async fn evaluate_timestep_staged(
        &self,
        snapshot: Arc<Workflow>,
        rubrics: &[StagedRubric],
    ) -> Result<EvaluationMap> {
        let mut categories = HashSet::new();
        for rubric in rubrics {
            rubric.validate()?;
            if !categories.insert(rubric.category_name.as_str()) {
                return Err(Error::InvalidRubric {
                    rubric: rubric.category_name.clone(),
                    reason: "category appears twice in one evaluation".to_string(),
                });
            }
        }

        let semaphore = self.semaphore();
        let context = Arc::new(ResourceContext::from_workflow(&snapshot));
        let results = join_all(
            rubrics
                .iter()
                .map(|rubric| self.score_rubric(&snapshot, &context, rubric, &semaphore)),
        )
        .await;

        info!(
            timestep = snapshot.timestep,
            rubrics = results.len(),
            "evaluation finished"
        );
        Ok(results
            .into_iter()
            .map(|result| (result.category_name.clone(), result))
            .collect())
    }

    /// Like [`evaluate_timestep_staged`](Self::evaluate_timestep_staged), but
    /// once `halt` fires the in-flight rules get `drain_timeout` to finish.
    /// Past that the whole evaluation is dropped and nothing is returned.
    pub async fn evaluate_with_halt(
        &self,
        snapshot: Arc<Workflow>,
        rubrics: &[StagedRubric],
        halt: &CancellationToken,
    ) -> Result<EvaluationMap> {
        let evaluation = self.evaluate_timestep_staged(snapshot, rubrics);
        tokio::pin!(evaluation);

        tokio::select! {
            biased;
            result = &mut evaluation => result,
            _ = halt.cancelled() => {
                let drain = self.config.drain_timeout();
                debug!(?drain, "halt received, draining evaluation");
                match tokio::time::timeout(drain, &mut evaluation).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(?drain, "evaluation abandoned after halt");
                        Err(Error::EvaluationAbandoned(drain))
                    }
                }
            }
        }
    }

    fn semaphore(&self) -> Semaphore {
        Semaphore::new(self.config.max_concurrent_rules.max(1))
    }

    async fn score_rubric(
        &self,
        snapshot: &Arc<Workflow>,
        context: &Arc<ResourceContext>,
        rubric: &StagedRubric,
        semaphore: &Semaphore,
    ) -> StagedRubricResult {
        let max_total = rubric.max_total_score();
        let mut stages = Vec::with_capacity(rubric.stages.len());
        let mut total = 0.0;
        let mut stages_passed = 0;
        let mut failed_gate: Option<String> = None;
        let mut stopped_at = None;
        let mut category_override = None;

        for stage in &rubric.stages {
            let rules = join_all(
                stage
                    .rules
                    .iter()
                    .map(|rule| self.score_rule(snapshot, context, rule, semaphore)),
            )
            .await;

            let raw_score = rules.iter().map(|r| r.score).sum::<f64>().min(stage.max_points);
            let normalized = raw_score / stage.max_points;
            let passed = !stage.is_gate || normalized >= stage.min_score_to_pass;
            total += raw_score;

            let continued = stage.on_failure_action == OnFailureAction::Continue;
            if passed || (continued && self.config.count_continued_gate_as_passed) {
                stages_passed += 1;
            }

            debug!(
                category = %rubric.category_name,
                stage = %stage.name,
                raw_score,
                passed,
                "stage scored"
            );

            stages.push(StageResult {
                name: stage.name.clone(),
                raw_score,
                max_points: stage.max_points,
                normalized,
                passed,
                is_gate: stage.is_gate,
                rules,
            });

            if passed {
                continue;
            }
            if failed_gate.is_none() {
                failed_gate = Some(stage.name.clone());
            }
            info!(
                category = %rubric.category_name,
                stage = %stage.name,
                action = %stage.on_failure_action,
                "gate failed"
            );
            match stage.on_failure_action {
                OnFailureAction::Continue => {}
                OnFailureAction::SkipRemaining => {
                    stopped_at = Some(stage.name.clone());
                    break;
                }
                OnFailureAction::ZeroCategory { on_failure_score } => {
                    category_override = Some(on_failure_score);
                    stopped_at = Some(stage.name.clone());
                    break;
                }
            }
        }

        let total_score = category_override.unwrap_or(total).clamp(0.0, max_total);
        StagedRubricResult {
            category_name: rubric.category_name.clone(),
            stages_evaluated: stages.len(),
            stages,
            total_score,
            max_score: max_total,
            normalized_score: total_score / max_total,
            stages_passed,
            failed_gate,
            stopped_at,
        }
    }

    async fn score_rule(
        &self,
        snapshot: &Arc<Workflow>,
        context: &Arc<ResourceContext>,
        rule: &Rule,
        semaphore: &Semaphore,
    ) -> RuleResult {
        let (outcome, attempts) = match &rule.kind {
            RuleKind::Code { code_ref } => {
                let outcome = self
                    .limited(
                        semaphore,
                        self.code.execute(code_ref, Arc::clone(snapshot), Arc::clone(context)),
                    )
                    .await;
                (outcome, 1)
            }
            RuleKind::Judge { prompt_ref, .. } => {
                self.run_judge(prompt_ref, context, rule.max_score, semaphore)
                    .await
            }
        };
        rule_result(rule, outcome, attempts)
    }

    async fn run_judge(
        &self,
        prompt_ref: &str,
        context: &ResourceContext,
        max_score: f64,
        semaphore: &Semaphore,
    ) -> (Result<RuleScore>, u32) {
        let Some(judge) = &self.judge else {
            return (
                Err(Error::RuleEvaluation("no judge configured".to_string())),
                0,
            );
        };

        // Each attempt takes its own permit; backoff sleeps hold none.
        let max_attempts = self.config.judge_max_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            let outcome = self
                .limited(semaphore, judge.evaluate(prompt_ref, context, max_score))
                .await;
            attempt += 1;
            match outcome {
                Err(e) if attempt < max_attempts => {
                    let delay =
                        util::backoff_delay(self.config.judge_retry_base_delay(), attempt - 1);
                    debug!(prompt_ref, attempt, ?delay, error = %e, "judge failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                outcome => return (outcome, attempt),
            }
        }
    }

    /// Run one rule attempt under a pool permit and the rule timeout.
    async fn limited<F>(&self, semaphore: &Semaphore, fut: F) -> Result<RuleScore>
    where
        F: Future<Output = Result<RuleScore>>,
    {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| Error::RuleEvaluation(e.to_string()))?;
        let _active = self.gauge.enter();
        match self.config.rule_timeout() {
            Some(limit) => util::with_timeout(limit, fut).await,
            None => fut.await,
        }
    }
}

impl std::fmt::Debug for StagedEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedEvaluator")
            .field("config", &self.config)
            .field("has_judge", &self.judge.is_some())
            .field("peak_concurrency", &self.gauge.peak())
            .finish()
    }
}

fn rule_result(rule: &Rule, outcome: Result<RuleScore>, attempts: u32) -> RuleResult {
    let (score, feedback, error) = match outcome {
        Ok(RuleScore { score, feedback }) if score.is_finite() => {
            (score.clamp(0.0, rule.max_score) * rule.weight, feedback, None)
        }
        Ok(RuleScore { score, feedback }) => {
            (0.0, feedback, Some(format!("rule returned non-finite score {}", score)))
        }
        Err(e) => (0.0, String::new(), Some(e.to_string())),
    };
    if let Some(error) = &error {
        warn!(rule = %rule.name, %error, "rule scored 0");
    }
    RuleResult {
        rule_name: rule.name.clone(),
        kind: rule.kind.name().to_string(),
        score,
        max_score: rule.max_score,
        weight: rule.weight,
        feedback,
        error,
        attempts,
    }
}
