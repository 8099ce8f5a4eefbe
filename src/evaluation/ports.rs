//! Rule execution ports and the native code-rule registry.
//!
//! Code rules are plain Rust functions registered by name and evaluated
//! against a read-only snapshot; there is no dynamic code execution. Judge
//! rules go through [`JudgePort`], whose implementation lives outside this
//! crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::Resource;
use crate::error::{Error, Result};
use crate::util;
use crate::workflow::Workflow;

/// A raw rule score with its explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleScore {
    pub score: f64,
    pub feedback: String,
}

impl RuleScore {
    pub fn new(score: f64, feedback: impl Into<String>) -> Self {
        Self {
            score,
            feedback: feedback.into(),
        }
    }
}

/// Resources visible to rules during one evaluation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceContext {
    pub resources: Vec<Resource>,
}

impl ResourceContext {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        Self {
            resources: workflow.resources().iter().cloned().collect(),
        }
    }

    /// Resources produced by task execution, as opposed to manager-created.
    pub fn outputs(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(|r| r.producing_task.is_some())
    }

    /// Plain-text rendering for judge prompts.
    pub fn render(&self) -> String {
        self.resources
            .iter()
            .map(|r| format!("## {}\n{}", r.name, r.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Executes code-kind rules.
#[async_trait]
pub trait RuleExecutor: Send + Sync {
    async fn execute(
        &self,
        code_ref: &str,
        snapshot: Arc<Workflow>,
        context: Arc<ResourceContext>,
    ) -> Result<RuleScore>;
}

/// Scores judge-kind rules, typically over the network.
#[async_trait]
pub trait JudgePort: Send + Sync {
    async fn evaluate(
        &self,
        prompt_ref: &str,
        context: &ResourceContext,
        max_score: f64,
    ) -> Result<RuleScore>;
}

/// Signature of a native code rule.
pub type CodeRuleFn = Arc<dyn Fn(&Workflow, &ResourceContext) -> Result<RuleScore> + Send + Sync>;

/// Named native rule functions.
///
/// Each rule runs on the blocking pool, so a panicking rule surfaces as an
/// error instead of taking the evaluator down.
#[derive(Clone, Default)]
pub struct CodeRuleRegistry {
    rules: BTreeMap<String, CodeRuleFn>,
}

impl CodeRuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in rules. Each scores on `[0, 1]`.
    ///
    /// - `all_tasks_completed`: 1 when every task is completed
    /// - `completion_ratio`: completed atomic tasks over all atomic tasks
    /// - `has_output_resources`: 1 when any task produced a resource
    /// - `no_failed_tasks`: 1 when no task failed
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("all_tasks_completed", |wf, _| {
            let counts = wf.status_counts();
            let done = counts.total() > 0 && counts.completed == counts.total();
            Ok(RuleScore::new(
                if done { 1.0 } else { 0.0 },
                format!("{}/{} tasks completed", counts.completed, counts.total()),
            ))
        });
        registry.register("completion_ratio", |wf, _| {
            let atomic: Vec<_> = wf.tasks().filter(|t| !t.is_aggregate()).collect();
            if atomic.is_empty() {
                return Ok(RuleScore::new(0.0, "no atomic tasks"));
            }
            let done = atomic.iter().filter(|t| t.is_completed()).count();
            Ok(RuleScore::new(
                done as f64 / atomic.len() as f64,
                format!("{}/{} atomic tasks completed", done, atomic.len()),
            ))
        });
        registry.register("has_output_resources", |_, ctx| {
            let produced = ctx.outputs().count();
            Ok(RuleScore::new(
                if produced > 0 { 1.0 } else { 0.0 },
                format!("{} task outputs", produced),
            ))
        });
        registry.register("no_failed_tasks", |wf, _| {
            let failed = wf.status_counts().failed;
            Ok(RuleScore::new(
                if failed == 0 { 1.0 } else { 0.0 },
                format!("{} failed tasks", failed),
            ))
        });
        registry
    }

    /// Register or replace a rule.
    pub fn register<F>(&mut self, name: impl Into<String>, rule: F)
    where
        F: Fn(&Workflow, &ResourceContext) -> Result<RuleScore> + Send + Sync + 'static,
    {
        self.rules.insert(name.into(), Arc::new(rule));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CodeRuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeRuleRegistry")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl RuleExecutor for CodeRuleRegistry {
    async fn execute(
        &self,
        code_ref: &str,
        snapshot: Arc<Workflow>,
        context: Arc<ResourceContext>,
    ) -> Result<RuleScore> {
        let rule = self
            .rules
            .get(code_ref)
            .cloned()
            .ok_or_else(|| Error::RuleEvaluation(format!("no code rule named '{}'", code_ref)))?;
        trace!(code_ref, "running code rule");
        util::blocking(move || rule(&snapshot, &context)).await
    }
}
