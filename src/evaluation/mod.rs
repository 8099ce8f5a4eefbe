//! Staged, gated scoring of workflow snapshots.

pub mod engine;
pub mod ports;
pub mod result;
pub mod rubric;

pub use engine::StagedEvaluator;
pub use ports::{CodeRuleFn, CodeRuleRegistry, JudgePort, ResourceContext, RuleExecutor, RuleScore};
pub use result::{
    weighted_preference_total, EvaluationMap, RuleResult, StageResult, StagedRubricResult,
};
pub use rubric::{EvaluationStage, OnFailureAction, Rule, RuleKind, StagedRubric};
