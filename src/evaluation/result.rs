//! Evaluation results. Built fresh by every evaluation call and never
//! mutated afterwards; they carry no timestamps so re-evaluating an
//! unchanged snapshot serializes identically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Score and diagnostics for one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_name: String,
    /// `code` or `judge`.
    pub kind: String,
    /// Weighted score in `[0, max_score * weight]`.
    pub score: f64,
    pub max_score: f64,
    pub weight: f64,
    pub feedback: String,
    /// Set when the rule failed and was scored 0.
    pub error: Option<String>,
    pub attempts: u32,
}

impl RuleResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    /// Sum of rule scores, capped at `max_points`.
    pub raw_score: f64,
    pub max_points: f64,
    /// `raw_score / max_points`.
    pub normalized: f64,
    pub passed: bool,
    pub is_gate: bool,
    pub rules: Vec<RuleResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRubricResult {
    pub category_name: String,
    /// Evaluated stages in order; stages after a stop are absent.
    pub stages: Vec<StageResult>,
    pub total_score: f64,
    pub max_score: f64,
    pub normalized_score: f64,
    pub stages_evaluated: usize,
    pub stages_passed: usize,
    /// First gate stage that missed its threshold.
    pub failed_gate: Option<String>,
    /// Stage at which evaluation stopped early.
    pub stopped_at: Option<String>,
}

impl StagedRubricResult {
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Every rule result that carries an error, across all stages.
    pub fn rule_errors(&self) -> Vec<&RuleResult> {
        self.stages
            .iter()
            .flat_map(|s| s.rules.iter())
            .filter(|r| r.is_error())
            .collect()
    }
}

/// Results of one evaluation call, keyed by category name.
pub type EvaluationMap = BTreeMap<String, StagedRubricResult>;

/// Stakeholder utility of one evaluation: `weight * normalized_score` summed
/// over every evaluated category that has a preference weight.
///
/// Returns `None` when no evaluated category is weighted.
pub fn weighted_preference_total(
    evaluation: &EvaluationMap,
    weights: &BTreeMap<String, f64>,
) -> Option<f64> {
    let mut matched = false;
    let mut total = 0.0;
    for (category, weight) in weights {
        if let Some(result) = evaluation.get(category) {
            matched = true;
            total += weight * result.normalized_score;
        }
    }
    matched.then_some(total)
}
