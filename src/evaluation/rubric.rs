//! Staged rubric definitions.
//!
//! A rubric is an ordered list of stages; each stage holds rules and may act
//! as a gate. Rubrics are plain data (serde-friendly) and are validated before
//! any rule runs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_weight() -> f64 {
    1.0
}

/// How a rule computes its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// A native scoring function looked up by name.
    Code { code_ref: String },
    /// A natural-language judge behind the judge port.
    Judge {
        prompt_ref: String,
        #[serde(default)]
        model: Option<String>,
    },
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Code { .. } => "code",
            RuleKind::Judge { .. } => "judge",
        }
    }
}

/// One scoring rule. Its contribution is `clamp(raw, 0, max_score) * weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub max_score: f64,
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl Rule {
    pub fn code(name: impl Into<String>, code_ref: impl Into<String>, max_score: f64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            weight: 1.0,
            max_score,
            kind: RuleKind::Code {
                code_ref: code_ref.into(),
            },
        }
    }

    pub fn judge(name: impl Into<String>, prompt_ref: impl Into<String>, max_score: f64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            weight: 1.0,
            max_score,
            kind: RuleKind::Judge {
                prompt_ref: prompt_ref.into(),
                model: None,
            },
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Largest score this rule can contribute.
    pub fn max_contribution(&self) -> f64 {
        self.max_score * self.weight
    }
}

/// What happens when a gate stage misses its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnFailureAction {
    /// Stop; later stages are not evaluated.
    #[default]
    SkipRemaining,
    /// Record the failure and keep going.
    Continue,
    /// Stop and replace the whole category total with a fixed score.
    ZeroCategory { on_failure_score: f64 },
}

impl std::fmt::Display for OnFailureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnFailureAction::SkipRemaining => write!(f, "skip_remaining"),
            OnFailureAction::Continue => write!(f, "continue"),
            OnFailureAction::ZeroCategory { on_failure_score } => {
                write!(f, "zero_category({})", on_failure_score)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStage {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub is_gate: bool,
    /// Normalized threshold in [0, 1]; only consulted for gates.
    #[serde(default)]
    pub min_score_to_pass: f64,
    #[serde(default)]
    pub on_failure_action: OnFailureAction,
    pub max_points: f64,
}

impl EvaluationStage {
    pub fn new(name: impl Into<String>, max_points: f64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            rules: Vec::new(),
            is_gate: false,
            min_score_to_pass: 0.0,
            on_failure_action: OnFailureAction::default(),
            max_points,
        }
    }

    /// Make this stage a gate.
    pub fn gate(mut self, min_score_to_pass: f64, on_failure: OnFailureAction) -> Self {
        self.is_gate = true;
        self.min_score_to_pass = min_score_to_pass;
        self.on_failure_action = on_failure;
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRubric {
    pub category_name: String,
    #[serde(default)]
    pub rationale: Option<String>,
    pub stages: Vec<EvaluationStage>,
}

impl StagedRubric {
    pub fn new(category_name: impl Into<String>) -> Self {
        Self {
            category_name: category_name.into(),
            rationale: None,
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: EvaluationStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn max_total_score(&self) -> f64 {
        self.stages.iter().map(|s| s.max_points).sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.category_name.trim().is_empty() {
            return Err(self.invalid("category name is empty"));
        }
        if self.stages.is_empty() {
            return Err(self.invalid("rubric has no stages"));
        }
        let mut names = HashSet::new();
        for stage in &self.stages {
            if !names.insert(stage.name.as_str()) {
                return Err(self.invalid(format!("stage '{}' appears twice", stage.name)));
            }
            if stage.rules.is_empty() {
                return Err(self.invalid(format!("stage '{}' has no rules", stage.name)));
            }
            if !(stage.max_points.is_finite() && stage.max_points > 0.0) {
                return Err(self.invalid(format!(
                    "stage '{}' max_points must be positive",
                    stage.name
                )));
            }
            if !(0.0..=1.0).contains(&stage.min_score_to_pass) {
                return Err(self.invalid(format!(
                    "stage '{}' min_score_to_pass must lie in [0, 1]",
                    stage.name
                )));
            }
            if let OnFailureAction::ZeroCategory { on_failure_score } = stage.on_failure_action {
                if !(on_failure_score.is_finite() && on_failure_score >= 0.0) {
                    return Err(self.invalid(format!(
                        "stage '{}' on_failure_score must be non-negative",
                        stage.name
                    )));
                }
            }
            for rule in &stage.rules {
                if !(rule.weight.is_finite() && rule.weight >= 0.0) {
                    return Err(self.invalid(format!("rule '{}' has a negative weight", rule.name)));
                }
                if !(rule.max_score.is_finite() && rule.max_score >= 0.0) {
                    return Err(self.invalid(format!(
                        "rule '{}' has a negative max_score",
                        rule.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidRubric {
            rubric: self.category_name.clone(),
            reason: reason.into(),
        }
    }
}
