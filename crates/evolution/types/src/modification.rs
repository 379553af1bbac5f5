//! Self-modification proposals and their pre-deployment test results.
//!
//! Both are produced outside the pipeline and are read-only here. A test
//! result only unlocks implementation when its recommendation is
//! [`TestRecommendation::Apply`].

use serde::{Deserialize, Serialize};

use crate::ids::{ModificationId, TestResultId};
use crate::metrics::ProductionMetrics;

// ── Modification Type ──────────────────────────────────────────────────

/// The kind of behavior a modification changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationType {
    /// Edit to a source or configuration file.
    CodeEdit,
    /// Installation of a new tool.
    ToolInstall,
    /// Change to a prompt.
    PromptChange,
    /// Change to a decision-making strategy parameter.
    StrategyUpdate,
}

impl ModificationType {
    /// All modification types, in declaration order.
    pub const ALL: [ModificationType; 4] = [
        Self::CodeEdit,
        Self::ToolInstall,
        Self::PromptChange,
        Self::StrategyUpdate,
    ];

    /// Stable wire name (`code_edit`, `tool_install`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeEdit => "code_edit",
            Self::ToolInstall => "tool_install",
            Self::PromptChange => "prompt_change",
            Self::StrategyUpdate => "strategy_update",
        }
    }
}

impl std::fmt::Display for ModificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModificationType {
    type Err = crate::TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| crate::TypesError::UnknownModificationType(s.to_string()))
    }
}

// ── Self Modification ──────────────────────────────────────────────────

/// A proposed change to the agent's own behavior or configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelfModification {
    /// Identifier assigned by the proposal generator.
    pub id: ModificationId,
    /// What kind of change this is.
    #[serde(rename = "type")]
    pub modification_type: ModificationType,
    /// What is being changed (file path, tool name, prompt slot, strategy key).
    pub target: String,
    /// The new content or value.
    pub change: String,
    /// Why the proposer believes this helps.
    pub hypothesis: String,
    /// Free-form statement of the expected effect.
    pub expected_impact: String,
    /// Proposed observation period in days.
    pub test_period_days: u32,
}

// ── Test Result ────────────────────────────────────────────────────────

/// Verdict of the pre-deployment test simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestRecommendation {
    /// Deploy the modification.
    Apply,
    /// Discard the modification.
    Reject,
    /// The simulation was inconclusive.
    NeedsMoreTesting,
}

impl TestRecommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Reject => "reject",
            Self::NeedsMoreTesting => "needs_more_testing",
        }
    }
}

impl std::fmt::Display for TestRecommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicted deltas from the test simulation, in percent.
///
/// `speed_change` and `cost_change` are relative changes in percent
/// (positive means faster / cheaper). `success_rate_change` is in
/// percentage points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceDelta {
    pub speed_change: f64,
    pub cost_change: f64,
    pub success_rate_change: f64,
}

/// Predicted performance impact, including the baseline it was measured against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceImpact {
    /// Baseline metrics at test time.
    pub before: ProductionMetrics,
    pub speed_change: f64,
    pub cost_change: f64,
    pub success_rate_change: f64,
}

impl PerformanceImpact {
    /// The predicted deltas without the baseline.
    pub fn delta(&self) -> PerformanceDelta {
        PerformanceDelta {
            speed_change: self.speed_change,
            cost_change: self.cost_change,
            success_rate_change: self.success_rate_change,
        }
    }
}

/// Outcome of testing a modification before deployment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModificationTestResult {
    pub id: TestResultId,
    pub modification_id: ModificationId,
    pub recommendation: TestRecommendation,
    pub reasoning: String,
    pub performance_impact: PerformanceImpact,
    pub test_duration_ms: u64,
}

impl ModificationTestResult {
    /// Whether this result authorizes implementation.
    pub fn recommends_apply(&self) -> bool {
        self.recommendation == TestRecommendation::Apply
    }
}
