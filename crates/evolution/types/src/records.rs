//! Records the pipeline persists or returns.
//!
//! - [`ImplementationRecord`]: one edge `version_before → version_after` in
//!   an agent's linear version chain.
//! - [`RollbackRecord`]: the terminal reversal of one implementation.
//! - [`ModificationVersion`]: correlation of a modification with its commit.
//! - [`PerformanceValidation`]: before/after production comparison.
//! - [`GitCommitMetadata`]: read-only projection of repository history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    AgentId, ImplementationId, ModificationId, ModificationVersionId, RollbackId, TestResultId,
    VersionId,
};
use crate::metrics::ProductionMetrics;
use crate::modification::{ModificationTestResult, ModificationType, PerformanceDelta, SelfModification};

// ── Implementation Status ──────────────────────────────────────────────

/// Lifecycle status of an implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationStatus {
    /// Applied and standing.
    Implemented,
    /// Reverted to its predecessor. Terminal.
    RolledBack,
}

impl ImplementationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implemented => "implemented",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RolledBack)
    }
}

impl std::fmt::Display for ImplementationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Performance Validation ─────────────────────────────────────────────

/// Before/after comparison of production metrics around a deployment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceValidation {
    pub implementation_id: ImplementationId,
    pub validation_period_days: u32,
    pub metrics_before_deployment: ProductionMetrics,
    pub metrics_after_deployment: ProductionMetrics,
    /// Whether the weighted score cleared the threshold.
    pub improvement: bool,
    /// Weighted improvement score, in percent.
    pub improvement_percentage: f64,
    pub validated_at: DateTime<Utc>,
    /// Set once the implementation was kept after its window was measured.
    #[serde(default)]
    pub settled: bool,
}

impl PerformanceValidation {
    /// Initial snapshot written at implementation time.
    ///
    /// The baseline comes from the test simulation; the post-deployment side
    /// stays zeroed until the monitoring window has been measured.
    pub fn pending(
        implementation_id: ImplementationId,
        validation_period_days: u32,
        baseline: ProductionMetrics,
    ) -> Self {
        Self {
            implementation_id,
            validation_period_days,
            metrics_before_deployment: baseline,
            metrics_after_deployment: ProductionMetrics::pending(),
            improvement: false,
            improvement_percentage: 0.0,
            validated_at: Utc::now(),
            settled: false,
        }
    }
}

// ── Implementation Record ──────────────────────────────────────────────

/// Persisted record of a successfully applied modification.
///
/// Written only when the apply hook succeeded. `version_before` is the
/// agent's head at call time and always differs from `version_after`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImplementationRecord {
    pub id: ImplementationId,
    pub agent_id: AgentId,
    pub modification_id: ModificationId,
    pub modification_type: ModificationType,
    pub target: String,
    pub change: String,
    pub version_before: VersionId,
    pub version_after: VersionId,
    pub applied_at: DateTime<Utc>,
    pub test_result_id: TestResultId,
    pub expected_impact: String,
    pub status: ImplementationStatus,
    /// Commit linked after version control recorded the change.
    #[serde(default)]
    pub commit_hash: Option<String>,
    /// Latest validation snapshot.
    #[serde(default)]
    pub validation: Option<PerformanceValidation>,
}

impl ImplementationRecord {
    /// Build a fresh record for an applied modification.
    pub fn new(
        agent_id: AgentId,
        modification: &SelfModification,
        test_result: &ModificationTestResult,
        version_before: VersionId,
        version_after: VersionId,
    ) -> Self {
        Self {
            id: ImplementationId::new(),
            agent_id,
            modification_id: modification.id.clone(),
            modification_type: modification.modification_type,
            target: modification.target.clone(),
            change: modification.change.clone(),
            version_before,
            version_after,
            applied_at: Utc::now(),
            test_result_id: test_result.id.clone(),
            expected_impact: modification.expected_impact.clone(),
            status: ImplementationStatus::Implemented,
            commit_hash: None,
            validation: None,
        }
    }

    /// Whether this implementation is live and still waiting for its
    /// keep-or-revert decision.
    pub fn is_awaiting_validation(&self) -> bool {
        self.status == ImplementationStatus::Implemented
            && !self.validation.as_ref().is_some_and(|v| v.settled)
    }

    /// Whether this implementation may still be rolled back.
    pub fn is_rollback_eligible(&self) -> bool {
        self.status == ImplementationStatus::Implemented
    }

    /// Transition to rolled back.
    pub fn mark_rolled_back(&mut self) {
        self.status = ImplementationStatus::RolledBack;
    }
}

// ── Rollback Record ────────────────────────────────────────────────────

/// Persisted record of an implementation being reverted to its predecessor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub id: RollbackId,
    pub implementation_id: ImplementationId,
    /// The implementation's `version_after`.
    pub rolled_back_from: VersionId,
    /// The implementation's `version_before`.
    pub rolled_back_to: VersionId,
    pub reason: String,
    pub rolled_back_at: DateTime<Utc>,
}

impl RollbackRecord {
    /// Build the rollback record for an implementation.
    pub fn for_implementation(record: &ImplementationRecord, reason: impl Into<String>) -> Self {
        Self {
            id: RollbackId::new(),
            implementation_id: record.id.clone(),
            rolled_back_from: record.version_after.clone(),
            rolled_back_to: record.version_before.clone(),
            reason: reason.into(),
            rolled_back_at: Utc::now(),
        }
    }
}

// ── Modification Version ───────────────────────────────────────────────

/// Correlates a modification with the commit that recorded it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModificationVersion {
    pub id: ModificationVersionId,
    pub modification_id: ModificationId,
    #[serde(default)]
    pub commit_hash: Option<String>,
    pub commit_message: String,
    pub applied: bool,
    pub rolled_back: bool,
    /// Predicted deltas copied from the test result.
    pub performance_delta: PerformanceDelta,
    pub created_at: DateTime<Utc>,
}

// ── Git Commit Metadata ────────────────────────────────────────────────

/// Read-only view of one commit in repository history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GitCommitMetadata {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub files_changed: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modification::{PerformanceImpact, TestRecommendation};

    fn modification() -> SelfModification {
        SelfModification {
            id: "mod-1".into(),
            modification_type: ModificationType::StrategyUpdate,
            target: "retry_budget".into(),
            change: "3".into(),
            hypothesis: "fewer retries save cost".into(),
            expected_impact: "-5% cost".into(),
            test_period_days: 7,
        }
    }

    fn test_result() -> ModificationTestResult {
        ModificationTestResult {
            id: "test-1".into(),
            modification_id: "mod-1".into(),
            recommendation: TestRecommendation::Apply,
            reasoning: "simulated cost drop".into(),
            performance_impact: PerformanceImpact {
                before: ProductionMetrics::empty(7.0),
                speed_change: 0.0,
                cost_change: 5.0,
                success_rate_change: 0.0,
            },
            test_duration_ms: 500,
        }
    }

    #[test]
    fn new_record_copies_modification_fields() {
        let record = ImplementationRecord::new(
            "agent-1".into(),
            &modification(),
            &test_result(),
            "v1".into(),
            "v2".into(),
        );
        assert_eq!(record.modification_id, ModificationId::from("mod-1"));
        assert_eq!(record.modification_type, ModificationType::StrategyUpdate);
        assert_eq!(record.test_result_id, TestResultId::from("test-1"));
        assert_eq!(record.status, ImplementationStatus::Implemented);
        assert!(record.is_rollback_eligible());
        assert!(record.commit_hash.is_none());
    }

    #[test]
    fn awaiting_until_kept_or_rolled_back() {
        let mut record = ImplementationRecord::new(
            "agent-1".into(),
            &modification(),
            &test_result(),
            "v1".into(),
            "v2".into(),
        );
        assert!(record.is_awaiting_validation());

        record.validation = Some(PerformanceValidation::pending(
            record.id.clone(),
            7,
            ProductionMetrics::empty(7.0),
        ));
        assert!(record.is_awaiting_validation());

        if let Some(v) = record.validation.as_mut() {
            v.settled = true;
        }
        assert!(!record.is_awaiting_validation());

        record.validation = None;
        record.mark_rolled_back();
        assert!(!record.is_awaiting_validation());
    }

    #[test]
    fn validation_without_settled_field_deserializes_unsettled() {
        let v = PerformanceValidation::pending(
            ImplementationId("impl-1".to_string()),
            7,
            ProductionMetrics::empty(7.0),
        );
        let mut json = serde_json::to_value(&v).unwrap();
        json.as_object_mut().unwrap().remove("settled");
        let back: PerformanceValidation = serde_json::from_value(json).unwrap();
        assert!(!back.settled);
    }

    #[test]
    fn rollback_record_reverses_the_edge() {
        let record = ImplementationRecord::new(
            "agent-1".into(),
            &modification(),
            &test_result(),
            "v1".into(),
            "v2".into(),
        );
        let rb = RollbackRecord::for_implementation(&record, "regressed");
        assert_eq!(rb.rolled_back_from, VersionId::from("v2"));
        assert_eq!(rb.rolled_back_to, VersionId::from("v1"));
        assert_eq!(rb.implementation_id, record.id);
    }

    #[test]
    fn rolled_back_is_terminal() {
        let mut record = ImplementationRecord::new(
            "agent-1".into(),
            &modification(),
            &test_result(),
            "v1".into(),
            "v2".into(),
        );
        record.mark_rolled_back();
        assert!(record.status.is_terminal());
        assert!(!record.is_rollback_eligible());
        assert_eq!(record.status.to_string(), "rolled_back");
    }

    #[test]
    fn pending_validation_is_zeroed_after() {
        let baseline = ProductionMetrics {
            avg_latency_ms: 120.0,
            avg_cost_cents: 3.0,
            success_rate: 0.97,
            total_operations: 40,
            measurement_period_days: 7.0,
        };
        let v = PerformanceValidation::pending(ImplementationId::new(), 7, baseline.clone());
        assert_eq!(v.metrics_before_deployment, baseline);
        assert_eq!(v.metrics_after_deployment, ProductionMetrics::pending());
        assert!(!v.improvement);
    }
}
