//! Production performance validation.
//!
//! Compares the agent's production metrics in the window before an
//! implementation was applied with the window after it:
//!
//! ```text
//!   applied_at − N days        applied_at                 now
//!   ├──────── before ──────────┼────────── after ──────────┤
//! ```
//!
//! and reduces the comparison to one weighted score:
//!
//! ```text
//!   score = w_latency · latency% + w_cost · cost% + w_success · success_pp
//!   latency% = (before − after) / before · 100     (0 when before == 0)
//!   cost%    = (before − after) / before · 100     (0 when before == 0)
//!   success_pp = (after − before) · 100
//! ```
//!
//! The change counts as an improvement when `score > threshold`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use maple_evolution_store::{EvolutionStorage, QueryWindow};
use maple_evolution_types::{
    AgentId, ImplementationId, ImplementationRecord, MetricsAccumulator, PerformanceValidation,
    ProductionMetrics,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::PolicyConfig;
use crate::error::{EvolutionError, EvolutionResult};

/// Score a change must exceed to count as an improvement, in percent.
pub const DEFAULT_IMPROVEMENT_THRESHOLD_PCT: f64 = 5.0;

/// Relative weight of each metric in the improvement score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub latency: f64,
    pub cost: f64,
    pub success_rate: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            latency: 0.4,
            cost: 0.3,
            success_rate: 0.3,
        }
    }
}

impl ScoreWeights {
    pub fn is_valid(&self) -> bool {
        let all = [self.latency, self.cost, self.success_rate];
        all.iter().all(|w| w.is_finite() && *w >= 0.0) && all.iter().sum::<f64>() > 0.0
    }
}

/// Threshold and weights applied to one implementation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    pub threshold_pct: f64,
    pub weights: ScoreWeights,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            threshold_pct: DEFAULT_IMPROVEMENT_THRESHOLD_PCT,
            weights: ScoreWeights::default(),
        }
    }
}

impl ValidationPolicy {
    pub fn is_improvement(&self, score: f64) -> bool {
        score > self.threshold_pct
    }
}

/// Per-metric contributions to the improvement score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImprovementBreakdown {
    pub latency_improvement_pct: f64,
    pub cost_improvement_pct: f64,
    pub success_rate_improvement_pp: f64,
    pub score: f64,
}

/// Relative reduction from `before` to `after`, in percent.
pub fn improvement_pct(before: f64, after: f64) -> f64 {
    if before == 0.0 {
        0.0
    } else {
        (before - after) / before * 100.0
    }
}

/// Weighted improvement of `after` over `before`.
pub fn compute_improvement(
    before: &ProductionMetrics,
    after: &ProductionMetrics,
    weights: &ScoreWeights,
) -> ImprovementBreakdown {
    let latency = improvement_pct(before.avg_latency_ms, after.avg_latency_ms);
    let cost = improvement_pct(before.avg_cost_cents, after.avg_cost_cents);
    let success = (after.success_rate - before.success_rate) * 100.0;
    ImprovementBreakdown {
        latency_improvement_pct: latency,
        cost_improvement_pct: cost,
        success_rate_improvement_pp: success,
        score: weights.latency * latency + weights.cost * cost + weights.success_rate * success,
    }
}

/// Everything the validator learned about one implementation.
#[derive(Clone, Debug)]
pub struct Assessment {
    pub record: ImplementationRecord,
    pub validation: PerformanceValidation,
    pub breakdown: ImprovementBreakdown,
    pub policy: ValidationPolicy,
}

/// Measures before/after production metrics for implementations.
#[derive(Clone)]
pub struct PerformanceValidator {
    storage: Arc<dyn EvolutionStorage>,
    policy: PolicyConfig,
    page_size: usize,
}

impl PerformanceValidator {
    pub fn new(storage: Arc<dyn EvolutionStorage>, policy: PolicyConfig, page_size: usize) -> Self {
        Self {
            storage,
            policy,
            page_size: page_size.max(1),
        }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Validate an implementation as of now and store the snapshot on its record.
    pub async fn validate(
        &self,
        implementation_id: &ImplementationId,
        validation_period_days: u32,
    ) -> EvolutionResult<PerformanceValidation> {
        self.validate_at(implementation_id, validation_period_days, Utc::now())
            .await
    }

    /// [`validate`](Self::validate) with an explicit clock.
    pub async fn validate_at(
        &self,
        implementation_id: &ImplementationId,
        validation_period_days: u32,
        now: DateTime<Utc>,
    ) -> EvolutionResult<PerformanceValidation> {
        let assessment = self
            .assess_at(implementation_id, validation_period_days, now)
            .await?;
        self.record_snapshot(&assessment).await?;
        Ok(assessment.validation)
    }

    /// Compute the assessment without writing anything.
    #[instrument(skip(self, implementation_id), fields(implementation_id = %implementation_id))]
    pub async fn assess_at(
        &self,
        implementation_id: &ImplementationId,
        validation_period_days: u32,
        now: DateTime<Utc>,
    ) -> EvolutionResult<Assessment> {
        if validation_period_days == 0 {
            return Err(EvolutionError::Validation(
                "validation period must be at least one day".to_string(),
            ));
        }
        let record = self
            .storage
            .get_implementation(implementation_id)
            .await?
            .ok_or_else(|| {
                EvolutionError::NotFound(format!("implementation {implementation_id}"))
            })?;

        let applied_at = record.applied_at;
        let before_start = applied_at - Duration::days(i64::from(validation_period_days));
        let after_end = now.max(applied_at);

        let before = self
            .measure(
                &record.agent_id,
                before_start,
                applied_at,
                f64::from(validation_period_days),
            )
            .await?;
        let elapsed_days = (after_end - applied_at).num_milliseconds() as f64 / 86_400_000.0;
        let after = self
            .measure(&record.agent_id, applied_at, after_end, elapsed_days)
            .await?;

        let policy = self.policy.resolve(record.modification_type);
        let breakdown = compute_improvement(&before, &after, &policy.weights);
        let improvement = policy.is_improvement(breakdown.score);

        info!(
            score = breakdown.score,
            threshold = policy.threshold_pct,
            improvement,
            turns_before = before.total_operations,
            turns_after = after.total_operations,
            "implementation validated"
        );

        let validation = PerformanceValidation {
            implementation_id: record.id.clone(),
            validation_period_days,
            metrics_before_deployment: before,
            metrics_after_deployment: after,
            improvement,
            improvement_percentage: breakdown.score,
            validated_at: now,
            settled: false,
        };
        Ok(Assessment {
            record,
            validation,
            breakdown,
            policy,
        })
    }

    /// Store the assessment's validation on its implementation record.
    pub async fn record_snapshot(&self, assessment: &Assessment) -> EvolutionResult<()> {
        let mut record = self
            .storage
            .get_implementation(&assessment.record.id)
            .await?
            .ok_or_else(|| {
                EvolutionError::NotFound(format!("implementation {}", assessment.record.id))
            })?;
        record.validation = Some(assessment.validation.clone());
        self.storage.update_implementation(record).await?;
        Ok(())
    }

    /// Fold a telemetry window page by page.
    async fn measure(
        &self,
        agent_id: &AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period_days: f64,
    ) -> EvolutionResult<ProductionMetrics> {
        let mut acc = MetricsAccumulator::default();
        let mut offset = 0;
        loop {
            let page = self
                .storage
                .turns_between(
                    agent_id,
                    start,
                    end,
                    QueryWindow::page(self.page_size, offset),
                )
                .await?;
            for turn in &page {
                acc.add_turn(turn);
            }
            if page.len() < self.page_size {
                break;
            }
            offset += page.len();
        }
        debug!(turns = acc.turns(), %start, %end, "telemetry window folded");
        Ok(acc.finish(period_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maple_evolution_store::{ImplementationStore, InMemoryEvolutionStorage, TelemetryStore};
    use maple_evolution_types::{
        ModificationTestResult, ModificationType, PerformanceImpact, SelfModification,
        TestRecommendation, ToolCall, Turn,
    };

    fn metrics(latency: f64, cost: f64, success: f64) -> ProductionMetrics {
        ProductionMetrics {
            avg_latency_ms: latency,
            avg_cost_cents: cost,
            success_rate: success,
            total_operations: 10,
            measurement_period_days: 7.0,
        }
    }

    #[test]
    fn weighted_score_example() {
        let b = compute_improvement(
            &metrics(100.0, 10.0, 0.9),
            &metrics(80.0, 9.0, 0.95),
            &ScoreWeights::default(),
        );
        assert!((b.latency_improvement_pct - 20.0).abs() < 1e-9);
        assert!((b.cost_improvement_pct - 10.0).abs() < 1e-9);
        assert!((b.success_rate_improvement_pp - 5.0).abs() < 1e-9);
        assert!((b.score - 12.5).abs() < 1e-9);
        assert!(ValidationPolicy::default().is_improvement(b.score));
    }

    #[test]
    fn zero_baseline_contributes_nothing() {
        assert_eq!(improvement_pct(0.0, 50.0), 0.0);
        let b = compute_improvement(
            &ProductionMetrics::empty(7.0),
            &metrics(100.0, 10.0, 1.0),
            &ScoreWeights::default(),
        );
        assert_eq!(b.score, 0.0);
    }

    #[test]
    fn threshold_is_strict() {
        let policy = ValidationPolicy::default();
        assert!(!policy.is_improvement(5.0));
        assert!(policy.is_improvement(5.0001));
    }

    #[test]
    fn weights_validation() {
        assert!(ScoreWeights::default().is_valid());
        assert!(!ScoreWeights {
            latency: -0.1,
            cost: 0.6,
            success_rate: 0.5
        }
        .is_valid());
        assert!(!ScoreWeights {
            latency: 0.0,
            cost: 0.0,
            success_rate: 0.0
        }
        .is_valid());
    }

    async fn seeded_record(store: &InMemoryEvolutionStorage) -> ImplementationRecord {
        let modification = SelfModification {
            id: "mod-1".into(),
            modification_type: ModificationType::StrategyUpdate,
            target: "retry_budget".into(),
            change: "2".into(),
            hypothesis: "h".into(),
            expected_impact: "e".into(),
            test_period_days: 7,
        };
        let test = ModificationTestResult {
            id: "t-1".into(),
            modification_id: "mod-1".into(),
            recommendation: TestRecommendation::Apply,
            reasoning: "r".into(),
            performance_impact: PerformanceImpact {
                before: ProductionMetrics::empty(7.0),
                speed_change: 0.0,
                cost_change: 0.0,
                success_rate_change: 0.0,
            },
            test_duration_ms: 1,
        };
        let record =
            ImplementationRecord::new("agent-1".into(), &modification, &test, "v0".into(), "v1".into());
        store.store_implementation(record.clone()).await.unwrap();
        record
    }

    async fn turn(store: &InMemoryEvolutionStorage, at: DateTime<Utc>, latency: f64, cost: f64) {
        store
            .record_turn(Turn {
                agent_id: "agent-1".into(),
                occurred_at: at,
                tool_calls: vec![ToolCall::ok(latency)],
                cost_cents: cost,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_implementation_is_not_found() {
        let store = Arc::new(InMemoryEvolutionStorage::new());
        let validator = PerformanceValidator::new(store, PolicyConfig::default(), 500);
        let err = validator
            .validate(&ImplementationId::new(), 7)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn measures_both_windows_and_stores_snapshot() {
        let store = Arc::new(InMemoryEvolutionStorage::new());
        let record = seeded_record(&store).await;
        let t = record.applied_at;

        turn(&store, t - Duration::days(2), 100.0, 10.0).await;
        turn(&store, t - Duration::days(8), 5000.0, 500.0).await;
        turn(&store, t + Duration::hours(1), 50.0, 5.0).await;

        // page size 1 forces several pages per window
        let validator = PerformanceValidator::new(store.clone(), PolicyConfig::default(), 1);
        let v = validator
            .validate_at(&record.id, 7, t + Duration::days(7))
            .await
            .unwrap();

        assert_eq!(v.metrics_before_deployment.total_operations, 1);
        assert_eq!(v.metrics_before_deployment.avg_latency_ms, 100.0);
        assert_eq!(v.metrics_after_deployment.avg_cost_cents, 5.0);
        assert!((v.metrics_after_deployment.measurement_period_days - 7.0).abs() < 1e-9);
        // 0.4·50 + 0.3·50 + 0
        assert!((v.improvement_percentage - 35.0).abs() < 1e-9);
        assert!(v.improvement);

        let stored = store.get_implementation(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.validation, Some(v));
    }

    #[tokio::test]
    async fn empty_windows_are_not_an_improvement() {
        let store = Arc::new(InMemoryEvolutionStorage::new());
        let record = seeded_record(&store).await;
        let validator = PerformanceValidator::new(store, PolicyConfig::default(), 500);
        let a = validator
            .assess_at(&record.id, 7, record.applied_at + Duration::days(7))
            .await
            .unwrap();
        assert_eq!(a.validation.metrics_after_deployment, ProductionMetrics::empty(7.0));
        assert_eq!(a.breakdown.score, 0.0);
        assert!(!a.validation.improvement);
    }

    #[tokio::test]
    async fn zero_day_window_is_rejected() {
        let store = Arc::new(InMemoryEvolutionStorage::new());
        let record = seeded_record(&store).await;
        let validator = PerformanceValidator::new(store, PolicyConfig::default(), 500);
        let err = validator.validate(&record.id, 0).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
