//! Property tests for the version chain, rollback targeting and scoring.

use std::sync::Arc;

use maple_evolution_engine::{
    compute_improvement, CapabilityRegistry, OutcomeHandler, RollbackEngine, ScoreWeights,
    SimulatedCapability, ValidationPolicy, VersionChain,
};
use maple_evolution_store::{
    ImplementationStore, InMemoryAuditLog, InMemoryEvolutionStorage,
};
use maple_evolution_types::{
    ImplementationId, MetricsAccumulator, ModificationTestResult, ModificationType,
    PerformanceImpact, ProductionMetrics, SelfModification, TestRecommendation, VersionId,
};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn proposal(n: usize) -> (SelfModification, ModificationTestResult) {
    let id = format!("mod-{n}");
    let modification = SelfModification {
        id: id.as_str().into(),
        modification_type: ModificationType::StrategyUpdate,
        target: format!("param-{n}"),
        change: n.to_string(),
        hypothesis: "h".into(),
        expected_impact: "e".into(),
        test_period_days: 7,
    };
    let test = ModificationTestResult {
        id: format!("test-{n}").as_str().into(),
        modification_id: id.as_str().into(),
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
    (modification, test)
}

fn engines() -> (Arc<InMemoryEvolutionStorage>, OutcomeHandler, RollbackEngine) {
    let store = Arc::new(InMemoryEvolutionStorage::new());
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::new(SimulatedCapability::succeeding(
        ModificationType::StrategyUpdate,
    )));
    let registry = Arc::new(registry);
    let handler = OutcomeHandler::new(store.clone(), registry.clone(), 7);
    let rollback = RollbackEngine::new(store.clone(), registry, Arc::new(InMemoryAuditLog::new()));
    (store, handler, rollback)
}

fn arb_metrics() -> impl Strategy<Value = ProductionMetrics> {
    (0.0f64..1_000.0, 0.0f64..100.0, 0.0f64..=1.0).prop_map(|(latency, cost, success)| {
        ProductionMetrics {
            avg_latency_ms: latency,
            avg_cost_cents: cost,
            success_rate: success,
            total_operations: 10,
            measurement_period_days: 7.0,
        }
    })
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Any interleaving of implements and rollbacks keeps one linear chain:
    /// the head is always the last surviving implementation's version_after.
    #[test]
    fn chain_stays_linear(ops in prop::collection::vec(any::<bool>(), 1..24)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (store, handler, rollback) = engines();
            let genesis = VersionId::from("genesis");
            let mut chain = VersionChain::new("agent-1".into(), genesis.clone());
            let mut standing: Vec<(ImplementationId, VersionId, VersionId)> = Vec::new();

            for (n, implement) in ops.into_iter().enumerate() {
                if implement || standing.is_empty() {
                    let (m, t) = proposal(n);
                    let result = handler.implement(&mut chain, &m, &t).await;
                    prop_assert!(result.success);
                    let id = result.implementation_id.clone().unwrap();
                    let before = result.version_before.clone().unwrap();
                    let after = result.version_after.clone().unwrap();
                    prop_assert_ne!(&before, &after);

                    let stored = store.get_implementation(&id).await.unwrap().unwrap();
                    prop_assert_eq!(&stored.version_before, &before);
                    prop_assert_eq!(&stored.version_after, &after);
                    if let Some((_, _, prev_after)) = standing.last() {
                        prop_assert_eq!(&before, prev_after);
                    } else {
                        prop_assert_eq!(&before, &genesis);
                    }
                    standing.push((id, before, after));
                } else if let Some((id, before, after)) = standing.pop() {
                    let result = rollback.rollback(&mut chain, &id, &before, "prop").await;
                    prop_assert!(result.success);
                    prop_assert_eq!(result.rolled_back_from, Some(after));
                    prop_assert_eq!(result.rolled_back_to, Some(before));
                }

                let expected = standing.last().map_or(&genesis, |(_, _, after)| after);
                prop_assert_eq!(chain.head(), expected);
            }
            Ok(())
        })?;
    }

    /// Rollback to anything but the exact predecessor writes nothing.
    #[test]
    fn rollback_rejects_any_other_target(target in "[a-z0-9-]{1,12}") {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (store, handler, rollback) = engines();
            let mut chain = VersionChain::new("agent-1".into(), "v1".into());
            let (m, t) = proposal(0);
            let implemented = handler.implement(&mut chain, &m, &t).await;
            let id = implemented.implementation_id.unwrap();
            let head = chain.head().clone();

            let target = VersionId::new(target);
            prop_assume!(target != VersionId::from("v1"));
            let result = rollback.rollback(&mut chain, &id, &target, "prop").await;
            prop_assert!(!result.success);
            prop_assert_eq!(store.rollback_count(), 0);
            prop_assert_eq!(chain.head(), &head);
            Ok(())
        })?;
    }

    /// The score is the weighted sum of its components and the decision is
    /// exactly `score > threshold`.
    #[test]
    fn score_is_weighted_sum(before in arb_metrics(), after in arb_metrics()) {
        let weights = ScoreWeights::default();
        let b = compute_improvement(&before, &after, &weights);
        let again = compute_improvement(&before, &after, &weights);
        prop_assert_eq!(b, again);

        let expected = 0.4 * b.latency_improvement_pct
            + 0.3 * b.cost_improvement_pct
            + 0.3 * b.success_rate_improvement_pp;
        prop_assert!((b.score - expected).abs() < 1e-9);
        if before.avg_latency_ms == 0.0 {
            prop_assert_eq!(b.latency_improvement_pct, 0.0);
        }
        if before.avg_cost_cents == 0.0 {
            prop_assert_eq!(b.cost_improvement_pct, 0.0);
        }

        let policy = ValidationPolicy::default();
        prop_assert_eq!(policy.is_improvement(b.score), b.score > 5.0);
    }
}

#[test]
fn empty_window_is_optimistic() {
    let m = MetricsAccumulator::default().finish(7.0);
    assert_eq!(m.success_rate, 1.0);
    assert_eq!(m.avg_latency_ms, 0.0);
    assert_eq!(m.avg_cost_cents, 0.0);
    assert_eq!(m.total_operations, 0);
}

#[test]
fn reference_metrics_score_twelve_and_a_half() {
    let before = ProductionMetrics {
        avg_latency_ms: 100.0,
        avg_cost_cents: 10.0,
        success_rate: 0.9,
        total_operations: 10,
        measurement_period_days: 7.0,
    };
    let after = ProductionMetrics {
        avg_latency_ms: 80.0,
        avg_cost_cents: 9.0,
        success_rate: 0.95,
        ..before.clone()
    };
    let b = compute_improvement(&before, &after, &ScoreWeights::default());
    assert!((b.score - 12.5).abs() < 1e-9);
    assert!(ValidationPolicy::default().is_improvement(b.score));
}
