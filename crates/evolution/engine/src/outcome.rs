//! Implementation of approved modifications.
//!
//! `implement` is the only way an agent's version chain moves forward:
//!
//! 1. The test result must recommend `apply` and belong to the modification.
//! 2. The type's capability applies the change.
//! 3. A fresh `version_after` is minted.
//! 4. The implementation record is persisted with a pending validation.
//! 5. The chain head advances from `version_before` to `version_after`.
//!
//! Nothing is persisted unless step 2 succeeded. If step 4 fails the change
//! is reverted through the capability on a best-effort basis.

use std::sync::Arc;

use maple_evolution_store::EvolutionStorage;
use maple_evolution_types::{
    ImplementationId, ImplementationRecord, ModificationTestResult, PerformanceValidation,
    SelfModification, VersionId,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::capability::CapabilityRegistry;
use crate::chain::VersionChain;
use crate::error::EvolutionError;

/// What `implement` reports. Never an error: failures land in `errors`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImplementationResult {
    pub success: bool,
    pub implementation_id: Option<ImplementationId>,
    pub version_before: Option<VersionId>,
    pub version_after: Option<VersionId>,
    pub record: Option<ImplementationRecord>,
    pub errors: Vec<String>,
}

impl ImplementationResult {
    fn failed(error: EvolutionError) -> Self {
        Self {
            success: false,
            implementation_id: None,
            version_before: None,
            version_after: None,
            record: None,
            errors: vec![error.to_string()],
        }
    }

    fn succeeded(record: ImplementationRecord) -> Self {
        Self {
            success: true,
            implementation_id: Some(record.id.clone()),
            version_before: Some(record.version_before.clone()),
            version_after: Some(record.version_after.clone()),
            record: Some(record),
            errors: Vec::new(),
        }
    }
}

/// Applies tested modifications and records them.
#[derive(Clone)]
pub struct OutcomeHandler {
    storage: Arc<dyn EvolutionStorage>,
    capabilities: Arc<CapabilityRegistry>,
    default_validation_days: u32,
}

impl OutcomeHandler {
    pub fn new(
        storage: Arc<dyn EvolutionStorage>,
        capabilities: Arc<CapabilityRegistry>,
        default_validation_days: u32,
    ) -> Self {
        Self {
            storage,
            capabilities,
            default_validation_days,
        }
    }

    /// Apply `modification` on top of the chain's current head.
    #[instrument(skip_all, fields(agent_id = %chain.agent_id(), modification_id = %modification.id))]
    pub async fn implement(
        &self,
        chain: &mut VersionChain,
        modification: &SelfModification,
        test_result: &ModificationTestResult,
    ) -> ImplementationResult {
        if test_result.modification_id != modification.id {
            return ImplementationResult::failed(EvolutionError::Validation(format!(
                "test result {} belongs to modification {}, not {}",
                test_result.id, test_result.modification_id, modification.id
            )));
        }
        if !test_result.recommends_apply() {
            return ImplementationResult::failed(EvolutionError::Validation(format!(
                "test recommendation is '{}', only 'apply' may be implemented",
                test_result.recommendation
            )));
        }

        match self.capabilities.apply(modification).await {
            Ok(outcome) if outcome.success => {
                info!(detail = %outcome.detail, "modification applied");
            }
            Ok(outcome) => {
                return ImplementationResult::failed(EvolutionError::ApplyFailure(outcome.detail));
            }
            Err(e) => return ImplementationResult::failed(e),
        }

        let version_before = chain.head().clone();
        let version_after = VersionId::mint();

        let mut record = ImplementationRecord::new(
            chain.agent_id().clone(),
            modification,
            test_result,
            version_before.clone(),
            version_after.clone(),
        );
        let days = if modification.test_period_days > 0 {
            modification.test_period_days
        } else {
            self.default_validation_days
        };
        record.validation = Some(PerformanceValidation::pending(
            record.id.clone(),
            days,
            test_result.performance_impact.before.clone(),
        ));

        if let Err(e) = self.storage.store_implementation(record.clone()).await {
            self.undo_apply(&record).await;
            return ImplementationResult::failed(e.into());
        }

        if let Err(e) = chain.advance(&version_before, version_after) {
            error!(error = %e, implementation_id = %record.id, "chain rejected a recorded implementation");
            return ImplementationResult::failed(e.into());
        }

        info!(
            implementation_id = %record.id,
            version_before = %record.version_before,
            version_after = %record.version_after,
            "modification implemented"
        );
        ImplementationResult::succeeded(record)
    }

    async fn undo_apply(&self, record: &ImplementationRecord) {
        match self.capabilities.revert(record).await {
            Ok(outcome) if outcome.success => {}
            Ok(outcome) => warn!(detail = %outcome.detail, "could not undo unrecorded apply"),
            Err(e) => warn!(error = %e, "could not undo unrecorded apply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::SimulatedCapability;
    use maple_evolution_store::{ImplementationStore, InMemoryEvolutionStorage};
    use maple_evolution_types::{
        ModificationType, PerformanceImpact, ProductionMetrics, TestRecommendation,
    };

    fn modification() -> SelfModification {
        SelfModification {
            id: "mod-1".into(),
            modification_type: ModificationType::PromptChange,
            target: "system".into(),
            change: "Be brief.".into(),
            hypothesis: "h".into(),
            expected_impact: "e".into(),
            test_period_days: 5,
        }
    }

    fn test_result(recommendation: TestRecommendation) -> ModificationTestResult {
        ModificationTestResult {
            id: "test-1".into(),
            modification_id: "mod-1".into(),
            recommendation,
            reasoning: "r".into(),
            performance_impact: PerformanceImpact {
                before: ProductionMetrics {
                    avg_latency_ms: 120.0,
                    avg_cost_cents: 2.0,
                    success_rate: 0.9,
                    total_operations: 50,
                    measurement_period_days: 7.0,
                },
                speed_change: 10.0,
                cost_change: 0.0,
                success_rate_change: 0.0,
            },
            test_duration_ms: 10,
        }
    }

    fn handler(
        cap: SimulatedCapability,
    ) -> (Arc<InMemoryEvolutionStorage>, Arc<SimulatedCapability>, OutcomeHandler) {
        let store = Arc::new(InMemoryEvolutionStorage::new());
        let cap = Arc::new(cap);
        let mut registry = CapabilityRegistry::new();
        registry.register(cap.clone());
        let handler = OutcomeHandler::new(store.clone(), Arc::new(registry), 7);
        (store, cap, handler)
    }

    #[tokio::test]
    async fn implements_and_advances_chain() {
        let (store, cap, handler) =
            handler(SimulatedCapability::succeeding(ModificationType::PromptChange));
        let mut chain = VersionChain::new("agent-1".into(), "v0".into());

        let result = handler
            .implement(&mut chain, &modification(), &test_result(TestRecommendation::Apply))
            .await;
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.version_before, Some(VersionId::from("v0")));
        assert_ne!(result.version_before, result.version_after);
        assert_eq!(chain.head(), result.version_after.as_ref().unwrap());
        assert_eq!(cap.apply_calls(), 1);

        let stored = store
            .get_implementation(result.implementation_id.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version_before, VersionId::from("v0"));
        let validation = stored.validation.unwrap();
        assert_eq!(validation.validation_period_days, 5);
        assert_eq!(validation.metrics_before_deployment.avg_latency_ms, 120.0);
        assert_eq!(validation.metrics_after_deployment, ProductionMetrics::pending());
    }

    #[tokio::test]
    async fn non_apply_recommendation_writes_nothing() {
        for rec in [TestRecommendation::Reject, TestRecommendation::NeedsMoreTesting] {
            let (store, cap, handler) =
                handler(SimulatedCapability::succeeding(ModificationType::PromptChange));
            let mut chain = VersionChain::new("agent-1".into(), "v0".into());
            let result = handler
                .implement(&mut chain, &modification(), &test_result(rec))
                .await;
            assert!(!result.success);
            assert!(result.errors[0].starts_with("validation failed"));
            assert_eq!(store.implementation_count(), 0);
            assert_eq!(cap.apply_calls(), 0);
            assert_eq!(chain.head(), &VersionId::from("v0"));
        }
    }

    #[tokio::test]
    async fn failed_apply_mints_nothing() {
        let (store, _, handler) =
            handler(SimulatedCapability::failing_apply(ModificationType::PromptChange));
        let mut chain = VersionChain::new("agent-1".into(), "v0".into());
        let result = handler
            .implement(&mut chain, &modification(), &test_result(TestRecommendation::Apply))
            .await;
        assert!(!result.success);
        assert!(result.version_after.is_none());
        assert!(result.errors[0].starts_with("apply failed"));
        assert_eq!(store.implementation_count(), 0);
        assert!(chain.history().is_empty());
    }

    #[tokio::test]
    async fn mismatched_test_result_is_rejected() {
        let (store, _, handler) =
            handler(SimulatedCapability::succeeding(ModificationType::PromptChange));
        let mut chain = VersionChain::new("agent-1".into(), "v0".into());
        let mut test = test_result(TestRecommendation::Apply);
        test.modification_id = "mod-other".into();
        let result = handler.implement(&mut chain, &modification(), &test).await;
        assert!(!result.success);
        assert_eq!(store.implementation_count(), 0);
    }

    #[tokio::test]
    async fn unregistered_type_fails_cleanly() {
        let (store, _, handler) =
            handler(SimulatedCapability::succeeding(ModificationType::ToolInstall));
        let mut chain = VersionChain::new("agent-1".into(), "v0".into());
        let result = handler
            .implement(&mut chain, &modification(), &test_result(TestRecommendation::Apply))
            .await;
        assert!(!result.success);
        assert_eq!(store.implementation_count(), 0);
    }
}
