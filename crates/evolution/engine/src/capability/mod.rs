//! Per-type apply/revert capabilities.
//!
//! The engine never matches on [`ModificationType`] itself. Each type is
//! served by a [`ModificationCapability`] registered in a
//! [`CapabilityRegistry`]; adding a type means registering a capability.

mod code_edit;
mod overlay;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use maple_evolution_types::{ImplementationRecord, ModificationType, SelfModification};
use serde::{Deserialize, Serialize};

use crate::error::{EvolutionError, EvolutionResult};

pub use code_edit::CodeEditCapability;
pub use overlay::{
    BehaviorOverlay, PromptChangeCapability, StrategyUpdateCapability, ToolInstallCapability,
};

// ── Capability Outcome ─────────────────────────────────────────────────

/// What a capability reported back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    pub success: bool,
    pub detail: String,
}

impl CapabilityOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

// ── ModificationCapability Trait ───────────────────────────────────────

/// Applies and reverts one kind of modification.
///
/// `revert` receives the implementation record written after `apply`
/// succeeded and must restore exactly what `apply` replaced.
#[async_trait]
pub trait ModificationCapability: Send + Sync {
    fn modification_type(&self) -> ModificationType;

    async fn apply(&self, modification: &SelfModification) -> CapabilityOutcome;

    async fn revert(&self, record: &ImplementationRecord) -> CapabilityOutcome;
}

// ── Registry ───────────────────────────────────────────────────────────

/// Maps each modification type to the capability that handles it.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<ModificationType, Arc<dyn ModificationCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the four built-in capabilities over a fresh overlay.
    pub fn with_defaults(workspace_root: impl Into<PathBuf>) -> Self {
        Self::with_overlay(workspace_root, Arc::new(BehaviorOverlay::new()))
    }

    /// Register the four built-in capabilities over a shared overlay.
    pub fn with_overlay(workspace_root: impl Into<PathBuf>, overlay: Arc<BehaviorOverlay>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CodeEditCapability::new(workspace_root)));
        registry.register(Arc::new(ToolInstallCapability::new(overlay.clone())));
        registry.register(Arc::new(PromptChangeCapability::new(overlay.clone())));
        registry.register(Arc::new(StrategyUpdateCapability::new(overlay)));
        registry
    }

    /// Register a capability, replacing any previous one for its type.
    pub fn register(&mut self, capability: Arc<dyn ModificationCapability>) {
        self.capabilities
            .insert(capability.modification_type(), capability);
    }

    pub fn get(&self, modification_type: ModificationType) -> Option<Arc<dyn ModificationCapability>> {
        self.capabilities.get(&modification_type).cloned()
    }

    pub fn supports(&self, modification_type: ModificationType) -> bool {
        self.capabilities.contains_key(&modification_type)
    }

    /// Apply through the registered capability.
    pub async fn apply(&self, modification: &SelfModification) -> EvolutionResult<CapabilityOutcome> {
        let capability = self.get(modification.modification_type).ok_or_else(|| {
            EvolutionError::ApplyFailure(format!(
                "no capability registered for {}",
                modification.modification_type
            ))
        })?;
        Ok(capability.apply(modification).await)
    }

    /// Revert through the registered capability.
    pub async fn revert(&self, record: &ImplementationRecord) -> EvolutionResult<CapabilityOutcome> {
        let capability = self.get(record.modification_type).ok_or_else(|| {
            EvolutionError::RevertFailure(format!(
                "no capability registered for {}",
                record.modification_type
            ))
        })?;
        Ok(capability.revert(record).await)
    }
}

// ── Simulated Capability ───────────────────────────────────────────────

/// A capability with configurable results, for testing.
pub struct SimulatedCapability {
    modification_type: ModificationType,
    apply_succeeds: bool,
    revert_succeeds: bool,
    apply_calls: AtomicUsize,
    revert_calls: AtomicUsize,
}

impl SimulatedCapability {
    /// Apply and revert both succeed.
    pub fn succeeding(modification_type: ModificationType) -> Self {
        Self::with_results(modification_type, true, true)
    }

    /// Apply fails.
    pub fn failing_apply(modification_type: ModificationType) -> Self {
        Self::with_results(modification_type, false, true)
    }

    /// Apply succeeds, revert fails.
    pub fn failing_revert(modification_type: ModificationType) -> Self {
        Self::with_results(modification_type, true, false)
    }

    fn with_results(
        modification_type: ModificationType,
        apply_succeeds: bool,
        revert_succeeds: bool,
    ) -> Self {
        Self {
            modification_type,
            apply_succeeds,
            revert_succeeds,
            apply_calls: AtomicUsize::new(0),
            revert_calls: AtomicUsize::new(0),
        }
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn revert_calls(&self) -> usize {
        self.revert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModificationCapability for SimulatedCapability {
    fn modification_type(&self) -> ModificationType {
        self.modification_type
    }

    async fn apply(&self, modification: &SelfModification) -> CapabilityOutcome {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.apply_succeeds {
            CapabilityOutcome::ok(format!("applied {}", modification.target))
        } else {
            CapabilityOutcome::failed("Simulated apply failure")
        }
    }

    async fn revert(&self, record: &ImplementationRecord) -> CapabilityOutcome {
        self.revert_calls.fetch_add(1, Ordering::SeqCst);
        if self.revert_succeeds {
            CapabilityOutcome::ok(format!("reverted {}", record.target))
        } else {
            CapabilityOutcome::failed("Simulated revert failure")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modification(t: ModificationType) -> SelfModification {
        SelfModification {
            id: "mod-1".into(),
            modification_type: t,
            target: "x".into(),
            change: "y".into(),
            hypothesis: "h".into(),
            expected_impact: "e".into(),
            test_period_days: 7,
        }
    }

    #[tokio::test]
    async fn unregistered_type_is_apply_failure() {
        let registry = CapabilityRegistry::new();
        let err = registry
            .apply(&modification(ModificationType::ToolInstall))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "apply_failure");
    }

    #[tokio::test]
    async fn registry_dispatches_by_type() {
        let prompt = Arc::new(SimulatedCapability::succeeding(ModificationType::PromptChange));
        let tool = Arc::new(SimulatedCapability::failing_apply(ModificationType::ToolInstall));
        let mut registry = CapabilityRegistry::new();
        registry.register(prompt.clone());
        registry.register(tool.clone());

        let ok = registry
            .apply(&modification(ModificationType::PromptChange))
            .await
            .unwrap();
        assert!(ok.success);
        let failed = registry
            .apply(&modification(ModificationType::ToolInstall))
            .await
            .unwrap();
        assert!(!failed.success);

        assert_eq!(prompt.apply_calls(), 1);
        assert_eq!(tool.apply_calls(), 1);
    }

    #[test]
    fn defaults_cover_every_type() {
        let registry = CapabilityRegistry::with_defaults("/tmp/agent");
        for t in ModificationType::ALL {
            assert!(registry.supports(t), "{t} not registered");
        }
    }
}
