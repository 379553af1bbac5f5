//! In-process behavior state: prompts, strategy parameters, installed tools.
//!
//! Each capability writes one keyed namespace of the overlay and remembers,
//! per modification id, what it replaced so that revert can restore it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use maple_evolution_types::{ImplementationRecord, ModificationId, ModificationType, SelfModification};

use super::{CapabilityOutcome, ModificationCapability};

/// One namespace of key/value behavior plus its revert snapshots.
#[derive(Default)]
struct KeyedSlots {
    values: RwLock<HashMap<String, String>>,
    snapshots: RwLock<HashMap<ModificationId, (String, Option<String>)>>,
}

impl KeyedSlots {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .values
            .read()
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn set(&self, modification_id: &ModificationId, key: &str, value: &str) -> Result<(), String> {
        let mut values = self.values.write().map_err(|_| "overlay lock poisoned")?;
        let mut snapshots = self.snapshots.write().map_err(|_| "overlay lock poisoned")?;
        if snapshots.contains_key(modification_id) {
            return Err(format!("modification {modification_id} already applied"));
        }
        let previous = values.insert(key.to_string(), value.to_string());
        snapshots.insert(modification_id.clone(), (key.to_string(), previous));
        Ok(())
    }

    fn restore(&self, modification_id: &ModificationId) -> Result<String, String> {
        let mut values = self.values.write().map_err(|_| "overlay lock poisoned")?;
        let mut snapshots = self.snapshots.write().map_err(|_| "overlay lock poisoned")?;
        let (key, previous) = snapshots
            .remove(modification_id)
            .ok_or_else(|| format!("no snapshot for modification {modification_id}"))?;
        match previous {
            Some(old) => {
                values.insert(key.clone(), old);
            }
            None => {
                values.remove(&key);
            }
        }
        Ok(key)
    }
}

/// Shared behavior state written by the keyed capabilities.
#[derive(Default)]
pub struct BehaviorOverlay {
    prompts: KeyedSlots,
    strategies: KeyedSlots,
    tools: KeyedSlots,
}

impl BehaviorOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current text of a prompt slot.
    pub fn prompt(&self, slot: &str) -> Option<String> {
        self.prompts.get(slot)
    }

    /// Current value of a strategy parameter.
    pub fn strategy(&self, key: &str) -> Option<String> {
        self.strategies.get(key)
    }

    /// Manifest of an installed tool.
    pub fn tool(&self, name: &str) -> Option<String> {
        self.tools.get(name)
    }

    /// Names of installed tools, sorted.
    pub fn installed_tools(&self) -> Vec<String> {
        self.tools.keys()
    }
}

fn apply_slot(slots: &KeyedSlots, what: &str, modification: &SelfModification) -> CapabilityOutcome {
    match slots.set(&modification.id, &modification.target, &modification.change) {
        Ok(()) => CapabilityOutcome::ok(format!("{what} '{}' set", modification.target)),
        Err(e) => CapabilityOutcome::failed(e),
    }
}

fn revert_slot(slots: &KeyedSlots, what: &str, record: &ImplementationRecord) -> CapabilityOutcome {
    match slots.restore(&record.modification_id) {
        Ok(key) => CapabilityOutcome::ok(format!("{what} '{key}' restored")),
        Err(e) => CapabilityOutcome::failed(e),
    }
}

// ── Tool Install ───────────────────────────────────────────────────────

/// Installs tool `target` with manifest `change`.
pub struct ToolInstallCapability {
    overlay: Arc<BehaviorOverlay>,
}

impl ToolInstallCapability {
    pub fn new(overlay: Arc<BehaviorOverlay>) -> Self {
        Self { overlay }
    }
}

#[async_trait]
impl ModificationCapability for ToolInstallCapability {
    fn modification_type(&self) -> ModificationType {
        ModificationType::ToolInstall
    }

    async fn apply(&self, modification: &SelfModification) -> CapabilityOutcome {
        apply_slot(&self.overlay.tools, "tool", modification)
    }

    async fn revert(&self, record: &ImplementationRecord) -> CapabilityOutcome {
        revert_slot(&self.overlay.tools, "tool", record)
    }
}

// ── Prompt Change ──────────────────────────────────────────────────────

/// Sets prompt slot `target` to `change`.
pub struct PromptChangeCapability {
    overlay: Arc<BehaviorOverlay>,
}

impl PromptChangeCapability {
    pub fn new(overlay: Arc<BehaviorOverlay>) -> Self {
        Self { overlay }
    }
}

#[async_trait]
impl ModificationCapability for PromptChangeCapability {
    fn modification_type(&self) -> ModificationType {
        ModificationType::PromptChange
    }

    async fn apply(&self, modification: &SelfModification) -> CapabilityOutcome {
        apply_slot(&self.overlay.prompts, "prompt", modification)
    }

    async fn revert(&self, record: &ImplementationRecord) -> CapabilityOutcome {
        revert_slot(&self.overlay.prompts, "prompt", record)
    }
}

// ── Strategy Update ────────────────────────────────────────────────────

/// Sets strategy parameter `target` to `change`.
pub struct StrategyUpdateCapability {
    overlay: Arc<BehaviorOverlay>,
}

impl StrategyUpdateCapability {
    pub fn new(overlay: Arc<BehaviorOverlay>) -> Self {
        Self { overlay }
    }
}

#[async_trait]
impl ModificationCapability for StrategyUpdateCapability {
    fn modification_type(&self) -> ModificationType {
        ModificationType::StrategyUpdate
    }

    async fn apply(&self, modification: &SelfModification) -> CapabilityOutcome {
        apply_slot(&self.overlay.strategies, "strategy", modification)
    }

    async fn revert(&self, record: &ImplementationRecord) -> CapabilityOutcome {
        revert_slot(&self.overlay.strategies, "strategy", record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maple_evolution_types::{
        ModificationTestResult, PerformanceImpact, ProductionMetrics, TestRecommendation,
    };

    fn modification(id: &str, t: ModificationType, target: &str, change: &str) -> SelfModification {
        SelfModification {
            id: id.into(),
            modification_type: t,
            target: target.into(),
            change: change.into(),
            hypothesis: "h".into(),
            expected_impact: "e".into(),
            test_period_days: 7,
        }
    }

    fn record_for(m: &SelfModification) -> ImplementationRecord {
        let test = ModificationTestResult {
            id: "t".into(),
            modification_id: m.id.clone(),
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
        ImplementationRecord::new("agent".into(), m, &test, "v0".into(), "v1".into())
    }

    #[tokio::test]
    async fn prompt_change_reverts_to_previous_text() {
        let overlay = Arc::new(BehaviorOverlay::new());
        let cap = PromptChangeCapability::new(overlay.clone());

        let first = modification("m1", ModificationType::PromptChange, "system", "Be helpful.");
        let second = modification("m2", ModificationType::PromptChange, "system", "Be brief.");
        assert!(cap.apply(&first).await.success);
        assert!(cap.apply(&second).await.success);
        assert_eq!(overlay.prompt("system").as_deref(), Some("Be brief."));

        assert!(cap.revert(&record_for(&second)).await.success);
        assert_eq!(overlay.prompt("system").as_deref(), Some("Be helpful."));

        assert!(cap.revert(&record_for(&first)).await.success);
        assert_eq!(overlay.prompt("system"), None);
    }

    #[tokio::test]
    async fn tool_install_and_uninstall() {
        let overlay = Arc::new(BehaviorOverlay::new());
        let cap = ToolInstallCapability::new(overlay.clone());
        let m = modification("m1", ModificationType::ToolInstall, "web_search", "{\"v\":1}");
        assert!(cap.apply(&m).await.success);
        assert_eq!(overlay.installed_tools(), vec!["web_search".to_string()]);

        assert!(cap.revert(&record_for(&m)).await.success);
        assert!(overlay.installed_tools().is_empty());
    }

    #[tokio::test]
    async fn revert_without_snapshot_fails() {
        let overlay = Arc::new(BehaviorOverlay::new());
        let cap = StrategyUpdateCapability::new(overlay);
        let m = modification("m1", ModificationType::StrategyUpdate, "retries", "3");
        let outcome = cap.revert(&record_for(&m)).await;
        assert!(!outcome.success);
        assert!(outcome.detail.contains("no snapshot"));
    }

    #[tokio::test]
    async fn same_modification_cannot_apply_twice() {
        let overlay = Arc::new(BehaviorOverlay::new());
        let cap = StrategyUpdateCapability::new(overlay.clone());
        let m = modification("m1", ModificationType::StrategyUpdate, "retries", "3");
        assert!(cap.apply(&m).await.success);
        assert!(!cap.apply(&m).await.success);
        assert_eq!(overlay.strategy("retries").as_deref(), Some("3"));
    }
}
