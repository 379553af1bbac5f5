//! In-memory reference implementation of the storage traits.
//!
//! Deterministic and test-friendly. Production deployments should use a
//! durable backend (see the `postgres` feature).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maple_evolution_types::{
    AgentId, ImplementationId, ImplementationRecord, ModificationId, ModificationVersion,
    ModificationVersionId, RollbackRecord, Turn,
};

use crate::traits::{ImplementationStore, QueryWindow, RollbackStore, TelemetryStore, VersionStore};
use crate::{StorageError, StorageResult};

/// In-memory evolution storage adapter.
#[derive(Default)]
pub struct InMemoryEvolutionStorage {
    implementations: RwLock<HashMap<ImplementationId, ImplementationRecord>>,
    rollbacks: RwLock<Vec<RollbackRecord>>,
    versions: RwLock<HashMap<ModificationVersionId, ModificationVersion>>,
    turns: RwLock<Vec<Turn>>,
}

impl InMemoryEvolutionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored implementation records.
    pub fn implementation_count(&self) -> usize {
        self.implementations.read().map(|g| g.len()).unwrap_or(0)
    }

    /// Number of stored rollback records.
    pub fn rollback_count(&self) -> usize {
        self.rollbacks.read().map(|g| g.len()).unwrap_or(0)
    }
}

fn poisoned(what: &str) -> StorageError {
    StorageError::Backend(format!("{what} lock poisoned"))
}

#[async_trait]
impl ImplementationStore for InMemoryEvolutionStorage {
    async fn store_implementation(&self, record: ImplementationRecord) -> StorageResult<()> {
        let mut guard = self
            .implementations
            .write()
            .map_err(|_| poisoned("implementations"))?;
        if guard.contains_key(&record.id) {
            return Err(StorageError::Conflict(format!(
                "implementation {} already exists",
                record.id
            )));
        }
        guard.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_implementation(
        &self,
        id: &ImplementationId,
    ) -> StorageResult<Option<ImplementationRecord>> {
        let guard = self
            .implementations
            .read()
            .map_err(|_| poisoned("implementations"))?;
        Ok(guard.get(id).cloned())
    }

    async fn update_implementation(&self, record: ImplementationRecord) -> StorageResult<()> {
        let mut guard = self
            .implementations
            .write()
            .map_err(|_| poisoned("implementations"))?;
        let slot = guard
            .get_mut(&record.id)
            .ok_or_else(|| StorageError::NotFound(format!("implementation {} not found", record.id)))?;
        *slot = record;
        Ok(())
    }

    async fn list_implementations(
        &self,
        agent_id: &AgentId,
        window: QueryWindow,
    ) -> StorageResult<Vec<ImplementationRecord>> {
        let guard = self
            .implementations
            .read()
            .map_err(|_| poisoned("implementations"))?;
        let mut records: Vec<ImplementationRecord> = guard
            .values()
            .filter(|r| &r.agent_id == agent_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
        Ok(window.apply(records.into_iter()))
    }
}

#[async_trait]
impl RollbackStore for InMemoryEvolutionStorage {
    async fn store_rollback(&self, record: RollbackRecord) -> StorageResult<()> {
        let mut guard = self.rollbacks.write().map_err(|_| poisoned("rollbacks"))?;
        if guard.iter().any(|r| r.id == record.id) {
            return Err(StorageError::Conflict(format!(
                "rollback {} already exists",
                record.id
            )));
        }
        guard.push(record);
        Ok(())
    }

    async fn rollbacks_for(
        &self,
        implementation_id: &ImplementationId,
    ) -> StorageResult<Vec<RollbackRecord>> {
        let guard = self.rollbacks.read().map_err(|_| poisoned("rollbacks"))?;
        Ok(guard
            .iter()
            .filter(|r| &r.implementation_id == implementation_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VersionStore for InMemoryEvolutionStorage {
    async fn save_version(&self, version: ModificationVersion) -> StorageResult<()> {
        let mut guard = self.versions.write().map_err(|_| poisoned("versions"))?;
        if guard.contains_key(&version.id) {
            return Err(StorageError::Conflict(format!(
                "version {} already exists",
                version.id
            )));
        }
        guard.insert(version.id.clone(), version);
        Ok(())
    }

    async fn get_version_by_id(
        &self,
        id: &ModificationVersionId,
    ) -> StorageResult<Option<ModificationVersion>> {
        let guard = self.versions.read().map_err(|_| poisoned("versions"))?;
        Ok(guard.get(id).cloned())
    }

    async fn find_version_for_modification(
        &self,
        modification_id: &ModificationId,
    ) -> StorageResult<Option<ModificationVersion>> {
        let guard = self.versions.read().map_err(|_| poisoned("versions"))?;
        Ok(guard
            .values()
            .filter(|v| &v.modification_id == modification_id)
            .max_by_key(|v| v.created_at)
            .cloned())
    }

    async fn update_version(&self, version: ModificationVersion) -> StorageResult<()> {
        let mut guard = self.versions.write().map_err(|_| poisoned("versions"))?;
        let slot = guard
            .get_mut(&version.id)
            .ok_or_else(|| StorageError::NotFound(format!("version {} not found", version.id)))?;
        *slot = version;
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for InMemoryEvolutionStorage {
    async fn record_turn(&self, turn: Turn) -> StorageResult<()> {
        let mut guard = self.turns.write().map_err(|_| poisoned("turns"))?;
        guard.push(turn);
        Ok(())
    }

    async fn turns_between(
        &self,
        agent_id: &AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        window: QueryWindow,
    ) -> StorageResult<Vec<Turn>> {
        if end < start {
            return Err(StorageError::InvalidInput(format!(
                "window end {end} precedes start {start}"
            )));
        }
        let guard = self.turns.read().map_err(|_| poisoned("turns"))?;
        let mut matching: Vec<&Turn> = guard
            .iter()
            .filter(|t| &t.agent_id == agent_id && t.occurred_at >= start && t.occurred_at < end)
            .collect();
        matching.sort_by_key(|t| t.occurred_at);
        Ok(window.apply(matching.into_iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use maple_evolution_types::{
        ModificationTestResult, ModificationType, PerformanceDelta, PerformanceImpact,
        ProductionMetrics, SelfModification, TestRecommendation, ToolCall,
    };

    fn record(agent: &str) -> ImplementationRecord {
        let modification = SelfModification {
            id: "mod-1".into(),
            modification_type: ModificationType::PromptChange,
            target: "system".into(),
            change: "Be brief.".into(),
            hypothesis: "h".into(),
            expected_impact: "e".into(),
            test_period_days: 7,
        };
        let test = ModificationTestResult {
            id: "test-1".into(),
            modification_id: "mod-1".into(),
            recommendation: TestRecommendation::Apply,
            reasoning: "r".into(),
            performance_impact: PerformanceImpact {
                before: ProductionMetrics::empty(7.0),
                speed_change: 0.0,
                cost_change: 0.0,
                success_rate_change: 0.0,
            },
            test_duration_ms: 10,
        };
        ImplementationRecord::new(agent.into(), &modification, &test, "v1".into(), "v2".into())
    }

    fn turn_at(agent: &str, at: DateTime<Utc>) -> Turn {
        Turn {
            agent_id: agent.into(),
            occurred_at: at,
            tool_calls: vec![ToolCall::ok(10.0)],
            cost_cents: 1.0,
        }
    }

    #[tokio::test]
    async fn implementation_insert_is_unique() {
        let store = InMemoryEvolutionStorage::new();
        let r = record("agent-1");
        store.store_implementation(r.clone()).await.unwrap();
        let err = store.store_implementation(r.clone()).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(store.implementation_count(), 1);
    }

    #[tokio::test]
    async fn update_requires_existing_record() {
        let store = InMemoryEvolutionStorage::new();
        let mut r = record("agent-1");
        assert!(matches!(
            store.update_implementation(r.clone()).await,
            Err(StorageError::NotFound(_))
        ));

        store.store_implementation(r.clone()).await.unwrap();
        r.commit_hash = Some("abc123".into());
        store.update_implementation(r.clone()).await.unwrap();
        let loaded = store.get_implementation(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded.commit_hash.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn list_is_scoped_to_agent_and_paged() {
        let store = InMemoryEvolutionStorage::new();
        for _ in 0..3 {
            store.store_implementation(record("agent-1")).await.unwrap();
        }
        store.store_implementation(record("agent-2")).await.unwrap();

        let all = store
            .list_implementations(&"agent-1".into(), QueryWindow::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let page = store
            .list_implementations(&"agent-1".into(), QueryWindow::page(2, 2))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn turns_window_is_half_open() {
        let store = InMemoryEvolutionStorage::new();
        let t0 = Utc::now();
        store.record_turn(turn_at("agent-1", t0)).await.unwrap();
        store
            .record_turn(turn_at("agent-1", t0 + Duration::hours(1)))
            .await
            .unwrap();
        store
            .record_turn(turn_at("agent-2", t0 + Duration::minutes(5)))
            .await
            .unwrap();

        let turns = store
            .turns_between(&"agent-1".into(), t0, t0 + Duration::hours(1), QueryWindow::default())
            .await
            .unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].occurred_at, t0);

        let err = store
            .turns_between(&"agent-1".into(), t0, t0 - Duration::hours(1), QueryWindow::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn latest_version_for_modification() {
        let store = InMemoryEvolutionStorage::new();
        let now = Utc::now();
        let older = ModificationVersion {
            id: ModificationVersionId::new(),
            modification_id: "mod-1".into(),
            commit_hash: Some("aaa".into()),
            commit_message: "first".into(),
            applied: true,
            rolled_back: false,
            performance_delta: PerformanceDelta::default(),
            created_at: now - Duration::minutes(1),
        };
        let newer = ModificationVersion {
            id: ModificationVersionId::new(),
            commit_hash: Some("bbb".into()),
            created_at: now,
            ..older.clone()
        };
        store.save_version(older).await.unwrap();
        store.save_version(newer.clone()).await.unwrap();

        let found = store
            .find_version_for_modification(&"mod-1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
    }
}
