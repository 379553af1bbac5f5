use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maple_evolution_types::{
    AgentId, ImplementationId, ImplementationRecord, ModificationId, ModificationVersion,
    ModificationVersionId, RollbackRecord, Turn,
};

use crate::StorageResult;

/// Generic query window for paged reads. A `limit` of zero means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn page(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// Apply this window to an already-ordered iterator.
    pub fn apply<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        let skipped = items.skip(self.offset);
        if self.limit == 0 {
            skipped.collect()
        } else {
            skipped.take(self.limit).collect()
        }
    }
}

/// Storage for implementation records.
#[async_trait]
pub trait ImplementationStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the id already exists.
    async fn store_implementation(&self, record: ImplementationRecord) -> StorageResult<()>;

    /// Get one record by id.
    async fn get_implementation(
        &self,
        id: &ImplementationId,
    ) -> StorageResult<Option<ImplementationRecord>>;

    /// Replace an existing record. Fails with `NotFound` if it does not exist.
    async fn update_implementation(&self, record: ImplementationRecord) -> StorageResult<()>;

    /// List an agent's records, newest first.
    async fn list_implementations(
        &self,
        agent_id: &AgentId,
        window: QueryWindow,
    ) -> StorageResult<Vec<ImplementationRecord>>;
}

/// Storage for rollback records.
#[async_trait]
pub trait RollbackStore: Send + Sync {
    /// Insert a new rollback record.
    async fn store_rollback(&self, record: RollbackRecord) -> StorageResult<()>;

    /// All rollbacks recorded against an implementation, oldest first.
    async fn rollbacks_for(
        &self,
        implementation_id: &ImplementationId,
    ) -> StorageResult<Vec<RollbackRecord>>;
}

/// Storage for modification/commit correlations.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Insert a new version record.
    async fn save_version(&self, version: ModificationVersion) -> StorageResult<()>;

    /// Get one version record by id.
    async fn get_version_by_id(
        &self,
        id: &ModificationVersionId,
    ) -> StorageResult<Option<ModificationVersion>>;

    /// Most recent version record for a modification.
    async fn find_version_for_modification(
        &self,
        modification_id: &ModificationId,
    ) -> StorageResult<Option<ModificationVersion>>;

    /// Replace an existing version record.
    async fn update_version(&self, version: ModificationVersion) -> StorageResult<()>;
}

/// Read/write access to production telemetry.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Append one turn.
    async fn record_turn(&self, turn: Turn) -> StorageResult<()>;

    /// Turns for an agent with `start <= occurred_at < end`, oldest first.
    async fn turns_between(
        &self,
        agent_id: &AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        window: QueryWindow,
    ) -> StorageResult<Vec<Turn>>;
}

/// Unified storage bundle used by the pipeline.
pub trait EvolutionStorage:
    ImplementationStore + RollbackStore + VersionStore + TelemetryStore + Send + Sync
{
}

impl<T> EvolutionStorage for T where
    T: ImplementationStore + RollbackStore + VersionStore + TelemetryStore + Send + Sync
{
}
