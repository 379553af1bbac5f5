//! PostgreSQL adapter for evolution storage.
//!
//! Records are stored as JSONB documents next to the handful of columns the
//! adapter filters and orders on. The audit log is append-only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maple_evolution_types::{
    AgentId, ImplementationId, ImplementationRecord, ModificationId, ModificationVersion,
    ModificationVersionId, RollbackRecord, Turn,
};
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::audit::{AuditDetails, AuditKind, AuditLog};
use crate::traits::{ImplementationStore, QueryWindow, RollbackStore, TelemetryStore, VersionStore};
use crate::{StorageError, StorageResult};

/// PostgreSQL-backed evolution storage.
#[derive(Clone)]
pub struct PostgresEvolutionStorage {
    pool: PgPool,
}

impl PostgresEvolutionStorage {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS evolution_implementations (
                implementation_id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                modification_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record JSONB NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS evolution_implementations_agent_idx
                ON evolution_implementations (agent_id, applied_at DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS evolution_rollbacks (
                rollback_id TEXT PRIMARY KEY,
                implementation_id TEXT NOT NULL,
                record JSONB NOT NULL,
                rolled_back_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS evolution_versions (
                version_id TEXT PRIMARY KEY,
                modification_id TEXT NOT NULL,
                commit_hash TEXT,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS evolution_turns (
                turn_id BIGSERIAL PRIMARY KEY,
                agent_id TEXT NOT NULL,
                occurred_at TIMESTAMPTZ NOT NULL,
                turn JSONB NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS evolution_turns_agent_time_idx
                ON evolution_turns (agent_id, occurred_at)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS evolution_audit (
                entry_id BIGSERIAL PRIMARY KEY,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                details JSONB NOT NULL,
                logged_at TIMESTAMPTZ NOT NULL
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ImplementationStore for PostgresEvolutionStorage {
    async fn store_implementation(&self, record: ImplementationRecord) -> StorageResult<()> {
        let json = to_json(&record)?;
        sqlx::query(
            r#"
            INSERT INTO evolution_implementations
                (implementation_id, agent_id, modification_id, status, record, applied_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id.0.clone())
        .bind(record.agent_id.0.clone())
        .bind(record.modification_id.0.clone())
        .bind(record.status.as_str())
        .bind(json)
        .bind(record.applied_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn get_implementation(
        &self,
        id: &ImplementationId,
    ) -> StorageResult<Option<ImplementationRecord>> {
        let row = sqlx::query(
            "SELECT record FROM evolution_implementations WHERE implementation_id = $1",
        )
        .bind(id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(|r| from_row(&r, "record")).transpose()
    }

    async fn update_implementation(&self, record: ImplementationRecord) -> StorageResult<()> {
        let json = to_json(&record)?;
        let result = sqlx::query(
            r#"
            UPDATE evolution_implementations
               SET status = $2,
                   record = $3
             WHERE implementation_id = $1
            "#,
        )
        .bind(record.id.0.clone())
        .bind(record.status.as_str())
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "implementation {} not found",
                record.id
            )));
        }
        Ok(())
    }

    async fn list_implementations(
        &self,
        agent_id: &AgentId,
        window: QueryWindow,
    ) -> StorageResult<Vec<ImplementationRecord>> {
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT record
                  FROM evolution_implementations
                 WHERE agent_id = $1
                 ORDER BY applied_at DESC
                 OFFSET $2
                "#,
            )
            .bind(agent_id.0.clone())
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT record
                  FROM evolution_implementations
                 WHERE agent_id = $1
                 ORDER BY applied_at DESC
                 LIMIT $2 OFFSET $3
                "#,
            )
            .bind(agent_id.0.clone())
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.iter().map(|r| from_row(r, "record")).collect()
    }
}

#[async_trait]
impl RollbackStore for PostgresEvolutionStorage {
    async fn store_rollback(&self, record: RollbackRecord) -> StorageResult<()> {
        let json = to_json(&record)?;
        sqlx::query(
            r#"
            INSERT INTO evolution_rollbacks
                (rollback_id, implementation_id, record, rolled_back_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.id.0.clone())
        .bind(record.implementation_id.0.clone())
        .bind(json)
        .bind(record.rolled_back_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn rollbacks_for(
        &self,
        implementation_id: &ImplementationId,
    ) -> StorageResult<Vec<RollbackRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record
              FROM evolution_rollbacks
             WHERE implementation_id = $1
             ORDER BY rolled_back_at ASC
            "#,
        )
        .bind(implementation_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.iter().map(|r| from_row(r, "record")).collect()
    }
}

#[async_trait]
impl VersionStore for PostgresEvolutionStorage {
    async fn save_version(&self, version: ModificationVersion) -> StorageResult<()> {
        let json = to_json(&version)?;
        sqlx::query(
            r#"
            INSERT INTO evolution_versions
                (version_id, modification_id, commit_hash, record, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(version.id.0.clone())
        .bind(version.modification_id.0.clone())
        .bind(version.commit_hash.clone())
        .bind(json)
        .bind(version.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn get_version_by_id(
        &self,
        id: &ModificationVersionId,
    ) -> StorageResult<Option<ModificationVersion>> {
        let row = sqlx::query("SELECT record FROM evolution_versions WHERE version_id = $1")
            .bind(id.0.clone())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(|r| from_row(&r, "record")).transpose()
    }

    async fn find_version_for_modification(
        &self,
        modification_id: &ModificationId,
    ) -> StorageResult<Option<ModificationVersion>> {
        let row = sqlx::query(
            r#"
            SELECT record
              FROM evolution_versions
             WHERE modification_id = $1
             ORDER BY created_at DESC
             LIMIT 1
            "#,
        )
        .bind(modification_id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(|r| from_row(&r, "record")).transpose()
    }

    async fn update_version(&self, version: ModificationVersion) -> StorageResult<()> {
        let json = to_json(&version)?;
        let result = sqlx::query(
            r#"
            UPDATE evolution_versions
               SET commit_hash = $2,
                   record = $3
             WHERE version_id = $1
            "#,
        )
        .bind(version.id.0.clone())
        .bind(version.commit_hash.clone())
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "version {} not found",
                version.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for PostgresEvolutionStorage {
    async fn record_turn(&self, turn: Turn) -> StorageResult<()> {
        let json = to_json(&turn)?;
        sqlx::query(
            "INSERT INTO evolution_turns (agent_id, occurred_at, turn) VALUES ($1, $2, $3)",
        )
        .bind(turn.agent_id.0.clone())
        .bind(turn.occurred_at)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
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
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT turn
                  FROM evolution_turns
                 WHERE agent_id = $1 AND occurred_at >= $2 AND occurred_at < $3
                 ORDER BY occurred_at ASC, turn_id ASC
                 OFFSET $4
                "#,
            )
            .bind(agent_id.0.clone())
            .bind(start)
            .bind(end)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT turn
                  FROM evolution_turns
                 WHERE agent_id = $1 AND occurred_at >= $2 AND occurred_at < $3
                 ORDER BY occurred_at ASC, turn_id ASC
                 LIMIT $4 OFFSET $5
                "#,
            )
            .bind(agent_id.0.clone())
            .bind(start)
            .bind(end)
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.iter().map(|r| from_row(r, "turn")).collect()
    }
}

#[async_trait]
impl AuditLog for PostgresEvolutionStorage {
    async fn log(&self, kind: AuditKind, message: &str, details: AuditDetails) -> StorageResult<()> {
        let json = to_json(&details)?;
        sqlx::query(
            "INSERT INTO evolution_audit (kind, message, details, logged_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(kind.as_str())
        .bind(message)
        .bind(json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn from_row<T: DeserializeOwned>(row: &PgRow, column: &str) -> StorageResult<T> {
    let value: serde_json::Value = row
        .try_get(column)
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("window value too large".to_string()))
}
