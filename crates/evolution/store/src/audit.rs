//! Best-effort audit trail.
//!
//! Audit entries describe changes the agent made to itself. Writers treat
//! the log as fire-and-forget: a failed append is reported to the caller
//! but must never abort the operation that produced it.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maple_evolution_types::ModificationType;
use serde::{Deserialize, Serialize};

use crate::{StorageError, StorageResult};

/// Category of an audit entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    CodeEdit,
    ToolInstall,
    PromptChange,
    StrategyUpdate,
    Rollback,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeEdit => "code_edit",
            Self::ToolInstall => "tool_install",
            Self::PromptChange => "prompt_change",
            Self::StrategyUpdate => "strategy_update",
            Self::Rollback => "rollback",
        }
    }
}

impl From<ModificationType> for AuditKind {
    fn from(t: ModificationType) -> Self {
        match t {
            ModificationType::CodeEdit => Self::CodeEdit,
            ModificationType::ToolInstall => Self::ToolInstall,
            ModificationType::PromptChange => Self::PromptChange,
            ModificationType::StrategyUpdate => Self::StrategyUpdate,
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional context attached to an audit entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditDetails {
    pub file_path: Option<String>,
    pub diff: Option<String>,
    pub reversible: bool,
}

/// A stored audit entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub message: String,
    pub details: AuditDetails,
    pub logged_at: DateTime<Utc>,
}

/// Sink for audit entries.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log(&self, kind: AuditKind, message: &str, details: AuditDetails) -> StorageResult<()>;
}

// ── In-memory ──────────────────────────────────────────────────────────

/// Keeps audit entries in memory for inspection.
#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn log(&self, kind: AuditKind, message: &str, details: AuditDetails) -> StorageResult<()> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;
        guard.push(AuditEntry {
            kind,
            message: message.to_string(),
            details,
            logged_at: Utc::now(),
        });
        Ok(())
    }
}

// ── Tracing ────────────────────────────────────────────────────────────

/// Emits audit entries as structured tracing events (target `maple::audit`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn log(&self, kind: AuditKind, message: &str, details: AuditDetails) -> StorageResult<()> {
        tracing::info!(
            target: "maple::audit",
            kind = %kind,
            file_path = details.file_path.as_deref().unwrap_or(""),
            reversible = details.reversible,
            diff_bytes = details.diff.as_ref().map_or(0, String::len),
            "{}",
            message
        );
        Ok(())
    }
}
