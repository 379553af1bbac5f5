//! Identifier newtypes for the self-modification pipeline.
//!
//! Records minted by the pipeline (implementations, rollbacks, stored
//! versions) get UUID-backed identifiers. Identifiers handed to us by
//! external producers (modifications, test results, agents) wrap whatever
//! string the producer chose.

use serde::{Deserialize, Serialize};

// ── Minted identifiers ─────────────────────────────────────────────────

/// Unique identifier for an implementation record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImplementationId(pub String);

impl ImplementationId {
    /// Generate a new unique implementation ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ImplementationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ImplementationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "impl:{}", self.0)
    }
}

/// Unique identifier for a rollback record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RollbackId(pub String);

impl RollbackId {
    /// Generate a new unique rollback ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RollbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RollbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rollback:{}", self.0)
    }
}

/// Unique identifier for a stored modification version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModificationVersionId(pub String);

impl ModificationVersionId {
    /// Generate a new unique version-record ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ModificationVersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ModificationVersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "modver:{}", self.0)
    }
}

// ── Version identifier ─────────────────────────────────────────────────

/// Opaque token marking a point in an agent's self-modification timeline.
///
/// Version identifiers carry no ordering of their own. The only meaningful
/// order is the `version_before → version_after` edge recorded on each
/// implementation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionId(pub String);

impl VersionId {
    /// Wrap an existing version token (e.g. a genesis marker or a stored head).
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Mint a fresh, globally unique version token.
    pub fn mint() -> Self {
        Self(format!("v-{}", uuid::Uuid::new_v4().simple()))
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── External identifiers ───────────────────────────────────────────────

/// Identifier of a self-modification proposal (assigned by its producer).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModificationId(pub String);

impl ModificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ModificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModificationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a pre-deployment test run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestResultId(pub String);

impl TestResultId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TestResultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestResultId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of the agent whose behavior is being modified.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_unique() {
        assert_ne!(ImplementationId::new(), ImplementationId::new());
        assert_ne!(RollbackId::new(), RollbackId::new());
        assert_ne!(VersionId::mint(), VersionId::mint());
    }

    #[test]
    fn display_prefixes() {
        assert!(ImplementationId::new().to_string().starts_with("impl:"));
        assert!(RollbackId::new().to_string().starts_with("rollback:"));
        assert!(ModificationVersionId::new().to_string().starts_with("modver:"));
        assert!(VersionId::mint().to_string().starts_with("v-"));
    }

    #[test]
    fn version_id_serializes_as_plain_string() {
        let v = VersionId::from("v1");
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"v1\"");
        let back: VersionId = serde_json::from_str("\"v1\"").unwrap();
        assert_eq!(back, v);
    }
}
