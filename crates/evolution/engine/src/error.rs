//! Error types for the self-modification engine.

use maple_evolution_store::StorageError;
use maple_evolution_vcs::VcsError;
use thiserror::Error;

use crate::chain::ChainError;

/// Errors that can occur while governing a self-modification.
#[derive(Debug, Error)]
pub enum EvolutionError {
    /// A precondition failed (wrong recommendation, version mismatch, repeat rollback).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown implementation or modification id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The per-type apply capability reported failure.
    #[error("apply failed: {0}")]
    ApplyFailure(String),

    /// The per-type revert capability reported failure.
    #[error("revert failed: {0}")]
    RevertFailure(String),

    /// A required version-control step failed or timed out.
    #[error("process failure: {0}")]
    ProcessFailure(String),

    /// Persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EvolutionError {
    /// Stable machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::ApplyFailure(_) => "apply_failure",
            Self::RevertFailure(_) => "revert_failure",
            Self::ProcessFailure(_) => "process_failure",
            Self::Storage(_) => "storage",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<VcsError> for EvolutionError {
    fn from(err: VcsError) -> Self {
        match err {
            VcsError::Storage(e) => Self::Storage(e),
            other => Self::ProcessFailure(other.to_string()),
        }
    }
}

impl From<ChainError> for EvolutionError {
    fn from(err: ChainError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for EvolutionError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Convenience result type for engine operations.
pub type EvolutionResult<T> = Result<T, EvolutionError>;
