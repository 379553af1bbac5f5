use std::time::Duration;

use maple_evolution_store::StorageError;
use thiserror::Error;

use crate::process::ProcessError;

/// Result type for version-control operations.
pub type VcsResult<T> = Result<T, VcsError>;

/// Version-control errors.
///
/// Benign outcomes (an empty diff at commit time, a missing parent diff) are
/// absorbed by the callers and never surface here.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("staging failed: {0}")]
    StageFailed(String),

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("commit hash lookup failed: {0}")]
    HashLookupFailed(String),

    #[error("`{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("malformed git output: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl VcsError {
    /// Whether the failure was a timeout rather than a non-zero exit.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<ProcessError> for VcsError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { command, timeout } => Self::Timeout { command, timeout },
            ProcessError::Spawn { command, reason } => Self::Spawn { command, reason },
        }
    }
}
