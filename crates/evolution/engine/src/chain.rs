//! Per-agent linear version chain.
//!
//! ```text
//!  genesis ──implement──▶ v-a ──implement──▶ v-b
//!                                 ◀─rollback──┘
//! ```
//!
//! The head only moves through a compare-and-swap, so an implementation's
//! `version_before` is always the head it observed and no transition can be
//! lost to a concurrent writer.

use chrono::{DateTime, Utc};
use maple_evolution_types::{AgentId, VersionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a rejected chain transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain head is {actual}, expected {expected}")]
    HeadMismatch { expected: VersionId, actual: VersionId },

    #[error("transition from {0} to itself")]
    NoOp(VersionId),
}

/// Why the head moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Implement,
    Rollback,
}

/// One recorded head movement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainTransition {
    pub from: VersionId,
    pub to: VersionId,
    pub kind: TransitionKind,
    pub at: DateTime<Utc>,
}

/// The agent's current version and how it got there.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionChain {
    agent_id: AgentId,
    head: VersionId,
    history: Vec<ChainTransition>,
}

impl VersionChain {
    pub fn new(agent_id: AgentId, genesis: VersionId) -> Self {
        Self {
            agent_id,
            head: genesis,
            history: Vec::new(),
        }
    }

    /// Resume a chain whose head and transitions were rebuilt from storage.
    pub fn restore(agent_id: AgentId, head: VersionId, history: Vec<ChainTransition>) -> Self {
        Self {
            agent_id,
            head,
            history,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn head(&self) -> &VersionId {
        &self.head
    }

    /// Transitions in the order they happened.
    pub fn history(&self) -> &[ChainTransition] {
        &self.history
    }

    /// Move the head forward to `next` if it is still `expected`.
    pub fn advance(&mut self, expected: &VersionId, next: VersionId) -> Result<(), ChainError> {
        self.transition(expected, next, TransitionKind::Implement)
    }

    /// Move the head back to `previous` if it is still `expected`.
    pub fn rewind(&mut self, expected: &VersionId, previous: VersionId) -> Result<(), ChainError> {
        self.transition(expected, previous, TransitionKind::Rollback)
    }

    fn transition(
        &mut self,
        expected: &VersionId,
        next: VersionId,
        kind: TransitionKind,
    ) -> Result<(), ChainError> {
        if *expected != self.head {
            return Err(ChainError::HeadMismatch {
                expected: expected.clone(),
                actual: self.head.clone(),
            });
        }
        if next == self.head {
            return Err(ChainError::NoOp(next));
        }
        let from = std::mem::replace(&mut self.head, next.clone());
        self.history.push(ChainTransition {
            from,
            to: next,
            kind,
            at: Utc::now(),
        });
        Ok(())
    }
}
