//! Reverting an implementation to its exact predecessor.
//!
//! Every check runs before anything is touched: the record must exist, belong
//! to this agent, still be `implemented`, name `target` as its
//! `version_before`, and be the chain head. Only then is the revert hook
//! called. Once the hook succeeded the head moves back; persistence errors
//! after that point are reported in `errors`.

use std::sync::Arc;

use maple_evolution_store::{AuditDetails, AuditKind, AuditLog, EvolutionStorage};
use maple_evolution_types::{ImplementationId, ImplementationRecord, RollbackId, RollbackRecord, VersionId};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::capability::CapabilityRegistry;
use crate::chain::VersionChain;
use crate::error::{EvolutionError, EvolutionResult};

/// What `rollback` reports. Never an error: failures land in `errors`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub implementation_id: ImplementationId,
    pub rollback_id: Option<RollbackId>,
    pub rolled_back_from: Option<VersionId>,
    pub rolled_back_to: Option<VersionId>,
    pub record: Option<RollbackRecord>,
    pub errors: Vec<String>,
}

impl RollbackResult {
    fn failed(implementation_id: &ImplementationId, error: EvolutionError) -> Self {
        Self {
            success: false,
            implementation_id: implementation_id.clone(),
            rollback_id: None,
            rolled_back_from: None,
            rolled_back_to: None,
            record: None,
            errors: vec![error.to_string()],
        }
    }
}

/// Reverts implementations through their capability.
#[derive(Clone)]
pub struct RollbackEngine {
    storage: Arc<dyn EvolutionStorage>,
    capabilities: Arc<CapabilityRegistry>,
    audit: Arc<dyn AuditLog>,
}

impl RollbackEngine {
    pub fn new(
        storage: Arc<dyn EvolutionStorage>,
        capabilities: Arc<CapabilityRegistry>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            storage,
            capabilities,
            audit,
        }
    }

    /// Roll `implementation_id` back to `target`, which must be its `version_before`.
    #[instrument(skip_all, fields(agent_id = %chain.agent_id(), implementation_id = %implementation_id, target_version = %target))]
    pub async fn rollback(
        &self,
        chain: &mut VersionChain,
        implementation_id: &ImplementationId,
        target: &VersionId,
        reason: &str,
    ) -> RollbackResult {
        let mut record = match self.check(chain, implementation_id, target).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "rollback refused");
                return RollbackResult::failed(implementation_id, e);
            }
        };

        match self.capabilities.revert(&record).await {
            Ok(outcome) if outcome.success => {}
            Ok(outcome) => {
                return RollbackResult::failed(
                    implementation_id,
                    EvolutionError::RevertFailure(outcome.detail),
                );
            }
            Err(e) => return RollbackResult::failed(implementation_id, e),
        }

        let mut errors = Vec::new();
        if let Err(e) = chain.rewind(&record.version_after, record.version_before.clone()) {
            errors.push(EvolutionError::from(e).to_string());
        }

        let rollback = RollbackRecord::for_implementation(&record, reason);
        if let Err(e) = self.storage.store_rollback(rollback.clone()).await {
            errors.push(EvolutionError::from(e).to_string());
        }
        record.mark_rolled_back();
        if let Err(e) = self.storage.update_implementation(record.clone()).await {
            errors.push(EvolutionError::from(e).to_string());
        }

        self.audit_rollback(&record, &rollback).await;

        info!(
            rollback_id = %rollback.id,
            from = %rollback.rolled_back_from,
            to = %rollback.rolled_back_to,
            "implementation rolled back"
        );
        RollbackResult {
            success: errors.is_empty(),
            implementation_id: implementation_id.clone(),
            rollback_id: Some(rollback.id.clone()),
            rolled_back_from: Some(rollback.rolled_back_from.clone()),
            rolled_back_to: Some(rollback.rolled_back_to.clone()),
            record: Some(rollback),
            errors,
        }
    }

    async fn check(
        &self,
        chain: &VersionChain,
        implementation_id: &ImplementationId,
        target: &VersionId,
    ) -> EvolutionResult<ImplementationRecord> {
        let record = self
            .storage
            .get_implementation(implementation_id)
            .await?
            .ok_or_else(|| EvolutionError::NotFound(format!("implementation {implementation_id}")))?;

        if &record.agent_id != chain.agent_id() {
            return Err(EvolutionError::Validation(format!(
                "implementation {} belongs to agent {}",
                record.id, record.agent_id
            )));
        }
        if !record.is_rollback_eligible() {
            return Err(EvolutionError::Validation(format!(
                "implementation {} is already {}",
                record.id, record.status
            )));
        }
        if *target != record.version_before {
            return Err(EvolutionError::Validation(format!(
                "target version {target} is not the predecessor {} of implementation {}",
                record.version_before, record.id
            )));
        }
        if *chain.head() != record.version_after {
            return Err(EvolutionError::Validation(format!(
                "head is {}, not {}; later implementations must be rolled back first",
                chain.head(),
                record.version_after
            )));
        }
        Ok(record)
    }

    async fn audit_rollback(&self, record: &ImplementationRecord, rollback: &RollbackRecord) {
        let message = format!(
            "Rolled back {} {} ({} -> {}): {}",
            record.modification_type,
            record.target,
            rollback.rolled_back_from,
            rollback.rolled_back_to,
            rollback.reason
        );
        let details = AuditDetails {
            file_path: Some(record.target.clone()),
            diff: None,
            reversible: false,
        };
        if let Err(e) = self.audit.log(AuditKind::Rollback, &message, details).await {
            warn!(error = %e, "audit log append failed");
        }
    }
}
