//! Commit-or-rollback decision for one implementation.
//!
//! Holds no timers. The caller re-invokes [`DecisionOrchestrator::handle_outcome`]
//! once the validation window has elapsed.

use chrono::{DateTime, Utc};
use maple_evolution_types::{ImplementationId, PerformanceValidation};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::chain::VersionChain;
use crate::error::EvolutionError;
use crate::rollback::{RollbackEngine, RollbackResult};
use crate::validator::PerformanceValidator;

/// Outcome of the decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The new version stands.
    Commit,
    /// The implementation was (or was attempted to be) reverted.
    Rollback,
}

/// What `handle_outcome` reports. Never an error: failures land in `errors`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub success: bool,
    pub implementation_id: ImplementationId,
    pub decision: Option<Decision>,
    pub validation: Option<PerformanceValidation>,
    pub rollback: Option<RollbackResult>,
    pub errors: Vec<String>,
}

impl OutcomeReport {
    fn failed(implementation_id: &ImplementationId, error: EvolutionError) -> Self {
        Self {
            success: false,
            implementation_id: implementation_id.clone(),
            decision: None,
            validation: None,
            rollback: None,
            errors: vec![error.to_string()],
        }
    }

    /// Whether the implementation reached a final state (kept or reverted).
    pub fn is_settled(&self) -> bool {
        match self.decision {
            Some(Decision::Commit) => true,
            Some(Decision::Rollback) => self.rollback.as_ref().is_some_and(|r| r.success),
            None => false,
        }
    }
}

/// Rollback reason embedding the measured score and the threshold it missed.
pub fn rollback_reason(improvement_pct: f64, threshold_pct: f64) -> String {
    format!(
        "Performance did not improve sufficiently: {improvement_pct:.2}% (threshold: {threshold_pct:.1}%)"
    )
}

/// Validates an implementation and keeps or reverts it.
#[derive(Clone)]
pub struct DecisionOrchestrator {
    validator: PerformanceValidator,
    rollback: RollbackEngine,
}

impl DecisionOrchestrator {
    pub fn new(validator: PerformanceValidator, rollback: RollbackEngine) -> Self {
        Self {
            validator,
            rollback,
        }
    }

    pub fn validator(&self) -> &PerformanceValidator {
        &self.validator
    }

    pub fn rollback_engine(&self) -> &RollbackEngine {
        &self.rollback
    }

    pub async fn handle_outcome(
        &self,
        chain: &mut VersionChain,
        implementation_id: &ImplementationId,
        validation_period_days: u32,
    ) -> OutcomeReport {
        self.handle_outcome_at(chain, implementation_id, validation_period_days, Utc::now())
            .await
    }

    /// [`handle_outcome`](Self::handle_outcome) with an explicit clock.
    #[instrument(skip_all, fields(agent_id = %chain.agent_id(), implementation_id = %implementation_id))]
    pub async fn handle_outcome_at(
        &self,
        chain: &mut VersionChain,
        implementation_id: &ImplementationId,
        validation_period_days: u32,
        now: DateTime<Utc>,
    ) -> OutcomeReport {
        let mut assessment = match self
            .validator
            .assess_at(implementation_id, validation_period_days, now)
            .await
        {
            Ok(a) => a,
            Err(e) => return OutcomeReport::failed(implementation_id, e),
        };
        if !assessment.record.is_rollback_eligible() {
            return OutcomeReport::failed(
                implementation_id,
                EvolutionError::Validation(format!(
                    "implementation {implementation_id} is already {}",
                    assessment.record.status
                )),
            );
        }

        // a kept implementation is final; a reverted one is settled by its status
        assessment.validation.settled = assessment.validation.improvement;
        let mut errors = Vec::new();
        if let Err(e) = self.validator.record_snapshot(&assessment).await {
            warn!(error = %e, "validation snapshot not stored");
            errors.push(e.to_string());
        }

        let validation = assessment.validation.clone();
        if validation.improvement {
            info!(score = validation.improvement_percentage, "keeping implementation");
            return OutcomeReport {
                success: errors.is_empty(),
                implementation_id: implementation_id.clone(),
                decision: Some(Decision::Commit),
                validation: Some(validation),
                rollback: None,
                errors,
            };
        }

        let reason = rollback_reason(
            validation.improvement_percentage,
            assessment.policy.threshold_pct,
        );
        info!(%reason, "rolling back implementation");
        let result = self
            .rollback
            .rollback(
                chain,
                implementation_id,
                &assessment.record.version_before,
                &reason,
            )
            .await;
        errors.extend(result.errors.iter().cloned());

        OutcomeReport {
            success: errors.is_empty(),
            implementation_id: implementation_id.clone(),
            decision: Some(Decision::Rollback),
            validation: Some(validation),
            rollback: Some(result),
            errors,
        }
    }
}
