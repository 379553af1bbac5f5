//! Per-agent self-modification pipeline.
//!
//! ```text
//!  propose ──▶ [awaiting?] ──no──▶ implement ─▶ commit ─▶ store_version
//!                   │                   │
//!                  yes                  └─▶ awaiting = id
//!                   ▼
//!              queue (FIFO, bounded)
//!
//!  evaluate ──▶ handle_outcome(awaiting) ──settled──▶ awaiting = None
//!                                                   └─▶ promote queued
//! ```
//!
//! All operations on one agent run under a single async lock, so at most one
//! implementation is ever awaiting validation and the version chain has one
//! writer. Pipelines handed out by [`PipelineRegistry`] are rebuilt from
//! storage first, so a restart resumes at the stored head.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use maple_evolution_store::{AuditLog, EvolutionStorage, QueryWindow};
use maple_evolution_types::{
    AgentId, ImplementationId, ImplementationRecord, ImplementationStatus, ModificationTestResult,
    ModificationVersion, SelfModification, VersionId,
};
use maple_evolution_vcs::{CommitOutcome, GitVersionControl};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::capability::CapabilityRegistry;
use crate::chain::{ChainTransition, TransitionKind, VersionChain};
use crate::config::EvolutionConfig;
use crate::error::{EvolutionError, EvolutionResult};
use crate::orchestrator::{Decision, DecisionOrchestrator, OutcomeReport};
use crate::outcome::{ImplementationResult, OutcomeHandler};
use crate::rollback::{RollbackEngine, RollbackResult};
use crate::validator::PerformanceValidator;

/// Version every fresh agent chain starts from.
pub const GENESIS_VERSION: &str = "genesis";

// ── Reports ────────────────────────────────────────────────────────────

/// An implementation plus what version control did with it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImplementationReport {
    pub result: ImplementationResult,
    pub commit: Option<CommitOutcome>,
    /// Tag placed on the commit.
    #[serde(default)]
    pub tag: Option<String>,
    pub version: Option<ModificationVersion>,
    /// Version-control errors. The implementation itself stands.
    pub errors: Vec<String>,
}

/// What happened to a proposal.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProposalOutcome {
    Implemented(ImplementationReport),
    /// Waiting behind the implementation under validation; 1-based.
    Queued { position: usize },
    Rejected { reason: String },
}

/// Result of evaluating the awaiting implementation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub outcome: OutcomeReport,
    /// Queued proposals implemented after the decision settled.
    pub promoted: Vec<ImplementationReport>,
}

/// Result of an operator-requested rollback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollbackReport {
    pub rollback: RollbackResult,
    pub promoted: Vec<ImplementationReport>,
}

// ── Services ───────────────────────────────────────────────────────────

/// Collaborators shared by every agent's pipeline.
#[derive(Clone)]
pub struct PipelineServices {
    pub storage: Arc<dyn EvolutionStorage>,
    pub capabilities: Arc<CapabilityRegistry>,
    pub audit: Arc<dyn AuditLog>,
    /// Version control; `None` skips commits.
    pub vcs: Option<Arc<GitVersionControl>>,
    pub config: EvolutionConfig,
}

// ── Pipeline ───────────────────────────────────────────────────────────

struct Proposal {
    modification: SelfModification,
    test_result: ModificationTestResult,
}

struct PipelineState {
    chain: VersionChain,
    awaiting: Option<ImplementationId>,
    queue: VecDeque<Proposal>,
}

/// Serialized implement / evaluate / rollback for one agent.
pub struct SelfModificationPipeline {
    agent_id: AgentId,
    storage: Arc<dyn EvolutionStorage>,
    vcs: Option<Arc<GitVersionControl>>,
    handler: OutcomeHandler,
    orchestrator: DecisionOrchestrator,
    max_queued: usize,
    state: Mutex<PipelineState>,
}

impl SelfModificationPipeline {
    /// A pipeline with no stored past, starting at `genesis`.
    pub fn new(agent_id: AgentId, genesis: VersionId, services: &PipelineServices) -> Self {
        let chain = VersionChain::new(agent_id.clone(), genesis);
        Self::with_chain(chain, None, services)
    }

    /// Rebuild an agent's pipeline from its stored implementations.
    ///
    /// The newest record decides the head: its `version_after` while it
    /// stands, its `version_before` once rolled back. The newest standing
    /// record whose validation has not settled is awaiting again. Proposals
    /// queued before a restart are not stored and do not come back.
    #[instrument(skip_all, fields(agent_id = %agent_id))]
    pub async fn restore(
        agent_id: AgentId,
        genesis: VersionId,
        services: &PipelineServices,
    ) -> EvolutionResult<Self> {
        let storage = &*services.storage;
        let records = load_implementations(
            storage,
            &agent_id,
            services.config.telemetry.page_size,
        )
        .await?;

        let head = match records.first() {
            Some(r) if r.status == ImplementationStatus::Implemented => r.version_after.clone(),
            Some(r) => r.version_before.clone(),
            None => genesis,
        };
        let awaiting = records
            .iter()
            .find(|r| r.status == ImplementationStatus::Implemented)
            .filter(|r| r.is_awaiting_validation())
            .map(|r| r.id.clone());

        let mut history = Vec::with_capacity(records.len());
        for record in records.iter().rev() {
            history.push(ChainTransition {
                from: record.version_before.clone(),
                to: record.version_after.clone(),
                kind: TransitionKind::Implement,
                at: record.applied_at,
            });
            if record.status == ImplementationStatus::RolledBack {
                for rollback in storage.rollbacks_for(&record.id).await? {
                    history.push(ChainTransition {
                        from: rollback.rolled_back_from,
                        to: rollback.rolled_back_to,
                        kind: TransitionKind::Rollback,
                        at: rollback.rolled_back_at,
                    });
                }
            }
        }
        history.sort_by_key(|t| t.at);

        info!(
            %head,
            implementations = records.len(),
            awaiting = awaiting.is_some(),
            "pipeline restored"
        );
        let chain = VersionChain::restore(agent_id, head, history);
        Ok(Self::with_chain(chain, awaiting, services))
    }

    fn with_chain(
        chain: VersionChain,
        awaiting: Option<ImplementationId>,
        services: &PipelineServices,
    ) -> Self {
        let policy = &services.config.policy;
        let handler = OutcomeHandler::new(
            services.storage.clone(),
            services.capabilities.clone(),
            policy.validation_period_days,
        );
        let validator = PerformanceValidator::new(
            services.storage.clone(),
            policy.clone(),
            services.config.telemetry.page_size,
        );
        let rollback = RollbackEngine::new(
            services.storage.clone(),
            services.capabilities.clone(),
            services.audit.clone(),
        );
        Self {
            agent_id: chain.agent_id().clone(),
            storage: services.storage.clone(),
            vcs: services.vcs.clone(),
            handler,
            orchestrator: DecisionOrchestrator::new(validator, rollback),
            max_queued: policy.max_queued_proposals,
            state: Mutex::new(PipelineState {
                chain,
                awaiting,
                queue: VecDeque::new(),
            }),
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub async fn head(&self) -> VersionId {
        self.state.lock().await.chain.head().clone()
    }

    pub async fn history(&self) -> Vec<ChainTransition> {
        self.state.lock().await.chain.history().to_vec()
    }

    /// Implementation currently under validation.
    pub async fn awaiting(&self) -> Option<ImplementationId> {
        self.state.lock().await.awaiting.clone()
    }

    pub async fn queued_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Implement a tested modification now, or queue it behind the one
    /// awaiting validation.
    #[instrument(skip_all, fields(agent_id = %self.agent_id, modification_id = %modification.id))]
    pub async fn propose(
        &self,
        modification: SelfModification,
        test_result: ModificationTestResult,
    ) -> ProposalOutcome {
        let mut state = self.state.lock().await;
        if state.awaiting.is_some() {
            if state.queue.len() >= self.max_queued {
                warn!(capacity = self.max_queued, "proposal queue full");
                return ProposalOutcome::Rejected {
                    reason: format!("proposal queue is full ({} pending)", state.queue.len()),
                };
            }
            state.queue.push_back(Proposal {
                modification,
                test_result,
            });
            let position = state.queue.len();
            debug!(position, "proposal queued");
            return ProposalOutcome::Queued { position };
        }
        let report = self
            .implement_locked(&mut state, &modification, &test_result)
            .await;
        ProposalOutcome::Implemented(report)
    }

    /// Decide on the awaiting implementation as of now.
    pub async fn evaluate(&self, validation_period_days: u32) -> EvolutionResult<EvaluationReport> {
        self.evaluate_at(validation_period_days, Utc::now()).await
    }

    /// [`evaluate`](Self::evaluate) with an explicit clock.
    #[instrument(skip_all, fields(agent_id = %self.agent_id))]
    pub async fn evaluate_at(
        &self,
        validation_period_days: u32,
        now: DateTime<Utc>,
    ) -> EvolutionResult<EvaluationReport> {
        let mut state = self.state.lock().await;
        let implementation_id = state.awaiting.clone().ok_or_else(|| {
            EvolutionError::Validation("no implementation is awaiting validation".to_string())
        })?;

        let outcome = self
            .orchestrator
            .handle_outcome_at(&mut state.chain, &implementation_id, validation_period_days, now)
            .await;

        let mut promoted = Vec::new();
        if outcome.is_settled() {
            if outcome.decision == Some(Decision::Rollback) {
                self.mark_version_rolled_back(&implementation_id).await;
            }
            state.awaiting = None;
            self.promote_queued(&mut state, &mut promoted).await;
        }
        Ok(EvaluationReport { outcome, promoted })
    }

    /// Roll an implementation back on request, outside the validation flow.
    pub async fn rollback(
        &self,
        implementation_id: &ImplementationId,
        target: &VersionId,
        reason: &str,
    ) -> RollbackReport {
        let mut state = self.state.lock().await;
        let rollback = self
            .orchestrator
            .rollback_engine()
            .rollback(&mut state.chain, implementation_id, target, reason)
            .await;

        let mut promoted = Vec::new();
        if rollback.success {
            self.mark_version_rolled_back(implementation_id).await;
            if state.awaiting.as_ref() == Some(implementation_id) {
                state.awaiting = None;
                self.promote_queued(&mut state, &mut promoted).await;
            }
        }
        RollbackReport { rollback, promoted }
    }

    async fn implement_locked(
        &self,
        state: &mut PipelineState,
        modification: &SelfModification,
        test_result: &ModificationTestResult,
    ) -> ImplementationReport {
        let result = self
            .handler
            .implement(&mut state.chain, modification, test_result)
            .await;
        let mut report = ImplementationReport {
            result,
            commit: None,
            tag: None,
            version: None,
            errors: Vec::new(),
        };
        if !report.result.success {
            return report;
        }
        if let Some(id) = &report.result.implementation_id {
            state.awaiting = Some(id.clone());
        }
        if let Some(vcs) = &self.vcs {
            self.record_version(vcs, modification, test_result, &mut report)
                .await;
        }
        report
    }

    async fn record_version(
        &self,
        vcs: &GitVersionControl,
        modification: &SelfModification,
        test_result: &ModificationTestResult,
        report: &mut ImplementationReport,
    ) {
        let commit = match vcs.commit(modification, test_result).await {
            Ok(commit) => commit,
            Err(e) => {
                warn!(error = %e, "commit failed; implementation stands");
                report.errors.push(EvolutionError::from(e).to_string());
                return;
            }
        };

        if let (Some(hash), Some(record)) = (&commit.commit_hash, report.result.record.as_mut()) {
            record.commit_hash = Some(hash.clone());
            if let Err(e) = self.link_commit(record).await {
                report.errors.push(e.to_string());
            }
        }
        if let Some(hash) = &commit.commit_hash {
            match vcs.tag_modification(&modification.id, hash).await {
                Ok(tag) => report.tag = Some(tag),
                Err(e) => {
                    warn!(error = %e, "commit not tagged");
                    report.errors.push(EvolutionError::from(e).to_string());
                }
            }
        }

        match vcs
            .store_version(modification, test_result, commit.commit_hash.clone(), true)
            .await
        {
            Ok(version) => report.version = Some(version),
            Err(e) => report.errors.push(EvolutionError::from(e).to_string()),
        }
        report.commit = Some(commit);
    }

    async fn link_commit(&self, record: &ImplementationRecord) -> EvolutionResult<()> {
        let mut stored = self
            .storage
            .get_implementation(&record.id)
            .await?
            .ok_or_else(|| EvolutionError::NotFound(format!("implementation {}", record.id)))?;
        stored.commit_hash = record.commit_hash.clone();
        self.storage.update_implementation(stored).await?;
        Ok(())
    }

    async fn mark_version_rolled_back(&self, implementation_id: &ImplementationId) {
        let Some(vcs) = &self.vcs else {
            return;
        };
        let record = match self.storage.get_implementation(implementation_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "cannot load implementation to flag its version");
                return;
            }
        };
        if let Err(e) = vcs.mark_rolled_back(&record.modification_id).await {
            warn!(error = %e, "modification version not flagged as rolled back");
        }
    }

    /// Implement queued proposals in order until one succeeds.
    async fn promote_queued(
        &self,
        state: &mut PipelineState,
        promoted: &mut Vec<ImplementationReport>,
    ) {
        while let Some(next) = state.queue.pop_front() {
            let report = self
                .implement_locked(state, &next.modification, &next.test_result)
                .await;
            let implemented = report.result.success;
            info!(
                modification_id = %next.modification.id,
                implemented,
                remaining = state.queue.len(),
                "queued proposal promoted"
            );
            promoted.push(report);
            if implemented {
                break;
            }
        }
    }
}

/// Every stored implementation of an agent, newest first.
async fn load_implementations(
    storage: &dyn EvolutionStorage,
    agent_id: &AgentId,
    page_size: usize,
) -> EvolutionResult<Vec<ImplementationRecord>> {
    let page_size = page_size.max(1);
    let mut records = Vec::new();
    loop {
        let page = storage
            .list_implementations(agent_id, QueryWindow::page(page_size, records.len()))
            .await?;
        let short = page.len() < page_size;
        records.extend(page);
        if short {
            return Ok(records);
        }
    }
}

// ── Registry ───────────────────────────────────────────────────────────

/// One pipeline per agent, created on first use.
pub struct PipelineRegistry {
    services: PipelineServices,
    pipelines: DashMap<AgentId, Arc<SelfModificationPipeline>>,
}

impl PipelineRegistry {
    pub fn new(services: PipelineServices) -> Self {
        Self {
            services,
            pipelines: DashMap::new(),
        }
    }

    /// The agent's pipeline, restored from storage on first use.
    ///
    /// An agent with nothing stored starts at [`GENESIS_VERSION`].
    pub async fn pipeline(
        &self,
        agent_id: &AgentId,
    ) -> EvolutionResult<Arc<SelfModificationPipeline>> {
        if let Some(existing) = self.pipelines.get(agent_id) {
            return Ok(Arc::clone(existing.value()));
        }
        let restored = SelfModificationPipeline::restore(
            agent_id.clone(),
            VersionId::new(GENESIS_VERSION),
            &self.services,
        )
        .await?;
        let pipeline = self
            .pipelines
            .entry(agent_id.clone())
            .or_insert_with(|| Arc::new(restored))
            .clone();
        Ok(pipeline)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
