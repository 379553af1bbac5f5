//! # maple-evolution-engine
//!
//! Governs an agent's changes to itself:
//!
//! ```text
//!  tested proposal ─▶ OutcomeHandler ─▶ GitVersionControl
//!                          │
//!                   (validation window)
//!                          ▼
//!               DecisionOrchestrator ─▶ keep
//!                    │        └──────▶ RollbackEngine
//!             PerformanceValidator
//! ```
//!
//! - [`OutcomeHandler`] applies a modification through its
//!   [`ModificationCapability`] and records the new version.
//! - [`PerformanceValidator`] compares production telemetry before and after.
//! - [`DecisionOrchestrator`] keeps the change or reverts it.
//! - [`RollbackEngine`] restores the exact predecessor version.
//! - [`SelfModificationPipeline`] serializes all of it per agent.
//!
//! None of the orchestration entry points return `Err` for a failed step;
//! failures are reported in the result's `errors` list.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod capability;
pub mod chain;
pub mod config;
mod error;
pub mod orchestrator;
pub mod outcome;
pub mod pipeline;
pub mod rollback;
pub mod validator;

pub use capability::{
    BehaviorOverlay, CapabilityOutcome, CapabilityRegistry, CodeEditCapability,
    ModificationCapability, PromptChangeCapability, SimulatedCapability,
    StrategyUpdateCapability, ToolInstallCapability,
};
pub use chain::{ChainError, ChainTransition, TransitionKind, VersionChain};
pub use config::{
    EvolutionConfig, LoggingConfig, PolicyConfig, PolicyOverride, StorageConfig, TelemetryConfig,
};
pub use error::{EvolutionError, EvolutionResult};
pub use orchestrator::{rollback_reason, Decision, DecisionOrchestrator, OutcomeReport};
pub use outcome::{ImplementationResult, OutcomeHandler};
pub use pipeline::{
    EvaluationReport, ImplementationReport, PipelineRegistry, PipelineServices, ProposalOutcome,
    RollbackReport, SelfModificationPipeline, GENESIS_VERSION,
};
pub use rollback::{RollbackEngine, RollbackResult};
pub use validator::{
    compute_improvement, improvement_pct, Assessment, ImprovementBreakdown, PerformanceValidator,
    ScoreWeights, ValidationPolicy, DEFAULT_IMPROVEMENT_THRESHOLD_PCT,
};
