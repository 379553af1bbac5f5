//! # maple-evolution-types
//!
//! Data model for the self-modification governance pipeline.
//!
//! ```text
//!  SelfModification ─┐
//!                    ├─▶ ImplementationRecord ──▶ ModificationVersion (commit)
//!  TestResult(apply) ┘          │
//!                               │ validation window
//!                               ▼
//!                     PerformanceValidation ──▶ keep | RollbackRecord
//! ```
//!
//! Everything here is plain data: identifiers, inputs produced by external
//! components, the records the pipeline persists, and the derivation of
//! [`ProductionMetrics`] from raw [`Turn`] telemetry.

#![deny(unsafe_code)]

pub mod ids;
pub mod metrics;
pub mod modification;
pub mod records;

pub use ids::{
    AgentId, ImplementationId, ModificationId, ModificationVersionId, RollbackId, TestResultId,
    VersionId,
};
pub use metrics::{MetricsAccumulator, ProductionMetrics, ToolCall, Turn};
pub use modification::{
    ModificationTestResult, ModificationType, PerformanceDelta, PerformanceImpact,
    SelfModification, TestRecommendation,
};
pub use records::{
    GitCommitMetadata, ImplementationRecord, ImplementationStatus, ModificationVersion,
    PerformanceValidation, RollbackRecord,
};

use thiserror::Error;

/// Errors raised while parsing or converting data-model values.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("unknown modification type: {0}")]
    UnknownModificationType(String),
}
