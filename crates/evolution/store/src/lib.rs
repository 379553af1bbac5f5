//! Storage contracts for the self-modification pipeline.
//!
//! This crate defines what the pipeline persists:
//! - implementation records (one edge in an agent's version chain each)
//! - rollback records
//! - modification/commit correlations
//! - production telemetry turns
//! - a best-effort audit trail
//!
//! Two adapters ship with it: [`memory::InMemoryEvolutionStorage`] for tests
//! and single-process use, and `postgres::PostgresEvolutionStorage` behind the
//! `postgres` feature.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod audit;
mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use audit::{AuditDetails, AuditEntry, AuditKind, AuditLog, InMemoryAuditLog, TracingAuditLog};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryEvolutionStorage;
pub use traits::{
    EvolutionStorage, ImplementationStore, QueryWindow, RollbackStore, TelemetryStore,
    VersionStore,
};
