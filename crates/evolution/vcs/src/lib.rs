//! # maple-evolution-vcs
//!
//! Version-control integration for self-modifications.
//!
//! - [`GitVersionControl`] stages and commits applied modifications with a
//!   structured, marker-prefixed message and answers history queries
//!   restricted to those commits.
//! - [`UpstreamAwareness`] reports the agent's own provenance and the
//!   commits it trails upstream by.
//!
//! Every git invocation goes through [`ProcessExecutor`] under a per-call
//! timeout. Only read-only commands are retried, and only on timeout.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod git;
pub mod message;
pub mod process;
mod runner;
pub mod settings;
pub mod upstream;

pub use error::{VcsError, VcsResult};
pub use git::{CommitOutcome, GitVersionControl};
pub use message::{build_commit_message, commit_subject};
pub use process::{
    CommandSpec, ProcessError, ProcessExecutor, ProcessOutput, ScriptedProcessExecutor,
    ScriptedReply, TokioProcessExecutor,
};
pub use settings::{GitSettings, GitTimeouts, DEFAULT_MARKER};
pub use upstream::{
    strip_credentials, RepoInfo, UpstreamAwareness, UpstreamCommit, UpstreamDiff, UpstreamStatus,
};
