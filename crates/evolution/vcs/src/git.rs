//! Git-backed version control for self-modifications.
//!
//! ```text
//!  commit()         add -A ─▶ commit -m <structured msg> ─▶ rev-parse HEAD
//!                     │              │
//!                     │              └─ "nothing to commit" ⇒ Ok(no hash)
//!                     └─ failure ⇒ StageFailed
//!
//!  store_version()  save ModificationVersion ─▶ audit (best effort)
//! ```
//!
//! History helpers only ever look at commits carrying the reserved marker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use maple_evolution_store::{AuditDetails, AuditKind, AuditLog, VersionStore};
use maple_evolution_types::{
    GitCommitMetadata, ModificationId, ModificationTestResult, ModificationVersion,
    ModificationVersionId, SelfModification,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{VcsError, VcsResult};
use crate::message::build_commit_message;
use crate::process::ProcessExecutor;
use crate::runner::{require_success, GitRunner};
use crate::settings::GitSettings;

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// Outputs git prints when there was nothing to record.
const EMPTY_COMMIT_MARKERS: [&str; 3] = [
    "nothing to commit",
    "no changes added to commit",
    "nothing added to commit",
];

/// Result of [`GitVersionControl::commit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// `None` when the working tree had nothing to commit.
    pub commit_hash: Option<String>,
    pub message: String,
}

impl CommitOutcome {
    pub fn is_noop(&self) -> bool {
        self.commit_hash.is_none()
    }
}

/// Commits modifications and answers marker-scoped history queries.
pub struct GitVersionControl {
    runner: GitRunner,
    versions: Arc<dyn VersionStore>,
    audit: Arc<dyn AuditLog>,
}

impl GitVersionControl {
    pub fn new(
        settings: GitSettings,
        executor: Arc<dyn ProcessExecutor>,
        versions: Arc<dyn VersionStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            runner: GitRunner::new(settings, executor),
            versions,
            audit,
        }
    }

    pub fn settings(&self) -> &GitSettings {
        &self.runner.settings
    }

    /// Stage everything and commit it with a structured message.
    #[instrument(skip(self, modification, test_result), fields(modification_id = %modification.id))]
    pub async fn commit(
        &self,
        modification: &SelfModification,
        test_result: &ModificationTestResult,
    ) -> VcsResult<CommitOutcome> {
        let timeouts = &self.runner.settings.timeouts;
        let message = build_commit_message(&self.runner.settings.marker, modification, test_result);

        let staged = self.runner.once(&["add", "-A"], timeouts.stage()).await?;
        if !staged.success() {
            return Err(VcsError::StageFailed(staged.stderr.trim().to_string()));
        }

        let committed = self
            .runner
            .once(&["commit", "-m", message.as_str()], timeouts.commit())
            .await?;
        if !committed.success() {
            let combined = committed.combined();
            if EMPTY_COMMIT_MARKERS.iter().any(|m| combined.contains(m)) {
                info!("working tree unchanged, nothing committed");
                return Ok(CommitOutcome {
                    commit_hash: None,
                    message,
                });
            }
            let detail = if committed.stderr.trim().is_empty() {
                committed.stdout.trim().to_string()
            } else {
                committed.stderr.trim().to_string()
            };
            return Err(VcsError::CommitFailed(detail));
        }

        let head = self.runner.read(&["rev-parse", "HEAD"], timeouts.hash()).await?;
        let hash = head.stdout.trim();
        if !head.success() || hash.is_empty() {
            return Err(VcsError::HashLookupFailed(head.stderr.trim().to_string()));
        }

        info!(commit_hash = %hash, "modification committed");
        Ok(CommitOutcome {
            commit_hash: Some(hash.to_string()),
            message,
        })
    }

    /// Persist the modification/commit correlation and append an audit entry.
    ///
    /// A failing audit log is logged and ignored.
    #[instrument(skip(self, modification, test_result), fields(modification_id = %modification.id))]
    pub async fn store_version(
        &self,
        modification: &SelfModification,
        test_result: &ModificationTestResult,
        commit_hash: Option<String>,
        applied: bool,
    ) -> VcsResult<ModificationVersion> {
        let version = ModificationVersion {
            id: ModificationVersionId::new(),
            modification_id: modification.id.clone(),
            commit_hash,
            commit_message: build_commit_message(
                &self.runner.settings.marker,
                modification,
                test_result,
            ),
            applied,
            rolled_back: false,
            performance_delta: test_result.performance_impact.delta(),
            created_at: Utc::now(),
        };
        self.versions.save_version(version.clone()).await?;

        let audit_message = format!(
            "Self-modification {} recorded: {} {}",
            modification.id, modification.modification_type, modification.target
        );
        let details = AuditDetails {
            file_path: Some(modification.target.clone()),
            diff: Some(modification.change.clone()),
            reversible: true,
        };
        if let Err(e) = self
            .audit
            .log(AuditKind::CodeEdit, &audit_message, details)
            .await
        {
            warn!(error = %e, "audit log append failed");
        }

        debug!(version_id = %version.id, "modification version stored");
        Ok(version)
    }

    /// Mark the stored version of a modification as rolled back.
    pub async fn mark_rolled_back(&self, modification_id: &ModificationId) -> VcsResult<bool> {
        match self.versions.find_version_for_modification(modification_id).await? {
            Some(mut version) => {
                version.rolled_back = true;
                self.versions.update_version(version).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Up to `limit` marker commits, most recent first, with changed files.
    pub async fn get_git_log(&self, limit: usize) -> VcsResult<Vec<GitCommitMetadata>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let timeouts = &self.runner.settings.timeouts;
        let limit_arg = limit.to_string();
        let stdout = self
            .runner
            .read_ok(
                &[
                    "log",
                    "--grep",
                    self.runner.settings.marker.as_str(),
                    "-F",
                    "-n",
                    limit_arg.as_str(),
                    "--format=%H%x1f%an%x1f%aI%x1f%B%x1e",
                ],
                timeouts.read(),
            )
            .await?;

        let mut commits = Vec::new();
        for record in parse_log_records(&stdout)?.into_iter().take(limit) {
            let files = self
                .runner
                .read_ok(
                    &[
                        "diff-tree",
                        "--root",
                        "--no-commit-id",
                        "--name-only",
                        "-r",
                        record.hash.as_str(),
                    ],
                    timeouts.read(),
                )
                .await?;
            commits.push(GitCommitMetadata {
                files_changed: non_empty_lines(&files),
                ..record
            });
        }
        Ok(commits)
    }

    /// Create the annotated tag `self-mod/<modification_id>` at `commit_hash`.
    #[instrument(skip(self))]
    pub async fn tag_modification(
        &self,
        modification_id: &ModificationId,
        commit_hash: &str,
    ) -> VcsResult<String> {
        let tag = format!("self-mod/{modification_id}");
        let annotation = format!("{} {}", self.runner.settings.marker, modification_id);
        let args = ["tag", "-a", tag.as_str(), "-m", annotation.as_str(), commit_hash];
        let output = self
            .runner
            .once(&args, self.runner.settings.timeouts.tag())
            .await?;
        require_success(&args, output)?;
        info!(tag = %tag, "modification tagged");
        Ok(tag)
    }

    /// Patch introduced by one commit.
    pub async fn get_commit_diff(&self, commit_hash: &str) -> VcsResult<String> {
        self.runner
            .read_ok(
                &["show", "--format=", commit_hash],
                self.runner.settings.timeouts.read(),
            )
            .await
    }

    /// Whether the working tree has no staged, unstaged or untracked changes.
    pub async fn is_clean(&self) -> VcsResult<bool> {
        let stdout = self
            .runner
            .read_ok(
                &["status", "--porcelain"],
                self.runner.settings.timeouts.status(),
            )
            .await?;
        Ok(stdout.trim().is_empty())
    }
}

fn parse_log_records(stdout: &str) -> VcsResult<Vec<GitCommitMetadata>> {
    let mut records = Vec::new();
    for raw in stdout.split(RECORD_SEP) {
        let raw = raw.trim_start_matches(['\n', '\r']);
        if raw.trim().is_empty() {
            continue;
        }
        let mut fields = raw.splitn(4, FIELD_SEP);
        let (Some(hash), Some(author), Some(date), Some(message)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(VcsError::Parse(format!("incomplete log record: {raw:?}")));
        };
        let timestamp = DateTime::parse_from_rfc3339(date.trim())
            .map_err(|e| VcsError::Parse(format!("bad commit date {date:?}: {e}")))?
            .with_timezone(&Utc);
        records.push(GitCommitMetadata {
            hash: hash.trim().to_string(),
            message: message.trim().to_string(),
            author: author.to_string(),
            timestamp,
            files_changed: Vec::new(),
        });
    }
    Ok(records)
}

pub(crate) fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
