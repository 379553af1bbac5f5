//! Version-control settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reserved marker that opens every self-modification commit subject.
pub const DEFAULT_MARKER: &str = "[self-mod]";

/// Repository and timeout settings for git operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitSettings {
    /// Working tree the agent versions itself in
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,

    /// Remote tracking the upstream mainline
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Upstream mainline branch
    #[serde(default = "default_mainline")]
    pub mainline: String,

    /// Marker identifying self-modification commits
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Per-operation timeouts
    #[serde(default)]
    pub timeouts: GitTimeouts,

    /// Extra attempts for read-only operations that timed out
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            repo_path: default_repo_path(),
            remote: default_remote(),
            mainline: default_mainline(),
            marker: default_marker(),
            timeouts: GitTimeouts::default(),
            read_retries: default_read_retries(),
        }
    }
}

impl GitSettings {
    pub fn for_repo(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            ..Default::default()
        }
    }
}

/// Timeouts in seconds, one per class of git operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitTimeouts {
    #[serde(default = "default_stage_secs")]
    pub stage_secs: u64,
    #[serde(default = "default_commit_secs")]
    pub commit_secs: u64,
    #[serde(default = "default_hash_secs")]
    pub hash_secs: u64,
    #[serde(default = "default_status_secs")]
    pub status_secs: u64,
    /// Log, diff, and show
    #[serde(default = "default_read_secs")]
    pub read_secs: u64,
    #[serde(default = "default_tag_secs")]
    pub tag_secs: u64,
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
}

impl Default for GitTimeouts {
    fn default() -> Self {
        Self {
            stage_secs: default_stage_secs(),
            commit_secs: default_commit_secs(),
            hash_secs: default_hash_secs(),
            status_secs: default_status_secs(),
            read_secs: default_read_secs(),
            tag_secs: default_tag_secs(),
            fetch_secs: default_fetch_secs(),
        }
    }
}

impl GitTimeouts {
    pub fn stage(&self) -> Duration {
        Duration::from_secs(self.stage_secs)
    }

    pub fn commit(&self) -> Duration {
        Duration::from_secs(self.commit_secs)
    }

    pub fn hash(&self) -> Duration {
        Duration::from_secs(self.hash_secs)
    }

    pub fn status(&self) -> Duration {
        Duration::from_secs(self.status_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn tag(&self) -> Duration {
        Duration::from_secs(self.tag_secs)
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    /// Every timeout value, for validation.
    pub fn all_secs(&self) -> [u64; 7] {
        [
            self.stage_secs,
            self.commit_secs,
            self.hash_secs,
            self.status_secs,
            self.read_secs,
            self.tag_secs,
            self.fetch_secs,
        ]
    }
}

// Default value helpers
fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_mainline() -> String {
    "main".to_string()
}

fn default_marker() -> String {
    DEFAULT_MARKER.to_string()
}

fn default_read_retries() -> u32 {
    2
}

fn default_stage_secs() -> u64 {
    10
}

fn default_commit_secs() -> u64 {
    30
}

fn default_hash_secs() -> u64 {
    5
}

fn default_status_secs() -> u64 {
    5
}

fn default_read_secs() -> u64 {
    15
}

fn default_tag_secs() -> u64 {
    10
}

fn default_fetch_secs() -> u64 {
    60
}
