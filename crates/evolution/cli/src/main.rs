//! maple-evolve - operator view of an agent's self-modifications
//!
//! - Repository provenance and upstream drift
//! - Marker-scoped commit history, diffs and working-tree status
//! - Improvement scores for two metric snapshots
//! - Read-only validation reports for stored implementations

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use maple_evolution_engine::EvolutionConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

/// maple-evolve CLI
#[derive(Parser)]
#[command(name = "maple-evolve")]
#[command(about = "Inspect self-modification history, upstream drift and validation scores", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MAPLE_EVOLUTION_CONFIG", global = true)]
    config: Option<String>,

    /// Repository to inspect (overrides git.repo_path)
    #[arg(short, long, env = "MAPLE_EVOLUTION_REPO", global = true)]
    repo: Option<PathBuf>,

    /// Log level (overrides logging.level)
    #[arg(long, env = "MAPLE_EVOLUTION_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Origin (credentials stripped), branch and HEAD
    RepoInfo,

    /// Fetch the mainline and list commits HEAD is behind
    CheckUpstream,

    /// Diff of every upstream commit HEAD is behind
    UpstreamDiffs,

    /// Self-modification commits, most recent first
    Log {
        /// Maximum number of commits
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Patch of one commit
    Diff {
        /// Commit hash
        hash: String,
    },

    /// Whether the working tree is clean
    Status,

    /// Improvement score between two ProductionMetrics JSON files
    Score {
        /// Metrics before deployment
        #[arg(long)]
        before: PathBuf,

        /// Metrics after deployment
        #[arg(long)]
        after: PathBuf,

        /// Modification type whose policy override applies
        #[arg(long = "type")]
        modification_type: Option<String>,
    },

    /// Validation report for a stored implementation (writes nothing)
    Validate {
        /// Implementation ID
        implementation_id: String,

        /// Validation window in days (defaults to policy.validation_period_days)
        #[arg(short, long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = EvolutionConfig::load(cli.config.as_deref())?;
    if let Some(repo) = &cli.repo {
        config.git.repo_path = repo.clone();
    }

    // Initialize tracing; stdout is reserved for JSON output
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    tracing::debug!(repo = %config.git.repo_path.display(), "configuration loaded");
    commands::execute(cli.command, &config).await
}
