//! Command execution

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use maple_evolution_engine::{
    compute_improvement, EvolutionConfig, ImprovementBreakdown, PerformanceValidator,
    PolicyConfig, StorageConfig, ValidationPolicy,
};
use maple_evolution_store::{EvolutionStorage, InMemoryEvolutionStorage, TracingAuditLog};
use maple_evolution_types::{
    ImplementationId, ImplementationStatus, ModificationType, PerformanceValidation,
    ProductionMetrics, VersionId,
};
use maple_evolution_vcs::{GitVersionControl, TokioProcessExecutor, UpstreamAwareness};
use serde::Serialize;

use crate::output::print_json;
use crate::Commands;

/// Improvement score of two metric snapshots under the configured policy.
#[derive(Debug, Serialize)]
pub struct ScoreReport {
    pub modification_type: Option<ModificationType>,
    pub threshold_pct: f64,
    pub improvement: bool,
    pub breakdown: ImprovementBreakdown,
}

/// Read-only validation of a stored implementation.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub status: ImplementationStatus,
    pub version_before: VersionId,
    pub version_after: VersionId,
    pub threshold_pct: f64,
    pub breakdown: ImprovementBreakdown,
    pub validation: PerformanceValidation,
}

#[derive(Serialize)]
struct TreeStatus {
    clean: bool,
}

/// Execute a command
pub(crate) async fn execute(command: Commands, config: &EvolutionConfig) -> anyhow::Result<()> {
    match command {
        Commands::RepoInfo => print_json(&upstream(config).get_repo_info().await?),
        Commands::CheckUpstream => print_json(&upstream(config).check_upstream().await?),
        Commands::UpstreamDiffs => print_json(&upstream(config).get_upstream_diffs().await?),
        Commands::Log { limit } => print_json(&version_control(config).get_git_log(limit).await?),
        Commands::Diff { hash } => {
            let diff = version_control(config).get_commit_diff(&hash).await?;
            print!("{diff}");
            Ok(())
        }
        Commands::Status => {
            let clean = version_control(config).is_clean().await?;
            print_json(&TreeStatus { clean })
        }
        Commands::Score {
            before,
            after,
            modification_type,
        } => {
            let modification_type = modification_type
                .map(|t| t.parse::<ModificationType>())
                .transpose()?;
            let report = score_files(&before, &after, modification_type, &config.policy)?;
            print_json(&report)
        }
        Commands::Validate {
            implementation_id,
            days,
        } => {
            let storage = open_storage(config).await?;
            let days = days.unwrap_or(config.policy.validation_period_days);
            let report = validate(storage, config, ImplementationId(implementation_id), days).await?;
            print_json(&report)
        }
    }
}

fn upstream(config: &EvolutionConfig) -> UpstreamAwareness {
    UpstreamAwareness::new(config.git.clone(), Arc::new(TokioProcessExecutor))
}

/// History queries never write versions; the in-memory store only satisfies the constructor.
fn version_control(config: &EvolutionConfig) -> GitVersionControl {
    GitVersionControl::new(
        config.git.clone(),
        Arc::new(TokioProcessExecutor),
        Arc::new(InMemoryEvolutionStorage::new()),
        Arc::new(TracingAuditLog),
    )
}

fn read_metrics(path: &Path) -> anyhow::Result<ProductionMetrics> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not ProductionMetrics JSON", path.display()))
}

pub fn score_files(
    before: &Path,
    after: &Path,
    modification_type: Option<ModificationType>,
    policy: &PolicyConfig,
) -> anyhow::Result<ScoreReport> {
    let before = read_metrics(before)?;
    let after = read_metrics(after)?;
    let resolved = match modification_type {
        Some(t) => policy.resolve(t),
        None => ValidationPolicy {
            threshold_pct: policy.threshold_pct,
            weights: policy.weights,
        },
    };
    let breakdown = compute_improvement(&before, &after, &resolved.weights);
    Ok(ScoreReport {
        modification_type,
        threshold_pct: resolved.threshold_pct,
        improvement: resolved.is_improvement(breakdown.score),
        breakdown,
    })
}

async fn validate(
    storage: Arc<dyn EvolutionStorage>,
    config: &EvolutionConfig,
    implementation_id: ImplementationId,
    days: u32,
) -> anyhow::Result<ValidationReport> {
    let validator =
        PerformanceValidator::new(storage, config.policy.clone(), config.telemetry.page_size);
    let assessment = validator
        .assess_at(&implementation_id, days, Utc::now())
        .await?;
    Ok(ValidationReport {
        status: assessment.record.status,
        version_before: assessment.record.version_before,
        version_after: assessment.record.version_after,
        threshold_pct: assessment.policy.threshold_pct,
        breakdown: assessment.breakdown,
        validation: assessment.validation,
    })
}

#[cfg(feature = "postgres")]
async fn open_storage(config: &EvolutionConfig) -> anyhow::Result<Arc<dyn EvolutionStorage>> {
    use maple_evolution_store::postgres::PostgresEvolutionStorage;

    match &config.storage {
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let storage = PostgresEvolutionStorage::connect_with_options(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await?;
            Ok(Arc::new(storage))
        }
        StorageConfig::Memory => {
            bail!("validate reads stored implementations; set storage.type = \"postgres\"")
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn open_storage(config: &EvolutionConfig) -> anyhow::Result<Arc<dyn EvolutionStorage>> {
    match config.storage {
        StorageConfig::Postgres { .. } => {
            bail!("maple-evolve was built without the `postgres` feature")
        }
        StorageConfig::Memory => {
            bail!("validate reads stored implementations; set storage.type = \"postgres\"")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maple_evolution_engine::PolicyOverride;

    fn write_metrics(dir: &Path, name: &str, latency: f64, cost: f64, success: f64) -> std::path::PathBuf {
        let path = dir.join(name);
        let metrics = ProductionMetrics {
            avg_latency_ms: latency,
            avg_cost_cents: cost,
            success_rate: success,
            total_operations: 40,
            measurement_period_days: 7.0,
        };
        std::fs::write(&path, serde_json::to_string(&metrics).unwrap()).unwrap();
        path
    }

    #[test]
    fn scores_metric_files() {
        let dir = tempfile::tempdir().unwrap();
        let before = write_metrics(dir.path(), "before.json", 100.0, 10.0, 0.9);
        let after = write_metrics(dir.path(), "after.json", 80.0, 9.0, 0.95);

        let report = score_files(&before, &after, None, &PolicyConfig::default()).unwrap();
        assert!((report.breakdown.score - 12.5).abs() < 1e-9);
        assert!(report.improvement);
        assert_eq!(report.threshold_pct, 5.0);
    }

    #[test]
    fn type_override_changes_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let before = write_metrics(dir.path(), "before.json", 100.0, 10.0, 0.9);
        let after = write_metrics(dir.path(), "after.json", 80.0, 9.0, 0.95);
        let mut policy = PolicyConfig::default();
        policy.overrides.insert(
            "code_edit".to_string(),
            PolicyOverride {
                threshold_pct: Some(15.0),
                weights: None,
            },
        );

        let report =
            score_files(&before, &after, Some(ModificationType::CodeEdit), &policy).unwrap();
        assert_eq!(report.threshold_pct, 15.0);
        assert!(!report.improvement);
    }

    #[test]
    fn unreadable_metrics_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{\"avg_latency_ms\": \"fast\"}").unwrap();
        let err = score_files(&bad, &bad, None, &PolicyConfig::default()).unwrap_err();
        assert!(err.to_string().contains("not ProductionMetrics JSON"));
    }

    #[tokio::test]
    async fn validate_refuses_memory_storage() {
        let err = open_storage(&EvolutionConfig::default()).await.err().unwrap();
        assert!(err.to_string().contains("postgres"));
    }
}
