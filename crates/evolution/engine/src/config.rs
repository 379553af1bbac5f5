//! Configuration for the self-modification engine.
//!
//! Sources, lowest precedence first: built-in defaults, an optional file,
//! then environment variables such as
//! `MAPLE_EVOLUTION_POLICY__THRESHOLD_PCT=7.5`.

use std::collections::BTreeMap;

use maple_evolution_types::ModificationType;
use maple_evolution_vcs::GitSettings;
use serde::{Deserialize, Serialize};

use crate::error::{EvolutionError, EvolutionResult};
use crate::validator::{ScoreWeights, ValidationPolicy, DEFAULT_IMPROVEMENT_THRESHOLD_PCT};

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Decision policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Version control
    #[serde(default)]
    pub git: GitSettings,

    /// Telemetry queries
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Commit-or-rollback policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Score that must be exceeded to keep a change, in percent
    #[serde(default = "default_threshold")]
    pub threshold_pct: f64,

    /// Metric weights in the improvement score
    #[serde(default)]
    pub weights: ScoreWeights,

    /// Default validation window in days
    #[serde(default = "default_validation_days")]
    pub validation_period_days: u32,

    /// Proposals held while an implementation awaits validation
    #[serde(default = "default_queue_capacity")]
    pub max_queued_proposals: usize,

    /// Per-modification-type overrides, keyed by wire name (`code_edit`, ...)
    #[serde(default)]
    pub overrides: BTreeMap<String, PolicyOverride>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            threshold_pct: default_threshold(),
            weights: ScoreWeights::default(),
            validation_period_days: default_validation_days(),
            max_queued_proposals: default_queue_capacity(),
            overrides: BTreeMap::new(),
        }
    }
}

impl PolicyConfig {
    /// Effective policy for one modification type.
    pub fn resolve(&self, modification_type: ModificationType) -> ValidationPolicy {
        let base = ValidationPolicy {
            threshold_pct: self.threshold_pct,
            weights: self.weights,
        };
        match self.overrides.get(modification_type.as_str()) {
            Some(o) => ValidationPolicy {
                threshold_pct: o.threshold_pct.unwrap_or(base.threshold_pct),
                weights: o.weights.unwrap_or(base.weights),
            },
            None => base,
        }
    }
}

/// Partial policy applied to one modification type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default)]
    pub threshold_pct: Option<f64>,
    #[serde(default)]
    pub weights: Option<ScoreWeights>,
}

/// Telemetry query configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Turns fetched per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_threshold() -> f64 {
    DEFAULT_IMPROVEMENT_THRESHOLD_PCT
}

fn default_validation_days() -> u32 {
    7
}

fn default_queue_capacity() -> usize {
    32
}

fn default_page_size() -> usize {
    500
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EvolutionConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&str>) -> EvolutionResult<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&EvolutionConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MAPLE_EVOLUTION")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> EvolutionResult<()> {
        let policy = &self.policy;
        if !policy.threshold_pct.is_finite() {
            return Err(EvolutionError::Configuration(
                "policy.threshold_pct must be finite".to_string(),
            ));
        }
        if !policy.weights.is_valid() {
            return Err(EvolutionError::Configuration(
                "policy.weights must be non-negative with a positive sum".to_string(),
            ));
        }
        if policy.validation_period_days == 0 {
            return Err(EvolutionError::Configuration(
                "policy.validation_period_days must be at least 1".to_string(),
            ));
        }
        for (key, o) in &policy.overrides {
            key.parse::<ModificationType>()
                .map_err(|e| EvolutionError::Configuration(format!("policy.overrides: {e}")))?;
            if o.threshold_pct.is_some_and(|t| !t.is_finite()) {
                return Err(EvolutionError::Configuration(format!(
                    "policy.overrides.{key}.threshold_pct must be finite"
                )));
            }
            if o.weights.is_some_and(|w| !w.is_valid()) {
                return Err(EvolutionError::Configuration(format!(
                    "policy.overrides.{key}.weights must be non-negative with a positive sum"
                )));
            }
        }
        if self.git.timeouts.all_secs().contains(&0) {
            return Err(EvolutionError::Configuration(
                "git timeouts must be non-zero".to_string(),
            ));
        }
        if self.telemetry.page_size == 0 {
            return Err(EvolutionError::Configuration(
                "telemetry.page_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EvolutionConfig::default();
        assert_eq!(config.policy.threshold_pct, 5.0);
        assert_eq!(config.policy.validation_period_days, 7);
        assert_eq!(config.policy.max_queued_proposals, 32);
        assert_eq!(config.telemetry.page_size, 500);
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_override_resolution() {
        let mut policy = PolicyConfig::default();
        policy.overrides.insert(
            "code_edit".to_string(),
            PolicyOverride {
                threshold_pct: Some(10.0),
                weights: None,
            },
        );
        let code = policy.resolve(ModificationType::CodeEdit);
        assert_eq!(code.threshold_pct, 10.0);
        assert_eq!(code.weights, ScoreWeights::default());

        let prompt = policy.resolve(ModificationType::PromptChange);
        assert_eq!(prompt.threshold_pct, 5.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EvolutionConfig::default();
        config.telemetry.page_size = 0;
        assert_eq!(config.validate().unwrap_err().kind(), "configuration");

        let mut config = EvolutionConfig::default();
        config.git.timeouts.commit_secs = 0;
        assert!(config.validate().is_err());

        let mut config = EvolutionConfig::default();
        config
            .policy
            .overrides
            .insert("rewrite_kernel".to_string(), PolicyOverride::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[policy]
threshold_pct = 8.0

[policy.overrides.prompt_change]
threshold_pct = 2.5

[git]
mainline = "trunk"

[telemetry]
page_size = 100
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = EvolutionConfig::load(Some(&path)).unwrap();
        assert_eq!(config.policy.threshold_pct, 8.0);
        assert_eq!(
            config.policy.resolve(ModificationType::PromptChange).threshold_pct,
            2.5
        );
        assert_eq!(config.git.mainline, "trunk");
        assert_eq!(config.git.remote, "origin");
        assert_eq!(config.telemetry.page_size, 100);
    }
}
