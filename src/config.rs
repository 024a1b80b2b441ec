//! TOML configuration for synwatch.
//!
//! Every section has defaults, so an empty or partial file is valid. The file
//! is found through `--config`, then `SYNWATCH_CONFIG`, then `./synwatch.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::{Algorithm, Contamination, Detector, IsolationForest};
use crate::evaluate::DEFAULT_TOLERANCE;
use crate::features::WindowSize;

pub const CONFIG_ENV: &str = "SYNWATCH_CONFIG";
pub const LOCAL_CONFIG: &str = "synwatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynwatchConfig {
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SynwatchConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// An explicit path must load; the fallbacks only warn.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    /// Try, in order:
    /// 1. The path in `SYNWATCH_CONFIG`.
    /// 2. `./synwatch.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SYNWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Aggregation window length in seconds; must be positive.
    pub window_secs: WindowSize,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            window_secs: WindowSize::ONE_SECOND,
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub algorithm: Algorithm,
    /// Expected anomaly fraction in the baseline, within (0, 1).
    pub contamination: Contamination,
    /// Isolation forest only.
    pub trees: usize,
    /// Isolation forest only; upper bound on each tree's subsample.
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let forest = IsolationForest::default();
        Self {
            algorithm: Algorithm::default(),
            contamination: Contamination::DEFAULT,
            trees: forest.trees,
            max_samples: forest.max_samples,
            seed: forest.seed,
        }
    }
}

impl ModelConfig {
    pub fn detector(&self) -> Detector {
        Detector::new(
            self.algorithm,
            IsolationForest {
                trees: self.trees,
                max_samples: self.max_samples,
                seed: self.seed,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Seconds between an alert and a window start that still count as a match.
    pub tolerance_secs: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: DEFAULT_TOLERANCE,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// SQLite archive that also receives every emitted alert.
    pub archive_db: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON log lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = SynwatchConfig::default();

        assert_eq!(cfg.features.window_secs.secs(), 1.0);
        assert_eq!(cfg.model.algorithm, Algorithm::IsolationForest);
        assert_eq!(cfg.model.contamination.fraction(), 0.02);
        assert_eq!(cfg.model.trees, 100);
        assert_eq!(cfg.model.max_samples, 256);
        assert_eq!(cfg.model.seed, 42);
        assert_eq!(cfg.evaluation.tolerance_secs, 0.6);
        assert!(cfg.alerts.archive_db.is_none());
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[features]
window_secs = 2.5

[model]
algorithm = "z-score"
contamination = 0.05
trees = 50
max_samples = 128
seed = 7

[evaluation]
tolerance_secs = 1.0

[alerts]
archive_db = "/var/lib/synwatch/alerts.db"

[logging]
level = "debug"
json = true
"#;

        let cfg: SynwatchConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.features.window_secs.secs(), 2.5);
        assert_eq!(cfg.model.algorithm, Algorithm::ZScore);
        assert_eq!(cfg.model.contamination.fraction(), 0.05);
        assert_eq!(cfg.model.trees, 50);
        assert_eq!(cfg.model.max_samples, 128);
        assert_eq!(cfg.model.seed, 7);
        assert_eq!(cfg.evaluation.tolerance_secs, 1.0);
        assert_eq!(
            cfg.alerts.archive_db,
            Some(PathBuf::from("/var/lib/synwatch/alerts.db"))
        );
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert!(matches!(cfg.model.detector(), Detector::ZScore(_)));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: SynwatchConfig = toml::from_str("[model]\ntrees = 10\n").unwrap();

        assert_eq!(cfg.model.trees, 10);
        assert_eq!(cfg.model.max_samples, 256);
        assert_eq!(cfg.features.window_secs.secs(), 1.0);
        match cfg.model.detector() {
            Detector::IsolationForest(f) => assert_eq!(f.trees, 10),
            other => panic!("unexpected detector {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(toml::from_str::<SynwatchConfig>("[model]\ncontamination = 1.5\n").is_err());
        assert!(toml::from_str::<SynwatchConfig>("[features]\nwindow_secs = 0.0\n").is_err());
        assert!(toml::from_str::<SynwatchConfig>("[model]\nalgorithm = \"svm\"\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("synwatch.toml");
        std::fs::write(&path, "[evaluation]\ntolerance_secs = 0.25\n").unwrap();

        let cfg = SynwatchConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.evaluation.tolerance_secs, 0.25);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = SynwatchConfig::resolve(Some(Path::new("/nonexistent/path/synwatch.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = SynwatchConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: SynwatchConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.model.algorithm, roundtripped.model.algorithm);
        assert_eq!(cfg.model.contamination, roundtripped.model.contamination);
        assert_eq!(
            cfg.features.window_secs.secs(),
            roundtripped.features.window_secs.secs()
        );
    }
}
