//! Baseline fitting and anomaly scoring of feature vectors.
//!
//! Every scorer follows the same sign convention: higher scores are more
//! normal, and a window is anomalous exactly when its score is below 0.0.

pub mod isolation;
pub mod model;
pub mod stats;
pub mod zscore;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};

pub use isolation::{IsolationForest, IsolationForestModel};
pub use model::{BaselineModel, Detector};
pub use zscore::{ZScore, ZScoreModel};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("cannot fit a baseline on an empty set of feature vectors")]
    EmptyBaseline,

    #[error("contamination must be within (0, 1), got {0}")]
    Contamination(f64),

    #[error("invalid scorer parameter: {0}")]
    Parameter(String),
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("model was fitted on features {expected:?}, vectors provide {found:?}")]
    Shape {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("{vectors} feature vectors but {scores} scores")]
    LengthMismatch { vectors: usize, scores: usize },

    #[error("window start {0} cannot be rendered as a UTC timestamp")]
    Timestamp(f64),
}

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model artifact not found at {path}")]
    NotFound { path: String },

    #[error("failed to read model artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a baseline model artifact: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} holds an inconsistent model: {reason}")]
    Invalid { path: String, reason: String },
}

/// Expected fraction of anomalies in the training data, within (0, 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Contamination(f64);

impl Contamination {
    pub const DEFAULT: Contamination = Contamination(0.02);

    pub fn new(fraction: f64) -> Result<Self, TrainingError> {
        if fraction > 0.0 && fraction < 1.0 {
            Ok(Contamination(fraction))
        } else {
            Err(TrainingError::Contamination(fraction))
        }
    }

    pub fn fraction(self) -> f64 {
        self.0
    }
}

impl Default for Contamination {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f64> for Contamination {
    type Error = TrainingError;

    fn try_from(fraction: f64) -> Result<Self, Self::Error> {
        Contamination::new(fraction)
    }
}

impl From<Contamination> for f64 {
    fn from(c: Contamination) -> f64 {
        c.0
    }
}

/// Scorer output for one feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowScore {
    pub score: f64,
    pub is_anomaly: bool,
}

impl WindowScore {
    pub fn from_score(score: f64) -> Self {
        Self {
            score,
            is_anomaly: score < 0.0,
        }
    }
}

/// Scoring algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    #[default]
    IsolationForest,
    ZScore,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::IsolationForest => write!(f, "isolation-forest"),
            Algorithm::ZScore => write!(f, "z-score"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolation-forest" | "iforest" => Ok(Algorithm::IsolationForest),
            "z-score" | "zscore" => Ok(Algorithm::ZScore),
            other => Err(format!(
                "unknown algorithm '{}' (expected isolation-forest or z-score)",
                other
            )),
        }
    }
}

/// A trainable detector: fit a baseline once, then score new windows.
pub trait AnomalyScorer {
    type Model;

    /// Fit on the numeric fields of `baseline`; NaN is imputed as 0.0.
    fn fit(
        &self,
        baseline: &[FeatureVector],
        contamination: Contamination,
    ) -> Result<Self::Model, TrainingError>;

    /// One result per vector, same order, with the same imputation as `fit`.
    fn score(
        &self,
        model: &Self::Model,
        vectors: &[FeatureVector],
    ) -> Result<Vec<WindowScore>, ScoringError>;
}

pub(crate) fn feature_matrix(vectors: &[FeatureVector]) -> Vec<[f64; FEATURE_COUNT]> {
    vectors.iter().map(FeatureVector::to_array).collect()
}

pub(crate) fn feature_layout() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Reject models fitted on a different feature layout.
pub(crate) fn check_layout(fitted: &[String]) -> Result<(), ScoringError> {
    if fitted.iter().map(String::as_str).eq(FEATURE_NAMES) {
        Ok(())
    } else {
        Err(ScoringError::Shape {
            expected: fitted.to_vec(),
            found: feature_layout(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contamination_range() {
        assert!(Contamination::new(0.02).is_ok());
        assert!(Contamination::new(0.0).is_err());
        assert!(Contamination::new(1.0).is_err());
        assert!(Contamination::new(f64::NAN).is_err());
    }

    #[test]
    fn test_window_score_threshold() {
        assert!(WindowScore::from_score(-0.01).is_anomaly);
        assert!(!WindowScore::from_score(0.0).is_anomaly);
        assert!(!WindowScore::from_score(0.2).is_anomaly);
    }

    #[test]
    fn test_layout_check() {
        assert!(check_layout(&feature_layout()).is_ok());
        let wrong = vec!["packets_per_sec".to_string()];
        assert!(matches!(check_layout(&wrong), Err(ScoringError::Shape { .. })));
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("z-score".parse::<Algorithm>().unwrap(), Algorithm::ZScore);
        assert_eq!(
            "isolation-forest".parse::<Algorithm>().unwrap(),
            Algorithm::IsolationForest
        );
        assert!("svm".parse::<Algorithm>().is_err());
    }
}
