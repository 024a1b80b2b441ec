//! Runtime-selected detector and its persisted baseline model.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    Algorithm, AnomalyScorer, Contamination, IsolationForest, IsolationForestModel, ModelLoadError,
    ScoringError, TrainingError, WindowScore, ZScore, ZScoreModel,
};
use crate::alert::PersistenceError;
use crate::features::FeatureVector;

/// Scorer chosen at runtime (from configuration or the CLI).
#[derive(Debug, Clone)]
pub enum Detector {
    IsolationForest(IsolationForest),
    ZScore(ZScore),
}

impl Detector {
    /// Detector for `algorithm`; `forest` only applies to the isolation forest.
    pub fn new(algorithm: Algorithm, forest: IsolationForest) -> Self {
        match algorithm {
            Algorithm::IsolationForest => Detector::IsolationForest(forest),
            Algorithm::ZScore => Detector::ZScore(ZScore),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Detector::IsolationForest(_) => Algorithm::IsolationForest,
            Detector::ZScore(_) => Algorithm::ZScore,
        }
    }
}

impl Default for Detector {
    fn default() -> Self {
        Detector::IsolationForest(IsolationForest::default())
    }
}

impl AnomalyScorer for Detector {
    type Model = BaselineModel;

    fn fit(
        &self,
        baseline: &[FeatureVector],
        contamination: Contamination,
    ) -> Result<BaselineModel, TrainingError> {
        let model = match self {
            Detector::IsolationForest(forest) => {
                BaselineModel::IsolationForest(forest.fit(baseline, contamination)?)
            }
            Detector::ZScore(z) => BaselineModel::ZScore(z.fit(baseline, contamination)?),
        };
        info!(
            algorithm = model.algorithm(),
            windows = baseline.len(),
            contamination = contamination.fraction(),
            "fitted baseline model"
        );
        Ok(model)
    }

    fn score(
        &self,
        model: &BaselineModel,
        vectors: &[FeatureVector],
    ) -> Result<Vec<WindowScore>, ScoringError> {
        model.score(vectors)
    }
}

/// Fitted baseline. Read-only once created; safe to share across threads.
///
/// The on-disk artifact is this value as JSON, tagged by algorithm. Floats
/// are written in shortest round-trip form, so a reloaded model scores
/// exactly like the freshly fitted one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "kebab-case")]
pub enum BaselineModel {
    IsolationForest(IsolationForestModel),
    ZScore(ZScoreModel),
}

impl BaselineModel {
    pub fn algorithm(&self) -> &'static str {
        match self {
            BaselineModel::IsolationForest(_) => "isolation-forest",
            BaselineModel::ZScore(_) => "z-score",
        }
    }

    pub fn contamination(&self) -> f64 {
        match self {
            BaselineModel::IsolationForest(m) => m.contamination,
            BaselineModel::ZScore(m) => m.contamination,
        }
    }

    /// Human-readable reason attached to alerts raised by this model.
    pub fn explanation(&self) -> String {
        format!(
            "{} anomaly score below baseline threshold (possible SYN flood)",
            self.algorithm()
        )
    }

    pub fn score(&self, vectors: &[FeatureVector]) -> Result<Vec<WindowScore>, ScoringError> {
        match self {
            BaselineModel::IsolationForest(m) => m.score(vectors),
            BaselineModel::ZScore(m) => m.score(vectors),
        }
    }

    fn check(&self) -> Result<(), String> {
        let c = self.contamination();
        if !(c > 0.0 && c < 1.0) {
            return Err(format!("contamination {} outside (0, 1)", c));
        }
        match self {
            BaselineModel::IsolationForest(m) => m.check(),
            BaselineModel::ZScore(m) => m.check(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Write the artifact to `path`, replacing any previous model.
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let json = self.to_json().map_err(PersistenceError::Encode)?;
        fs::write(path, json).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), algorithm = self.algorithm(), "saved baseline model");
        Ok(())
    }

    /// Load and structurally validate an artifact.
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let name = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                ModelLoadError::NotFound { path: name.clone() }
            } else {
                ModelLoadError::Io {
                    path: name.clone(),
                    source,
                }
            }
        })?;
        let model: BaselineModel =
            serde_json::from_str(&content).map_err(|source| ModelLoadError::Decode {
                path: name.clone(),
                source,
            })?;
        model
            .check()
            .map_err(|reason| ModelLoadError::Invalid { path: name.clone(), reason })?;
        info!(path = %name, algorithm = model.algorithm(), "loaded baseline model");
        Ok(model)
    }
}

/// Check that `path` holds a loadable model; the error text is meant for
/// display.
pub fn validate_model_path(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("Model path does not exist: {}", path.display()));
    }
    BaselineModel::load(path)
        .map(|_| ())
        .map_err(|e| format!("Unable to load model: {}", e))
}
