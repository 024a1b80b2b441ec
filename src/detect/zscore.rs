//! Statistical scorer: per-feature z-scores against the baseline.
//!
//! The distance of a window is its largest absolute z-score across the five
//! features. The limit is the training distance at the `1 - contamination`
//! quantile; `score = limit - distance`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stats::TimeSeries;
use super::{
    check_layout, feature_layout, feature_matrix, AnomalyScorer, Contamination, ScoringError,
    TrainingError, WindowScore,
};
use crate::features::{FeatureVector, FEATURE_COUNT};

/// Standard deviations below this are treated as this value, so constant
/// baseline features still produce finite distances.
const STD_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZScore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZScoreModel {
    pub contamination: f64,
    pub features: Vec<String>,
    pub means: Vec<f64>,
    pub std_devs: Vec<f64>,
    /// Largest distance still considered normal.
    pub limit: f64,
}

impl ZScoreModel {
    fn distance(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        x.iter()
            .zip(self.means.iter().zip(&self.std_devs))
            .map(|(v, (mean, std))| ((v - mean) / std.max(STD_FLOOR)).abs())
            .fold(0.0, f64::max)
    }

    pub fn score(&self, vectors: &[FeatureVector]) -> Result<Vec<WindowScore>, ScoringError> {
        check_layout(&self.features)?;
        Ok(feature_matrix(vectors)
            .iter()
            .map(|x| WindowScore::from_score(self.limit - self.distance(x)))
            .collect())
    }

    fn feature_name(&self, i: usize) -> &str {
        self.features.get(i).map_or("?", String::as_str)
    }

    pub(crate) fn check(&self) -> Result<(), String> {
        if self.means.len() != FEATURE_COUNT || self.std_devs.len() != FEATURE_COUNT {
            return Err(format!(
                "expected {} means and standard deviations, found {} and {}",
                FEATURE_COUNT,
                self.means.len(),
                self.std_devs.len()
            ));
        }
        if !self.limit.is_finite() {
            return Err("non-finite distance limit".to_string());
        }
        if let Some(i) = self.means.iter().position(|m| !m.is_finite()) {
            return Err(format!("non-finite mean for {}", self.feature_name(i)));
        }
        if let Some(i) = self
            .std_devs
            .iter()
            .position(|s| !s.is_finite() || *s < 0.0)
        {
            return Err(format!("invalid standard deviation for {}", self.feature_name(i)));
        }
        Ok(())
    }
}

impl AnomalyScorer for ZScore {
    type Model = ZScoreModel;

    fn fit(
        &self,
        baseline: &[FeatureVector],
        contamination: Contamination,
    ) -> Result<ZScoreModel, TrainingError> {
        if baseline.is_empty() {
            return Err(TrainingError::EmptyBaseline);
        }
        let data = feature_matrix(baseline);

        let mut means = Vec::with_capacity(FEATURE_COUNT);
        let mut std_devs = Vec::with_capacity(FEATURE_COUNT);
        for feature in 0..FEATURE_COUNT {
            let series = TimeSeries::new(data.iter().map(|x| x[feature]).collect());
            means.push(series.mean());
            std_devs.push(series.std_dev());
        }

        let mut model = ZScoreModel {
            contamination: contamination.fraction(),
            features: feature_layout(),
            means,
            std_devs,
            limit: 0.0,
        };
        let distances = data.iter().map(|x| model.distance(x)).collect();
        model.limit = TimeSeries::new(distances).quantile(1.0 - contamination.fraction())?;

        debug!(limit = model.limit, windows = data.len(), "fitted z-score baseline");
        Ok(model)
    }

    fn score(
        &self,
        model: &ZScoreModel,
        vectors: &[FeatureVector],
    ) -> Result<Vec<WindowScore>, ScoringError> {
        model.score(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testutil::{flood_vector, normal_vectors};

    #[test]
    fn test_empty_baseline_rejected() {
        assert!(matches!(
            ZScore.fit(&[], Contamination::DEFAULT),
            Err(TrainingError::EmptyBaseline)
        ));
    }

    #[test]
    fn test_check_rejects_non_finite_parameters() {
        let model = ZScore
            .fit(&normal_vectors(50, 3), Contamination::DEFAULT)
            .unwrap();
        assert!(model.check().is_ok());

        let mut nan_mean = model.clone();
        nan_mean.means[2] = f64::NAN;
        assert!(nan_mean.check().unwrap_err().contains("entropy_src_ip"));

        let mut bad_std = model;
        bad_std.std_devs[0] = f64::INFINITY;
        assert!(bad_std.check().is_err());
    }

    #[test]
    fn test_training_flags_about_contamination() {
        let baseline = normal_vectors(200, 11);
        let model = ZScore
            .fit(&baseline, Contamination::new(0.05).unwrap())
            .unwrap();
        let flagged = ZScore
            .score(&model, &baseline)
            .unwrap()
            .iter()
            .filter(|s| s.is_anomaly)
            .count();
        assert!((1..=11).contains(&flagged), "flagged {} of 200", flagged);
    }

    #[test]
    fn test_flood_is_far_outside() {
        let baseline = normal_vectors(120, 5);
        let model = ZScore.fit(&baseline, Contamination::DEFAULT).unwrap();
        let scores = model.score(&[flood_vector(0.0)]).unwrap();
        assert!(scores[0].is_anomaly);
        assert!(scores[0].score < -10.0);
    }

    #[test]
    fn test_constant_feature_stays_finite() {
        let mut baseline = normal_vectors(30, 2);
        for v in &mut baseline {
            v.packets_per_sec = 50.0;
        }
        let model = ZScore.fit(&baseline, Contamination::DEFAULT).unwrap();
        let scores = model.score(&[flood_vector(0.0)]).unwrap();
        assert!(scores[0].score.is_finite());
        assert!(scores[0].is_anomaly);
    }
}
