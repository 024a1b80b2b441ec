//! Isolation forest scorer.
//!
//! Each tree recursively splits a random subsample on a random feature at a
//! random value until points are isolated or the height limit is reached.
//! Anomalous windows sit on short paths. Raw scores follow the usual
//! `-2^(-E[h(x)] / c(n))` form and are shifted by the training-set quantile
//! at the configured contamination, so `score < 0` marks an anomaly.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stats::TimeSeries;
use super::{
    check_layout, feature_layout, feature_matrix, AnomalyScorer, Contamination, ScoringError,
    TrainingError, WindowScore,
};
use crate::features::{FeatureVector, FEATURE_COUNT};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Fitting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    pub trees: usize,
    /// Upper bound on the per-tree subsample size.
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self {
            trees: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Tree stored as a node arena; the root is node 0 and children always have
/// larger indices than their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    pub nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(
        data: &[[f64; FEATURE_COUNT]],
        sample: Vec<usize>,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = IsolationTree { nodes: Vec::new() };
        tree.build(data, sample, 0, height_limit, rng);
        tree
    }

    fn build(
        &mut self,
        data: &[[f64; FEATURE_COUNT]],
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        // Only features that still vary inside this node can split it.
        let mut candidates = Vec::with_capacity(FEATURE_COUNT);
        for feature in 0..FEATURE_COUNT {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                (lo.min(data[r][feature]), hi.max(data[r][feature]))
            });
            if hi > lo && lo.is_finite() && hi.is_finite() {
                candidates.push((feature, lo, hi));
            }
        }
        let Some(&(feature, lo, hi)) = candidates.choose(rng) else {
            return id;
        };

        let threshold = split_value(lo, hi, rng.gen());
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[r][feature] < threshold);

        let left = self.build(data, left_rows, depth + 1, height_limit, rng);
        let right = self.build(data, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let mut id = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes[id] {
                Node::Leaf { size } => return depth + average_path_length(size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if x[feature] < threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }

    fn check(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree without nodes".to_string());
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                threshold,
                left,
                right,
            } = *node
            {
                if feature >= FEATURE_COUNT {
                    return Err(format!("node {} splits on unknown feature {}", id, feature));
                }
                if !threshold.is_finite() {
                    return Err(format!("node {} has a non-finite threshold", id));
                }
                let in_range = |child: usize| child > id && child < self.nodes.len();
                if !in_range(left) || !in_range(right) {
                    return Err(format!("node {} has out-of-order children", id));
                }
            }
        }
        Ok(())
    }
}

/// Point at fraction `u` of `[lo, hi]`. Interpolates without forming
/// `hi - lo`, which overflows for bounds near `f64::MAX`.
fn split_value(lo: f64, hi: f64, u: f64) -> f64 {
    (lo * (1.0 - u) + hi * u).clamp(lo, hi)
}

/// Average path length of an unsuccessful search in a binary search tree of
/// `n` points; normalizes path depths.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Fitted isolation forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestModel {
    pub contamination: f64,
    pub features: Vec<String>,
    /// Per-tree subsample size actually used.
    pub subsample: usize,
    /// Raw-score quantile at `contamination` over the training set.
    pub offset: f64,
    pub trees: Vec<IsolationTree>,
}

impl IsolationForestModel {
    /// `-2^(-E[h(x)] / c(subsample))`; lower is more anomalous.
    fn raw_score(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let mean_depth =
            self.trees.iter().map(|t| t.path_length(x)).sum::<f64>() / self.trees.len() as f64;
        let norm = average_path_length(self.subsample).max(1.0);
        -(2f64.powf(-mean_depth / norm))
    }

    pub fn score(&self, vectors: &[FeatureVector]) -> Result<Vec<WindowScore>, ScoringError> {
        check_layout(&self.features)?;
        Ok(feature_matrix(vectors)
            .iter()
            .map(|x| WindowScore::from_score(self.raw_score(x) - self.offset))
            .collect())
    }

    pub(crate) fn check(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest without trees".to_string());
        }
        if !self.offset.is_finite() {
            return Err("non-finite score offset".to_string());
        }
        self.trees.iter().try_for_each(IsolationTree::check)
    }
}

impl AnomalyScorer for IsolationForest {
    type Model = IsolationForestModel;

    fn fit(
        &self,
        baseline: &[FeatureVector],
        contamination: Contamination,
    ) -> Result<IsolationForestModel, TrainingError> {
        if baseline.is_empty() {
            return Err(TrainingError::EmptyBaseline);
        }
        if self.trees == 0 || self.max_samples == 0 {
            return Err(TrainingError::Parameter(
                "trees and max_samples must be positive".to_string(),
            ));
        }

        let data = feature_matrix(baseline);
        let subsample = self.max_samples.min(data.len());
        let height_limit = (subsample as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let trees = (0..self.trees)
            .map(|_| {
                let sample = rand::seq::index::sample(&mut rng, data.len(), subsample).into_vec();
                IsolationTree::grow(&data, sample, height_limit, &mut rng)
            })
            .collect();

        let mut model = IsolationForestModel {
            contamination: contamination.fraction(),
            features: feature_layout(),
            subsample,
            offset: 0.0,
            trees,
        };
        let raw: Vec<f64> = data.iter().map(|x| model.raw_score(x)).collect();
        model.offset = TimeSeries::new(raw).quantile(contamination.fraction())?;

        debug!(
            trees = self.trees,
            subsample,
            height_limit,
            offset = model.offset,
            "fitted isolation forest"
        );
        Ok(model)
    }

    fn score(
        &self,
        model: &IsolationForestModel,
        vectors: &[FeatureVector],
    ) -> Result<Vec<WindowScore>, ScoringError> {
        model.score(vectors)
    }
}
