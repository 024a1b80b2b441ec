//! Per-window traffic features.

pub mod calc;
pub mod io;
pub mod window;

use serde::{Deserialize, Serialize};

use crate::traffic::InputError;

pub use calc::{entropy, per_second};
pub use io::{read_features_csv, validate_features_csv, write_features_csv};
pub use window::{aggregate, windows, Window};

/// Number of numeric features fed to a scorer.
pub const FEATURE_COUNT: usize = 5;

/// Scorer input layout, using the external column names.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "packets_per_sec",
    "bytes_per_sec",
    "entropy_src_ip",
    "entropy_dst_ip",
    "syn_ratio",
];

/// Width of an aggregation window in seconds. Always positive and finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct WindowSize(f64);

impl WindowSize {
    pub const ONE_SECOND: WindowSize = WindowSize(1.0);

    pub fn new(secs: f64) -> Result<Self, InputError> {
        if secs.is_finite() && secs > 0.0 {
            Ok(WindowSize(secs))
        } else {
            Err(InputError::WindowSize(secs))
        }
    }

    pub fn secs(self) -> f64 {
        self.0
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::ONE_SECOND
    }
}

impl TryFrom<f64> for WindowSize {
    type Error = InputError;

    fn try_from(secs: f64) -> Result<Self, Self::Error> {
        WindowSize::new(secs)
    }
}

impl From<WindowSize> for f64 {
    fn from(w: WindowSize) -> f64 {
        w.0
    }
}

/// Aggregate statistics for one non-empty window.
///
/// Values read back from a feature file may be NaN where a cell was empty;
/// scorers see them through [`FeatureVector::to_array`], which imputes 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    #[serde(rename = "ts_start")]
    pub window_start: f64,
    pub packets_per_sec: f64,
    pub bytes_per_sec: f64,
    #[serde(rename = "entropy_src_ip")]
    pub entropy_src_addr: f64,
    #[serde(rename = "entropy_dst_ip")]
    pub entropy_dst_addr: f64,
    pub syn_ratio: f64,
}

impl FeatureVector {
    /// Numeric fields in `FEATURE_NAMES` order, missing values imputed as 0.0.
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.packets_per_sec,
            self.bytes_per_sec,
            self.entropy_src_addr,
            self.entropy_dst_addr,
            self.syn_ratio,
        ]
        .map(impute)
    }
}

fn impute(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_validation() {
        assert!(WindowSize::new(0.5).is_ok());
        assert!(WindowSize::new(0.0).is_err());
        assert!(WindowSize::new(-1.0).is_err());
        assert!(WindowSize::new(f64::NAN).is_err());
        assert!(WindowSize::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_to_array_imputes_missing() {
        let v = FeatureVector {
            window_start: 0.0,
            packets_per_sec: 10.0,
            bytes_per_sec: f64::NAN,
            entropy_src_addr: 1.5,
            entropy_dst_addr: f64::NAN,
            syn_ratio: 0.25,
        };
        assert_eq!(v.to_array(), [10.0, 0.0, 1.5, 0.0, 0.25]);
    }
}
