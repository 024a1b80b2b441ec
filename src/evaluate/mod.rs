//! Correlates alerts with a known attack interval.

use serde::Serialize;
use tracing::info;

use crate::alert::Alert;
use crate::features::FeatureVector;

/// An alert matches a window start when they are strictly less than this
/// many seconds apart.
pub const DEFAULT_TOLERANCE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionReport {
    /// Attack windows with an alert within tolerance.
    pub true_positives: usize,
    /// Attack windows without one.
    pub false_negatives: usize,
    /// Alerts matching no attack window.
    pub unmatched_alerts: usize,
    pub rate: f64,
}

impl DetectionReport {
    pub fn attack_windows(&self) -> usize {
        self.true_positives + self.false_negatives
    }
}

/// Score detection over `[attack_start, attack_end)`.
pub fn evaluate(
    vectors: &[FeatureVector],
    alerts: &[Alert],
    attack_start: f64,
    attack_end: f64,
    tolerance: f64,
) -> DetectionReport {
    let alert_times: Vec<f64> = alerts.iter().map(Alert::epoch_secs).collect();
    let near = |a: f64, b: f64| (a - b).abs() < tolerance;

    let attack: Vec<f64> = vectors
        .iter()
        .map(|v| v.window_start)
        .filter(|&t| attack_start <= t && t < attack_end)
        .collect();

    let true_positives = attack
        .iter()
        .filter(|&&t| alert_times.iter().any(|&a| near(a, t)))
        .count();
    let false_negatives = attack.len() - true_positives;
    let unmatched_alerts = alert_times
        .iter()
        .filter(|&&a| !attack.iter().any(|&t| near(a, t)))
        .count();
    let rate = if attack.is_empty() {
        0.0
    } else {
        true_positives as f64 / attack.len() as f64
    };

    info!(
        true_positives,
        false_negatives,
        unmatched_alerts,
        rate,
        "evaluated detection"
    );
    DetectionReport {
        true_positives,
        false_negatives,
        unmatched_alerts,
        rate,
    }
}

/// Fraction of attack windows covered by an alert; 0.0 without attack windows.
pub fn detection_rate(
    vectors: &[FeatureVector],
    alerts: &[Alert],
    attack_start: f64,
    attack_end: f64,
    tolerance: f64,
) -> f64 {
    evaluate(vectors, alerts, attack_start, attack_end, tolerance).rate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{emit, MemorySink, DEFAULT_EXPLANATION};
    use crate::detect::testutil::flood_vector;
    use crate::detect::WindowScore;

    fn windows(from: u32, to: u32) -> Vec<FeatureVector> {
        (from..to).map(|i| flood_vector(f64::from(i))).collect()
    }

    fn alerts_at(times: &[f64]) -> Vec<Alert> {
        let v: Vec<_> = times.iter().map(|&t| flood_vector(t)).collect();
        let s = vec![WindowScore::from_score(-1.0); v.len()];
        emit(&v, &s, DEFAULT_EXPLANATION, &mut MemorySink::default())
            .unwrap()
            .alerts
    }

    #[test]
    fn test_full_coverage() {
        let v = windows(0, 100);
        let a = alerts_at(&(40..80).map(f64::from).collect::<Vec<_>>());
        let report = evaluate(&v, &a, 40.0, 80.0, DEFAULT_TOLERANCE);
        assert_eq!(report.true_positives, 40);
        assert_eq!(report.false_negatives, 0);
        assert_eq!(report.unmatched_alerts, 0);
        assert_eq!(report.rate, 1.0);
    }

    #[test]
    fn test_partial_coverage() {
        let v = windows(0, 100);
        let a = alerts_at(&[40.0, 41.0, 42.0, 43.0, 90.0]);
        let report = evaluate(&v, &a, 40.0, 50.0, DEFAULT_TOLERANCE);
        assert_eq!(report.attack_windows(), 10);
        assert_eq!(report.true_positives, 4);
        assert_eq!(report.unmatched_alerts, 1);
        assert!((report.rate - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_tolerance_matches_nearby_alerts() {
        let v = windows(0, 10);
        let a = alerts_at(&[5.5]);
        assert_eq!(detection_rate(&v, &a, 5.0, 6.0, 0.6), 1.0);
        assert_eq!(detection_rate(&v, &a, 5.0, 6.0, 0.4), 0.0);
    }

    #[test]
    fn test_tolerance_bound_is_exclusive() {
        let v = windows(0, 10);
        let a = alerts_at(&[5.5]);
        let report = evaluate(&v, &a, 6.0, 7.0, 0.5);
        assert_eq!(report.true_positives, 0);
        assert_eq!(report.false_negatives, 1);
        assert_eq!(report.unmatched_alerts, 1);
        assert_eq!(detection_rate(&v, &a, 6.0, 7.0, 0.5 + 1e-9), 1.0);
    }

    #[test]
    fn test_end_is_exclusive() {
        let v = windows(0, 10);
        let a = alerts_at(&[]);
        let report = evaluate(&v, &a, 2.0, 5.0, DEFAULT_TOLERANCE);
        assert_eq!(report.false_negatives, 3);
    }

    #[test]
    fn test_no_attack_windows() {
        let v = windows(0, 10);
        let a = alerts_at(&[3.0]);
        assert_eq!(detection_rate(&v, &a, 50.0, 60.0, DEFAULT_TOLERANCE), 0.0);
        assert_eq!(detection_rate(&[], &a, 0.0, 10.0, DEFAULT_TOLERANCE), 0.0);
    }
}
