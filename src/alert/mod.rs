//! Alert emission for anomalous windows.

pub mod sink;
pub mod store;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::detect::{ScoringError, WindowScore};
use crate::features::FeatureVector;

pub use sink::{read_alerts, AlertSink, JsonlSink, MemorySink, PersistenceError};
pub use store::AlertStore;

/// Explanation used when the caller does not name a scorer.
pub const DEFAULT_EXPLANATION: &str = "anomaly score below baseline threshold (possible SYN flood)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Anomaly,
}

/// Numeric fields of the window that raised an alert, as the scorer saw
/// them (missing values imputed).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertFeatures {
    pub packets_per_sec: f64,
    pub bytes_per_sec: f64,
    #[serde(rename = "entropy_src_ip")]
    pub entropy_src_addr: f64,
    #[serde(rename = "entropy_dst_ip")]
    pub entropy_dst_addr: f64,
    pub syn_ratio: f64,
}

impl From<&FeatureVector> for AlertFeatures {
    fn from(v: &FeatureVector) -> Self {
        let [packets_per_sec, bytes_per_sec, entropy_src_addr, entropy_dst_addr, syn_ratio] =
            v.to_array();
        Self {
            packets_per_sec,
            bytes_per_sec,
            entropy_src_addr,
            entropy_dst_addr,
            syn_ratio,
        }
    }
}

/// One anomalous window. Field order is the JSON key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(serialize_with = "serialize_utc", deserialize_with = "deserialize_utc")]
    pub timestamp: DateTime<Utc>,
    pub alert_id: Uuid,
    pub score: f64,
    pub features: AlertFeatures,
    pub verdict: Verdict,
    pub explanation: String,
}

impl Alert {
    /// Window start in epoch seconds.
    pub fn epoch_secs(&self) -> f64 {
        utc_to_epoch(&self.timestamp)
    }
}

fn serialize_utc<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn deserialize_utc<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

/// Epoch seconds to a UTC datetime, to the nearest nanosecond.
pub fn epoch_to_utc(ts: f64) -> Option<DateTime<Utc>> {
    if !ts.is_finite() || ts < 0.0 || ts > i64::MAX as f64 {
        return None;
    }
    let mut secs = ts.floor();
    let mut nanos = ((ts - secs) * 1e9).round();
    if nanos >= 1e9 {
        secs += 1.0;
        nanos = 0.0;
    }
    DateTime::from_timestamp(secs as i64, nanos as u32)
}

pub fn utc_to_epoch(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9
}

/// Result of one emission pass.
#[derive(Debug)]
pub struct Emission {
    /// Every alert raised, whether or not it reached the sink.
    pub alerts: Vec<Alert>,
    /// Number of alerts written, or the first sink failure.
    pub persisted: Result<usize, PersistenceError>,
}

/// Build one alert per anomalous window and append each to `sink` in order.
///
/// A sink failure stops further writes; the remaining alerts are still built
/// and returned.
pub fn emit(
    vectors: &[FeatureVector],
    scores: &[WindowScore],
    explanation: &str,
    sink: &mut dyn AlertSink,
) -> Result<Emission, ScoringError> {
    if vectors.len() != scores.len() {
        return Err(ScoringError::LengthMismatch {
            vectors: vectors.len(),
            scores: scores.len(),
        });
    }

    let mut alerts = Vec::new();
    for (v, s) in vectors.iter().zip(scores).filter(|(_, s)| s.is_anomaly) {
        let timestamp =
            epoch_to_utc(v.window_start).ok_or(ScoringError::Timestamp(v.window_start))?;
        alerts.push(Alert {
            timestamp,
            alert_id: Uuid::new_v4(),
            score: s.score,
            features: AlertFeatures::from(v),
            verdict: Verdict::Anomaly,
            explanation: explanation.to_string(),
        });
    }

    let mut written = 0;
    let mut failure = None;
    for alert in &alerts {
        match sink.append(alert) {
            Ok(()) => {
                written += 1;
                debug!(alert_id = %alert.alert_id, score = alert.score, "alert appended");
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    let persisted = match failure {
        Some(e) => Err(e),
        None => sink.flush().map(|()| written),
    };

    match &persisted {
        Ok(n) if *n > 0 => warn!(alerts = n, "anomalous windows detected"),
        Ok(_) => debug!("no anomalous windows"),
        Err(e) => warn!(error = %e, alerts = alerts.len(), written, "alert sink failed"),
    }

    Ok(Emission { alerts, persisted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testutil::flood_vector;

    fn scored(start: f64, anomaly: bool) -> (FeatureVector, WindowScore) {
        let score = if anomaly { -0.1 } else { 0.1 };
        (flood_vector(start), WindowScore::from_score(score))
    }

    struct BrokenSink {
        accepted: usize,
        limit: usize,
    }

    impl AlertSink for BrokenSink {
        fn append(&mut self, _alert: &Alert) -> Result<(), PersistenceError> {
            if self.accepted == self.limit {
                return Err(PersistenceError::Io {
                    path: "broken".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            self.accepted += 1;
            Ok(())
        }

        fn flush(&mut self) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    #[test]
    fn test_one_alert_per_anomaly_in_order() {
        let (v, s): (Vec<_>, Vec<_>) = vec![
            scored(100.0, false),
            scored(101.0, true),
            scored(102.0, false),
            scored(103.0, true),
        ]
        .into_iter()
        .unzip();

        let mut sink = MemorySink::default();
        let emission = emit(&v, &s, DEFAULT_EXPLANATION, &mut sink).unwrap();
        assert_eq!(emission.alerts.len(), 2);
        assert_eq!(emission.persisted.unwrap(), 2);
        assert_eq!(emission.alerts[0].epoch_secs(), 101.0);
        assert_eq!(emission.alerts[1].epoch_secs(), 103.0);
        assert_ne!(emission.alerts[0].alert_id, emission.alerts[1].alert_id);
        assert_eq!(sink.alerts, emission.alerts);
    }

    #[test]
    fn test_length_mismatch() {
        let v = vec![flood_vector(0.0); 3];
        let s = vec![WindowScore::from_score(-1.0); 2];
        let mut sink = MemorySink::default();
        assert!(matches!(
            emit(&v, &s, DEFAULT_EXPLANATION, &mut sink),
            Err(ScoringError::LengthMismatch { vectors: 3, scores: 2 })
        ));
    }

    #[test]
    fn test_sink_failure_keeps_alerts() {
        let v: Vec<_> = (0..5).map(|i| flood_vector(i as f64)).collect();
        let s = vec![WindowScore::from_score(-1.0); 5];
        let mut sink = BrokenSink { accepted: 0, limit: 2 };

        let emission = emit(&v, &s, DEFAULT_EXPLANATION, &mut sink).unwrap();
        assert_eq!(emission.alerts.len(), 5);
        assert!(emission.persisted.is_err());
        assert_eq!(sink.accepted, 2);
    }

    #[test]
    fn test_json_shape() {
        let v = [flood_vector(1_700_000_040.0)];
        let s = [WindowScore::from_score(-0.25)];
        let mut sink = MemorySink::default();
        let alert = emit(&v, &s, "test", &mut sink).unwrap().alerts.remove(0);

        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.starts_with(r#"{"timestamp":"2023-11-14T22:14:00Z","alert_id":""#));
        let keys = ["\"score\"", "\"features\"", "\"verdict\":\"anomaly\"", "\"explanation\""];
        let mut last = 0;
        for key in keys {
            let at = json.find(key).unwrap();
            assert!(at > last, "{} out of order in {}", key, json);
            last = at;
        }
        assert!(json.contains("\"entropy_src_ip\":0.0"));

        let back: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alert);
    }

    #[test]
    fn test_fractional_timestamp_recovers() {
        let ts = 1_700_000_000.25;
        let utc = epoch_to_utc(ts).unwrap();
        assert_eq!(utc.to_rfc3339_opts(SecondsFormat::AutoSi, true), "2023-11-14T22:13:20.250Z");
        assert_eq!(utc_to_epoch(&utc), ts);
    }

    #[test]
    fn test_unrepresentable_timestamp() {
        assert!(epoch_to_utc(f64::NAN).is_none());
        assert!(epoch_to_utc(-1.0).is_none());
        assert!(epoch_to_utc(1e300).is_none());
    }
}
