//! synwatch -- windowed SYN-flood detection over packet-metadata traces.
//!
//! Traffic records are bucketed into fixed time windows, summarized as
//! feature vectors, scored against a baseline fitted on clean traffic, and
//! anomalous windows are emitted as JSON-line alerts.

pub mod alert;
pub mod config;
pub mod demo;
pub mod detect;
pub mod evaluate;
pub mod features;
pub mod pipeline;
pub mod traffic;

pub use alert::{emit, Alert, AlertSink, Emission};
pub use config::SynwatchConfig;
pub use detect::{AnomalyScorer, BaselineModel, Contamination, Detector, WindowScore};
pub use evaluate::{detection_rate, evaluate, DetectionReport};
pub use features::{aggregate, FeatureVector, WindowSize};
pub use pipeline::{DetectInput, DetectRequest, Pipeline, PipelineError};
pub use traffic::{TcpFlags, TrafficRecord};
