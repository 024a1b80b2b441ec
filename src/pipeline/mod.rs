//! File-to-file pipeline stages: extract, train, detect.
//!
//! Each call runs one sequential pass. Concurrent passes go through
//! [`job::spawn`], which gives every run its own handle.

pub mod job;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::alert::{emit, Alert, AlertSink, AlertStore, JsonlSink, PersistenceError};
use crate::config::SynwatchConfig;
use crate::detect::{
    AnomalyScorer, BaselineModel, Contamination, Detector, ModelLoadError, ScoringError,
    TrainingError,
};
use crate::features::{aggregate, read_features_csv, write_features_csv, FeatureVector, WindowSize};
use crate::traffic::{read_traffic_csv, InputError, TrafficRecord};

pub use job::{spawn, JobHandle, JobState};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    /// Output could not be written. `alerts` holds whatever was computed
    /// before the failure.
    #[error("{source}")]
    Persistence {
        #[source]
        source: PersistenceError,
        alerts: Vec<Alert>,
    },

    #[error("run aborted: {0}")]
    Aborted(String),
}

impl From<PersistenceError> for PipelineError {
    fn from(source: PersistenceError) -> Self {
        PipelineError::Persistence {
            source,
            alerts: Vec::new(),
        }
    }
}

/// What a detection run scores.
#[derive(Debug, Clone)]
pub enum DetectInput {
    /// Feature CSV produced by `extract`.
    Features(PathBuf),
    /// Raw traffic CSV, aggregated with the pipeline's window first.
    Traffic(PathBuf),
}

impl DetectInput {
    pub fn path(&self) -> &Path {
        match self {
            DetectInput::Features(p) | DetectInput::Traffic(p) => p,
        }
    }
}

/// Paths for one detection run.
#[derive(Debug, Clone)]
pub struct DetectRequest {
    pub model: PathBuf,
    pub input: DetectInput,
    pub alerts: PathBuf,
}

/// Pipeline settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub window: WindowSize,
    pub detector: Detector,
    pub contamination: Contamination,
    pub archive_db: Option<PathBuf>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::from_config(&SynwatchConfig::default())
    }
}

impl Pipeline {
    pub fn from_config(config: &SynwatchConfig) -> Self {
        Self {
            window: config.features.window_secs,
            detector: config.model.detector(),
            contamination: config.model.contamination,
            archive_db: config.alerts.archive_db.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // In-memory stages
    // -----------------------------------------------------------------------

    pub fn features(&self, records: &[TrafficRecord]) -> Vec<FeatureVector> {
        aggregate(records, self.window)
    }

    pub fn fit(&self, baseline: &[FeatureVector]) -> Result<BaselineModel, PipelineError> {
        Ok(self.detector.fit(baseline, self.contamination)?)
    }

    /// Score `vectors` and emit alerts to `sink`, then to the archive if one
    /// is configured.
    pub fn detect_vectors(
        &self,
        model: &BaselineModel,
        vectors: &[FeatureVector],
        sink: &mut dyn AlertSink,
    ) -> Result<Vec<Alert>, PipelineError> {
        let scores = model.score(vectors)?;
        let emission = emit(vectors, &scores, &model.explanation(), sink)?;
        let alerts = emission.alerts;
        if let Err(source) = emission.persisted {
            return Err(PipelineError::Persistence { source, alerts });
        }

        if let Some(db) = &self.archive_db {
            if let Err(source) = archive(db, &alerts) {
                return Err(PipelineError::Persistence { source, alerts });
            }
        }

        info!(
            windows = vectors.len(),
            alerts = alerts.len(),
            algorithm = model.algorithm(),
            "detection pass complete"
        );
        Ok(alerts)
    }

    // -----------------------------------------------------------------------
    // File stages
    // -----------------------------------------------------------------------

    /// Traffic CSV to feature CSV.
    pub fn extract(&self, traffic: &Path, output: &Path) -> Result<Vec<FeatureVector>, PipelineError> {
        let records = read_traffic_csv(traffic)?;
        let vectors = self.features(&records);
        write_features_csv(output, &vectors).map_err(|source| PersistenceError::Io {
            path: output.display().to_string(),
            source,
        })?;
        info!(
            records = records.len(),
            windows = vectors.len(),
            window_secs = self.window.secs(),
            output = %output.display(),
            "extracted features"
        );
        Ok(vectors)
    }

    /// Feature CSV to model artifact.
    pub fn train(&self, features: &Path, model_out: &Path) -> Result<BaselineModel, PipelineError> {
        let baseline = read_features_csv(features)?;
        let model = self.fit(&baseline)?;
        model.save(model_out)?;
        Ok(model)
    }

    /// Model artifact plus feature or traffic CSV to an alert stream. The
    /// stream is replaced on every run.
    pub fn detect(&self, request: &DetectRequest) -> Result<Vec<Alert>, PipelineError> {
        let model = BaselineModel::load(&request.model)?;
        let vectors = match &request.input {
            DetectInput::Features(path) => read_features_csv(path)?,
            DetectInput::Traffic(path) => self.features(&read_traffic_csv(path)?),
        };
        let mut sink = JsonlSink::create(&request.alerts)?;
        self.detect_vectors(&model, &vectors, &mut sink)
    }
}

fn archive(db: &Path, alerts: &[Alert]) -> Result<usize, PersistenceError> {
    let mut store = AlertStore::open(db)?;
    store.record_all(alerts).map_err(|e| {
        warn!(path = %db.display(), error = %e, "alert archive failed");
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemorySink;
    use crate::detect::testutil::{flood_vector, normal_vectors};

    struct RejectingSink;

    impl AlertSink for RejectingSink {
        fn append(&mut self, _alert: &Alert) -> Result<(), PersistenceError> {
            Err(PersistenceError::Io {
                path: "rejecting".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        fn flush(&mut self) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    fn trained() -> (Pipeline, BaselineModel) {
        let pipeline = Pipeline::default();
        let model = pipeline.fit(&normal_vectors(120, 3)).unwrap();
        (pipeline, model)
    }

    #[test]
    fn test_flood_raises_alert() {
        let (pipeline, model) = trained();
        let mut batch = normal_vectors(10, 4);
        batch.push(flood_vector(1_700_000_500.0));

        let mut sink = MemorySink::default();
        let alerts = pipeline.detect_vectors(&model, &batch, &mut sink).unwrap();
        assert!(alerts.iter().any(|a| a.epoch_secs() == 1_700_000_500.0));
        assert_eq!(sink.alerts.len(), alerts.len());
    }

    #[test]
    fn test_sink_failure_carries_alerts() {
        let (pipeline, model) = trained();
        let batch = vec![flood_vector(1_700_000_500.0), flood_vector(1_700_000_501.0)];

        match pipeline.detect_vectors(&model, &batch, &mut RejectingSink) {
            Err(PipelineError::Persistence { alerts, .. }) => assert_eq!(alerts.len(), 2),
            other => panic!("expected persistence error, got {:?}", other),
        }
    }

    #[test]
    fn test_archive_receives_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("alerts.db");
        let (mut pipeline, model) = trained();
        pipeline.archive_db = Some(db.clone());

        let batch = vec![flood_vector(1_700_000_500.0)];
        let alerts = pipeline
            .detect_vectors(&model, &batch, &mut MemorySink::default())
            .unwrap();
        let store = AlertStore::open(&db).unwrap();
        assert_eq!(store.list_recent(10).unwrap(), alerts);
    }

    #[test]
    fn test_empty_baseline_is_training_error() {
        let pipeline = Pipeline::default();
        assert!(matches!(
            pipeline.fit(&[]),
            Err(PipelineError::Training(TrainingError::EmptyBaseline))
        ));
    }

    #[test]
    fn test_detect_without_model_fails_before_scoring() {
        let dir = tempfile::tempdir().unwrap();
        let request = DetectRequest {
            model: dir.path().join("missing.json"),
            input: DetectInput::Features(dir.path().join("features.csv")),
            alerts: dir.path().join("alerts.jsonl"),
        };
        let err = Pipeline::default().detect(&request).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad(ModelLoadError::NotFound { .. })));
        assert!(!request.alerts.exists());
    }
}
