//! Background detection runs with an observable state.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use super::{DetectRequest, Pipeline, PipelineError};
use crate::alert::Alert;

#[derive(Debug, Clone)]
pub enum JobState {
    Running,
    Failed(Arc<PipelineError>),
    Succeeded(Arc<Vec<Alert>>),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }
}

/// Handle to one run. Dropping it does not stop the run.
pub struct JobHandle {
    pub id: Uuid,
    rx: watch::Receiver<JobState>,
}

impl JobHandle {
    /// Current state without waiting.
    pub fn state(&self) -> JobState {
        self.rx.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.rx.borrow().is_terminal()
    }

    /// Wait for the terminal state.
    pub async fn wait(&mut self) -> JobState {
        if let Ok(state) = self.rx.wait_for(JobState::is_terminal).await {
            return state.clone();
        }
        // The sender always publishes a terminal state before it drops.
        self.rx.borrow().clone()
    }
}

/// Start a detection run on the blocking pool and return immediately.
///
/// Must be called from within a tokio runtime.
pub fn spawn(pipeline: Arc<Pipeline>, request: DetectRequest) -> JobHandle {
    info!(
        model = %request.model.display(),
        input = %request.input.path().display(),
        "starting detection job"
    );
    spawn_run(move || pipeline.detect(&request))
}

/// A panic inside `run` ends the job as `Failed(Aborted)`. This relies on
/// unwinding, which the release profile keeps enabled.
fn spawn_run<F>(run: F) -> JobHandle
where
    F: FnOnce() -> Result<Vec<Alert>, PipelineError> + Send + 'static,
{
    let id = Uuid::new_v4();
    let (tx, rx) = watch::channel(JobState::Running);

    tokio::spawn(async move {
        info!(job = %id, "detection job started");
        let run = tokio::task::spawn_blocking(run).await;

        let state = match run {
            Ok(Ok(alerts)) => {
                info!(job = %id, alerts = alerts.len(), "detection job succeeded");
                JobState::Succeeded(Arc::new(alerts))
            }
            Ok(Err(e)) => {
                error!(job = %id, error = %e, "detection job failed");
                JobState::Failed(Arc::new(e))
            }
            Err(join) => {
                error!(job = %id, error = %join, "detection job aborted");
                JobState::Failed(Arc::new(PipelineError::Aborted(join.to_string())))
            }
        };
        // Receivers may all be gone; the state is simply dropped then.
        let _ = tx.send(state);
    });

    JobHandle { id, rx }
}
