use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::models::Trial;
use crate::domain::ports::errors::JobError;

/// Completion event for a trial's run job, supplied by the orchestration layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCompletion {
    pub succeeded: bool,
    pub start_time: DateTime<Utc>,
    pub completion_time: DateTime<Utc>,
    pub message: String,
}

/// Port for the external job execution layer.
///
/// The controller never launches jobs itself: it signals that the trial may
/// run and later waits for the completion event.
#[async_trait]
pub trait JobMonitor: Send + Sync {
    /// Signal that the trial is ready to run
    async fn ready_to_run(&self, trial: &Trial) -> Result<(), JobError>;

    /// Wait for the run job to conclude
    async fn wait_for_completion(&self, trial: &Trial) -> Result<JobCompletion, JobError>;
}
