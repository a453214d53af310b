use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{Assignment, Experiment};
use crate::domain::ports::errors::SuggestionError;

/// Port for the optimizer that proposes assignments for new trials
#[async_trait]
pub trait SuggestionClient: Send + Sync {
    /// Request one assignment set; returns `Cancelled` once `cancel` fires
    async fn next_assignments(
        &self,
        experiment: &Experiment,
        cancel: &CancellationToken,
    ) -> Result<Vec<Assignment>, SuggestionError>;
}
