use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::models::Experiment;
use crate::domain::ports::errors::StoreError;

/// Read access to persisted experiments.
///
/// Experiments are shared read-only by every trial derived from them.
#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    /// Get an experiment by name
    async fn get(&self, name: &str) -> Result<Option<Arc<Experiment>>, StoreError>;

    /// Store a new experiment
    async fn insert(&self, experiment: Experiment) -> Result<(), StoreError>;
}
