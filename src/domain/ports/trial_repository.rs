use async_trait::async_trait;

use crate::domain::models::Trial;
use crate::domain::ports::errors::StoreError;

/// Whole-object persistence for trials with optimistic concurrency
#[async_trait]
pub trait TrialRepository: Send + Sync {
    /// Store a new trial, returning it with its initial resource version
    async fn insert(&self, trial: &Trial) -> Result<Trial, StoreError>;

    /// Get a trial by name
    async fn get(&self, name: &str) -> Result<Option<Trial>, StoreError>;

    /// Replace a trial.
    ///
    /// Fails with `StoreError::Conflict` when the stored version differs from
    /// `trial.metadata.resource_version`; on success returns the trial with
    /// its new version.
    async fn update(&self, trial: &Trial) -> Result<Trial, StoreError>;

    /// List trials created from an experiment
    async fn list_for_experiment(&self, experiment: &str) -> Result<Vec<Trial>, StoreError>;

    /// Delete a trial by name
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}
