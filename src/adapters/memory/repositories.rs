//! In-memory experiment and trial stores.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::models::{Experiment, Trial};
use crate::domain::ports::{ExperimentRepository, StoreError, TrialRepository};

/// Experiment store; experiments are immutable once inserted.
#[derive(Default)]
pub struct MemoryExperimentRepository {
    experiments: RwLock<HashMap<String, Arc<Experiment>>>,
}

impl MemoryExperimentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExperimentRepository for MemoryExperimentRepository {
    async fn get(&self, name: &str) -> Result<Option<Arc<Experiment>>, StoreError> {
        Ok(self.experiments.read().await.get(name).cloned())
    }

    async fn insert(&self, experiment: Experiment) -> Result<(), StoreError> {
        let mut experiments = self.experiments.write().await;
        if experiments.contains_key(&experiment.name) {
            return Err(StoreError::AlreadyExists(experiment.name));
        }
        experiments.insert(experiment.name.clone(), Arc::new(experiment));
        Ok(())
    }
}

/// Trial store with optimistic concurrency on `resource_version`.
#[derive(Default)]
pub struct MemoryTrialRepository {
    trials: RwLock<HashMap<String, Trial>>,
}

impl MemoryTrialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the stored version without changing content, as a concurrent
    /// writer would.
    pub async fn touch(&self, name: &str) -> Result<Trial, StoreError> {
        let mut trials = self.trials.write().await;
        let trial = trials
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        trial.metadata.resource_version += 1;
        Ok(trial.clone())
    }
}

#[async_trait]
impl TrialRepository for MemoryTrialRepository {
    async fn insert(&self, trial: &Trial) -> Result<Trial, StoreError> {
        let mut trials = self.trials.write().await;
        if trials.contains_key(trial.name()) {
            return Err(StoreError::AlreadyExists(trial.name().to_string()));
        }
        let mut stored = trial.clone();
        stored.metadata.resource_version = 1;
        if stored.metadata.creation_timestamp.is_none() {
            stored.metadata.creation_timestamp = Some(Utc::now());
        }
        trials.insert(stored.name().to_string(), stored.clone());
        Ok(stored)
    }

    async fn get(&self, name: &str) -> Result<Option<Trial>, StoreError> {
        Ok(self.trials.read().await.get(name).cloned())
    }

    async fn update(&self, trial: &Trial) -> Result<Trial, StoreError> {
        let mut trials = self.trials.write().await;
        let current = trials
            .get_mut(trial.name())
            .ok_or_else(|| StoreError::NotFound(trial.name().to_string()))?;

        if current.metadata.resource_version != trial.metadata.resource_version {
            return Err(StoreError::Conflict {
                name: trial.name().to_string(),
                expected: trial.metadata.resource_version,
                actual: current.metadata.resource_version,
            });
        }

        let mut stored = trial.clone();
        stored.metadata.resource_version += 1;
        *current = stored.clone();
        Ok(stored)
    }

    async fn list_for_experiment(&self, experiment: &str) -> Result<Vec<Trial>, StoreError> {
        let mut found: Vec<Trial> = self
            .trials
            .read()
            .await
            .values()
            .filter(|t| t.spec.experiment_ref.name == experiment)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(found)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.trials
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}
