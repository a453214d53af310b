//! Trial creation from an experiment's trial template.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::{ControllerError, ControllerResult, ValidationError};
use crate::domain::models::{Assignment, Experiment, ObjectReference, Trial};
use crate::domain::ports::{SuggestionClient, SuggestionError, TrialRepository};

/// Label linking a trial to its experiment.
pub const EXPERIMENT_LABEL: &str = "trialctl.dev/experiment";

pub struct TrialFactory {
    trials: Arc<dyn TrialRepository>,
    suggestions: Option<Arc<dyn SuggestionClient>>,
}

impl TrialFactory {
    pub fn new(trials: Arc<dyn TrialRepository>) -> Self {
        Self {
            trials,
            suggestions: None,
        }
    }

    pub fn with_suggestions(mut self, client: Arc<dyn SuggestionClient>) -> Self {
        self.suggestions = Some(client);
        self
    }

    /// Build an unsaved trial for `assignments` from the experiment template.
    pub fn stamp(experiment: &Experiment, assignments: Vec<Assignment>) -> Result<Trial, ValidationError> {
        experiment.validate_assignments(&assignments)?;
        experiment.template.validate_duration_hints()?;

        let template = &experiment.template;
        let namespace = if template.namespace.is_empty() {
            experiment.namespace.clone()
        } else {
            template.namespace.clone()
        };
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", experiment.name, &suffix[..8]);

        let mut trial = Trial::new(
            name,
            namespace,
            ObjectReference::new("Experiment", &experiment.namespace, &experiment.name),
        );
        trial.metadata.labels.clone_from(&template.labels);
        trial
            .metadata
            .labels
            .insert(EXPERIMENT_LABEL.to_string(), experiment.name.clone());
        trial.metadata.creation_timestamp = Some(Utc::now());

        let spec = &mut trial.spec;
        spec.target_namespace.clone_from(&template.target_namespace);
        spec.assignments = assignments;
        spec.start_time_offset_seconds = template.start_time_offset_seconds;
        spec.approximate_runtime_seconds = template.approximate_runtime_seconds;
        spec.ttl_seconds_after_finished = template.ttl_seconds_after_finished;
        spec.ttl_seconds_after_failure = template.ttl_seconds_after_failure;
        spec.readiness_gates.clone_from(&template.readiness_gates);
        spec.setup_tasks.clone_from(&template.setup_tasks);

        trial.refresh_summaries();
        Ok(trial)
    }

    /// Validate, stamp and persist a trial for externally supplied assignments.
    pub async fn create_trial(&self, experiment: &Experiment, assignments: Vec<Assignment>) -> ControllerResult<Trial> {
        let trial = Self::stamp(experiment, assignments)?;
        let stored = self
            .trials
            .insert(&trial)
            .await
            .map_err(|e| ControllerError::from_store(trial.name(), e))?;
        info!(trial = %stored.name(), experiment = %experiment.name, assignments = %stored.status.assignments, "trial created");
        Ok(stored)
    }

    /// Ask the suggestion service for assignments, then create the trial.
    ///
    /// Suggestion errors are returned as-is; nothing is retried here.
    pub async fn suggest_trial(&self, experiment: &Experiment, cancel: &CancellationToken) -> ControllerResult<Trial> {
        let client = self.suggestions.as_ref().ok_or(SuggestionError::NotConfigured)?;
        let assignments = client.next_assignments(experiment, cancel).await?;
        self.create_trial(experiment, assignments).await
    }
}
