//! Setup task orchestration.
//!
//! Setup tasks are auxiliary releases installed before a trial runs and
//! removed after it concludes. Both phases walk the trial's task list in
//! order. Create failures are fatal for the trial; delete failures are only
//! reported back as warnings.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::TemplateError;
use crate::domain::models::{HelmValue, SetupTask, Trial};
use crate::domain::ports::{SetupError, SetupOutcome, SetupRelease, SetupRunner};
use crate::services::template::{TemplateContext, TemplateEngine};

/// Why the create phase stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupFailure {
    /// A Helm value could not be evaluated
    Template { task: String, error: TemplateError },
    /// The runner failed to install a task
    Create { task: String, error: SetupError },
    Cancelled,
}

impl SetupFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Template { .. } => "SetupValueInvalid",
            Self::Create { .. } => "SetupCreateFailed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Template { task, error } => format!("setup task {task}: {error}"),
            Self::Create { error, .. } => error.to_string(),
            Self::Cancelled => "setup was cancelled".to_string(),
        }
    }
}

/// A non-blocking teardown problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupWarning {
    pub task: String,
    pub message: String,
}

/// Counts of what one phase did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupSummary {
    pub applied: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

pub struct SetupOrchestrator {
    runner: Arc<dyn SetupRunner>,
    engine: TemplateEngine,
}

impl SetupOrchestrator {
    pub fn new(runner: Arc<dyn SetupRunner>) -> Self {
        Self {
            runner,
            engine: TemplateEngine::new(),
        }
    }

    /// Build the release a task installs for a trial.
    pub fn release_for(&self, trial: &Trial, task: &SetupTask) -> Result<SetupRelease, TemplateError> {
        let ctx = TemplateContext::for_trial(trial);
        let values = task
            .helm_values
            .iter()
            .map(|hv| Ok((hv.name.clone(), self.helm_value(hv, trial, &ctx)?, hv.force_string)))
            .collect::<Result<Vec<_>, TemplateError>>()?;

        Ok(SetupRelease {
            release: format!("{}-{}", trial.name(), task.name),
            task: task.name.clone(),
            namespace: trial.target_namespace().to_string(),
            image: task.image.clone(),
            chart: task.helm_chart.clone(),
            values,
        })
    }

    fn helm_value(&self, value: &HelmValue, trial: &Trial, ctx: &TemplateContext) -> Result<String, TemplateError> {
        if let Some(parameter) = value.value_from.as_ref().and_then(|v| v.parameter_ref.as_ref()) {
            return trial
                .spec
                .assignments
                .iter()
                .find(|a| a.name == parameter.name)
                .map(|a| a.value.to_string())
                .ok_or_else(|| TemplateError::UnknownVariable(parameter.name.clone()));
        }
        self.engine.render(&value.value, ctx)
    }

    /// Install every task not marked skip-create, in list order.
    pub async fn run_create(&self, trial: &Trial, cancel: &CancellationToken) -> Result<SetupSummary, SetupFailure> {
        let mut summary = SetupSummary::default();

        for task in &trial.spec.setup_tasks {
            if task.skip_create {
                debug!(trial = %trial.name(), task = %task.name, "skipping setup create");
                summary.skipped += 1;
                continue;
            }

            let release = self.release_for(trial, task).map_err(|error| SetupFailure::Template {
                task: task.name.clone(),
                error,
            })?;

            if cancel.is_cancelled() {
                return Err(SetupFailure::Cancelled);
            }
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SetupFailure::Cancelled),
                result = self.runner.create(&release) => result,
            };

            match result {
                Ok(SetupOutcome::Applied) => {
                    info!(trial = %trial.name(), task = %task.name, release = %release.release, "setup task created");
                    summary.applied += 1;
                }
                Ok(SetupOutcome::Unchanged) => {
                    debug!(trial = %trial.name(), task = %task.name, "setup task already present");
                    summary.unchanged += 1;
                }
                Err(SetupError::Cancelled) => return Err(SetupFailure::Cancelled),
                Err(error) => {
                    warn!(trial = %trial.name(), task = %task.name, error = %error, "setup task create failed");
                    return Err(SetupFailure::Create {
                        task: task.name.clone(),
                        error,
                    });
                }
            }
        }

        Ok(summary)
    }

    /// Remove every task not marked skip-delete, in list order.
    ///
    /// Runs regardless of whether the task's create step was skipped. A
    /// failing task does not stop the ones after it.
    pub async fn run_delete(
        &self,
        trial: &Trial,
        cancel: &CancellationToken,
    ) -> Result<(SetupSummary, Vec<SetupWarning>), SetupFailure> {
        let mut summary = SetupSummary::default();
        let mut warnings = Vec::new();

        for task in &trial.spec.setup_tasks {
            if task.skip_delete {
                debug!(trial = %trial.name(), task = %task.name, "skipping setup delete");
                summary.skipped += 1;
                continue;
            }

            let release = match self.release_for(trial, task) {
                Ok(release) => release,
                Err(error) => {
                    warnings.push(SetupWarning {
                        task: task.name.clone(),
                        message: error.to_string(),
                    });
                    continue;
                }
            };

            if cancel.is_cancelled() {
                return Err(SetupFailure::Cancelled);
            }
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SetupFailure::Cancelled),
                result = self.runner.delete(&release) => result,
            };

            match result {
                Ok(SetupOutcome::Applied) => {
                    info!(trial = %trial.name(), task = %task.name, "setup task deleted");
                    summary.applied += 1;
                }
                Ok(SetupOutcome::Unchanged) => summary.unchanged += 1,
                Err(SetupError::Cancelled) => return Err(SetupFailure::Cancelled),
                Err(error) => {
                    warn!(trial = %trial.name(), task = %task.name, error = %error, "setup task delete failed");
                    warnings.push(SetupWarning {
                        task: task.name.clone(),
                        message: error.to_string(),
                    });
                }
            }
        }

        Ok((summary, warnings))
    }
}
