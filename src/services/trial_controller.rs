//! Trial lifecycle controller.
//!
//! Drives one trial through
//! `Pending → Patching → AwaitingSetup → AwaitingReady → Running →
//! Measuring → SettingDown → {Complete, Failed}`.
//!
//! The controller is the only writer of a trial's status. After every
//! transition it persists the whole trial (optimistic concurrency) and
//! publishes the new snapshot on a `watch` channel, so readers always see a
//! complete status. The persisted phase lets a later run resume where the
//! previous one stopped.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::errors::{ControllerError, ControllerResult};
use crate::domain::models::{ConditionStatus, Config, Experiment, Trial, TrialConditionType, TrialPhase, Value};
use crate::domain::ports::{
    ClusterClient, ExperimentRepository, JobError, JobMonitor, MetricSource, SetupRunner, TrialRepository,
};
use crate::services::metric_collector::MetricCollector;
use crate::services::patch_resolver::{PatchFailure, PatchResolver};
use crate::services::readiness::{ReadinessEvaluator, ReadinessFailure};
use crate::services::retry::RetryPolicy;
use crate::services::setup_orchestrator::{SetupFailure, SetupOrchestrator};

/// External collaborators a controller needs.
#[derive(Clone)]
pub struct ControllerPorts {
    pub cluster: Arc<dyn ClusterClient>,
    pub setup_runner: Arc<dyn SetupRunner>,
    pub jobs: Arc<dyn JobMonitor>,
    pub metric_source: Arc<dyn MetricSource>,
    pub experiments: Arc<dyn ExperimentRepository>,
    pub trials: Arc<dyn TrialRepository>,
}

/// What a phase handler decided.
#[derive(Debug)]
enum Step {
    Advance(TrialPhase),
    Fail { reason: String, message: String },
    Cancelled,
}

impl Step {
    fn fail(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fail {
            reason: reason.into(),
            message: message.into(),
        }
    }
}

impl From<PatchFailure> for Step {
    fn from(failure: PatchFailure) -> Self {
        match failure {
            PatchFailure::Cancelled => Self::Cancelled,
            other => Self::fail(other.reason(), other.message()),
        }
    }
}

impl From<SetupFailure> for Step {
    fn from(failure: SetupFailure) -> Self {
        match failure {
            SetupFailure::Cancelled => Self::Cancelled,
            other => Self::fail(other.reason(), other.message()),
        }
    }
}

impl From<ReadinessFailure> for Step {
    fn from(failure: ReadinessFailure) -> Self {
        match failure {
            ReadinessFailure::Cancelled => Self::Cancelled,
            other => Self::fail(other.reason(), other.message()),
        }
    }
}

pub struct TrialController {
    experiments: Arc<dyn ExperimentRepository>,
    trials: Arc<dyn TrialRepository>,
    jobs: Arc<dyn JobMonitor>,
    patches: PatchResolver,
    setup: SetupOrchestrator,
    readiness: ReadinessEvaluator,
    metrics: MetricCollector,
}

impl TrialController {
    pub fn new(ports: ControllerPorts, config: &Config) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        Self {
            experiments: ports.experiments,
            trials: ports.trials,
            jobs: ports.jobs,
            patches: PatchResolver::new(ports.cluster.clone(), policy.clone(), config.patches.max_attempts),
            setup: SetupOrchestrator::new(ports.setup_runner),
            readiness: ReadinessEvaluator::new(ports.cluster.clone(), config.readiness.clone()),
            metrics: MetricCollector::new(ports.cluster, ports.metric_source, policy, config.metrics.clone()),
        }
    }

    /// Drive a persisted trial to a terminal phase.
    pub async fn run(&self, name: &str, cancel: &CancellationToken) -> ControllerResult<Trial> {
        let (updates, _) = watch::channel(Trial::default());
        self.run_with_updates(name, cancel, &updates).await
    }

    /// Like `run`, publishing every persisted snapshot on `updates`.
    ///
    /// A finished trial is returned untouched. Cancellation leaves the trial
    /// in its current phase with its progress persisted.
    #[instrument(skip(self, cancel, updates))]
    pub async fn run_with_updates(
        &self,
        name: &str,
        cancel: &CancellationToken,
        updates: &watch::Sender<Trial>,
    ) -> ControllerResult<Trial> {
        let mut trial = self
            .trials
            .get(name)
            .await
            .map_err(|e| ControllerError::from_store(name, e))?
            .ok_or_else(|| ControllerError::TrialNotFound(name.to_string()))?;
        updates.send_replace(trial.clone());

        if trial.is_finished() || trial.phase().is_terminal() {
            info!(phase = %trial.phase(), "trial already finished");
            return Ok(trial);
        }

        let experiment_name = trial.spec.experiment_ref.name.clone();
        let experiment = self
            .experiments
            .get(&experiment_name)
            .await
            .map_err(ControllerError::Store)?
            .ok_or_else(|| ControllerError::ExperimentNotFound(experiment_name.clone()))?;

        loop {
            let step = match trial.phase() {
                TrialPhase::Complete | TrialPhase::Failed => return Ok(trial),
                TrialPhase::Pending => Self::admit(&experiment, &trial),
                TrialPhase::Patching => self.patch(&experiment, &mut trial, cancel).await,
                TrialPhase::AwaitingSetup => self.create_setup(&mut trial, cancel).await,
                TrialPhase::AwaitingReady => self.await_ready(&mut trial, cancel).await,
                TrialPhase::Running => self.await_job(&mut trial, cancel).await,
                TrialPhase::Measuring => self.measure(&experiment, &mut trial, cancel).await,
                TrialPhase::SettingDown => self.set_down(&mut trial, cancel).await,
            };

            match step {
                Step::Advance(TrialPhase::Complete) => {
                    trial.complete("TrialCompleted", "all metrics collected")?;
                    info!(values = %trial.status.values, "trial complete");
                    self.persist(&mut trial, updates).await?;
                }
                Step::Advance(next) => {
                    let from = trial.phase();
                    trial.transition_to(next)?;
                    trial.refresh_summaries();
                    info!(%from, to = %next, "phase transition");
                    self.persist(&mut trial, updates).await?;
                }
                Step::Fail { reason, message } => {
                    self.fail(&mut trial, &reason, &message, cancel, updates).await?;
                }
                Step::Cancelled => {
                    warn!(phase = %trial.phase(), "trial cancelled, persisting progress");
                    self.persist(&mut trial, updates).await?;
                    return Err(ControllerError::Cancelled(trial.name().to_string()));
                }
            }
        }
    }

    async fn persist(&self, trial: &mut Trial, updates: &watch::Sender<Trial>) -> ControllerResult<()> {
        let stored = self
            .trials
            .update(trial)
            .await
            .map_err(|e| ControllerError::from_store(trial.name(), e))?;
        *trial = stored;
        updates.send_replace(trial.clone());
        Ok(())
    }

    fn admit(experiment: &Experiment, trial: &Trial) -> Step {
        match experiment.validate_assignments(&trial.spec.assignments) {
            Ok(()) => Step::Advance(TrialPhase::Patching),
            Err(err) => Step::fail("InvalidAssignments", err.to_string()),
        }
    }

    async fn patch(&self, experiment: &Experiment, trial: &mut Trial, cancel: &CancellationToken) -> Step {
        if !experiment.patches.is_empty() && trial.spec.patch_operations.is_empty() {
            match self.patches.resolve(experiment, trial, cancel).await {
                Ok(gated) => trial.spec.readiness_checks = self.readiness.checks_for_patches(&gated),
                Err(failure) => return failure.into(),
            }
        }

        match self.patches.apply_pending(trial, cancel).await {
            Ok(applied) => {
                if !trial.spec.patch_operations.is_empty() {
                    trial.append_condition(
                        TrialConditionType::Patched,
                        ConditionStatus::True,
                        "PatchesApplied",
                        format!("{applied} patch operation(s) applied"),
                    );
                }
                Step::Advance(TrialPhase::AwaitingSetup)
            }
            Err(failure) => failure.into(),
        }
    }

    async fn create_setup(&self, trial: &mut Trial, cancel: &CancellationToken) -> Step {
        match self.setup.run_create(trial, cancel).await {
            Ok(summary) => {
                if !trial.spec.setup_tasks.is_empty() {
                    trial.append_condition(
                        TrialConditionType::SetupCreated,
                        ConditionStatus::True,
                        "SetupCreated",
                        format!(
                            "{} created, {} already present, {} skipped",
                            summary.applied, summary.unchanged, summary.skipped
                        ),
                    );
                }
                let gates = self.readiness.checks_for_gates(trial);
                trial.spec.readiness_checks.extend(gates);
                Step::Advance(TrialPhase::AwaitingReady)
            }
            Err(failure) => failure.into(),
        }
    }

    async fn await_ready(&self, trial: &mut Trial, cancel: &CancellationToken) -> Step {
        if trial.spec.readiness_checks.is_empty() {
            return Step::Advance(TrialPhase::Running);
        }
        match self.readiness.await_ready(trial, cancel).await {
            Ok(()) => {
                trial.append_condition(
                    TrialConditionType::Ready,
                    ConditionStatus::True,
                    "ReadinessChecksPassed",
                    format!("{} readiness check(s) passed", trial.spec.readiness_checks.len()),
                );
                Step::Advance(TrialPhase::Running)
            }
            Err(failure) => failure.into(),
        }
    }

    async fn await_job(&self, trial: &mut Trial, cancel: &CancellationToken) -> Step {
        if let Err(err) = self.jobs.ready_to_run(trial).await {
            return Step::fail("JobSignalFailed", err.to_string());
        }

        let completion = tokio::select! {
            biased;
            () = cancel.cancelled() => return Step::Cancelled,
            completion = self.jobs.wait_for_completion(trial) => completion,
        };

        match completion {
            Ok(done) => {
                if let Err(err) = trial.record_run_window(done.start_time, done.completion_time) {
                    return Step::fail("InvalidRunWindow", err.to_string());
                }
                if done.succeeded {
                    info!(trial = %trial.name(), "job completed");
                    Step::Advance(TrialPhase::Measuring)
                } else {
                    Step::fail("JobFailed", done.message)
                }
            }
            Err(JobError::Cancelled) => Step::Cancelled,
            Err(err) => Step::fail("JobMonitorError", err.to_string()),
        }
    }

    async fn measure(&self, experiment: &Experiment, trial: &mut Trial, cancel: &CancellationToken) -> Step {
        let report = self.metrics.collect(experiment, trial, cancel).await;
        for failure in &report.failures {
            warn!(trial = %trial.name(), metric = %failure.metric, reason = failure.reason(), "metric failed");
        }
        if report.cancelled {
            return Step::Cancelled;
        }
        Step::Advance(TrialPhase::SettingDown)
    }

    async fn set_down(&self, trial: &mut Trial, cancel: &CancellationToken) -> Step {
        if !self.teardown(trial, cancel).await {
            return Step::Cancelled;
        }

        // The first failed metric decides the reason; every failed metric is listed
        let failed: Vec<&Value> = trial.spec.values.iter().filter(|v| v.is_exhausted()).collect();
        let Some(first) = failed.first() else {
            return Step::Advance(TrialPhase::Complete);
        };
        let reason = if first.failure_reason.is_empty() {
            "MetricRetriesExhausted"
        } else {
            first.failure_reason.as_str()
        };
        let message = failed
            .iter()
            .map(|v| {
                if v.failure_message.is_empty() {
                    format!("metric {}: no value collected", v.name)
                } else {
                    v.failure_message.clone()
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        Step::fail(reason, message)
    }

    /// Best-effort setup delete, recording warnings as conditions.
    ///
    /// Returns false if cancelled before finishing.
    async fn teardown(&self, trial: &mut Trial, cancel: &CancellationToken) -> bool {
        if trial.spec.setup_tasks.is_empty() || trial.condition(TrialConditionType::SetupDeleted).is_some() {
            return true;
        }

        match self.setup.run_delete(trial, cancel).await {
            Ok((_, warnings)) if warnings.is_empty() => {
                trial.append_condition(
                    TrialConditionType::SetupDeleted,
                    ConditionStatus::True,
                    "SetupDeleted",
                    "setup tasks removed",
                );
                true
            }
            Ok((_, warnings)) => {
                for w in warnings {
                    trial.append_condition(
                        TrialConditionType::SetupDeleted,
                        ConditionStatus::False,
                        "SetupDeleteFailed",
                        format!("setup task {}: {}", w.task, w.message),
                    );
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Record the single terminal failure, cleaning up setup state first.
    async fn fail(
        &self,
        trial: &mut Trial,
        reason: &str,
        message: &str,
        cancel: &CancellationToken,
        updates: &watch::Sender<Trial>,
    ) -> ControllerResult<()> {
        // A create failure may leave earlier tasks of the list installed
        let setup_touched = trial.has_condition(TrialConditionType::SetupCreated, ConditionStatus::True)
            || trial.phase() == TrialPhase::AwaitingSetup;
        if setup_touched && !self.teardown(trial, cancel).await
        {
            warn!(trial = %trial.name(), "setup teardown skipped after cancellation");
        }
        trial.fail(reason, message)?;
        warn!(trial = %trial.name(), reason, message, "trial failed");
        self.persist(trial, updates).await
    }
}
