//! Readiness evaluation.
//!
//! Trial gates and patch gates both resolve to `ReadinessCheck`s stored on
//! the trial. Each poll cycle looks at every pending check once; a check
//! that is not yet satisfied (or whose poll timed out) spends one attempt,
//! and a check that runs out of attempts fails the trial.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::models::{ClusterObject, ObjectReference, ReadinessCheck, ReadinessConfig, Trial};
use crate::domain::ports::{ClusterClient, ClusterError};
use crate::services::patch_resolver::GatedTarget;

/// Outcome of polling one check once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Ready,
    /// Objects exist but do not report every required condition yet
    NotReady(String),
    /// The poll did not answer within the per-poll timeout
    TimedOut,
}

/// Why readiness could not be established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessFailure {
    /// A check used up its poll cycles
    Exhausted { check: String, detail: String },
    /// Looking up a check target failed permanently
    Lookup { check: String, error: ClusterError },
    Cancelled,
}

impl ReadinessFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Exhausted { .. } => "ReadinessTimeout",
            Self::Lookup { .. } => "ReadinessCheckInvalid",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Exhausted { check, detail } => {
                format!("{check} did not become ready within its poll budget: {detail}")
            }
            Self::Lookup { check, error } => format!("cannot evaluate readiness of {check}: {error}"),
            Self::Cancelled => "readiness polling was cancelled".to_string(),
        }
    }
}

pub struct ReadinessEvaluator {
    cluster: Arc<dyn ClusterClient>,
    config: ReadinessConfig,
}

impl ReadinessEvaluator {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: ReadinessConfig) -> Self {
        Self { cluster, config }
    }

    fn condition_types(&self, declared: Vec<String>) -> Vec<String> {
        if declared.is_empty() {
            vec![self.config.default_condition_type.clone()]
        } else {
            declared
        }
    }

    /// Checks for the gates declared on the trial itself.
    pub fn checks_for_gates(&self, trial: &Trial) -> Vec<ReadinessCheck> {
        let namespace = trial.target_namespace();
        trial
            .spec
            .readiness_gates
            .iter()
            .map(|gate| ReadinessCheck {
                target_ref: ObjectReference::new(&gate.kind, namespace, &gate.name)
                    .with_api_version(&gate.api_version),
                selector: gate.selector.clone(),
                condition_types: self.condition_types(gate.condition_types.clone()),
                initial_delay_seconds: gate.initial_delay_seconds,
                period_seconds: gate.period_seconds.unwrap_or(0),
                attempts_remaining: gate.failure_threshold.unwrap_or(self.config.max_poll_cycles),
                last_check_time: None,
            })
            .collect()
    }

    /// One check per patched object whose template carries readiness gates.
    pub fn checks_for_patches(&self, gated: &[GatedTarget]) -> Vec<ReadinessCheck> {
        gated
            .iter()
            .map(|g| ReadinessCheck {
                target_ref: g.target.clone(),
                selector: None,
                condition_types: self.condition_types(g.condition_types.clone()),
                initial_delay_seconds: 0,
                period_seconds: 0,
                attempts_remaining: self.config.max_poll_cycles,
                last_check_time: None,
            })
            .collect()
    }

    async fn observe(&self, check: &ReadinessCheck) -> Result<ReadinessState, ClusterError> {
        let objects: Vec<ClusterObject> = if check.target_ref.name.is_empty() {
            let selector = check.selector.clone().unwrap_or_default();
            self.cluster
                .list(&check.target_ref.kind, &check.target_ref.namespace, &selector)
                .await?
        } else {
            vec![self.cluster.get(&check.target_ref).await?]
        };

        if objects.is_empty() {
            return Ok(ReadinessState::NotReady("no matching objects".to_string()));
        }

        let waiting: Vec<String> = objects
            .iter()
            .filter(|o| !o.satisfies(&check.condition_types))
            .map(|o| o.reference.to_string())
            .collect();

        if waiting.is_empty() {
            Ok(ReadinessState::Ready)
        } else {
            Ok(ReadinessState::NotReady(format!(
                "waiting for {} on {}",
                check.condition_types.join(","),
                waiting.join(", ")
            )))
        }
    }

    /// Poll a check once, bounded by the per-poll timeout.
    ///
    /// Missing objects and transient cluster errors read as not ready.
    pub async fn poll_once(&self, check: &ReadinessCheck) -> Result<ReadinessState, ClusterError> {
        match tokio::time::timeout(self.config.poll_timeout(), self.observe(check)).await {
            Err(_) => Ok(ReadinessState::TimedOut),
            Ok(Ok(state)) => Ok(state),
            Ok(Err(ClusterError::NotFound(what))) => Ok(ReadinessState::NotReady(format!("{what} not found"))),
            Ok(Err(err)) if err.is_transient() => Ok(ReadinessState::NotReady(err.to_string())),
            Ok(Err(err)) => Err(err),
        }
    }

    fn interval(&self, trial: &Trial) -> Duration {
        trial
            .spec
            .readiness_checks
            .iter()
            .filter(|c| c.is_pending() && c.period_seconds > 0)
            .map(|c| Duration::from_secs(u64::from(c.period_seconds)))
            .min()
            .unwrap_or_else(|| self.config.poll_interval())
    }

    async fn sleep(delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    /// Poll every pending check on the trial until all pass.
    ///
    /// Counters are updated in place on `trial.spec.readiness_checks`.
    #[instrument(skip(self, trial, cancel), fields(trial = %trial.name()))]
    pub async fn await_ready(&self, trial: &mut Trial, cancel: &CancellationToken) -> Result<(), ReadinessFailure> {
        let initial_delay = trial
            .spec
            .readiness_checks
            .iter()
            .filter(|c| c.is_pending())
            .map(|c| c.initial_delay_seconds)
            .max()
            .unwrap_or(0);
        if initial_delay > 0 && !Self::sleep(Duration::from_secs(u64::from(initial_delay)), cancel).await {
            return Err(ReadinessFailure::Cancelled);
        }

        loop {
            for check in trial.spec.readiness_checks.iter_mut().filter(|c| c.is_pending()) {
                if cancel.is_cancelled() {
                    return Err(ReadinessFailure::Cancelled);
                }
                let state = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ReadinessFailure::Cancelled),
                    state = self.poll_once(check) => state,
                };
                check.last_check_time = Some(Utc::now());

                match state {
                    Ok(ReadinessState::Ready) => {
                        info!(check = %check.describe(), "readiness check passed");
                        check.attempts_remaining = 0;
                    }
                    Ok(not_ready) => {
                        check.attempts_remaining = check.attempts_remaining.saturating_sub(1);
                        let detail = match not_ready {
                            ReadinessState::NotReady(detail) => detail,
                            _ => "poll timed out".to_string(),
                        };
                        debug!(check = %check.describe(), attempts_remaining = check.attempts_remaining, %detail, "not ready");
                        if check.attempts_remaining == 0 {
                            warn!(check = %check.describe(), "readiness poll cycles exhausted");
                            return Err(ReadinessFailure::Exhausted {
                                check: check.describe(),
                                detail,
                            });
                        }
                    }
                    Err(error) => {
                        check.attempts_remaining = 0;
                        return Err(ReadinessFailure::Lookup {
                            check: check.describe(),
                            error,
                        });
                    }
                }
            }

            if trial.spec.readiness_checks.iter().all(|c| !c.is_pending()) {
                return Ok(());
            }
            if !Self::sleep(self.interval(trial), cancel).await {
                return Err(ReadinessFailure::Cancelled);
            }
        }
    }
}
