//! Concurrent trial supervision.
//!
//! Many trials progress independently. The supervisor runs one controller
//! task per trial, bounded by a semaphore, each with a child cancellation
//! token of the supervisor's own so a single trial or the whole set can be
//! cancelled. Status write conflicts are retried from a fresh read.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::errors::{ControllerError, ControllerResult};
use crate::domain::models::{SupervisorConfig, Trial};
use crate::services::trial_controller::TrialController;

struct RunningTrial {
    cancel: CancellationToken,
    snapshot: watch::Receiver<Trial>,
}

pub struct TrialSupervisor {
    controller: Arc<TrialController>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    running: Arc<RwLock<HashMap<String, RunningTrial>>>,
    max_conflict_retries: u32,
}

impl TrialSupervisor {
    pub fn new(controller: Arc<TrialController>, config: &SupervisorConfig) -> Self {
        Self {
            controller,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_trials)),
            shutdown: CancellationToken::new(),
            running: Arc::new(RwLock::new(HashMap::new())),
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    /// Start driving a trial in the background.
    ///
    /// Starting a trial that is already running returns `None`.
    pub async fn spawn(&self, name: &str) -> Option<JoinHandle<ControllerResult<Trial>>> {
        let cancel = self.shutdown.child_token();
        let (updates, snapshot) = watch::channel(Trial::default());
        {
            let mut running = self.running.write().await;
            if running.contains_key(name) {
                return None;
            }
            running.insert(
                name.to_string(),
                RunningTrial {
                    cancel: cancel.clone(),
                    snapshot,
                },
            );
        }

        let name = name.to_string();
        let controller = self.controller.clone();
        let semaphore = self.semaphore.clone();
        let running = self.running.clone();
        let max_retries = self.max_conflict_retries;

        Some(tokio::spawn(async move {
            let result = async {
                let _permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ControllerError::Cancelled(name.clone())),
                    permit = semaphore.acquire_owned() => permit
                        .map_err(|_| ControllerError::Cancelled(name.clone()))?,
                };

                let mut conflicts = 0;
                loop {
                    match controller.run_with_updates(&name, &cancel, &updates).await {
                        Err(err) if err.is_conflict() && conflicts < max_retries => {
                            conflicts += 1;
                            warn!(trial = %name, conflicts, "status write conflict, re-reading trial");
                        }
                        other => return other,
                    }
                }
            }
            .await;

            running.write().await.remove(&name);
            match &result {
                Ok(trial) => info!(trial = %name, phase = %trial.phase(), "trial supervision finished"),
                Err(err) => warn!(trial = %name, error = %err, "trial supervision stopped"),
            }
            result
        }))
    }

    /// Drive a set of trials concurrently and wait for all of them.
    pub async fn run_all(&self, names: &[String]) -> Vec<(String, ControllerResult<Trial>)> {
        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            if let Some(handle) = self.spawn(name).await {
                handles.push(async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(join) => {
                            warn!(trial = %name, error = %join, "trial task panicked");
                            Err(ControllerError::Cancelled(name.clone()))
                        }
                    };
                    (name.clone(), result)
                });
            }
        }
        join_all(handles).await
    }

    /// Latest published snapshot of a running trial.
    pub async fn snapshot(&self, name: &str) -> Option<Trial> {
        self.running
            .read()
            .await
            .get(name)
            .map(|r| r.snapshot.borrow().clone())
    }

    /// Names of the trials currently supervised.
    pub async fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel one trial; returns false if it is not running.
    pub async fn cancel(&self, name: &str) -> bool {
        match self.running.read().await.get(name) {
            Some(r) => {
                info!(trial = %name, "cancelling trial");
                r.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every supervised trial.
    pub fn shutdown(&self) {
        info!("shutting down trial supervisor");
        self.shutdown.cancel();
    }
}
