//! In-memory job monitor.
//!
//! Each trial gets a watch channel carrying its completion event. Tests (or
//! an embedding scheduler) publish completions with `complete`; with
//! `auto_complete` every signalled trial finishes immediately.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{watch, Mutex};

use crate::domain::models::Trial;
use crate::domain::ports::{JobCompletion, JobError, JobMonitor};

#[derive(Debug, Clone, Copy)]
struct AutoComplete {
    runtime_seconds: i64,
    succeeded: bool,
}

#[derive(Default)]
pub struct MemoryJobMonitor {
    channels: Mutex<HashMap<String, watch::Sender<Option<JobCompletion>>>>,
    signalled: Mutex<Vec<String>>,
    rejected: Mutex<HashSet<String>>,
    auto: Option<AutoComplete>,
}

impl MemoryJobMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every job as soon as it is signalled, after a simulated
    /// runtime of `runtime_seconds`.
    pub fn auto_complete(runtime_seconds: i64, succeeded: bool) -> Self {
        Self {
            auto: Some(AutoComplete {
                runtime_seconds,
                succeeded,
            }),
            ..Self::default()
        }
    }

    /// Refuse the ready-to-run signal for a trial.
    pub async fn reject_signal(&self, trial: &str) {
        self.rejected.lock().await.insert(trial.to_string());
    }

    /// Publish the completion event for a trial's job.
    pub async fn complete(&self, trial: &str, completion: JobCompletion) {
        self.sender(trial).await.send_replace(Some(completion));
    }

    /// Trials that were signalled ready to run, in order.
    pub async fn signalled(&self) -> Vec<String> {
        self.signalled.lock().await.clone()
    }

    async fn sender(&self, trial: &str) -> watch::Sender<Option<JobCompletion>> {
        self.channels
            .lock()
            .await
            .entry(trial.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }
}

#[async_trait]
impl JobMonitor for MemoryJobMonitor {
    async fn ready_to_run(&self, trial: &Trial) -> Result<(), JobError> {
        if self.rejected.lock().await.contains(trial.name()) {
            return Err(JobError::Closed(trial.name().to_string()));
        }
        self.signalled.lock().await.push(trial.name().to_string());

        if let Some(auto) = self.auto {
            let start_time = Utc::now();
            self.complete(
                trial.name(),
                JobCompletion {
                    succeeded: auto.succeeded,
                    start_time,
                    completion_time: start_time + Duration::seconds(auto.runtime_seconds),
                    message: if auto.succeeded {
                        "job completed".to_string()
                    } else {
                        "job failed".to_string()
                    },
                },
            )
            .await;
        }
        Ok(())
    }

    async fn wait_for_completion(&self, trial: &Trial) -> Result<JobCompletion, JobError> {
        let mut receiver = self.sender(trial.name()).await.subscribe();
        let completion = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| JobError::Closed(trial.name().to_string()))?;
        completion
            .clone()
            .ok_or_else(|| JobError::Unknown(trial.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ObjectReference;
    use std::sync::Arc;

    fn trial(name: &str) -> Trial {
        Trial::new(name, "bench", ObjectReference::new("Experiment", "bench", "tune"))
    }

    #[tokio::test]
    async fn test_wait_sees_later_completion() {
        let monitor = Arc::new(MemoryJobMonitor::new());
        let t = trial("t-1");
        monitor.ready_to_run(&t).await.unwrap();

        let waiter = {
            let monitor = monitor.clone();
            let t = t.clone();
            tokio::spawn(async move { monitor.wait_for_completion(&t).await })
        };

        let start_time = Utc::now();
        monitor
            .complete(
                "t-1",
                JobCompletion {
                    succeeded: true,
                    start_time,
                    completion_time: start_time + Duration::seconds(5),
                    message: String::new(),
                },
            )
            .await;

        let completion = waiter.await.unwrap().unwrap();
        assert!(completion.succeeded);
        assert_eq!(monitor.signalled().await, vec!["t-1".to_string()]);
    }

    #[tokio::test]
    async fn test_auto_complete() {
        let monitor = MemoryJobMonitor::auto_complete(30, false);
        let t = trial("t-1");
        monitor.ready_to_run(&t).await.unwrap();

        let completion = monitor.wait_for_completion(&t).await.unwrap();
        assert!(!completion.succeeded);
        assert_eq!((completion.completion_time - completion.start_time).num_seconds(), 30);
    }

    #[tokio::test]
    async fn test_rejected_signal() {
        let monitor = MemoryJobMonitor::new();
        monitor.reject_signal("t-1").await;

        let err = monitor.ready_to_run(&trial("t-1")).await.unwrap_err();
        assert_eq!(err, JobError::Closed("t-1".to_string()));
        assert!(monitor.signalled().await.is_empty());
    }
}
