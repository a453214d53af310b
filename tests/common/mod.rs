//! Common test utilities for integration tests
//!
//! Wires a controller to the in-memory adapters with a configuration fast
//! enough that retries and readiness polling finish in milliseconds.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;

use trialctl::adapters::memory::{
    MemoryCluster, MemoryExperimentRepository, MemoryJobMonitor, MemorySetupRunner, MemoryTrialRepository,
};
use trialctl::domain::models::{Assignment, Config, Experiment, Metric, Parameter, Trial};
use trialctl::domain::ports::{
    ExperimentRepository, MetricError, MetricSource, PrometheusResponse, TrialRepository,
};
use trialctl::services::{ControllerPorts, TrialController, TrialFactory};

mock! {
    pub Source {}

    #[async_trait]
    impl MetricSource for Source {
        async fn query_prometheus(&self, base_url: &str, query: &str, at: DateTime<Utc>) -> Result<PrometheusResponse, MetricError>;
        async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, MetricError>;
    }
}

/// Configuration with millisecond backoff and polling.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 2;
    config.retry.multiplier = 1.0;
    config.retry.jitter = 0.0;
    config.readiness.poll_interval_ms = 1;
    config.readiness.max_poll_cycles = 3;
    config.readiness.poll_timeout_ms = 100;
    config
}

/// An experiment over `replicas` in `[1, 4]` measuring the run duration.
pub fn experiment() -> Experiment {
    let mut experiment = Experiment::new("tune")
        .with_parameter(Parameter::new("replicas", 1, 4))
        .with_metric(Metric::local("duration", "duration"));
    experiment.namespace = "bench".to_string();
    experiment
}

/// In-memory collaborators shared by a controller and the test body.
pub struct Harness {
    pub cluster: Arc<MemoryCluster>,
    pub setup: Arc<MemorySetupRunner>,
    pub jobs: Arc<MemoryJobMonitor>,
    pub experiments: Arc<MemoryExperimentRepository>,
    pub trials: Arc<MemoryTrialRepository>,
    pub config: Config,
}

impl Harness {
    /// Jobs finish successfully after a simulated 90 second run.
    pub fn new() -> Self {
        Self::with_jobs(MemoryJobMonitor::auto_complete(90, true))
    }

    pub fn with_jobs(jobs: MemoryJobMonitor) -> Self {
        Self {
            cluster: Arc::new(MemoryCluster::new()),
            setup: Arc::new(MemorySetupRunner::new()),
            jobs: Arc::new(jobs),
            experiments: Arc::new(MemoryExperimentRepository::new()),
            trials: Arc::new(MemoryTrialRepository::new()),
            config: fast_config(),
        }
    }

    pub fn ports(&self, metric_source: impl MetricSource + 'static) -> ControllerPorts {
        ControllerPorts {
            cluster: self.cluster.clone(),
            setup_runner: self.setup.clone(),
            jobs: self.jobs.clone(),
            metric_source: Arc::new(metric_source),
            experiments: self.experiments.clone(),
            trials: self.trials.clone(),
        }
    }

    /// Controller whose metric source must never be called.
    pub fn controller(&self) -> TrialController {
        TrialController::new(self.ports(MockSource::new()), &self.config)
    }

    /// Register the experiment and persist a trial for `assignments`.
    pub async fn create_trial(&self, experiment: &Experiment, assignments: Vec<Assignment>) -> Trial {
        if self.experiments.get(&experiment.name).await.unwrap().is_none() {
            self.experiments.insert(experiment.clone()).await.unwrap();
        }
        TrialFactory::new(self.trials.clone())
            .create_trial(experiment, assignments)
            .await
            .expect("trial should be created")
    }

    pub async fn stored(&self, name: &str) -> Trial {
        self.trials.get(name).await.unwrap().expect("trial should be stored")
    }
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
