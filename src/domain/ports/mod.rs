//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the async trait interfaces external collaborators
//! implement:
//! - ClusterClient: object get/list/patch/create/delete
//! - SetupRunner: setup task release install/removal
//! - JobMonitor: run job readiness signal and completion events
//! - MetricSource: Prometheus queries and JSON documents
//! - SuggestionClient: optimizer assignments for new trials
//! - ExperimentRepository / TrialRepository: persisted state
//!
//! These traits keep the trial lifecycle independent of any concrete
//! cluster, transport or store.

pub mod cluster_client;
pub mod errors;
pub mod experiment_repository;
pub mod job_monitor;
pub mod metric_source;
pub mod setup_runner;
pub mod suggestion_client;
pub mod trial_repository;

pub use cluster_client::ClusterClient;
pub use errors::{ClusterError, JobError, MetricError, SetupError, StoreError, SuggestionError};
pub use experiment_repository::ExperimentRepository;
pub use job_monitor::{JobCompletion, JobMonitor};
pub use metric_source::{MetricSource, PrometheusData, PrometheusResponse};
pub use setup_runner::{SetupOutcome, SetupRelease, SetupRunner};
pub use suggestion_client::SuggestionClient;
pub use trial_repository::TrialRepository;
