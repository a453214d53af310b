//! In-memory implementations of every port.
//!
//! Used by the `render` command and by the lifecycle tests.

pub mod cluster;
pub mod job_monitor;
pub mod repositories;
pub mod setup_runner;

pub use cluster::{AppliedPatch, MemoryCluster};
pub use job_monitor::MemoryJobMonitor;
pub use repositories::{MemoryExperimentRepository, MemoryTrialRepository};
pub use setup_runner::{MemorySetupRunner, SetupStep};
