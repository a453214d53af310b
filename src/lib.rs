//! trialctl - trial lifecycle controller
//!
//! Drives single trials of a black-box optimization experiment through
//! their lifecycle: resolve and apply patches, install setup tasks, wait for
//! readiness, hand off to the run job, collect metrics and tear down.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): the trial lifecycle
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging and HTTP adapters
//! - **Adapters** (`adapters`): in-memory port implementations
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use trialctl::services::{ControllerPorts, TrialController};
//!
//! let controller = TrialController::new(ports, &config);
//! let trial = controller.run("tune-1a2b3c4d", &cancel).await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{ControllerError, ControllerResult};
pub use domain::models::{Config, Experiment, Trial, TrialPhase};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ControllerPorts, TrialController, TrialFactory, TrialSupervisor};
