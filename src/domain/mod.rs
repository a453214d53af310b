//! Domain layer for the trial lifecycle
//!
//! This module contains the experiment and trial models, the error taxonomy
//! and the port traits at every external boundary.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{ControllerError, ControllerResult, TemplateError, TrialError, ValidationError};
