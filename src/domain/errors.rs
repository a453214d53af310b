//! Domain errors for the trial lifecycle.

use thiserror::Error;

use super::models::trial::TrialPhase;
use super::ports::errors::{ClusterError, StoreError, SuggestionError};

/// Experiment or assignment definition errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} name cannot be empty")]
    EmptyName(&'static str),

    #[error("Duplicate parameter: {0}")]
    DuplicateParameter(String),

    #[error("Duplicate metric: {0}")]
    DuplicateMetric(String),

    #[error("Invalid bounds for parameter {name}: min {min} > max {max}")]
    InvalidBounds { name: String, min: i64, max: i64 },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid constraint {name}: {reason}")]
    InvalidConstraint { name: String, reason: String },

    #[error("Invalid metric {name}: {reason}")]
    InvalidMetric { name: String, reason: String },

    #[error("Invalid patch template #{index}: {reason}")]
    InvalidPatch { index: usize, reason: String },

    #[error("Parameter {0} is assigned more than once")]
    DuplicateAssignment(String),

    #[error("Parameter {0} has no assignment")]
    MissingAssignment(String),

    #[error("Assignment {name}={value} is outside [{min}, {max}]")]
    OutOfBounds {
        name: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Constraint violated: {0}")]
    ConstraintViolated(String),

    #[error("Duration hint {field}={seconds}s exceeds {max}s")]
    InvalidDurationHint {
        field: &'static str,
        seconds: u64,
        max: u64,
    },
}

/// Template evaluation errors. Never retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unresolved template variable: {0}")]
    UnknownVariable(String),

    #[error("Malformed template: {0}")]
    Malformed(String),
}

/// Errors raised by trial state mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrialError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: TrialPhase, to: TrialPhase },

    #[error("Trial {0} is finished and can no longer be mutated")]
    Terminal(String),

    #[error("Unknown metric value: {0}")]
    UnknownValue(String),

    #[error("Run window out of range: {0}")]
    RunWindowOverflow(String),
}

/// Errors surfaced by the trial controller to its caller.
///
/// Trial-level failures are recorded as conditions on the trial, not
/// returned here; these are the cases the caller must act on.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Trial not found: {0}")]
    TrialNotFound(String),

    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("Status write conflict on trial {name}: {source}")]
    Conflict {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Trial {0} was cancelled")]
    Cancelled(String),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Suggestion error: {0}")]
    Suggestion(#[from] SuggestionError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

impl ControllerError {
    /// Build from a store error on a named trial, splitting out conflicts.
    pub fn from_store(name: &str, err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => Self::Conflict {
                name: name.to_string(),
                source: err,
            },
            StoreError::NotFound(_) => Self::TrialNotFound(name.to_string()),
            other => Self::Store(other),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
