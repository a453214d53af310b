use thiserror::Error;

/// Cluster API errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Apply conflict on {0}")]
    Conflict(String),

    #[error("Cluster API unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ClusterError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::Unavailable(_) | Self::Timeout(_)
        )
    }
}

/// Metric collection errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetricError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No data yet for query: {0}")]
    NoData(String),

    #[error("Query returned {0} values, expected a single scalar")]
    NonScalar(usize),

    #[error("Unparseable metric value: {0}")]
    Unparseable(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("No service matches selector {0}")]
    NoMatchingService(String),

    #[error("Cannot resolve port {port} on {service}")]
    UnknownPort { service: String, port: String },

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl MetricError {
    /// Network and timing problems are retryable; data-shape problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::NoData(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Cluster(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Setup task errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("Setup task {task} failed: {message}")]
    Failed { task: String, message: String },

    #[error("Setup task {task} has an invalid value: {message}")]
    InvalidValue { task: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Persistence errors for experiments and trials
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict on {name}: expected {expected}, stored {actual}")]
    Conflict {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Suggestion service errors
#[derive(Debug, Error)]
pub enum SuggestionError {
    #[error("Suggestion service is not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Suggestion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid suggestion: {0}")]
    InvalidResponse(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Job observation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("No job registered for trial {0}")]
    Unknown(String),

    #[error("Job signal channel closed for trial {0}")]
    Closed(String),

    #[error("Operation cancelled")]
    Cancelled,
}
