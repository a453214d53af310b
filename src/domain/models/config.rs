use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for trialctl
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retry interval and backoff policy shared by all bounded retries
    #[serde(default)]
    pub retry: RetryConfig,

    /// Patch application configuration
    #[serde(default)]
    pub patches: PatchConfig,

    /// Metric collection configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Readiness polling configuration
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Suggestion service configuration
    #[serde(default)]
    pub suggestion: SuggestionConfig,

    /// Trial supervisor configuration
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (stdout only when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Log file rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Random jitter applied to each delay (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Patch application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PatchConfig {
    /// Attempts each patch operation starts with
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
}

const fn default_attempts() -> u32 {
    3
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
        }
    }
}

/// Metric collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricsConfig {
    /// Attempts each metric value starts with
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    /// Per-request timeout for metric endpoints in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// URL scheme used to reach matched services
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_scheme() -> String {
    "http".to_string()
}

impl MetricsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
            scheme: default_scheme(),
        }
    }
}

/// Readiness polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReadinessConfig {
    /// Poll interval when a gate does not specify one, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Poll cycles a check may fail before the trial fails
    #[serde(default = "default_max_poll_cycles")]
    pub max_poll_cycles: u32,

    /// Deadline for a single poll of a check, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Condition type required when a gate lists none
    #[serde(default = "default_condition_type")]
    pub default_condition_type: String,
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

const fn default_max_poll_cycles() -> u32 {
    36
}

const fn default_poll_timeout_ms() -> u64 {
    10_000
}

fn default_condition_type() -> String {
    "Ready".to_string()
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_cycles: default_max_poll_cycles(),
            poll_timeout_ms: default_poll_timeout_ms(),
            default_condition_type: default_condition_type(),
        }
    }
}

/// Suggestion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SuggestionConfig {
    /// Base URL of the suggestion service (disabled when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_suggestion_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_suggestion_timeout_secs() -> u64 {
    10
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_suggestion_timeout_secs(),
        }
    }
}

/// Trial supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Maximum number of trials driven concurrently (1-1000)
    #[serde(default = "default_max_concurrent_trials")]
    pub max_concurrent_trials: usize,

    /// Fresh read-modify-write retries after a status write conflict
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

const fn default_max_concurrent_trials() -> usize {
    16
}

const fn default_max_conflict_retries() -> u32 {
    5
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_trials: default_max_concurrent_trials(),
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}
