use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid {0}: attempt bounds must be at least 1")]
    ZeroAttempts(&'static str),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid backoff multiplier: {0}. Must be at least 1.0")]
    InvalidMultiplier(f64),

    #[error("Invalid jitter: {0}. Must be between 0.0 and 1.0")]
    InvalidJitter(f64),

    #[error("Invalid readiness polling: {0}")]
    InvalidPolling(String),

    #[error("Invalid max_concurrent_trials: {0}. Must be between 1 and 1000")]
    InvalidConcurrency(usize),

    #[error("Invalid metric scheme: {0}. Must be http or https")]
    InvalidScheme(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .trialctl/config.yaml (project config)
    /// 3. .trialctl/local.yaml (project local overrides, optional)
    /// 4. Environment variables (TRIALCTL_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".trialctl/config.yaml"))
            .merge(Yaml::file(".trialctl/local.yaml"))
            .merge(Env::prefixed("TRIALCTL_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if !["daily", "hourly", "never"].contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.patches.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("patches.max_attempts"));
        }
        if config.metrics.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("metrics.max_attempts"));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }
        if config.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(config.retry.multiplier));
        }
        if !(0.0..=1.0).contains(&config.retry.jitter) {
            return Err(ConfigError::InvalidJitter(config.retry.jitter));
        }

        if config.readiness.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPolling("poll_interval_ms cannot be 0".to_string()));
        }
        if config.readiness.max_poll_cycles == 0 {
            return Err(ConfigError::InvalidPolling("max_poll_cycles cannot be 0".to_string()));
        }
        if config.readiness.poll_timeout_ms == 0 {
            return Err(ConfigError::InvalidPolling("poll_timeout_ms cannot be 0".to_string()));
        }
        if config.readiness.default_condition_type.is_empty() {
            return Err(ConfigError::InvalidPolling(
                "default_condition_type cannot be empty".to_string(),
            ));
        }

        if !["http", "https"].contains(&config.metrics.scheme.as_str()) {
            return Err(ConfigError::InvalidScheme(config.metrics.scheme.clone()));
        }
        if config.metrics.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "metrics.request_timeout_ms cannot be 0".to_string(),
            ));
        }

        if config.supervisor.max_concurrent_trials == 0 || config.supervisor.max_concurrent_trials > 1000 {
            return Err(ConfigError::InvalidConcurrency(
                config.supervisor.max_concurrent_trials,
            ));
        }

        if let Some(url) = &config.suggestion.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ValidationFailed(format!(
                    "suggestion.base_url must be an http(s) URL, got '{url}'"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.patches.max_attempts, 3);
        assert_eq!(config.readiness.max_poll_cycles, 36);
        assert_eq!(config.supervisor.max_concurrent_trials, 16);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
logging:
  level: debug
  format: json
retry:
  initial_backoff_ms: 250
  max_backoff_ms: 5000
metrics:
  max_attempts: 5
  scheme: https
readiness:
  poll_interval_ms: 2000
  default_condition_type: Available
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.retry.initial_backoff_ms, 250);
        assert!((config.retry.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.metrics.max_attempts, 5);
        assert_eq!(config.metrics.scheme, "https");
        assert_eq!(config.readiness.poll_interval_ms, 2000);
        assert_eq!(config.readiness.max_poll_cycles, 36);
        assert_eq!(config.readiness.default_condition_type, "Available");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "patches:\n  max_attempts: 7\nsupervisor:\n  max_concurrent_trials: 4").expect("write");

        let config = ConfigLoader::load_from_file(file.path()).expect("config should load");
        assert_eq!(config.patches.max_attempts, 7);
        assert_eq!(config.supervisor.max_concurrent_trials, 4);
        assert_eq!(config.metrics.max_attempts, 3);
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "readiness:\n  max_poll_cycles: 0").expect("write");

        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        temp_env::with_vars(
            [
                ("TRIALCTL_LOGGING__LEVEL", Some("warn")),
                ("TRIALCTL_METRICS__MAX_ATTEMPTS", Some("9")),
            ],
            || {
                let config = ConfigLoader::load().expect("config should load");
                assert_eq!(config.logging.level, "warn");
                assert_eq!(config.metrics.max_attempts, 9);
            },
        );
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat("xml".to_string()))
        );
    }

    #[test]
    fn test_validate_invalid_rotation() {
        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();

        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRotation("weekly".to_string()))
        );
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = Config::default();
        config.patches.max_attempts = 0;
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroAttempts("patches.max_attempts"))
        );

        let mut config = Config::default();
        config.metrics.max_attempts = 0;
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroAttempts("metrics.max_attempts"))
        );
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30000;
        config.retry.max_backoff_ms = 10000;

        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(30000, 10000))
        );
    }

    #[test]
    fn test_validate_multiplier_below_one() {
        let mut config = Config::default();
        config.retry.multiplier = 0.5;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMultiplier(_))
        ));
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.readiness.poll_interval_ms = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPolling(_))
        ));
    }

    #[test]
    fn test_validate_concurrency_bounds() {
        let mut config = Config::default();
        config.supervisor.max_concurrent_trials = 0;
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConcurrency(0))
        );

        config.supervisor.max_concurrent_trials = 1001;
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConcurrency(1001))
        );
    }

    #[test]
    fn test_validate_suggestion_url() {
        let mut config = Config::default();
        config.suggestion.base_url = Some("optimizer:8080".to_string());

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ValidationFailed(_))
        ));
    }
}
