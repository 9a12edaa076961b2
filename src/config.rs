//! Engine configuration.
//!
//! Settings come from a TOML file, optionally overridden by `MENDER__*`
//! environment variables, or straight from a TOML string. Every field has a
//! default, so an empty file is a valid configuration.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::error::DEFAULT_MAX_SIGNATURE_LENGTH;
use crate::metrics::DEFAULT_RECENT_PATTERNS;
use crate::recovery::backoff::seconds;
use crate::recovery::{ExecutorSettings, RecoveryRule, RetryStrategy};

/// Errors that can occur when loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// The configuration sources could not be merged or deserialized.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] ConfigError),

    /// A TOML string could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// The configuration parsed but holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for a [`RecoveryEngine`](crate::RecoveryEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Signatures are truncated to this many characters
    pub max_signature_length: usize,
    /// Retry attempts for categories without a rule
    pub default_max_attempts: u32,
    /// Base backoff delay for categories without a rule
    pub default_retry_delay_seconds: f64,
    /// Upper bound on any single backoff delay. A rule whose own base delay
    /// is larger raises the cap to that base.
    pub max_retry_delay_seconds: f64,
    pub default_circuit_breaker_threshold: u32,
    /// Simulated pause for `RestartService`
    pub restart_delay_seconds: f64,
    pub recent_patterns_limit: usize,
    /// Cap on tracked patterns; unset means unbounded.
    ///
    /// Only the pattern registry is capped. The instance ledger keeps every
    /// occurrence, including those of evicted patterns.
    pub max_patterns: Option<usize>,
    /// Rules registered at startup, in order
    pub rules: Vec<RecoveryRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_signature_length: DEFAULT_MAX_SIGNATURE_LENGTH,
            default_max_attempts: 3,
            default_retry_delay_seconds: 1.0,
            max_retry_delay_seconds: 60.0,
            default_circuit_breaker_threshold: 5,
            restart_delay_seconds: 2.0,
            recent_patterns_limit: DEFAULT_RECENT_PATTERNS,
            max_patterns: None,
            rules: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from a TOML file.
    ///
    /// Environment variables override file values using the format
    /// `MENDER__<KEY>` (e.g., `MENDER__RESTART_DELAY_SECONDS=0.5`).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path is not valid UTF-8
    /// - The configuration file does not exist
    /// - The configuration cannot be parsed or fails validation
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mender::EngineConfig;
    ///
    /// let config = EngineConfig::load("mender.toml")?;
    /// # Ok::<(), mender::config::ConfigLoadError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| ConfigLoadError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            .add_source(
                Environment::with_prefix("MENDER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Parse configuration from a TOML string. No environment overrides apply.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigLoadError> {
        let engine_config: EngineConfig = toml::from_str(toml_str)?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Checks values serde cannot rule out.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.max_signature_length == 0 {
            return Err(ConfigLoadError::Invalid(
                "max_signature_length must be greater than zero".to_string(),
            ));
        }
        let durations = [
            ("default_retry_delay_seconds", self.default_retry_delay_seconds),
            ("max_retry_delay_seconds", self.max_retry_delay_seconds),
            ("restart_delay_seconds", self.restart_delay_seconds),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigLoadError::Invalid(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Backoff schedule for categories without a rule.
    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::new(
            seconds(self.default_retry_delay_seconds),
            seconds(self.max_retry_delay_seconds),
            self.default_max_attempts,
        )
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            retry: self.retry_strategy(),
            restart_delay: seconds(self.restart_delay_seconds),
        }
    }
}
