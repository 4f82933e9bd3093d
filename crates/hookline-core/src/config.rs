//! Pipeline configuration.
//!
//! Every section carries serde defaults, so an empty source yields a valid
//! configuration. [`PipelineConfig::load`] layers sources in this order, later
//! ones overriding earlier ones:
//!
//!  1. `config/hookline.yaml` relative to the working directory (optional)
//!  2. An explicit file supplied by the caller (required when given)
//!  3. Environment variables prefixed `HOOKLINE__` with `__` as the nesting
//!     separator, e.g. `HOOKLINE__DISPATCH__PROCESSOR_TIMEOUT_MS=5000`

use crate::aggregator::FieldIdentityResolver;
use crate::errors::ConfigError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Root configuration for a pipeline runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub aggregation: AggregationSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Retry behaviour around `handle_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Handler invocations including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    pub jitter_percent: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: false,
            jitter_percent: 0.25,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        let policy = RetryPolicy::new(
            settings.max_attempts,
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.backoff_multiplier,
        );

        if settings.use_jitter {
            policy.with_jitter(settings.jitter_percent)
        } else {
            policy
        }
    }
}

/// Processor scheduling limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Deadline for one processor's whole gate chain
    pub processor_timeout_ms: u64,
    pub max_concurrent_processors: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            processor_timeout_ms: 30_000,
            max_concurrent_processors: 16,
        }
    }
}

impl DispatchSettings {
    pub fn processor_timeout(&self) -> Duration {
        Duration::from_millis(self.processor_timeout_ms)
    }
}

/// Aggregation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    /// Top-level record field holding the logical identifier
    pub identifier_field: String,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            identifier_field: "id".to_string(),
        }
    }
}

impl AggregationSettings {
    pub fn identity_resolver(&self) -> FieldIdentityResolver {
        FieldIdentityResolver::new(self.identifier_field.clone())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the layered sources and validate it.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder().add_source(
            ::config::File::with_name("config/hookline")
                .required(false)
                .format(::config::FileFormat::Yaml),
        );

        if let Some(path) = explicit_path {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config: PipelineConfig = builder
            .add_source(
                ::config::Environment::with_prefix("HOOKLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        if retry.max_attempts == 0 || retry.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(invalid(
                "retry.max_attempts",
                format!("must be between 1 and {}", MAX_RETRY_ATTEMPTS),
            ));
        }

        if retry.backoff_multiplier < 1.0 || !retry.backoff_multiplier.is_finite() {
            return Err(invalid("retry.backoff_multiplier", "must be at least 1.0"));
        }

        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(invalid(
                "retry.max_delay_ms",
                "must not be less than retry.base_delay_ms",
            ));
        }

        if !(0.0..=1.0).contains(&retry.jitter_percent) {
            return Err(invalid("retry.jitter_percent", "must be between 0.0 and 1.0"));
        }

        if self.dispatch.processor_timeout_ms == 0 {
            return Err(invalid("dispatch.processor_timeout_ms", "must be positive"));
        }

        if self.dispatch.max_concurrent_processors == 0 {
            return Err(invalid(
                "dispatch.max_concurrent_processors",
                "must be positive",
            ));
        }

        if self.aggregation.identifier_field.trim().is_empty() {
            return Err(invalid("aggregation.identifier_field", "must not be empty"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
