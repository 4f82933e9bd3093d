//! # Hookline Core
//!
//! Webhook dispatch and aggregation pipeline for catalog synchronisation.
//!
//! Each third-party integration (source-control hosts, CI systems, issue
//! trackers, security scanners) contributes a set of independently pluggable
//! [`EventProcessor`]s. This crate owns everything around them:
//!
//! - deciding which processors apply to an inbound webhook ([`ProcessorRegistry`]),
//! - running each one through the authenticate → filter → validate → handle
//!   chain with isolation, timeouts and bounded concurrency ([`Dispatcher`]),
//! - retrying transient upstream failures ([`RetryPolicy`]),
//! - merging the per-processor results into one deterministic
//!   `{kind -> (upserted, deleted)}` outcome ([`ResultAggregator`]),
//! - recording the QUEUED → PROCESSING → SUCCEEDED | FAILED timeline
//!   ([`PipelineRunner`]).
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions
//! - Integrations and the downstream sink are injected at runtime
//! - Processor-level failures are reported as data; only pipeline faults
//!   are returned as errors
//!
//! ## Usage
//!
//! ```rust
//! use hookline_core::{Kind, Route, TraceId};
//!
//! let trace_id = TraceId::new();
//! let route = Route::new("/integration/webhook").unwrap();
//! let kind = Kind::new("branch").unwrap();
//!
//! assert!(!trace_id.as_str().is_empty());
//! assert_eq!(route.as_str(), "/integration/webhook");
//! assert_eq!(kind.as_str(), "branch");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use uuid::Uuid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Correlation identifier for one inbound webhook call.
///
/// Threaded through every log line and diagnostic produced while the event is
/// processed, and usable as an idempotency key by downstream consumers. The
/// transport layer may supply its own value (e.g. a platform delivery ID);
/// otherwise a UUID v4 is generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

impl TraceId {
    /// Generate a new random trace ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a transport-supplied identifier
    pub fn from_string(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "trace_id".to_string(),
            });
        }

        if value.len() > 256 {
            return Err(ValidationError::TooLong {
                field: "trace_id".to_string(),
                max_length: 256,
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

/// Webhook route a set of processors is registered under.
///
/// # Validation Rules
/// - Must not be empty
/// - Must start with `/`
/// - Must not contain whitespace or consecutive slashes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Route(String);

impl Route {
    /// Create new route with validation
    pub fn new(path: impl Into<String>) -> Result<Self, ValidationError> {
        let path = path.into();

        if path.is_empty() {
            return Err(ValidationError::Required {
                field: "route".to_string(),
            });
        }

        if !path.starts_with('/') {
            return Err(ValidationError::InvalidFormat {
                field: "route".to_string(),
                message: "must start with '/'".to_string(),
            });
        }

        if path.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidCharacters {
                field: "route".to_string(),
                invalid_chars: "whitespace".to_string(),
            });
        }

        if path.contains("//") {
            return Err(ValidationError::InvalidFormat {
                field: "route".to_string(),
                message: "consecutive slashes not allowed".to_string(),
            });
        }

        Ok(Self(path))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Route {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Resource-type tag used to bucket aggregated results (e.g. `"issue"`,
/// `"branch"`).
///
/// Ordered so that aggregated results iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Kind(String);

impl Kind {
    /// Create new kind with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "kind".to_string(),
            });
        }

        if name.len() > 128 {
            return Err(ValidationError::TooLong {
                field: "kind".to_string(),
                max_length: 128,
            });
        }

        if name.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidCharacters {
                field: "kind".to_string(),
                invalid_chars: "whitespace".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Kind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Kind {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Kind> for String {
    fn from(kind: Kind) -> Self {
        kind.0
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    #[cfg(test)]
    pub(crate) fn from_rfc3339(s: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|dt| Self(dt.with_timezone(&Utc)))
    }

    #[cfg(test)]
    pub(crate) fn add_millis(&self, millis: u64) -> Self {
        Self(self.0 + chrono::Duration::milliseconds(millis as i64))
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for retry and alerting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that should be retried
    Transient,
    /// Permanent failures that won't succeed on retry
    Permanent,
    /// Security-related failures requiring immediate attention
    Security,
    /// Configuration errors preventing startup
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Webhook event envelope and lifecycle timestamps
pub mod event;

/// Event processor contract implemented by integrations
pub mod processor;

/// Route to processor-factory registry
pub mod registry;

/// Bounded retry with exponential backoff
pub mod retry;

/// Concurrent, isolated processor execution
pub mod dispatcher;

/// Deterministic merge of processor results
pub mod aggregator;

/// Top-level pipeline orchestration
pub mod runner;

/// Standard webhook authenticators
pub mod auth;

/// Pipeline configuration
pub mod config;

/// Tracing subscriber setup
pub mod telemetry;

/// Pipeline-level error types
pub mod errors;

// Re-export key types for convenience
pub use aggregator::{
    AggregatedResult, Diagnostic, FieldIdentityResolver, IdentityResolver, KindResults,
    ResultAggregator,
};
pub use auth::{Authentication, SecretString, SignatureAlgorithm, SignatureAuthenticator};
pub use crate::config::{
    AggregationSettings, DispatchSettings, LoggingConfig, PipelineConfig, RetrySettings,
};
pub use dispatcher::{
    Dispatcher, FailureReason, ProcessingOutcome, ProcessingStatus, RejectionReason, SkipReason,
};
pub use errors::{ConfigError, PipelineError, SinkError, TimestampError};
pub use event::{EventHeaders, EventTimestamps, LifecycleStage, RawRequest, WebhookEvent};
pub use processor::{
    BoxError, EventProcessor, FnProcessorFactory, ProcessorError, ProcessorFactory, RawResults,
    ResourceConfig,
};
pub use registry::ProcessorRegistry;
pub use retry::{RetryOutcome, RetryPolicy};
pub use runner::{PipelineReport, PipelineRunner, ResultSink};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
