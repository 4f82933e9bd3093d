//! Pipeline-level error types.
//!
//! Only the errors in this module ever leave [`PipelineRunner::run`]. Anything
//! that goes wrong inside a single processor is captured as a
//! [`ProcessingStatus`] instead and reported through diagnostics.
//!
//! [`PipelineRunner::run`]: crate::runner::PipelineRunner::run
//! [`ProcessingStatus`]: crate::dispatcher::ProcessingStatus

use crate::event::LifecycleStage;
use crate::{ErrorCategory, Route, Timestamp};

/// Top-level error for a pipeline run.
///
/// A `PipelineError` means the pipeline itself could not complete; partial
/// processor failure is never reported this way.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No processors registered for route '{route}'")]
    UnknownRoute { route: Route },

    #[error("Lifecycle timestamp violation: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("Processor registry unavailable: {message}")]
    Registry { message: String },

    #[error("Result delivery failed: {0}")]
    Sink(#[from] SinkError),
}

impl PipelineError {
    /// Check if error is transient and the whole run could be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sink(sink_error) => sink_error.is_transient(),
            Self::Registry { .. } => true,
            Self::UnknownRoute { .. } => false,
            Self::Timestamp(_) => false,
        }
    }

    /// Get error category for monitoring
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::UnknownRoute { .. } => ErrorCategory::Configuration,
            Self::Timestamp(_) => ErrorCategory::Permanent,
            Self::Registry { .. } => ErrorCategory::Transient,
            Self::Sink(sink_error) => {
                if sink_error.is_transient() {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
        }
    }

    /// HTTP status a transport layer should answer with.
    ///
    /// Pipeline faults are server-side failures.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Sink(sink_error) if sink_error.is_transient() => 503,
            _ => 500,
        }
    }
}

/// Violations of the set-once, ordered lifecycle timestamp rules.
///
/// These indicate a programming error such as dispatching the same event
/// object twice, and are always propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    #[error("Timestamp {stage} already recorded at {recorded_at}")]
    AlreadySet {
        stage: LifecycleStage,
        recorded_at: Timestamp,
    },

    #[error("Timestamp {stage} requires {requires} to be recorded first")]
    MissingPredecessor {
        stage: LifecycleStage,
        requires: LifecycleStage,
    },

    #[error("Timestamp {stage} at {attempted} precedes {predecessor} at {predecessor_at}")]
    Regressed {
        stage: LifecycleStage,
        attempted: Timestamp,
        predecessor: LifecycleStage,
        predecessor_at: Timestamp,
    },

    #[error("Cannot record {stage}: terminal stage {existing} already recorded")]
    TerminalAlreadyRecorded {
        stage: LifecycleStage,
        existing: LifecycleStage,
    },

    #[error("Timestamp state unavailable: {message}")]
    LockPoisoned { message: String },
}

/// Errors reported by a [`ResultSink`](crate::runner::ResultSink).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink unavailable: {message}")]
    Unavailable { message: String },

    #[error("Sink rejected result: {message}")]
    Rejected { message: String },
}

impl SinkError {
    /// Check if sink error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Rejected { .. } => false,
        }
    }
}

/// Errors raised while loading or validating [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Logging initialisation failed: {message}")]
    Logging { message: String },
}
