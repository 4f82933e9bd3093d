//! # Event Processor Contract
//!
//! The pluggable unit each integration implements. A processor is created
//! fresh for every event by its [`ProcessorFactory`] and is driven through a
//! fixed gate chain by the [`Dispatcher`](crate::dispatcher::Dispatcher):
//!
//! ```text
//! authenticate → should_process_event → validate_payload → get_matching_kinds → handle_event
//! ```
//!
//! The chain short-circuits on the first gate that declines, and
//! `handle_event` is the only step that may touch the network or be retried.

use crate::event::{EventHeaders, WebhookEvent};
use crate::Kind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Boxed error type carried by [`ProcessorError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ============================================================================
// Processor data types
// ============================================================================

/// Per-kind mapping configuration supplied by the caller.
///
/// Opaque to the pipeline; passed unmodified to
/// [`EventProcessor::handle_event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub kind: Kind,
    #[serde(default)]
    pub selector: Value,
}

impl ResourceConfig {
    /// Create a resource config for `kind`
    pub fn new(kind: Kind, selector: Value) -> Self {
        Self { kind, selector }
    }
}

/// Records produced by one `handle_event` invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResults {
    pub upserted: Vec<Value>,
    pub deleted: Vec<Value>,
}

impl RawResults {
    /// Create results from upsert and delete lists
    pub fn new(upserted: Vec<Value>, deleted: Vec<Value>) -> Self {
        Self { upserted, deleted }
    }

    /// Results containing only upserts
    pub fn upserts(upserted: Vec<Value>) -> Self {
        Self::new(upserted, Vec::new())
    }

    /// Results containing only deletions
    pub fn deletions(deleted: Vec<Value>) -> Self {
        Self::new(Vec::new(), deleted)
    }

    /// Check if no records were produced
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.deleted.is_empty()
    }
}

/// Failure reported by an integration's `handle_event`.
///
/// The variant is the integration's own classification; the dispatcher
/// consults [`EventProcessor::is_transient`], which defaults to it.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("Transient upstream failure: {0}")]
    Transient(BoxError),

    #[error("Permanent processor failure: {0}")]
    Permanent(BoxError),
}

impl ProcessorError {
    /// Create a retryable error
    pub fn transient(error: impl Into<BoxError>) -> Self {
        Self::Transient(error.into())
    }

    /// Create a non-retryable error
    pub fn permanent(error: impl Into<BoxError>) -> Self {
        Self::Permanent(error.into())
    }

    /// Check if the error is classified as retryable
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// ============================================================================
// EventProcessor
// ============================================================================

/// Contract implemented by each integration's webhook processors.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use hookline_core::{
///     EventHeaders, EventProcessor, Kind, ProcessorError, RawResults, ResourceConfig,
///     WebhookEvent,
/// };
/// use serde_json::{json, Value};
/// use std::collections::BTreeSet;
///
/// struct IssueProcessor;
///
/// #[async_trait]
/// impl EventProcessor for IssueProcessor {
///     async fn authenticate(&self, _payload: &Value, _headers: &EventHeaders) -> bool {
///         true
///     }
///
///     fn should_process_event(&self, event: &WebhookEvent) -> bool {
///         event.payload()["eventType"] == "issue.updated"
///     }
///
///     fn validate_payload(&self, payload: &Value) -> bool {
///         payload.get("issue").is_some()
///     }
///
///     async fn get_matching_kinds(&self, _event: &WebhookEvent) -> BTreeSet<Kind> {
///         BTreeSet::from([Kind::new("issue").unwrap()])
///     }
///
///     async fn handle_event(
///         &self,
///         payload: &Value,
///         _resource_config: &ResourceConfig,
///     ) -> Result<RawResults, ProcessorError> {
///         Ok(RawResults::upserts(vec![payload["issue"].clone()]))
///     }
/// }
/// ```
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Verify the request originates from the claimed platform.
    ///
    /// Must be side-effect-free. `false` rejects the processor for this event.
    async fn authenticate(&self, payload: &Value, headers: &EventHeaders) -> bool;

    /// Cheap relevance filter evaluated before any upstream call.
    ///
    /// `false` skips the processor.
    fn should_process_event(&self, event: &WebhookEvent) -> bool;

    /// Check the payload is well-formed for this processor.
    ///
    /// `false` rejects the processor.
    fn validate_payload(&self, payload: &Value) -> bool;

    /// Resource kinds this processor's handler produces.
    ///
    /// Results are bucketed under the kind of the resource config they were
    /// produced for, so only declared kinds are ever invoked.
    async fn get_matching_kinds(&self, event: &WebhookEvent) -> BTreeSet<Kind>;

    /// Integration business logic.
    ///
    /// May be invoked more than once for the same input when a transient
    /// failure is retried, so implementations must be idempotent.
    async fn handle_event(
        &self,
        payload: &Value,
        resource_config: &ResourceConfig,
    ) -> Result<RawResults, ProcessorError>;

    /// Classify a handler error as retryable.
    fn is_transient(&self, error: &ProcessorError) -> bool {
        error.is_transient()
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Creates a fresh processor bound to one event.
///
/// Processors are never shared between events, so any per-request state a
/// processor needs lives in the instance the factory returns.
pub trait ProcessorFactory: Send + Sync {
    /// Name used in diagnostics and logs
    fn name(&self) -> &str;

    /// Create a processor for `event`
    fn create(&self, event: &Arc<WebhookEvent>) -> Box<dyn EventProcessor>;
}

/// [`ProcessorFactory`] backed by a closure.
pub struct FnProcessorFactory<F> {
    name: String,
    constructor: F,
}

impl<F> FnProcessorFactory<F>
where
    F: Fn(&Arc<WebhookEvent>) -> Box<dyn EventProcessor> + Send + Sync,
{
    /// Create a factory with the given diagnostic name
    pub fn new(name: impl Into<String>, constructor: F) -> Self {
        Self {
            name: name.into(),
            constructor,
        }
    }
}

impl<F> ProcessorFactory for FnProcessorFactory<F>
where
    F: Fn(&Arc<WebhookEvent>) -> Box<dyn EventProcessor> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, event: &Arc<WebhookEvent>) -> Box<dyn EventProcessor> {
        (self.constructor)(event)
    }
}

impl<F> fmt::Debug for FnProcessorFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProcessorFactory")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
