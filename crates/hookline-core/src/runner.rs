//! # Pipeline Runner
//!
//! Orchestrates one event through the pipeline and records its lifecycle:
//!
//! ```text
//! QUEUED ──▶ PROCESSING_STARTED ──▶ SUCCEEDED
//!                    │
//!                    └──────────────▶ FAILED (pipeline fault only)
//! ```
//!
//! Processor-level failures never fail the run; they are reported in the
//! diagnostics of a SUCCEEDED [`PipelineReport`]. Only an unknown route, a
//! registry fault, a sink failure or a timestamp violation ends in `Err`.

use crate::aggregator::{AggregatedResult, Diagnostic, ResultAggregator};
use crate::config::PipelineConfig;
use crate::dispatcher::{Dispatcher, ProcessingStatus, RejectionReason};
use crate::errors::{PipelineError, SinkError};
use crate::event::{EventTimestamps, LifecycleStage, WebhookEvent};
use crate::processor::ResourceConfig;
use crate::registry::ProcessorRegistry;
use crate::retry::RetryPolicy;
use crate::{Route, TraceId};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument};

// ============================================================================
// Sink
// ============================================================================

/// Downstream consumer of aggregated results.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Deliver one event's merged result and per-processor diagnostics.
    ///
    /// `trace_id` is stable per inbound request and may be used as an
    /// idempotency key.
    async fn deliver(
        &self,
        trace_id: &TraceId,
        result: &AggregatedResult,
        diagnostics: &[Diagnostic],
    ) -> Result<(), SinkError>;
}

// ============================================================================
// Report
// ============================================================================

/// Outcome of a completed pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub trace_id: TraceId,
    pub route: Route,
    pub result: AggregatedResult,
    pub diagnostics: Vec<Diagnostic>,
    pub timestamps: EventTimestamps,
}

impl PipelineReport {
    /// HTTP status a transport layer should answer with.
    ///
    /// - 401 when every processor was rejected and at least one rejection was
    ///   an authentication failure
    /// - 400 when every processor was rejected by validation
    /// - 200 otherwise, including partial processor failure
    pub fn status_code(&self) -> u16 {
        let all_rejected = !self.diagnostics.is_empty()
            && self.diagnostics.iter().all(|d| d.status.is_rejected());

        if !all_rejected {
            return 200;
        }

        let any_auth = self.diagnostics.iter().any(|d| {
            d.status == ProcessingStatus::Rejected(RejectionReason::Authentication)
        });

        if any_auth {
            401
        } else {
            400
        }
    }

    /// Count diagnostics with the given status name (e.g. `"FAILED"`)
    pub fn count_status(&self, status: &str) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.status.as_str() == status)
            .count()
    }
}

// ============================================================================
// PipelineRunner
// ============================================================================

/// Top-level orchestration: registry lookup, dispatch, aggregation, delivery.
///
/// # Examples
///
/// ```rust
/// use hookline_core::{
///     EventHeaders, PipelineError, PipelineRunner, ProcessorRegistry, Route, TraceId,
///     WebhookEvent,
/// };
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let runner = PipelineRunner::with_defaults(Arc::new(ProcessorRegistry::new()));
/// let event = Arc::new(WebhookEvent::received(
///     TraceId::new(),
///     serde_json::json!({}),
///     EventHeaders::new(),
/// ));
///
/// let route = Route::new("/unknown").unwrap();
/// let result = runner.run(event, &route, &[]).await;
/// assert!(matches!(result, Err(PipelineError::UnknownRoute { .. })));
/// # });
/// ```
pub struct PipelineRunner {
    registry: Arc<ProcessorRegistry>,
    dispatcher: Dispatcher,
    aggregator: ResultAggregator,
    sink: Option<Arc<dyn ResultSink>>,
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl PipelineRunner {
    pub fn new(
        registry: Arc<ProcessorRegistry>,
        dispatcher: Dispatcher,
        aggregator: ResultAggregator,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            aggregator,
            sink: None,
        }
    }

    /// Runner with default dispatcher and aggregator settings
    pub fn with_defaults(registry: Arc<ProcessorRegistry>) -> Self {
        Self::new(registry, Dispatcher::default(), ResultAggregator::default())
    }

    /// Build a runner from validated configuration
    pub fn from_config(config: &PipelineConfig, registry: Arc<ProcessorRegistry>) -> Self {
        let dispatcher = Dispatcher::new(
            RetryPolicy::from(&config.retry),
            config.dispatch.processor_timeout(),
            config.dispatch.max_concurrent_processors,
        );
        let aggregator =
            ResultAggregator::new(Arc::new(config.aggregation.identity_resolver()));

        Self::new(registry, dispatcher, aggregator)
    }

    /// Deliver results to `sink` after each successful aggregation
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    /// Run `event` through the processors registered for `route`.
    ///
    /// The event must have QUEUED recorded and must not have been run before.
    #[instrument(
        skip(self, event, resources),
        fields(trace_id = %event.trace_id(), route = %route)
    )]
    pub async fn run(
        &self,
        event: Arc<WebhookEvent>,
        route: &Route,
        resources: &[ResourceConfig],
    ) -> Result<PipelineReport, PipelineError> {
        event.set_timestamp(LifecycleStage::ProcessingStarted)?;
        info!(
            trace_id = %event.trace_id(),
            route = %route,
            "Pipeline processing started"
        );

        let factories = match self.registry.processors_for(route) {
            Ok(Some(factories)) => factories,
            Ok(None) => {
                return Err(fail(
                    &event,
                    PipelineError::UnknownRoute {
                        route: route.clone(),
                    },
                ))
            }
            Err(registry_error) => return Err(fail(&event, registry_error)),
        };

        let outcomes = self.dispatcher.dispatch(&event, &factories, resources).await;
        let (result, diagnostics) = self.aggregator.aggregate(&outcomes);

        if let Some(sink) = &self.sink {
            if let Err(sink_error) = sink.deliver(event.trace_id(), &result, &diagnostics).await {
                return Err(fail(&event, sink_error.into()));
            }
        }

        event.set_timestamp(LifecycleStage::Succeeded)?;
        let timestamps = event.timestamps()?;

        let report = PipelineReport {
            trace_id: event.trace_id().clone(),
            route: route.clone(),
            result,
            diagnostics,
            timestamps,
        };

        info!(
            trace_id = %report.trace_id,
            route = %report.route,
            queued_at = ?report.timestamps.queued.map(|t| t.to_rfc3339()),
            processing_started_at = ?report.timestamps.processing_started.map(|t| t.to_rfc3339()),
            succeeded_at = ?report.timestamps.succeeded.map(|t| t.to_rfc3339()),
            latency_ms = report.timestamps.processing_latency().map(|d| d.as_millis() as u64),
            processors = report.diagnostics.len(),
            succeeded = report.count_status("SUCCEEDED"),
            skipped = report.count_status("SKIPPED"),
            rejected = report.count_status("REJECTED"),
            failed = report.count_status("FAILED"),
            upserted = report.result.upserted_count(),
            deleted = report.result.deleted_count(),
            "Pipeline processing succeeded"
        );

        Ok(report)
    }
}

/// Record FAILED for a pipeline fault.
///
/// A timestamp violation while recording FAILED takes precedence over the
/// original fault, which is logged.
fn fail(event: &WebhookEvent, fault: PipelineError) -> PipelineError {
    match event.set_timestamp(LifecycleStage::Failed) {
        Ok(_) => {
            error!(
                trace_id = %event.trace_id(),
                error = %fault,
                category = ?fault.error_category(),
                "Pipeline processing failed"
            );
            fault
        }
        Err(timestamp_error) => {
            error!(
                trace_id = %event.trace_id(),
                error = %fault,
                timestamp_error = %timestamp_error,
                "Pipeline fault while lifecycle already terminal"
            );
            PipelineError::Timestamp(timestamp_error)
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
