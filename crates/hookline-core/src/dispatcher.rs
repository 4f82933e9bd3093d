//! # Dispatcher
//!
//! Runs every processor registered for a route against one event and produces
//! exactly one [`ProcessingOutcome`] per processor.
//!
//! # Isolation
//!
//! Each processor runs in its own spawned task, so:
//!
//! - a panic is caught at the task boundary and reported as
//!   [`FailureReason::Panicked`],
//! - a processor exceeding its deadline is dropped (cooperative cancellation)
//!   and reported as [`FailureReason::Timeout`],
//! - neither affects sibling processors.
//!
//! A [`Semaphore`] bounds how many processors run at once. The per-processor
//! deadline starts when the permit is acquired and covers the whole gate chain.
//!
//! # Gate chain
//!
//! ```text
//! authenticate ──false──▶ REJECTED(authentication)
//!      │
//! should_process_event ──false──▶ SKIPPED(filtered out)
//!      │
//! validate_payload ──false──▶ REJECTED(validation)
//!      │
//! get_matching_kinds ∩ resource configs ──empty──▶ SKIPPED(no matching resource config)
//!      │
//! handle_event per matching config, under RetryPolicy ──error──▶ FAILED
//!      │
//! SUCCEEDED
//! ```

use crate::event::WebhookEvent;
use crate::processor::{EventProcessor, ProcessorFactory, RawResults, ResourceConfig};
use crate::retry::RetryPolicy;
use crate::{ErrorCategory, Kind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Outcome types
// ============================================================================

/// Why a processor was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `should_process_event` declined the event
    FilteredOut,
    /// None of the caller's resource configs has a kind the processor handles
    NoMatchingResourceConfig,
}

/// Why a processor was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Authentication,
    Validation,
}

/// Why a processor failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The processor did not finish within the configured deadline
    Timeout { after_ms: u64 },
    /// The processor panicked
    Panicked { message: String },
    /// A transient error persisted through every retry
    TransientExhausted { attempts: u32, message: String },
    /// A non-retryable error
    Permanent { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { after_ms } => write!(f, "timed out after {}ms", after_ms),
            Self::Panicked { message } => write!(f, "panicked: {}", message),
            Self::TransientExhausted { attempts, message } => {
                write!(f, "failed after {} attempts: {}", attempts, message)
            }
            Self::Permanent { message } => write!(f, "{}", message),
        }
    }
}

/// Final status of one processor for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Skipped(SkipReason),
    Rejected(RejectionReason),
    Succeeded,
    Failed(FailureReason),
}

impl ProcessingStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "SKIPPED",
            Self::Rejected(_) => "REJECTED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed(_) => "FAILED",
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Error text for failed processors
    pub fn error(&self) -> Option<String> {
        match self {
            Self::Failed(reason) => Some(reason.to_string()),
            _ => None,
        }
    }

    /// Get error category for monitoring; `None` when nothing went wrong
    pub fn error_category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Succeeded | Self::Skipped(_) => None,
            Self::Rejected(RejectionReason::Authentication) => Some(ErrorCategory::Security),
            Self::Rejected(RejectionReason::Validation) => Some(ErrorCategory::Permanent),
            Self::Failed(FailureReason::Timeout { .. } | FailureReason::TransientExhausted { .. }) => {
                Some(ErrorCategory::Transient)
            }
            Self::Failed(FailureReason::Permanent { .. } | FailureReason::Panicked { .. }) => {
                Some(ErrorCategory::Permanent)
            }
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "FAILED({})", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Result of running one processor against one event.
///
/// Only a SUCCEEDED outcome carries results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub processor_name: String,
    /// Position of the factory in the route's registration order
    pub registration_index: usize,
    /// Kinds declared by `get_matching_kinds`; empty if the chain stopped earlier
    pub kinds: BTreeSet<Kind>,
    /// Records per resource kind, in resource-config order within a kind
    pub results: BTreeMap<Kind, RawResults>,
    pub status: ProcessingStatus,
    /// `handle_event` invocations, retries included
    pub attempts: u32,
    pub duration_ms: u64,
}

impl ProcessingOutcome {
    /// All upserted records, grouped by kind order
    pub fn upserted(&self) -> impl Iterator<Item = &serde_json::Value> {
        self.results.values().flat_map(|r| r.upserted.iter())
    }

    /// All deleted records, grouped by kind order
    pub fn deleted(&self) -> impl Iterator<Item = &serde_json::Value> {
        self.results.values().flat_map(|r| r.deleted.iter())
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Concurrent, isolated processor execution.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    retry_policy: RetryPolicy,
    processor_timeout: Duration,
    max_concurrent_processors: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            processor_timeout: Duration::from_secs(30),
            max_concurrent_processors: 16,
        }
    }
}

/// Outcome of the gate chain before timing and attempts are attached.
struct ChainResult {
    kinds: BTreeSet<Kind>,
    results: BTreeMap<Kind, RawResults>,
    status: ProcessingStatus,
}

impl ChainResult {
    fn stopped(status: ProcessingStatus) -> Self {
        Self {
            kinds: BTreeSet::new(),
            results: BTreeMap::new(),
            status,
        }
    }
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        retry_policy: RetryPolicy,
        processor_timeout: Duration,
        max_concurrent_processors: usize,
    ) -> Self {
        Self {
            retry_policy,
            processor_timeout,
            max_concurrent_processors: max_concurrent_processors.max(1),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_processor_timeout(mut self, timeout: Duration) -> Self {
        self.processor_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_processors(mut self, limit: usize) -> Self {
        self.max_concurrent_processors = limit.max(1);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn processor_timeout(&self) -> Duration {
        self.processor_timeout
    }

    pub fn max_concurrent_processors(&self) -> usize {
        self.max_concurrent_processors
    }

    /// Run every factory's processor against `event`.
    ///
    /// Returns one outcome per factory, ordered by registration index. Never
    /// fails: processor-level problems are reported in the outcome status.
    #[instrument(
        skip(self, event, factories, resources),
        fields(trace_id = %event.trace_id(), processors = factories.len())
    )]
    pub async fn dispatch(
        &self,
        event: &Arc<WebhookEvent>,
        factories: &[Arc<dyn ProcessorFactory>],
        resources: &[ResourceConfig],
    ) -> Vec<ProcessingOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_processors));
        let resources: Arc<[ResourceConfig]> = resources.into();
        let dispatch_started = Instant::now();

        let mut tasks = Vec::with_capacity(factories.len());
        for (index, factory) in factories.iter().enumerate() {
            let attempts = Arc::new(AtomicU32::new(0));
            let handle = tokio::spawn(Self::run_processor(
                factory.clone(),
                event.clone(),
                resources.clone(),
                semaphore.clone(),
                self.retry_policy.clone(),
                self.processor_timeout,
                attempts.clone(),
            ));
            tasks.push((
                index,
                factory.name().to_string(),
                attempts,
                AbortOnDrop(handle),
            ));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (registration_index, processor_name, attempts, mut task) in tasks {
            let outcome = match (&mut task.0).await {
                Ok((chain, duration)) => ProcessingOutcome {
                    processor_name,
                    registration_index,
                    kinds: chain.kinds,
                    results: chain.results,
                    status: chain.status,
                    attempts: attempts.load(Ordering::SeqCst),
                    duration_ms: duration.as_millis() as u64,
                },
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        join_error.to_string()
                    };
                    error!(
                        trace_id = %event.trace_id(),
                        processor = %processor_name,
                        panic = %message,
                        "Processor panicked"
                    );

                    ProcessingOutcome {
                        processor_name,
                        registration_index,
                        kinds: BTreeSet::new(),
                        results: BTreeMap::new(),
                        status: ProcessingStatus::Failed(FailureReason::Panicked { message }),
                        attempts: attempts.load(Ordering::SeqCst),
                        duration_ms: dispatch_started.elapsed().as_millis() as u64,
                    }
                }
            };
            outcomes.push(outcome);
        }

        outcomes.sort_by_key(|o| o.registration_index);
        outcomes
    }

    async fn run_processor(
        factory: Arc<dyn ProcessorFactory>,
        event: Arc<WebhookEvent>,
        resources: Arc<[ResourceConfig]>,
        semaphore: Arc<Semaphore>,
        retry_policy: RetryPolicy,
        processor_timeout: Duration,
        attempts: Arc<AtomicU32>,
    ) -> (ChainResult, Duration) {
        // The semaphore is never closed, so acquisition only waits.
        let _permit = semaphore.acquire_owned().await.ok();
        let started = Instant::now();

        let processor = factory.create(&event);
        let chain = run_chain(
            processor.as_ref(),
            &event,
            &resources,
            &retry_policy,
            &attempts,
        );

        let result = match tokio::time::timeout(processor_timeout, chain).await {
            Ok(result) => result,
            Err(_) => {
                let after_ms = processor_timeout.as_millis() as u64;
                warn!(
                    trace_id = %event.trace_id(),
                    processor = factory.name(),
                    timeout_ms = after_ms,
                    "Processor timed out, cancelling"
                );
                ChainResult::stopped(ProcessingStatus::Failed(FailureReason::Timeout {
                    after_ms,
                }))
            }
        };

        log_outcome(&event, factory.name(), &result.status);
        (result, started.elapsed())
    }
}

/// Aborts the processor task when dropped, so abandoning a dispatch cancels
/// every processor still running instead of detaching it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_chain(
    processor: &dyn EventProcessor,
    event: &WebhookEvent,
    resources: &[ResourceConfig],
    retry_policy: &RetryPolicy,
    attempts: &AtomicU32,
) -> ChainResult {
    let payload = event.payload();

    if !processor.authenticate(payload, event.headers()).await {
        return ChainResult::stopped(ProcessingStatus::Rejected(
            RejectionReason::Authentication,
        ));
    }

    if !processor.should_process_event(event) {
        return ChainResult::stopped(ProcessingStatus::Skipped(SkipReason::FilteredOut));
    }

    if !processor.validate_payload(payload) {
        return ChainResult::stopped(ProcessingStatus::Rejected(RejectionReason::Validation));
    }

    let kinds = processor.get_matching_kinds(event).await;
    let matching: Vec<&ResourceConfig> = resources
        .iter()
        .filter(|config| kinds.contains(&config.kind))
        .collect();

    if matching.is_empty() {
        return ChainResult {
            kinds,
            results: BTreeMap::new(),
            status: ProcessingStatus::Skipped(SkipReason::NoMatchingResourceConfig),
        };
    }

    let mut results: BTreeMap<Kind, RawResults> = BTreeMap::new();
    for config in matching {
        let outcome = retry_policy
            .execute(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    processor.handle_event(payload, config)
                },
                |error| processor.is_transient(error),
            )
            .await;

        match outcome.result {
            Ok(raw) => {
                let entry = results.entry(config.kind.clone()).or_default();
                entry.upserted.extend(raw.upserted);
                entry.deleted.extend(raw.deleted);
            }
            Err(error) => {
                let reason = if processor.is_transient(&error) {
                    FailureReason::TransientExhausted {
                        attempts: outcome.attempts,
                        message: error.to_string(),
                    }
                } else {
                    FailureReason::Permanent {
                        message: error.to_string(),
                    }
                };

                return ChainResult {
                    kinds,
                    results: BTreeMap::new(),
                    status: ProcessingStatus::Failed(reason),
                };
            }
        }
    }

    ChainResult {
        kinds,
        results,
        status: ProcessingStatus::Succeeded,
    }
}

fn log_outcome(event: &WebhookEvent, processor: &str, status: &ProcessingStatus) {
    let trace_id = event.trace_id();
    let category = status.error_category();
    match status {
        ProcessingStatus::Succeeded => {
            info!(trace_id = %trace_id, processor = processor, "Processor succeeded")
        }
        ProcessingStatus::Skipped(reason) => {
            debug!(trace_id = %trace_id, processor = processor, reason = ?reason, "Processor skipped")
        }
        ProcessingStatus::Rejected(reason) => {
            warn!(
                trace_id = %trace_id,
                processor = processor,
                reason = ?reason,
                category = ?category,
                "Processor rejected event"
            )
        }
        ProcessingStatus::Failed(reason) => {
            error!(
                trace_id = %trace_id,
                processor = processor,
                error = %reason,
                category = ?category,
                "Processor failed"
            )
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
