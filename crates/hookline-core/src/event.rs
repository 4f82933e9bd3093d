//! # Webhook Event
//!
//! The envelope every processor sees: trace ID, decoded payload, headers, an
//! optional handle to the raw transport request, and the lifecycle timeline.
//!
//! The event is created once per inbound call by the transport layer and is
//! shared read-only (`Arc<WebhookEvent>`) with every processor of a dispatch.
//! The only mutation is [`WebhookEvent::set_timestamp`], which enforces:
//!
//! - each [`LifecycleStage`] is recorded at most once,
//! - `PROCESSING_STARTED` requires `QUEUED`, and `SUCCEEDED`/`FAILED` require
//!   `PROCESSING_STARTED`,
//! - no stage is recorded earlier than its predecessor,
//! - `SUCCEEDED` and `FAILED` are mutually exclusive.
//!
//! A violation means the same event object is being run twice, so it is
//! surfaced as a [`TimestampError`] and never silently overwritten.

use crate::errors::TimestampError;
use crate::{Timestamp, TraceId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Lifecycle
// ============================================================================

/// Stages of the per-event processing timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStage {
    /// Event constructed and accepted by the transport layer
    Queued,
    /// Dispatcher invoked
    ProcessingStarted,
    /// All processors completed (individual processor failures included)
    Succeeded,
    /// A pipeline-level fault prevented completion
    Failed,
}

impl LifecycleStage {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::ProcessingStarted => "PROCESSING_STARTED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    /// The stage that must already be recorded before this one
    pub fn predecessor(&self) -> Option<Self> {
        match self {
            Self::Queued => None,
            Self::ProcessingStarted => Some(Self::Queued),
            Self::Succeeded | Self::Failed => Some(Self::ProcessingStarted),
        }
    }

    /// Check if this stage ends the timeline
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded lifecycle instants for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTimestamps {
    pub queued: Option<Timestamp>,
    pub processing_started: Option<Timestamp>,
    pub succeeded: Option<Timestamp>,
    pub failed: Option<Timestamp>,
}

impl EventTimestamps {
    /// Get the instant recorded for a stage
    pub fn get(&self, stage: LifecycleStage) -> Option<Timestamp> {
        match stage {
            LifecycleStage::Queued => self.queued,
            LifecycleStage::ProcessingStarted => self.processing_started,
            LifecycleStage::Succeeded => self.succeeded,
            LifecycleStage::Failed => self.failed,
        }
    }

    fn slot(&mut self, stage: LifecycleStage) -> &mut Option<Timestamp> {
        match stage {
            LifecycleStage::Queued => &mut self.queued,
            LifecycleStage::ProcessingStarted => &mut self.processing_started,
            LifecycleStage::Succeeded => &mut self.succeeded,
            LifecycleStage::Failed => &mut self.failed,
        }
    }

    /// Record `at` for `stage`, enforcing the set-once and ordering rules.
    pub fn record(&mut self, stage: LifecycleStage, at: Timestamp) -> Result<(), TimestampError> {
        if let Some(recorded_at) = self.get(stage) {
            return Err(TimestampError::AlreadySet { stage, recorded_at });
        }

        if stage.is_terminal() {
            let other = match stage {
                LifecycleStage::Succeeded => LifecycleStage::Failed,
                _ => LifecycleStage::Succeeded,
            };
            if self.get(other).is_some() {
                return Err(TimestampError::TerminalAlreadyRecorded {
                    stage,
                    existing: other,
                });
            }
        }

        if let Some(predecessor) = stage.predecessor() {
            let predecessor_at =
                self.get(predecessor)
                    .ok_or(TimestampError::MissingPredecessor {
                        stage,
                        requires: predecessor,
                    })?;

            if at < predecessor_at {
                return Err(TimestampError::Regressed {
                    stage,
                    attempted: at,
                    predecessor,
                    predecessor_at,
                });
            }
        }

        *self.slot(stage) = Some(at);
        Ok(())
    }

    /// Time spent waiting between QUEUED and PROCESSING_STARTED
    pub fn queue_wait(&self) -> Option<Duration> {
        Some(self.processing_started?.duration_since(self.queued?))
    }

    /// Time between PROCESSING_STARTED and the terminal stage
    pub fn processing_latency(&self) -> Option<Duration> {
        let finished = self.succeeded.or(self.failed)?;
        Some(finished.duration_since(self.processing_started?))
    }

    /// The terminal stage, if one has been recorded
    pub fn terminal_stage(&self) -> Option<LifecycleStage> {
        if self.succeeded.is_some() {
            Some(LifecycleStage::Succeeded)
        } else if self.failed.is_some() {
            Some(LifecycleStage::Failed)
        } else {
            None
        }
    }
}

// ============================================================================
// Headers and raw request
// ============================================================================

/// Case-insensitive header map.
///
/// Keys are stored lower-cased; lookups lower-case the requested name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeaders {
    inner: HashMap<String, String>,
}

impl EventHeaders {
    /// Create an empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any existing value for the same name
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.inner
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Get a header value by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Check whether a header is present (case-insensitive)
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over `(lower-cased name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for EventHeaders
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl From<HashMap<String, String>> for EventHeaders {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

/// Handle to the undecoded transport request.
///
/// Exposed only so authenticators can verify signatures over the exact bytes
/// the platform signed.
#[derive(Clone, PartialEq, Eq)]
pub struct RawRequest {
    method: String,
    path: String,
    body: Bytes,
}

impl RawRequest {
    /// Wrap the raw request as received by the transport layer
    pub fn new(method: impl Into<String>, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: body.into(),
        }
    }

    /// Get the HTTP method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Get the request path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the raw body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl fmt::Debug for RawRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("body_len", &self.body.len())
            .finish()
    }
}

// ============================================================================
// WebhookEvent
// ============================================================================

/// One inbound webhook call, as seen by the pipeline.
///
/// # Examples
///
/// ```rust
/// use hookline_core::{EventHeaders, LifecycleStage, TraceId, WebhookEvent};
///
/// let event = WebhookEvent::new(
///     TraceId::new(),
///     serde_json::json!({ "eventType": "git.push" }),
///     EventHeaders::from_iter([("X-Event-Type", "git.push")]),
/// );
///
/// event.set_timestamp(LifecycleStage::Queued).unwrap();
/// assert!(event.set_timestamp(LifecycleStage::Queued).is_err());
/// assert_eq!(event.headers().get("x-event-type"), Some("git.push"));
/// ```
#[derive(Debug)]
pub struct WebhookEvent {
    trace_id: TraceId,
    payload: serde_json::Value,
    headers: EventHeaders,
    original_request: Option<RawRequest>,
    timestamps: Mutex<EventTimestamps>,
}

impl WebhookEvent {
    /// Create an event with no lifecycle timestamps recorded
    pub fn new(trace_id: TraceId, payload: serde_json::Value, headers: EventHeaders) -> Self {
        Self {
            trace_id,
            payload,
            headers,
            original_request: None,
            timestamps: Mutex::new(EventTimestamps::default()),
        }
    }

    /// Create an event and record QUEUED immediately.
    ///
    /// Use this from the transport layer at the moment the request is accepted.
    pub fn received(trace_id: TraceId, payload: serde_json::Value, headers: EventHeaders) -> Self {
        let mut timestamps = EventTimestamps::default();
        timestamps.queued = Some(Timestamp::now());

        Self {
            trace_id,
            payload,
            headers,
            original_request: None,
            timestamps: Mutex::new(timestamps),
        }
    }

    /// Attach the raw transport request for signature verification
    pub fn with_original_request(mut self, request: RawRequest) -> Self {
        self.original_request = Some(request);
        self
    }

    /// Get the trace ID
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// Get the decoded JSON payload
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Get the request headers
    pub fn headers(&self) -> &EventHeaders {
        &self.headers
    }

    /// Get the raw transport request, when the transport layer supplied one
    pub fn original_request(&self) -> Option<&RawRequest> {
        self.original_request.as_ref()
    }

    /// Record the current wall-clock instant for `stage`.
    ///
    /// If the wall clock has stepped backwards since the predecessor was
    /// recorded, the predecessor's instant is used instead.
    pub fn set_timestamp(&self, stage: LifecycleStage) -> Result<Timestamp, TimestampError> {
        let mut timestamps = self.lock_timestamps()?;

        let mut at = Timestamp::now();
        if let Some(predecessor_at) = stage.predecessor().and_then(|p| timestamps.get(p)) {
            at = at.max(predecessor_at);
        }

        timestamps.record(stage, at)?;
        Ok(at)
    }

    /// Record an explicit instant for `stage`
    pub fn set_timestamp_at(
        &self,
        stage: LifecycleStage,
        at: Timestamp,
    ) -> Result<(), TimestampError> {
        self.lock_timestamps()?.record(stage, at)
    }

    /// Get the instant recorded for `stage`
    pub fn timestamp(&self, stage: LifecycleStage) -> Option<Timestamp> {
        self.lock_timestamps().ok().and_then(|t| t.get(stage))
    }

    /// Snapshot of the whole timeline
    pub fn timestamps(&self) -> Result<EventTimestamps, TimestampError> {
        Ok(self.lock_timestamps()?.clone())
    }

    fn lock_timestamps(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, EventTimestamps>, TimestampError> {
        self.timestamps
            .lock()
            .map_err(|e| TimestampError::LockPoisoned {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
