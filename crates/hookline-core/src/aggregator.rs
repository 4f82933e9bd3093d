//! # Result Aggregator
//!
//! Merges per-processor outcomes into one [`AggregatedResult`] keyed by
//! resource kind, plus a parallel list of [`Diagnostic`]s.
//!
//! # Merge rules
//!
//! - Records are bucketed by the kind they were produced for, never by
//!   inspecting their contents.
//! - Within a kind, `upserted` and `deleted` lists are concatenated in
//!   processor registration order.
//! - Last writer wins in registration order: when a processor emits a record
//!   whose identifier an earlier processor already emitted for the same kind
//!   (as upsert or delete), the earlier entry is dropped. An upsert followed
//!   by a later delete therefore leaves only the delete.
//! - Records without an identifier are never de-duplicated, and a processor
//!   never supersedes its own records.
//! - Only SUCCEEDED outcomes contribute records; every outcome gets a
//!   diagnostic.

use crate::dispatcher::{ProcessingOutcome, ProcessingStatus};
use crate::Kind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// Identity resolution
// ============================================================================

/// Extracts the logical identifier of a raw record.
pub trait IdentityResolver: Send + Sync {
    /// Identifier of `record` within `kind`, or `None` if it has none
    fn identify(&self, kind: &Kind, record: &Value) -> Option<String>;
}

/// Reads the identifier from a top-level field.
///
/// String and number values are accepted; anything else has no identity.
/// The identity carries the JSON type, so `"1"` and `1` are different records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIdentityResolver {
    field: String,
}

impl FieldIdentityResolver {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl Default for FieldIdentityResolver {
    fn default() -> Self {
        Self::new("id")
    }
}

impl IdentityResolver for FieldIdentityResolver {
    fn identify(&self, _kind: &Kind, record: &Value) -> Option<String> {
        match record.get(&self.field)? {
            Value::String(value) => Some(format!("string:{value}")),
            Value::Number(value) => Some(format!("number:{value}")),
            _ => None,
        }
    }
}

// ============================================================================
// Aggregated output
// ============================================================================

/// Merged records for one kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindResults {
    pub upserted: Vec<Value>,
    pub deleted: Vec<Value>,
}

/// Merged output of every successful processor, keyed by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub kinds: BTreeMap<Kind, KindResults>,
}

impl AggregatedResult {
    /// Results for one kind
    pub fn get(&self, kind: &Kind) -> Option<&KindResults> {
        self.kinds.get(kind)
    }

    /// Check if no kind has any entry
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn upserted_count(&self) -> usize {
        self.kinds.values().map(|k| k.upserted.len()).sum()
    }

    pub fn deleted_count(&self) -> usize {
        self.kinds.values().map(|k| k.deleted.len()).sum()
    }
}

/// Per-processor status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub processor_name: String,
    pub status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl From<&ProcessingOutcome> for Diagnostic {
    fn from(outcome: &ProcessingOutcome) -> Self {
        Self {
            processor_name: outcome.processor_name.clone(),
            status: outcome.status.clone(),
            error: outcome.status.error(),
            attempts: outcome.attempts,
            duration_ms: outcome.duration_ms,
        }
    }
}

// ============================================================================
// ResultAggregator
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Operation {
    Upsert,
    Delete,
}

struct Entry {
    operation: Operation,
    identity: Option<String>,
    record: Value,
}

/// Deterministic merge of processor outcomes.
#[derive(Clone)]
pub struct ResultAggregator {
    resolver: Arc<dyn IdentityResolver>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(Arc::new(FieldIdentityResolver::default()))
    }
}

impl fmt::Debug for ResultAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultAggregator").finish_non_exhaustive()
    }
}

impl ResultAggregator {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { resolver }
    }

    /// Merge `outcomes` and build one diagnostic per outcome.
    ///
    /// Outcomes are processed in registration order regardless of the order
    /// of the slice.
    pub fn aggregate(&self, outcomes: &[ProcessingOutcome]) -> (AggregatedResult, Vec<Diagnostic>) {
        let mut ordered: Vec<&ProcessingOutcome> = outcomes.iter().collect();
        ordered.sort_by_key(|o| o.registration_index);

        let mut buckets: BTreeMap<Kind, Vec<Entry>> = BTreeMap::new();

        for outcome in ordered.iter().filter(|o| o.status.is_succeeded()) {
            for (kind, raw) in &outcome.results {
                let incoming: Vec<Entry> = raw
                    .upserted
                    .iter()
                    .map(|r| (Operation::Upsert, r))
                    .chain(raw.deleted.iter().map(|r| (Operation::Delete, r)))
                    .map(|(operation, record)| Entry {
                        operation,
                        identity: self.resolver.identify(kind, record),
                        record: record.clone(),
                    })
                    .collect();

                let identities: HashSet<&str> = incoming
                    .iter()
                    .filter_map(|e| e.identity.as_deref())
                    .collect();

                let bucket = buckets.entry(kind.clone()).or_default();
                let before = bucket.len();
                bucket.retain(|existing| {
                    existing
                        .identity
                        .as_deref()
                        .map_or(true, |id| !identities.contains(id))
                });

                let superseded = before - bucket.len();
                if superseded > 0 {
                    debug!(
                        kind = %kind,
                        processor = %outcome.processor_name,
                        superseded,
                        "Later processor superseded earlier records"
                    );
                }

                bucket.extend(incoming);
            }
        }

        let kinds = buckets
            .into_iter()
            .map(|(kind, entries)| {
                let mut results = KindResults::default();
                for entry in entries {
                    match entry.operation {
                        Operation::Upsert => results.upserted.push(entry.record),
                        Operation::Delete => results.deleted.push(entry.record),
                    }
                }
                (kind, results)
            })
            .collect();

        let diagnostics = ordered.into_iter().map(Diagnostic::from).collect();

        (AggregatedResult { kinds }, diagnostics)
    }
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod tests;
