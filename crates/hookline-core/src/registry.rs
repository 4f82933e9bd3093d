//! Processor registry for route-based webhook dispatch.
//!
//! [`ProcessorRegistry`] maps a webhook [`Route`] to the ordered list of
//! [`ProcessorFactory`]s registered under it. Registration order is kept and
//! becomes the tie-break order used by the aggregator.
//!
//! The registry is written at startup (or rarely, for dynamic registration)
//! and read by every dispatch. Writes replace the route table copy-on-write, so
//! readers only ever hold the lock long enough to clone an `Arc` and in-flight
//! dispatches keep the snapshot they started with.

use crate::errors::PipelineError;
use crate::processor::ProcessorFactory;
use crate::Route;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Immutable snapshot of the factories registered for one route.
pub type ProcessorList = Arc<Vec<Arc<dyn ProcessorFactory>>>;

type RouteTable = HashMap<Route, ProcessorList>;

// ============================================================================
// ProcessorRegistry
// ============================================================================

/// Registry mapping routes to their processor factories.
///
/// # Examples
///
/// ```rust
/// use hookline_core::{ProcessorRegistry, Route};
///
/// let registry = ProcessorRegistry::new();
/// let route = Route::new("/integration/webhook").unwrap();
///
/// assert!(!registry.contains(&route));
/// assert!(registry.processors_for(&route).unwrap().is_none());
/// ```
#[derive(Default)]
pub struct ProcessorRegistry {
    routes: RwLock<Arc<RouteTable>>,
}

impl ProcessorRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `route`.
    ///
    /// Registering the same factory instance (by `Arc` identity) twice for a
    /// route is a no-op. Returns `true` when the factory was added.
    pub fn register(
        &self,
        route: Route,
        factory: Arc<dyn ProcessorFactory>,
    ) -> Result<bool, PipelineError> {
        let mut guard = self.routes.write().map_err(|e| PipelineError::Registry {
            message: format!("registry lock poisoned: {}", e),
        })?;

        let existing = guard.get(&route);
        if existing.is_some_and(|list| list.iter().any(|f| Arc::ptr_eq(f, &factory))) {
            return Ok(false);
        }

        let mut factories: Vec<Arc<dyn ProcessorFactory>> =
            existing.map(|list| list.to_vec()).unwrap_or_default();
        debug!(
            route = %route,
            processor = factory.name(),
            position = factories.len(),
            "Registering processor factory"
        );
        factories.push(factory);

        let mut table: RouteTable = (**guard).clone();
        table.insert(route, Arc::new(factories));
        *guard = Arc::new(table);

        Ok(true)
    }

    /// Snapshot of the factories registered for `route`, in registration order.
    ///
    /// Returns `Ok(None)` when nothing is registered for the route.
    pub fn processors_for(&self, route: &Route) -> Result<Option<ProcessorList>, PipelineError> {
        Ok(self.snapshot()?.get(route).cloned())
    }

    /// Check whether any factory is registered for `route`.
    pub fn contains(&self, route: &Route) -> bool {
        self.snapshot()
            .map(|table| table.contains_key(route))
            .unwrap_or(false)
    }

    /// All routes with at least one registered factory, sorted.
    pub fn routes(&self) -> Result<Vec<Route>, PipelineError> {
        let mut routes: Vec<Route> = self.snapshot()?.keys().cloned().collect();
        routes.sort();
        Ok(routes)
    }

    fn snapshot(&self) -> Result<Arc<RouteTable>, PipelineError> {
        self.routes
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|e| PipelineError::Registry {
                message: format!("registry lock poisoned: {}", e),
            })
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes = self.routes().unwrap_or_default();
        f.debug_struct("ProcessorRegistry")
            .field("routes", &routes)
            .finish()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
