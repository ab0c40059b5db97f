//! Resolution observers
//!
//! A registry reports what it resolves to a [`ResolutionObserver`]. The
//! default [`NoopObserver`] reports itself disabled, and the registry then
//! skips timing and bookkeeping on the resolution path entirely.
//! [`ResolutionDiagnostics`] keeps the resolution stack for cycle detection,
//! a consumer → dependency graph, factory timings and registration warnings.
//!
//! # Example
//!
//! ```rust
//! use domain_injector::{ResolutionDiagnostics, ServiceRegistry};
//! use std::sync::Arc;
//!
//! struct Clock;
//!
//! let diagnostics = Arc::new(ResolutionDiagnostics::new());
//! let registry = ServiceRegistry::with_observer(diagnostics.clone());
//! registry.lazy(|| Clock);
//!
//! registry.resolve::<Clock>().unwrap();
//! assert!(diagnostics.initialization_time(std::any::type_name::<Clock>()).is_some());
//! ```

use crate::{DiError, Result, ServiceKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Observer of resolution and registration events.
///
/// All methods have no-op defaults. Implementations must not call back into
/// the registry that reports to them.
pub trait ResolutionObserver: Send + Sync {
    /// Whether the registry should report resolution events at all
    fn enabled(&self) -> bool {
        false
    }

    /// An injector started processing `consumer`.
    ///
    /// Fails with `CircularDependency` if `consumer` is already being resolved.
    fn begin_context(&self, consumer: &'static str) -> Result<()> {
        let _ = consumer;
        Ok(())
    }

    /// The innermost injector finished
    fn end_context(&self) {}

    /// Consumers currently being resolved, outermost first
    fn resolution_path(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// A dependency was resolved while the current context was active
    fn dependency_resolved(&self, key: ServiceKey) {
        let _ = key;
    }

    /// A factory ran to produce `key`
    fn factory_invoked(&self, key: ServiceKey, elapsed: Duration) {
        let _ = (key, elapsed);
    }

    /// A registration replaced an existing binding for `key`
    fn duplicate_registration(&self, key: ServiceKey) {
        let _ = key;
    }
}

/// Observer that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ResolutionObserver for NoopObserver {}

/// A consumer → dependency pair recorded during resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub consumer: &'static str,
    pub dependency: &'static str,
}

/// Non-fatal findings recorded by diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticWarning {
    /// A binding was overwritten by a later registration
    DuplicateRegistration { key: &'static str },
}

#[derive(Default)]
struct DiagnosticsState {
    stack: Vec<&'static str>,
    graph: BTreeMap<&'static str, BTreeSet<&'static str>>,
    timings: HashMap<&'static str, Duration>,
    warnings: Vec<DiagnosticWarning>,
}

/// Recording observer: resolution stack, dependency graph, timings, warnings.
#[derive(Default)]
pub struct ResolutionDiagnostics {
    state: Mutex<DiagnosticsState>,
}

impl ResolutionDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DiagnosticsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dependencies recorded for `consumer` (a fully qualified type name)
    pub fn dependencies_of(&self, consumer: &str) -> Vec<&'static str> {
        self.state()
            .graph
            .get(consumer)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Consumers that resolved `dependency`
    pub fn consumers_of(&self, dependency: &str) -> Vec<&'static str> {
        self.state()
            .graph
            .iter()
            .filter(|(_, deps)| deps.contains(dependency))
            .map(|(&consumer, _)| consumer)
            .collect()
    }

    /// Every recorded edge, sorted by consumer then dependency
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.state()
            .graph
            .iter()
            .flat_map(|(&consumer, deps)| {
                deps.iter().map(move |&dependency| DependencyEdge {
                    consumer,
                    dependency,
                })
            })
            .collect()
    }

    /// Every consumer that has a graph entry
    pub fn consumers(&self) -> Vec<&'static str> {
        self.state().graph.keys().copied().collect()
    }

    /// Time spent in the most recent factory invocation for `key`
    pub fn initialization_time(&self, key: &str) -> Option<Duration> {
        self.state().timings.get(key).copied()
    }

    pub fn warnings(&self) -> Vec<DiagnosticWarning> {
        self.state().warnings.clone()
    }

    /// Whether any injector context is open
    pub fn is_resolving(&self) -> bool {
        !self.state().stack.is_empty()
    }

    /// Forget the graph, timings and warnings. The stack is left alone.
    pub fn reset(&self) {
        let mut state = self.state();
        state.graph.clear();
        state.timings.clear();
        state.warnings.clear();
    }
}

impl ResolutionObserver for ResolutionDiagnostics {
    fn enabled(&self) -> bool {
        true
    }

    fn begin_context(&self, consumer: &'static str) -> Result<()> {
        let mut state = self.state();

        if state.stack.contains(&consumer) {
            let mut path = state.stack.clone();
            path.push(consumer);

            #[cfg(feature = "logging")]
            warn!(
                target: "domain_injector",
                consumer = consumer,
                depth = path.len(),
                "Circular dependency detected"
            );

            return Err(DiError::circular(path));
        }

        state.stack.push(consumer);
        state.graph.entry(consumer).or_default();
        Ok(())
    }

    fn end_context(&self) {
        self.state().stack.pop();
    }

    fn resolution_path(&self) -> Vec<&'static str> {
        self.state().stack.clone()
    }

    fn dependency_resolved(&self, key: ServiceKey) {
        let mut state = self.state();
        if let Some(&consumer) = state.stack.last() {
            state
                .graph
                .entry(consumer)
                .or_default()
                .insert(key.type_name());
        }
    }

    fn factory_invoked(&self, key: ServiceKey, elapsed: Duration) {
        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            service = key.type_name(),
            elapsed_us = elapsed.as_micros() as u64,
            "Service initialized"
        );

        self.state().timings.insert(key.type_name(), elapsed);
    }

    fn duplicate_registration(&self, key: ServiceKey) {
        self.state()
            .warnings
            .push(DiagnosticWarning::DuplicateRegistration {
                key: key.type_name(),
            });
    }
}

impl std::fmt::Debug for ResolutionDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ResolutionDiagnostics")
            .field("stack", &state.stack)
            .field("consumers", &state.graph.len())
            .field("warnings", &state.warnings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;
    struct C;

    fn name<T>() -> &'static str {
        std::any::type_name::<T>()
    }

    #[test]
    fn test_noop_is_disabled() {
        let noop = NoopObserver;
        assert!(!noop.enabled());
        assert!(noop.begin_context(name::<A>()).is_ok());
        assert!(noop.begin_context(name::<A>()).is_ok());
        assert!(noop.resolution_path().is_empty());
    }

    #[test]
    fn test_cycle_reports_full_path() {
        let diagnostics = ResolutionDiagnostics::new();
        diagnostics.begin_context(name::<A>()).unwrap();
        diagnostics.begin_context(name::<B>()).unwrap();

        let err = diagnostics.begin_context(name::<A>()).unwrap_err();
        assert_eq!(
            err.cycle_path().unwrap(),
            &[name::<A>(), name::<B>(), name::<A>()]
        );
        assert_eq!(err.to_string(), "Circular dependency detected: A → B → A");
    }

    #[test]
    fn test_edges_follow_top_of_stack() {
        let diagnostics = ResolutionDiagnostics::new();

        // Outside any context nothing is recorded
        diagnostics.dependency_resolved(ServiceKey::of::<C>());
        assert!(diagnostics.edges().is_empty());

        diagnostics.begin_context(name::<A>()).unwrap();
        diagnostics.dependency_resolved(ServiceKey::of::<B>());
        diagnostics.begin_context(name::<B>()).unwrap();
        diagnostics.dependency_resolved(ServiceKey::of::<C>());
        diagnostics.end_context();
        diagnostics.end_context();

        assert!(!diagnostics.is_resolving());
        assert_eq!(diagnostics.dependencies_of(name::<A>()), vec![name::<B>()]);
        assert_eq!(diagnostics.dependencies_of(name::<B>()), vec![name::<C>()]);
        assert_eq!(diagnostics.consumers_of(name::<C>()), vec![name::<B>()]);
        assert_eq!(diagnostics.edges().len(), 2);
    }

    #[test]
    fn test_context_creates_graph_entry() {
        let diagnostics = ResolutionDiagnostics::new();
        diagnostics.begin_context(name::<C>()).unwrap();
        diagnostics.end_context();

        assert_eq!(diagnostics.consumers(), vec![name::<C>()]);
        assert!(diagnostics.dependencies_of(name::<C>()).is_empty());
    }

    #[test]
    fn test_duplicate_warnings_and_reset() {
        let diagnostics = ResolutionDiagnostics::new();
        diagnostics.duplicate_registration(ServiceKey::of::<A>());
        diagnostics.factory_invoked(ServiceKey::of::<A>(), Duration::from_micros(5));

        assert_eq!(
            diagnostics.warnings(),
            vec![DiagnosticWarning::DuplicateRegistration { key: name::<A>() }]
        );
        assert_eq!(
            diagnostics.initialization_time(name::<A>()),
            Some(Duration::from_micros(5))
        );

        diagnostics.reset();
        assert!(diagnostics.warnings().is_empty());
        assert!(diagnostics.initialization_time(name::<A>()).is_none());
    }
}
