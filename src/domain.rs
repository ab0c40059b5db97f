//! Domains
//!
//! A domain is a bounded runtime scope that owns one registry and one
//! injector bound to it. Activating a domain registers its manifest, runs
//! its explicit configuration, warms eager services and sweeps the
//! components its host already holds.

use crate::declaration::{ServiceDeclaration, ServiceManifest};
use crate::diagnostics::ResolutionObserver;
use crate::inject::{Component, Inject, instance_id};
use crate::injector::Injector;
use crate::{DiError, Lifetime, Result, ServiceRegistry};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

// =============================================================================
// Identity, kind and state
// =============================================================================

/// Unique domain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(u64);

impl DomainId {
    /// Generate a new unique domain ID.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain-{}", self.0)
    }
}

/// Whether a domain lives for the whole process or for one subdivision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainKind {
    Global,
    Local,
}

/// Lifecycle state of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainState {
    Uninitialized,
    Configuring,
    Active,
    Retired,
}

impl DomainState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainState::Uninitialized => "uninitialized",
            DomainState::Configuring => "configuring",
            DomainState::Active => "active",
            DomainState::Retired => "retired",
        }
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// DomainHost
// =============================================================================

/// The embedding application's view of what lives inside a domain.
///
/// Only [`components`](Self::components) is required; the rest default to
/// searches over it.
pub trait DomainHost: Send + Sync {
    /// Live components within the domain's boundary
    fn components(&self) -> Vec<Arc<dyn Component>>;

    /// Whether `instance` lives within the boundary
    fn contains(&self, instance: &Arc<dyn Component>) -> bool {
        let id = instance_id(instance);
        self.components()
            .iter()
            .any(|component| instance_id(component) == id)
    }

    /// An existing component of the given concrete type
    fn locate(&self, type_id: TypeId) -> Option<Arc<dyn Component>> {
        self.components()
            .into_iter()
            .find(|component| component.as_any().type_id() == type_id)
    }

    /// Take ownership of a host-bound service the domain had to create
    fn adopt(&self, component: Arc<dyn Component>) {
        let _ = component;
    }
}

/// A plain in-memory [`DomainHost`].
///
/// Adopted services are added to the set.
#[derive(Default)]
pub struct ComponentSet {
    members: RwLock<Vec<Arc<dyn Component>>>,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `component` unless it is already a member
    pub fn insert(&self, component: Arc<dyn Component>) -> bool {
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        let id = instance_id(&component);
        if members.iter().any(|member| instance_id(member) == id) {
            return false;
        }
        members.push(component);
        true
    }

    /// Wrap `value` and add it
    pub fn add<T: Inject>(&self, value: T) -> Arc<T> {
        let instance = Arc::new(value);
        self.insert(instance.clone());
        instance
    }

    pub fn remove(&self, component: &Arc<dyn Component>) -> bool {
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        let id = instance_id(component);
        let before = members.len();
        members.retain(|member| instance_id(member) != id);
        members.len() != before
    }

    pub fn len(&self) -> usize {
        self.members.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DomainHost for ComponentSet {
    fn components(&self) -> Vec<Arc<dyn Component>> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn adopt(&self, component: Arc<dyn Component>) {
        self.insert(component);
    }
}

impl fmt::Debug for ComponentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSet").field("len", &self.len()).finish()
    }
}

// =============================================================================
// DomainConfig
// =============================================================================

/// Explicit registrations run after the manifest
pub type ConfigureFn = Arc<dyn Fn(&ServiceRegistry) -> Result<()> + Send + Sync>;

/// Everything needed to activate (and later restart) a domain.
///
/// # Examples
///
/// ```rust
/// use domain_injector::{service, ComponentSet, DomainConfig, DomainKind, Inject};
/// use std::sync::Arc;
///
/// #[derive(Default)]
/// struct Clock;
/// impl Inject for Clock {}
///
/// struct Settings { volume: u8 }
///
/// let config = DomainConfig::local("level-1")
///     .service(service!(Clock))
///     .configure(|registry| {
///         registry.register_singleton(Settings { volume: 7 });
///         Ok(())
///     })
///     .host(Arc::new(ComponentSet::new()));
///
/// assert_eq!(config.kind(), DomainKind::Local);
/// assert_eq!(config.name(), "level-1");
/// ```
#[derive(Clone)]
pub struct DomainConfig {
    name: String,
    kind: DomainKind,
    manifest: ServiceManifest,
    configure: Vec<ConfigureFn>,
    host: Option<Arc<dyn DomainHost>>,
    observer: Option<Arc<dyn ResolutionObserver>>,
    inherit_global: bool,
}

impl DomainConfig {
    fn new(name: impl Into<String>, kind: DomainKind) -> Self {
        Self {
            name: name.into(),
            kind,
            manifest: ServiceManifest::new(),
            configure: Vec::new(),
            host: None,
            observer: None,
            inherit_global: true,
        }
    }

    /// A process-lifetime domain; at most one may be active
    pub fn global(name: impl Into<String>) -> Self {
        Self::new(name, DomainKind::Global)
    }

    /// A domain bound to one subdivision of the application
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, DomainKind::Local)
    }

    /// Replace the manifest
    pub fn manifest(mut self, manifest: ServiceManifest) -> Self {
        self.manifest = manifest;
        self
    }

    /// Add one declaration to the manifest
    pub fn service<T: Inject>(mut self, declaration: ServiceDeclaration<T>) -> Self {
        self.manifest.add(declaration);
        self
    }

    /// Add explicit registrations, run after the manifest in the order given
    pub fn configure<F>(mut self, configure: F) -> Self
    where
        F: Fn(&ServiceRegistry) -> Result<()> + Send + Sync + 'static,
    {
        self.configure.push(Arc::new(configure));
        self
    }

    pub fn host(mut self, host: Arc<dyn DomainHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Report resolutions to `observer` instead of the parent's observer
    pub fn diagnostics(mut self, observer: Arc<dyn ResolutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Whether a local domain chains to the global domain's registry
    pub fn inherit_global(mut self, inherit: bool) -> Self {
        self.inherit_global = inherit;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> DomainKind {
        self.kind
    }

    #[inline]
    pub fn inherits_global(&self) -> bool {
        self.kind == DomainKind::Local && self.inherit_global
    }
}

impl fmt::Debug for DomainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("manifest", &self.manifest)
            .field("configure", &self.configure.len())
            .field("has_host", &self.host.is_some())
            .field("diagnostics", &self.observer.is_some())
            .field("inherit_global", &self.inherit_global)
            .finish()
    }
}

// =============================================================================
// Injected instances
// =============================================================================

/// Entry count below which dead instances are not pruned
const PRUNE_FLOOR: usize = 64;

/// Injected instances by allocation address.
///
/// Dead entries are pruned whenever the map reaches `prune_at`, which is
/// then reset to twice the live count.
struct InjectedSet {
    entries: HashMap<usize, Weak<dyn Component>>,
    prune_at: usize,
}

impl InjectedSet {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            prune_at: PRUNE_FLOOR,
        }
    }

    fn insert(&mut self, instance: &Arc<dyn Component>) {
        self.entries.insert(instance_id(instance), Arc::downgrade(instance));
        if self.entries.len() >= self.prune_at {
            self.prune();
        }
    }

    fn prune(&mut self) {
        #[cfg(feature = "logging")]
        let before = self.entries.len();

        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.prune_at = (self.entries.len() * 2).max(PRUNE_FLOOR);

        #[cfg(feature = "logging")]
        trace!(
            target: "domain_injector",
            pruned = before - self.entries.len(),
            live = self.entries.len(),
            "Pruned dropped instances"
        );
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.prune_at = PRUNE_FLOOR;
    }
}

// =============================================================================
// Domain
// =============================================================================

/// An active (or retired) domain.
///
/// Created by [`DomainRuntime::activate`](crate::DomainRuntime::activate).
pub struct Domain {
    id: DomainId,
    config: DomainConfig,
    state: Mutex<DomainState>,
    registry: ServiceRegistry,
    injector: Injector,
    injected: Mutex<InjectedSet>,
}

impl Domain {
    /// Run the activation sequence.
    ///
    /// `skip` reports instances another active domain already injected.
    pub(crate) fn start(
        id: DomainId,
        config: DomainConfig,
        parent: Option<&ServiceRegistry>,
        skip: &dyn Fn(&Arc<dyn Component>) -> bool,
    ) -> Result<Arc<Domain>> {
        let registry = match (parent, &config.observer) {
            (Some(parent), Some(observer)) => parent.child_with_observer(Arc::clone(observer)),
            (Some(parent), None) => parent.child(),
            (None, Some(observer)) => ServiceRegistry::with_observer(Arc::clone(observer)),
            (None, None) => ServiceRegistry::new(),
        };

        let domain = Arc::new(Domain {
            id,
            injector: Injector::new(registry.clone()),
            registry,
            config,
            state: Mutex::new(DomainState::Uninitialized),
            injected: Mutex::new(InjectedSet::new()),
        });

        match domain.configure_and_sweep(skip) {
            Ok(()) => {
                domain.set_state(DomainState::Active);
                Ok(domain)
            }
            Err(err) => {
                #[cfg(feature = "logging")]
                warn!(
                    target: "domain_injector",
                    domain = %domain.id,
                    name = %domain.config.name,
                    error = %err,
                    "Domain activation failed"
                );

                domain.set_state(DomainState::Retired);
                Err(err)
            }
        }
    }

    fn configure_and_sweep(&self, skip: &dyn Fn(&Arc<dyn Component>) -> bool) -> Result<()> {
        self.set_state(DomainState::Configuring);
        let host = self.config.host.as_deref();

        // Auto-registration
        let mut created = Vec::new();
        for service in self.config.manifest.services() {
            if let Some(instance) = service.register(&self.registry, host)? {
                created.push(instance);
            }
        }

        // Explicit configuration overwrites auto-registration on collision
        for configure in &self.config.configure {
            configure(&self.registry)?;
        }

        // Eager services see every registration before they are built
        for service in self.config.manifest.services() {
            if service.lifetime() == Lifetime::EagerSingleton && !service.is_host_bound() {
                self.registry.resolve_key(service.key())?;
            }
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            domain = %self.id,
            name = %self.config.name,
            services = self.registry.len(),
            "Domain services registered"
        );

        #[allow(unused_variables)]
        let swept = self.sweep(created, skip)?;

        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            domain = %self.id,
            name = %self.config.name,
            swept = swept,
            "Domain sweep complete"
        );

        Ok(())
    }

    /// Inject every existing member exactly once; fails on the first error
    fn sweep(
        &self,
        created: Vec<Arc<dyn Component>>,
        skip: &dyn Fn(&Arc<dyn Component>) -> bool,
    ) -> Result<usize> {
        let mut members = self
            .config
            .host
            .as_ref()
            .map(|host| host.components())
            .unwrap_or_default();

        for instance in created {
            let id = instance_id(&instance);
            if !members.iter().any(|member| instance_id(member) == id) {
                members.push(instance);
            }
        }

        let mut swept = 0;
        for member in &members {
            if self.has_injected(member) || skip(member) {
                #[cfg(feature = "logging")]
                trace!(
                    target: "domain_injector",
                    domain = %self.id,
                    component = member.component_name(),
                    "Component already injected, skipping"
                );
                continue;
            }

            self.injector.inject_component(member.as_ref())?;
            self.record(member);
            swept += 1;
        }

        Ok(swept)
    }

    /// Inject a component created after the sweep.
    pub(crate) fn inject_instance(&self, instance: &Arc<dyn Component>) -> Result<()> {
        let state = self.state();
        if state != DomainState::Active {
            return Err(DiError::InvalidDomainState {
                domain: self.id.to_string(),
                operation: "inject",
                state: state.as_str(),
            });
        }

        self.injector.inject_component(instance.as_ref())?;
        self.record(instance);

        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            domain = %self.id,
            component = instance.component_name(),
            "Late injection complete"
        );

        Ok(())
    }

    pub(crate) fn retire(&self) {
        self.set_state(DomainState::Retired);
        self.injected_set().clear();
    }

    fn record(&self, instance: &Arc<dyn Component>) {
        self.injected_set().insert(instance);
    }

    fn injected_set(&self) -> MutexGuard<'_, InjectedSet> {
        self.injected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: DomainState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[inline]
    pub fn id(&self) -> DomainId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    pub fn kind(&self) -> DomainKind {
        self.config.kind
    }

    pub fn state(&self) -> DomainState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state() == DomainState::Active
    }

    /// The domain's own registry
    #[inline]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    #[inline]
    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    #[inline]
    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    pub fn host(&self) -> Option<&Arc<dyn DomainHost>> {
        self.config.host.as_ref()
    }

    /// Whether `instance` lives within this domain's host
    pub fn contains(&self, instance: &Arc<dyn Component>) -> bool {
        self.config
            .host
            .as_ref()
            .is_some_and(|host| host.contains(instance))
    }

    /// Whether this domain has injected `instance`.
    ///
    /// Entries whose instance has been dropped no longer count, so a new
    /// allocation at the same address is injected afresh.
    pub fn has_injected(&self, instance: &Arc<dyn Component>) -> bool {
        let id = instance_id(instance);
        let mut injected = self.injected_set();
        match injected.entries.get(&id).map(|weak| weak.strong_count() > 0) {
            Some(true) => true,
            Some(false) => {
                injected.entries.remove(&id);
                false
            }
            None => false,
        }
    }

    /// Number of live instances this domain has injected
    pub fn injected_count(&self) -> usize {
        self.injected_set()
            .entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    #[cfg(test)]
    fn tracked_entries(&self) -> usize {
        self.injected_set().entries.len()
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("kind", &self.config.kind)
            .field("state", &self.state())
            .field("registry", &self.registry)
            .field("injected", &self.injected_count())
            .finish()
    }
}
