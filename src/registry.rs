//! Hierarchical service registry
//!
//! The `ServiceRegistry` maps service keys to bindings and resolves them,
//! falling back to its parent chain for keys it does not bind itself.

use crate::diagnostics::{NoopObserver, ResolutionObserver};
use crate::factory::{
    Binding, ErasedService, FactoryFn, LazyFactory, TransientFactory, erase, erase_factory, unerase,
};
use crate::storage::{CastFn, Exposure, ServiceDescriptor, ServiceStorage};
use crate::{DiError, Injectable, Lifetime, Result, ServiceKey};
use std::any::TypeId;
use std::cell::Cell;
use std::sync::{Arc, Weak};
use std::time::Instant;

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

// =============================================================================
// Resolution depth guard
// =============================================================================

/// Deepest nesting of factory-driven resolutions on one thread
const MAX_RESOLUTION_DEPTH: usize = 64;

thread_local! {
    static RESOLUTION_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts nested resolutions so a transient cycle fails instead of
/// overflowing the stack when no diagnostics are attached.
struct DepthGuard;

impl DepthGuard {
    fn enter(key: ServiceKey) -> Result<Self> {
        RESOLUTION_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= MAX_RESOLUTION_DEPTH {
                return Err(DiError::DepthExceeded {
                    key: key.type_name(),
                    depth: current,
                });
            }
            depth.set(current + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        RESOLUTION_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

// =============================================================================
// ServiceRegistry
// =============================================================================

struct RegistryInner {
    storage: ServiceStorage,
    /// Back-reference only: a child never keeps its parent alive
    parent: Option<Weak<RegistryInner>>,
    observer: Arc<dyn ResolutionObserver>,
    depth: u32,
}

/// A registry of services with eager, lazy and transient lifetimes.
///
/// Cloning is cheap and yields a handle to the same registry. A child
/// registry resolves its own bindings first and then walks its parents;
/// it never writes to a parent.
///
/// # Examples
///
/// ```rust
/// use domain_injector::ServiceRegistry;
///
/// struct Config { name: String }
/// struct Session { id: u32 }
///
/// let root = ServiceRegistry::new();
/// root.register_singleton(Config { name: "app".into() });
///
/// let child = root.child();
/// child.register_singleton(Session { id: 7 });
///
/// assert_eq!(child.resolve::<Config>().unwrap().name, "app");
/// assert!(child.is_registered::<Session>());
/// assert!(!root.is_registered::<Session>());
/// ```
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    /// Create a new root registry without diagnostics.
    #[inline]
    pub fn new() -> Self {
        Self::with_observer(Arc::new(NoopObserver))
    }

    /// Create a new root registry reporting to `observer`.
    pub fn with_observer(observer: Arc<dyn ResolutionObserver>) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            depth = 0,
            diagnostics = observer.enabled(),
            "Creating new root service registry"
        );

        Self {
            inner: Arc::new(RegistryInner {
                storage: ServiceStorage::new(),
                parent: None,
                observer,
                depth: 0,
            }),
        }
    }

    /// Create a child registry that shares this registry's observer.
    #[inline]
    pub fn child(&self) -> Self {
        self.child_with_observer(Arc::clone(&self.inner.observer))
    }

    /// Create a child registry reporting to its own observer.
    pub fn child_with_observer(&self, observer: Arc<dyn ResolutionObserver>) -> Self {
        let child_depth = self.inner.depth + 1;

        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            parent_depth = self.inner.depth,
            child_depth = child_depth,
            parent_services = self.inner.storage.len(),
            "Creating child registry"
        );

        Self {
            inner: Arc::new(RegistryInner {
                storage: ServiceStorage::new(),
                parent: Some(Arc::downgrade(&self.inner)),
                observer,
                depth: child_depth,
            }),
        }
    }

    /// The parent registry, if this is a child and the parent is still alive.
    pub fn parent(&self) -> Option<ServiceRegistry> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| ServiceRegistry { inner })
    }

    /// The observer resolution events are reported to.
    #[inline]
    pub fn observer(&self) -> &Arc<dyn ResolutionObserver> {
        &self.inner.observer
    }

    /// Get the registry depth (0 = root).
    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    /// Whether two handles refer to the same registry.
    #[inline]
    pub fn ptr_eq(&self, other: &ServiceRegistry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Registration Methods
    // =========================================================================

    /// Bind `T` to a fixed value.
    ///
    /// Re-registering a key overwrites the earlier binding in this registry
    /// and logs a warning; it is not an error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use domain_injector::{Arc, ServiceRegistry};
    ///
    /// struct Logger;
    ///
    /// let registry = ServiceRegistry::new();
    /// registry.register_singleton(Logger);
    ///
    /// let a = registry.resolve::<Logger>().unwrap();
    /// let b = registry.resolve::<Logger>().unwrap();
    /// assert!(Arc::ptr_eq(&a, &b));
    /// ```
    #[inline]
    pub fn register_singleton<T: Injectable>(&self, instance: T) {
        self.register_instance(Arc::new(instance));
    }

    /// Bind `T` to an existing `Arc`, which also allows unsized keys.
    ///
    /// ```rust
    /// use domain_injector::{Arc, ServiceRegistry};
    ///
    /// trait Greeter: Send + Sync { fn greet(&self) -> String; }
    /// struct English;
    /// impl Greeter for English { fn greet(&self) -> String { "hello".into() } }
    ///
    /// let registry = ServiceRegistry::new();
    /// registry.register_instance::<dyn Greeter>(Arc::new(English));
    /// assert_eq!(registry.resolve::<dyn Greeter>().unwrap().greet(), "hello");
    /// ```
    pub fn register_instance<T: ?Sized + Send + Sync + 'static>(&self, instance: Arc<T>) {
        let key = ServiceKey::of::<T>();
        self.insert(key, key.type_name(), Binding::Eager(erase(instance)));
    }

    /// Bind `T` to a factory invoked at most once; the value is cached for
    /// the lifetime of this registry.
    ///
    /// The factory receives the registry that owns the binding so it can
    /// resolve or inject its own dependencies.
    pub fn register_lazy_singleton<T, F>(&self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceRegistry) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let key = ServiceKey::of::<T>();
        self.register_lazy_as(key, key.type_name(), erase_factory(factory));
    }

    /// Bind `T` to a factory invoked on every resolution.
    pub fn register_transient<T, F>(&self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceRegistry) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let key = ServiceKey::of::<T>();
        self.insert(
            key,
            key.type_name(),
            Binding::Transient(TransientFactory::new(erase_factory(factory), key.type_name())),
        );
    }

    /// Shorthand for [`register_singleton`](Self::register_singleton).
    #[inline]
    pub fn singleton<T: Injectable>(&self, instance: T) {
        self.register_singleton(instance);
    }

    /// Register a lazy singleton from a plain constructor.
    ///
    /// ```rust
    /// use domain_injector::ServiceRegistry;
    /// use std::sync::atomic::{AtomicU32, Ordering};
    ///
    /// static CREATED: AtomicU32 = AtomicU32::new(0);
    ///
    /// struct Clock;
    ///
    /// let registry = ServiceRegistry::new();
    /// registry.lazy(|| {
    ///     CREATED.fetch_add(1, Ordering::SeqCst);
    ///     Clock
    /// });
    ///
    /// assert_eq!(CREATED.load(Ordering::SeqCst), 0);
    /// registry.resolve::<Clock>().unwrap();
    /// registry.resolve::<Clock>().unwrap();
    /// assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    /// ```
    #[inline]
    pub fn lazy<T: Injectable, F>(&self, factory: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register_lazy_singleton(move |_| Ok(Arc::new(factory())));
    }

    /// Register a transient service from a plain constructor.
    #[inline]
    pub fn transient<T: Injectable, F>(&self, factory: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register_transient(move |_| Ok(Arc::new(factory())));
    }

    /// Make values bound under `T` assignable to `B` for
    /// [`resolve_all`](Self::resolve_all).
    ///
    /// ```rust
    /// use domain_injector::{Arc, ServiceRegistry};
    ///
    /// trait Weapon: Send + Sync {}
    /// struct Sword;
    /// impl Weapon for Sword {}
    ///
    /// let registry = ServiceRegistry::new();
    /// registry.register_singleton(Sword);
    /// registry.expose::<Sword, dyn Weapon>(|sword| sword as Arc<dyn Weapon>);
    ///
    /// assert_eq!(registry.resolve_all::<dyn Weapon>().unwrap().len(), 1);
    /// ```
    pub fn expose<T, B>(&self, cast: fn(Arc<T>) -> Arc<B>)
    where
        T: ?Sized + Send + Sync + 'static,
        B: ?Sized + Send + Sync + 'static,
    {
        #[cfg(feature = "logging")]
        trace!(
            target: "domain_injector",
            service = std::any::type_name::<T>(),
            base = std::any::type_name::<B>(),
            "Exposing service under base key"
        );

        let cast: CastFn = Arc::new(move |erased| unerase::<T>(erased).map(|value| erase(cast(value))));
        self.expose_erased(
            ServiceKey::of::<T>(),
            Exposure {
                base: TypeId::of::<B>(),
                cast,
            },
        );
    }

    /// Record an already-erased exposure for bindings under `key`.
    pub(crate) fn expose_erased(&self, key: ServiceKey, exposure: Exposure) {
        self.inner.storage.expose(key.type_id(), exposure);
    }

    /// Register a lazy binding under `key` produced by `implementation`.
    pub(crate) fn register_lazy_as(&self, key: ServiceKey, implementation: &'static str, factory: FactoryFn) {
        self.insert(
            key,
            implementation,
            Binding::Lazy(LazyFactory::new(factory, key.type_name())),
        );
    }

    /// Register an already-erased value under `key`.
    pub(crate) fn register_erased(&self, key: ServiceKey, implementation: &'static str, value: ErasedService) {
        self.insert(key, implementation, Binding::Eager(value));
    }

    fn insert(&self, key: ServiceKey, implementation: &'static str, binding: Binding) {
        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            service = key.type_name(),
            lifetime = binding.lifetime().as_str(),
            depth = self.inner.depth,
            "Registering service"
        );

        if self.inner.storage.insert(key, implementation, binding).is_some() {
            #[cfg(feature = "logging")]
            warn!(
                target: "domain_injector",
                service = key.type_name(),
                depth = self.inner.depth,
                "Service registered twice; the earlier binding was overwritten"
            );

            self.inner.observer.duplicate_registration(key);
        }
    }

    // =========================================================================
    // Resolution Methods
    // =========================================================================

    /// Resolve `T` from this registry or the nearest ancestor binding it.
    ///
    /// Fails with `ServiceNotRegistered` if no registry in the chain binds `T`.
    #[inline]
    pub fn resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        match self.resolve_optional::<T>()? {
            Some(service) => Ok(service),
            None => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "domain_injector",
                    service = std::any::type_name::<T>(),
                    depth = self.inner.depth,
                    "Service not found in registry or parent chain"
                );

                Err(DiError::not_registered::<T>())
            }
        }
    }

    /// Resolve `T`, returning `None` on any failure.
    ///
    /// ```rust
    /// use domain_injector::ServiceRegistry;
    ///
    /// struct OptionalService;
    ///
    /// let registry = ServiceRegistry::new();
    /// assert!(registry.try_resolve::<OptionalService>().is_none());
    /// ```
    #[inline]
    pub fn try_resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resolve::<T>().ok()
    }

    /// Resolve `T`, distinguishing "not bound anywhere" (`Ok(None)`) from
    /// failures while producing the value (`Err`).
    pub fn resolve_optional<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        let key = ServiceKey::of::<T>();
        match self.resolve_key(key)? {
            Some(erased) => unerase::<T>(&erased)
                .map(Some)
                .ok_or_else(|| DiError::Internal(format!("binding for {key} holds a different type"))),
            None => Ok(None),
        }
    }

    /// Every binding in this registry assignable to `B`, in registration
    /// order. Ancestors are not searched.
    ///
    /// A binding is assignable to its own key and to every base it was
    /// [`expose`](Self::expose)d under.
    pub fn resolve_all<B: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<B>>> {
        let base = TypeId::of::<B>();
        let mut resolved = Vec::new();

        for descriptor in self.inner.storage.ordered() {
            let key_id = descriptor.key.type_id();
            let cast = if key_id == base {
                None
            } else {
                match self.inner.storage.exposure(&key_id, &base) {
                    Some(cast) => Some(cast),
                    None => continue,
                }
            };

            let _depth = DepthGuard::enter(descriptor.key)?;
            let value = self.produce(self, &descriptor)?;
            let value = match cast {
                Some(cast) => cast(&value),
                None => Some(value),
            };

            if let Some(item) = value.as_ref().and_then(unerase::<B>) {
                resolved.push(item);
            }
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "domain_injector",
            base = std::any::type_name::<B>(),
            matches = resolved.len(),
            depth = self.inner.depth,
            "Resolved all bindings assignable to base"
        );

        Ok(resolved)
    }

    /// Walk the chain for `key` and produce its value
    pub(crate) fn resolve_key(&self, key: ServiceKey) -> Result<Option<ErasedService>> {
        let _depth = DepthGuard::enter(key)?;
        let type_id = key.type_id();

        // Try local storage first (most common case)
        if let Some(descriptor) = self.inner.storage.get(&type_id) {
            #[cfg(feature = "logging")]
            trace!(
                target: "domain_injector",
                service = key.type_name(),
                depth = self.inner.depth,
                location = "local",
                "Service resolved from current registry"
            );

            return self.produce(self, &descriptor).map(Some);
        }

        // Walk parent chain
        let mut current = upgrade(&self.inner.parent)?;
        while let Some(inner) = current {
            if let Some(descriptor) = inner.storage.get(&type_id) {
                #[cfg(feature = "logging")]
                trace!(
                    target: "domain_injector",
                    service = key.type_name(),
                    depth = self.inner.depth,
                    ancestor_depth = inner.depth,
                    location = "ancestor",
                    "Service resolved from ancestor registry"
                );

                let owner = ServiceRegistry { inner };
                return self.produce(&owner, &descriptor).map(Some);
            }
            current = upgrade(&inner.parent)?;
        }

        Ok(None)
    }

    /// Produce a descriptor's value, reporting to the observer when enabled.
    ///
    /// Factories run against `owner`, the registry holding the binding, so a
    /// service resolves its own dependencies from its own scope.
    fn produce(&self, owner: &ServiceRegistry, descriptor: &ServiceDescriptor) -> Result<ErasedService> {
        let observer = &self.inner.observer;
        let started = observer.enabled().then(Instant::now);

        let produced = descriptor.binding.produce(owner).map_err(|err| match err {
            DiError::CircularDependency { path } if path.is_empty() => {
                let mut path = observer.resolution_path();
                path.push(descriptor.implementation);
                DiError::circular(path)
            }
            other => other,
        })?;

        if let Some(started) = started {
            if produced.invoked {
                observer.factory_invoked(descriptor.key, started.elapsed());
            }
            observer.dependency_resolved(descriptor.key);
        }

        Ok(produced.value)
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    /// Check if `T` is bound here or in any live ancestor.
    #[inline]
    pub fn is_registered<T: ?Sized + 'static>(&self) -> bool {
        self.contains_in_chain(&TypeId::of::<T>())
    }

    /// Check if `T` is bound in this registry itself.
    #[inline]
    pub fn is_registered_locally<T: ?Sized + 'static>(&self) -> bool {
        self.inner.storage.contains(&TypeId::of::<T>())
    }

    fn contains_in_chain(&self, type_id: &TypeId) -> bool {
        if self.inner.storage.contains(type_id) {
            return true;
        }

        let mut current = self.inner.parent.as_ref().and_then(Weak::upgrade);
        while let Some(inner) = current {
            if inner.storage.contains(type_id) {
                return true;
            }
            current = inner.parent.as_ref().and_then(Weak::upgrade);
        }

        false
    }

    /// Lifetime of the local binding for `T`, if any.
    pub fn lifetime_of<T: ?Sized + 'static>(&self) -> Option<Lifetime> {
        self.inner
            .storage
            .get(&TypeId::of::<T>())
            .map(|descriptor| descriptor.binding.lifetime())
    }

    /// Keys bound in this registry, in registration order.
    pub fn registered_keys(&self) -> Vec<ServiceKey> {
        self.inner
            .storage
            .ordered()
            .iter()
            .map(|descriptor| descriptor.key)
            .collect()
    }

    /// Get the number of bindings in this registry (not including parents).
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.storage.len()
    }

    /// Check if this registry binds nothing itself.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.storage.is_empty()
    }

    /// Remove the local binding for `T` and its exposures. Parents are not
    /// affected.
    pub fn remove<T: ?Sized + 'static>(&self) -> bool {
        let removed = self.inner.storage.remove(&TypeId::of::<T>());

        #[cfg(feature = "logging")]
        if removed {
            debug!(
                target: "domain_injector",
                service = std::any::type_name::<T>(),
                depth = self.inner.depth,
                "Service binding removed"
            );
        }

        removed
    }

    /// Remove every binding from this registry. Parents are not affected.
    pub fn clear(&self) {
        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            depth = self.inner.depth,
            services_removed = self.inner.storage.len(),
            "Registry cleared"
        );

        self.inner.storage.clear();
    }
}

/// Upgrade a parent link; a dead parent is an error, a missing one is not.
fn upgrade(parent: &Option<Weak<RegistryInner>>) -> Result<Option<Arc<RegistryInner>>> {
    match parent {
        None => Ok(None),
        Some(weak) => weak.upgrade().map(Some).ok_or(DiError::ParentDropped),
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("service_count", &self.len())
            .field("depth", &self.inner.depth)
            .field("has_parent", &self.inner.parent.is_some())
            .field("diagnostics", &self.inner.observer.enabled())
            .finish()
    }
}
