//! Service declarations and manifests
//!
//! A [`ServiceManifest`] is the closed list of services a domain registers
//! on activation. Each [`ServiceDeclaration`] names an implementation, the
//! key it is registered under, the base keys it is assignable to, its
//! lifetime and whether it is host-bound.

use crate::domain::DomainHost;
use crate::factory::{ErasedService, erase, unerase};
use crate::inject::{Component, Inject};
use crate::injector::Injector;
use crate::storage::{CastFn, Exposure};
use crate::{DiError, Lifetime, Result, ServiceKey, ServiceRegistry};
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

type Upcast<T> = Arc<dyn Fn(Arc<T>) -> ErasedService + Send + Sync>;

/// Declares `T` as a service a domain registers automatically.
///
/// Defaults: registered under its own type, lazily, constructed freshly.
///
/// # Examples
///
/// ```rust
/// use domain_injector::{Arc, Inject, Lifetime, ServiceDeclaration};
///
/// trait Weapon: Send + Sync {}
///
/// #[derive(Default)]
/// struct Sword;
/// impl Weapon for Sword {}
/// impl Inject for Sword {}
///
/// let declaration = ServiceDeclaration::<Sword>::new()
///     .as_service::<dyn Weapon>(|sword| sword as Arc<dyn Weapon>)
///     .eager();
///
/// assert_eq!(declaration.lifetime(), Lifetime::EagerSingleton);
/// ```
pub struct ServiceDeclaration<T: Inject> {
    constructor: fn() -> T,
    key: ServiceKey,
    upcast: Upcast<T>,
    exposures: Vec<(ServiceKey, CastFn)>,
    lifetime: Lifetime,
    host_bound: bool,
}

impl<T: Inject + Default> ServiceDeclaration<T> {
    /// Declare `T`, constructed with `Default`
    pub fn new() -> Self {
        Self::with_constructor(T::default)
    }
}

impl<T: Inject + Default> Default for ServiceDeclaration<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Inject> ServiceDeclaration<T> {
    /// Declare `T`, constructed with `constructor`
    pub fn with_constructor(constructor: fn() -> T) -> Self {
        Self {
            constructor,
            key: ServiceKey::of::<T>(),
            upcast: Arc::new(erase::<T>),
            exposures: Vec::new(),
            lifetime: Lifetime::LazySingleton,
            host_bound: false,
        }
    }

    /// Register under `K` instead of `T`
    pub fn as_service<K>(mut self, cast: fn(Arc<T>) -> Arc<K>) -> Self
    where
        K: ?Sized + Send + Sync + 'static,
    {
        self.key = ServiceKey::of::<K>();
        self.upcast = Arc::new(move |value| erase(cast(value)));
        self
    }

    /// Keep the key but make the service assignable to `B`, so inject-all
    /// points over `B` collect it.
    ///
    /// Applies to declarations registered under their own type; a service
    /// re-keyed with [`as_service`](Self::as_service) is already assignable
    /// to its key.
    ///
    /// ```rust
    /// use domain_injector::{Arc, Inject, ServiceDeclaration, ServiceKey};
    ///
    /// trait Weapon: Send + Sync {}
    ///
    /// #[derive(Default)]
    /// struct Sword;
    /// impl Weapon for Sword {}
    /// impl Inject for Sword {}
    ///
    /// let declaration = ServiceDeclaration::<Sword>::new()
    ///     .expose::<dyn Weapon>(|sword| sword as Arc<dyn Weapon>);
    ///
    /// assert_eq!(declaration.key(), ServiceKey::of::<Sword>());
    /// assert_eq!(declaration.exposed_keys(), vec![ServiceKey::of::<dyn Weapon>()]);
    /// ```
    pub fn expose<B>(mut self, cast: fn(Arc<T>) -> Arc<B>) -> Self
    where
        B: ?Sized + Send + Sync + 'static,
    {
        let base = ServiceKey::of::<B>();
        let cast: CastFn = Arc::new(move |erased| unerase::<T>(erased).map(|value| erase(cast(value))));
        self.exposures.retain(|(existing, _)| *existing != base);
        self.exposures.push((base, cast));
        self
    }

    /// Construct during activation instead of on first resolve
    pub fn eager(mut self) -> Self {
        self.lifetime = Lifetime::EagerSingleton;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lifetime = Lifetime::LazySingleton;
        self
    }

    /// Reuse the instance the domain host already holds, if any.
    ///
    /// Host-bound services are always eager: they are registered as the
    /// instance itself and wired by the domain's sweep.
    pub fn host_bound(mut self) -> Self {
        self.host_bound = true;
        self.lifetime = Lifetime::EagerSingleton;
        self
    }

    #[inline]
    pub fn key(&self) -> ServiceKey {
        self.key
    }

    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    #[inline]
    pub fn is_host_bound(&self) -> bool {
        self.host_bound
    }

    /// Base keys added with [`expose`](Self::expose)
    pub fn exposed_keys(&self) -> Vec<ServiceKey> {
        self.exposures.iter().map(|(base, _)| *base).collect()
    }

    fn register_exposures(&self, registry: &ServiceRegistry) {
        if self.exposures.is_empty() {
            return;
        }

        if self.key != ServiceKey::of::<T>() {
            #[cfg(feature = "logging")]
            warn!(
                target: "domain_injector",
                service = std::any::type_name::<T>(),
                key = self.key.type_name(),
                "Exposures ignored for a service registered under another key"
            );
            return;
        }

        for (base, cast) in &self.exposures {
            registry.expose_erased(
                self.key,
                Exposure {
                    base: base.type_id(),
                    cast: Arc::clone(cast),
                },
            );
        }
    }
}

// =============================================================================
// Type-erased declarations
// =============================================================================

/// What a manifest needs from a declaration, independent of its type
pub(crate) trait DeclaredService: Send + Sync {
    fn implementation(&self) -> ServiceKey;

    fn key(&self) -> ServiceKey;

    fn lifetime(&self) -> Lifetime;

    fn is_host_bound(&self) -> bool;

    /// Register into `registry`. Returns a host-bound instance that had to
    /// be created and therefore needs sweeping.
    fn register(
        &self,
        registry: &ServiceRegistry,
        host: Option<&dyn DomainHost>,
    ) -> Result<Option<Arc<dyn Component>>>;
}

impl<T: Inject> DeclaredService for ServiceDeclaration<T> {
    fn implementation(&self) -> ServiceKey {
        ServiceKey::of::<T>()
    }

    fn key(&self) -> ServiceKey {
        self.key
    }

    fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    fn is_host_bound(&self) -> bool {
        self.host_bound
    }

    fn register(
        &self,
        registry: &ServiceRegistry,
        host: Option<&dyn DomainHost>,
    ) -> Result<Option<Arc<dyn Component>>> {
        let implementation = std::any::type_name::<T>();

        if !self.host_bound {
            let constructor = self.constructor;
            let upcast = Arc::clone(&self.upcast);
            registry.register_lazy_as(
                self.key,
                implementation,
                Arc::new(move |owner: &ServiceRegistry| -> Result<ErasedService> {
                    let value = constructor();
                    Injector::new(owner.clone()).inject(&value)?;
                    Ok(upcast(Arc::new(value)))
                }),
            );
            self.register_exposures(registry);
            return Ok(None);
        }

        let located = match host.and_then(|host| host.locate(TypeId::of::<T>())) {
            Some(component) => Some(component.downcast::<T>().ok_or_else(|| {
                DiError::Internal(format!("host located a component that is not a {implementation}"))
            })?),
            None => None,
        };

        let (instance, created) = match located {
            Some(instance) => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "domain_injector",
                    service = implementation,
                    "Host-bound service found in domain"
                );
                (instance, None)
            }
            None => {
                let instance = Arc::new((self.constructor)());
                let component: Arc<dyn Component> = instance.clone();
                if let Some(host) = host {
                    host.adopt(Arc::clone(&component));
                }

                #[cfg(feature = "logging")]
                debug!(
                    target: "domain_injector",
                    service = implementation,
                    adopted = host.is_some(),
                    "Host-bound service created"
                );
                (instance, Some(component))
            }
        };

        registry.register_erased(self.key, implementation, (self.upcast)(instance));
        self.register_exposures(registry);
        Ok(created)
    }
}

// =============================================================================
// ServiceManifest
// =============================================================================

/// The ordered set of services a domain registers on activation.
///
/// ```rust
/// use domain_injector::{service, Inject, ServiceManifest};
///
/// #[derive(Default)]
/// struct Clock;
/// impl Inject for Clock {}
///
/// let manifest = ServiceManifest::new().with(service!(eager Clock));
/// assert_eq!(manifest.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct ServiceManifest {
    services: Vec<Arc<dyn DeclaredService>>,
}

impl ServiceManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration. An implementation already in the manifest is
    /// registered only once; the repeat is dropped with a warning.
    pub fn add<T: Inject>(&mut self, declaration: ServiceDeclaration<T>) -> &mut Self {
        let implementation = ServiceKey::of::<T>();
        if self
            .services
            .iter()
            .any(|service| service.implementation() == implementation)
        {
            #[cfg(feature = "logging")]
            warn!(
                target: "domain_injector",
                service = implementation.type_name(),
                "Service declared twice in one manifest; keeping the first declaration"
            );
            return self;
        }

        self.services.push(Arc::new(declaration));
        self
    }

    /// Builder form of [`add`](Self::add)
    pub fn with<T: Inject>(mut self, declaration: ServiceDeclaration<T>) -> Self {
        self.add(declaration);
        self
    }

    /// Keys the manifest registers, in declaration order
    pub fn keys(&self) -> Vec<ServiceKey> {
        self.services.iter().map(|service| service.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub(crate) fn services(&self) -> &[Arc<dyn DeclaredService>] {
        &self.services
    }
}

impl fmt::Debug for ServiceManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.services.iter().map(|service| {
                (
                    service.implementation(),
                    service.key(),
                    service.lifetime(),
                    service.is_host_bound(),
                )
            }))
            .finish()
    }
}

/// Declare a service for a [`ServiceManifest`].
///
/// ```rust
/// use domain_injector::{service, Arc, Inject, Lifetime};
///
/// trait Weapon: Send + Sync {}
///
/// #[derive(Default)]
/// struct Bow;
/// impl Weapon for Bow {}
/// impl Inject for Bow {}
///
/// let lazy = service!(Bow);
/// let keyed = service!(eager Bow as dyn Weapon);
/// let hosted = service!(host Bow);
/// let exposed = service!(Bow: dyn Weapon);
///
/// assert_eq!(lazy.lifetime(), Lifetime::LazySingleton);
/// assert_eq!(keyed.key().short_name(), "dyn Weapon");
/// assert!(hosted.is_host_bound());
/// assert_eq!(exposed.key().short_name(), "Bow");
/// assert_eq!(exposed.exposed_keys()[0].short_name(), "dyn Weapon");
/// ```
#[macro_export]
macro_rules! service {
    (eager $service:ty : $($base:ty),+) => {
        $crate::ServiceDeclaration::<$service>::new()
            $(.expose::<$base>(|value| value as $crate::Arc<$base>))+
            .eager()
    };
    (eager $service:ty as $key:ty) => {
        $crate::ServiceDeclaration::<$service>::new()
            .as_service::<$key>(|value| value as $crate::Arc<$key>)
            .eager()
    };
    (eager $service:ty) => {
        $crate::ServiceDeclaration::<$service>::new().eager()
    };
    (host $service:ty : $($base:ty),+) => {
        $crate::ServiceDeclaration::<$service>::new()
            $(.expose::<$base>(|value| value as $crate::Arc<$base>))+
            .host_bound()
    };
    (host $service:ty as $key:ty) => {
        $crate::ServiceDeclaration::<$service>::new()
            .as_service::<$key>(|value| value as $crate::Arc<$key>)
            .host_bound()
    };
    (host $service:ty) => {
        $crate::ServiceDeclaration::<$service>::new().host_bound()
    };
    ($service:ty : $($base:ty),+) => {
        $crate::ServiceDeclaration::<$service>::new()
            $(.expose::<$base>(|value| value as $crate::Arc<$base>))+
    };
    ($service:ty as $key:ty) => {
        $crate::ServiceDeclaration::<$service>::new()
            .as_service::<$key>(|value| value as $crate::Arc<$key>)
    };
    ($service:ty) => {
        $crate::ServiceDeclaration::<$service>::new()
    };
}
