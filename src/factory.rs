//! Binding kinds and the factories behind them
//!
//! Every bound value is an `Arc<T>` erased behind `Arc<dyn Any + Send + Sync>`.
//! Keeping the inner `Arc<T>` (rather than `T` itself) lets unsized keys
//! such as `dyn Trait` share the same storage, and resolution hands out
//! clones of that inner `Arc` so singleton identity survives erasure.

use crate::registry::ServiceRegistry;
use crate::{DiError, Lifetime, Result};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// A type-erased bound value (always an `Arc<T>` inside)
pub(crate) type ErasedService = Arc<dyn Any + Send + Sync>;

/// Type-erased factory function
pub(crate) type FactoryFn = Arc<dyn Fn(&ServiceRegistry) -> Result<ErasedService> + Send + Sync>;

/// Erase an `Arc<T>` for storage
#[inline]
pub(crate) fn erase<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> ErasedService {
    Arc::new(value)
}

/// Recover the `Arc<T>` stored by [`erase`]
#[inline]
pub(crate) fn unerase<T: ?Sized + Send + Sync + 'static>(erased: &ErasedService) -> Option<Arc<T>> {
    erased.downcast_ref::<Arc<T>>().cloned()
}

/// Wrap a typed factory into a [`FactoryFn`]
pub(crate) fn erase_factory<T, F>(factory: F) -> FactoryFn
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&ServiceRegistry) -> Result<Arc<T>> + Send + Sync + 'static,
{
    Arc::new(move |registry| factory(registry).map(erase))
}

/// A value produced by a binding
pub(crate) struct Produced {
    pub value: ErasedService,
    /// Whether a factory ran to produce this value
    pub invoked: bool,
}

// =============================================================================
// Lazy Factory
// =============================================================================

/// Lazy singleton factory - invoked at most once, then cached
///
/// Initialization is tracked with a flag instead of `OnceCell::get_or_init`
/// so that a factory which ends up resolving its own key reports a cycle
/// rather than re-entering the cell.
pub(crate) struct LazyFactory {
    init: FactoryFn,
    instance: OnceCell<ErasedService>,
    initializing: AtomicBool,
    #[cfg(feature = "logging")]
    type_name: &'static str,
}

impl LazyFactory {
    #[inline]
    pub fn new(init: FactoryFn, #[allow(unused_variables)] type_name: &'static str) -> Self {
        Self {
            init,
            instance: OnceCell::new(),
            initializing: AtomicBool::new(false),
            #[cfg(feature = "logging")]
            type_name,
        }
    }

    /// Get the instance, creating it if necessary.
    ///
    /// Returns an empty-path `CircularDependency` on re-entry; the registry
    /// fills in the path from its observer.
    pub fn resolve(&self, registry: &ServiceRegistry) -> Result<Produced> {
        if let Some(value) = self.instance.get() {
            #[cfg(feature = "logging")]
            trace!(
                target: "domain_injector",
                service = self.type_name,
                "Lazy singleton already initialized, returning cached instance"
            );
            return Ok(Produced {
                value: Arc::clone(value),
                invoked: false,
            });
        }

        if self.initializing.swap(true, Ordering::AcqRel) {
            return Err(DiError::circular(Vec::new()));
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            service = self.type_name,
            "Lazy singleton initializing on first access"
        );

        let created = (self.init)(registry);
        self.initializing.store(false, Ordering::Release);
        let created = created?;

        // Only a racing thread can have filled the cell; keep the first value
        let value = match self.instance.try_insert(created) {
            Ok(value) => Arc::clone(value),
            Err((existing, _)) => Arc::clone(existing),
        };

        Ok(Produced {
            value,
            invoked: true,
        })
    }

    /// Whether the factory has already run
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.instance.get().is_some()
    }
}

// =============================================================================
// Transient Factory
// =============================================================================

/// Transient factory - creates new instance every time
pub(crate) struct TransientFactory {
    factory: FactoryFn,
    #[cfg(feature = "logging")]
    type_name: &'static str,
}

impl TransientFactory {
    #[inline]
    pub fn new(factory: FactoryFn, #[allow(unused_variables)] type_name: &'static str) -> Self {
        Self {
            factory,
            #[cfg(feature = "logging")]
            type_name,
        }
    }

    /// Create a new instance
    #[inline]
    pub fn create(&self, registry: &ServiceRegistry) -> Result<Produced> {
        #[cfg(feature = "logging")]
        trace!(
            target: "domain_injector",
            service = self.type_name,
            "Creating new transient instance"
        );

        Ok(Produced {
            value: (self.factory)(registry)?,
            invoked: true,
        })
    }
}

// =============================================================================
// Binding - enum-based type erasure
// =============================================================================

/// How a descriptor produces its value
pub(crate) enum Binding {
    /// Pre-built value
    Eager(ErasedService),
    /// Created on first access
    Lazy(LazyFactory),
    /// New instance each time
    Transient(TransientFactory),
}

impl Binding {
    /// Produce the value for this binding
    #[inline]
    pub fn produce(&self, registry: &ServiceRegistry) -> Result<Produced> {
        match self {
            Binding::Eager(value) => Ok(Produced {
                value: Arc::clone(value),
                invoked: false,
            }),
            Binding::Lazy(f) => f.resolve(registry),
            Binding::Transient(f) => f.create(registry),
        }
    }

    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        match self {
            Binding::Eager(_) => Lifetime::EagerSingleton,
            Binding::Lazy(_) => Lifetime::LazySingleton,
            Binding::Transient(_) => Lifetime::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct TestService {
        id: u32,
    }

    fn counting_factory(counter: &'static AtomicU32) -> FactoryFn {
        erase_factory(move |_| {
            Ok(Arc::new(TestService {
                id: counter.fetch_add(1, Ordering::SeqCst),
            }))
        })
    }

    #[test]
    fn test_eager_binding() {
        let binding = Binding::Eager(erase(Arc::new(TestService { id: 42 })));
        let registry = ServiceRegistry::new();

        let a = binding.produce(&registry).unwrap();
        let b = binding.produce(&registry).unwrap();
        assert!(!a.invoked);

        let a = unerase::<TestService>(&a.value).unwrap();
        let b = unerase::<TestService>(&b.value).unwrap();
        assert_eq!(a.id, 42);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_lazy_factory() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let registry = ServiceRegistry::new();
        let factory = LazyFactory::new(counting_factory(&COUNTER), "TestService");

        assert_eq!(COUNTER.load(Ordering::SeqCst), 0);
        assert!(!factory.is_initialized());

        let first = factory.resolve(&registry).unwrap();
        assert!(first.invoked);
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);

        let second = factory.resolve(&registry).unwrap();
        assert!(!second.invoked);
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);

        let a = unerase::<TestService>(&first.value).unwrap();
        let b = unerase::<TestService>(&second.value).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_lazy_failure_can_retry() {
        static ATTEMPTS: AtomicU32 = AtomicU32::new(0);
        let registry = ServiceRegistry::new();
        let factory = LazyFactory::new(
            erase_factory(|_| {
                if ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DiError::creation_failed::<TestService>("first attempt"))
                } else {
                    Ok(Arc::new(TestService { id: 7 }))
                }
            }),
            "TestService",
        );

        assert!(factory.resolve(&registry).is_err());
        assert!(!factory.is_initialized());
        assert!(factory.resolve(&registry).is_ok());
        assert!(factory.is_initialized());
    }

    #[test]
    fn test_transient_factory() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let registry = ServiceRegistry::new();
        let binding = Binding::Transient(TransientFactory::new(
            counting_factory(&COUNTER),
            "TestService",
        ));

        let a = binding.produce(&registry).unwrap();
        let b = binding.produce(&registry).unwrap();
        let a = unerase::<TestService>(&a.value).unwrap();
        let b = unerase::<TestService>(&b.value).unwrap();

        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(binding.lifetime(), Lifetime::Transient);
    }

    #[test]
    fn test_unerase_wrong_type() {
        let erased = erase(Arc::new(TestService { id: 1 }));
        assert!(unerase::<String>(&erased).is_none());
    }
}
