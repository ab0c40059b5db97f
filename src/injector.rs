//! The injector: fills a target's declared injection points from a registry.

use crate::diagnostics::ResolutionObserver;
use crate::inject::{Component, Inject, InjectionPoints};
use crate::{Result, ServiceRegistry};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Fills injection points from the registry it is bound to.
///
/// Each pass is wrapped in a resolution context when the registry's
/// observer is enabled, so services constructed while injecting another
/// object share one cycle check.
///
/// # Examples
///
/// ```rust
/// use domain_injector::{Dep, DiError, Inject, InjectionPoints, Injector, ServiceRegistry};
///
/// struct Bar;
///
/// #[derive(Default)]
/// struct Foo { bar: Dep<Bar> }
///
/// impl Inject for Foo {
///     fn declare(points: &mut InjectionPoints<Self>) {
///         points.required("bar", |foo| &foo.bar);
///     }
/// }
///
/// let injector = Injector::new(ServiceRegistry::new());
/// let err = injector.inject(&Foo::default()).unwrap_err();
/// assert_eq!(err.to_string(), "Missing dependency Bar for Foo.bar");
/// ```
#[derive(Clone, Debug)]
pub struct Injector {
    registry: ServiceRegistry,
}

impl Injector {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self { registry }
    }

    /// The registry dependencies are resolved from
    #[inline]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Fill every injection point of `target`.
    ///
    /// Stops at the first failing required point. Points filled before the
    /// failure keep their values.
    pub fn inject<T: Inject>(&self, target: &T) -> Result<()> {
        let consumer = std::any::type_name::<T>();
        let _context = ContextGuard::begin(self.registry.observer(), consumer)?;

        let table = InjectionPoints::<T>::cached();

        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            target_type = consumer,
            points = table.len(),
            depth = self.registry.depth(),
            "Injecting target"
        );

        let result = table.apply(target, &self.registry);

        #[cfg(feature = "logging")]
        if let Err(err) = &result {
            warn!(
                target: "domain_injector",
                target_type = consumer,
                error = %err,
                "Injection failed"
            );
        }

        result
    }

    /// Fill a type-erased component
    #[inline]
    pub fn inject_component(&self, component: &dyn Component) -> Result<()> {
        component.inject_with(self)
    }
}

/// Open resolution context, closed on drop
struct ContextGuard<'a> {
    observer: Option<&'a dyn ResolutionObserver>,
}

impl<'a> ContextGuard<'a> {
    fn begin(observer: &'a Arc<dyn ResolutionObserver>, consumer: &'static str) -> Result<Self> {
        if !observer.enabled() {
            return Ok(Self { observer: None });
        }

        observer.begin_context(consumer)?;
        Ok(Self {
            observer: Some(observer.as_ref()),
        })
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Some(observer) = self.observer {
            observer.end_context();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ResolutionDiagnostics;
    use crate::inject::{Dep, Optional, Slot};
    use crate::DiError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Bar;

    #[derive(Default)]
    struct Foo {
        bar: Dep<Bar>,
    }

    impl Inject for Foo {
        fn declare(points: &mut InjectionPoints<Self>) {
            points.required("bar", |foo| &foo.bar);
        }
    }

    #[derive(Default)]
    struct LenientFoo {
        bar: Dep<Bar>,
    }

    impl Inject for LenientFoo {
        fn declare(points: &mut InjectionPoints<Self>) {
            points.optional("bar", |foo| &foo.bar);
        }
    }

    #[test]
    fn test_missing_required_dependency() {
        let injector = Injector::new(ServiceRegistry::new());
        let err = injector.inject(&Foo::default()).unwrap_err();

        assert!(matches!(
            err,
            DiError::MissingDependency { slot: "bar", .. }
        ));
        assert_eq!(err.to_string(), "Missing dependency Bar for Foo.bar");
    }

    #[test]
    fn test_optional_leaves_default() {
        let injector = Injector::new(ServiceRegistry::new());
        let foo = LenientFoo::default();

        injector.inject(&foo).unwrap();
        assert!(!foo.bar.is_set());
    }

    struct Flaky;

    #[derive(Default)]
    struct Tolerant {
        flaky: Dep<Flaky>,
        calls: Slot<u32>,
        received: Slot<bool>,
    }

    impl Inject for Tolerant {
        fn declare(points: &mut InjectionPoints<Self>) {
            points
                .optional("flaky", |t| &t.flaky)
                .method::<(Optional<Flaky>,)>("attach", |t, (flaky,)| {
                    t.calls.set(t.calls.get().unwrap_or(0) + 1);
                    t.received.set(flaky.is_some());
                });
        }
    }

    #[test]
    fn test_optional_points_swallow_factory_failure() {
        let registry = ServiceRegistry::new();
        registry.register_lazy_singleton::<Flaky, _>(|_| Err(DiError::creation_failed::<Flaky>("boom")));
        let injector = Injector::new(registry.clone());

        let tolerant = Tolerant::default();
        injector.inject(&tolerant).unwrap();

        assert!(!tolerant.flaky.is_set());
        assert_eq!(tolerant.calls.get(), Some(1));
        assert_eq!(tolerant.received.get(), Some(false));

        // The failure is still visible to a direct resolve
        assert!(matches!(
            registry.resolve::<Flaky>(),
            Err(DiError::CreationFailed { .. })
        ));
    }

    #[derive(Default)]
    struct Loop {
        next: Dep<Loop>,
    }

    impl Inject for Loop {
        fn declare(points: &mut InjectionPoints<Self>) {
            points.optional("next", |l| &l.next);
        }
    }

    #[test]
    fn test_optional_self_reference_resolves_without_it() {
        let diagnostics = Arc::new(ResolutionDiagnostics::new());
        let registry = ServiceRegistry::with_observer(diagnostics.clone());
        register_injected::<Loop>(&registry);

        let outer = registry.resolve::<Loop>().unwrap();
        assert!(!outer.next.is_set());
        assert!(!diagnostics.is_resolving());
    }

    #[test]
    fn test_inject_component() {
        let registry = ServiceRegistry::new();
        registry.register_singleton(Bar);
        let injector = Injector::new(registry.clone());

        let foo = Arc::new(Foo::default());
        let component: Arc<dyn Component> = foo.clone();
        injector.inject_component(component.as_ref()).unwrap();

        assert!(Arc::ptr_eq(&foo.bar.get().unwrap(), &registry.resolve::<Bar>().unwrap()));
    }

    // ServiceA and ServiceB each require the other and are built by lazy
    // factories that inject what they construct.
    #[derive(Debug, Default)]
    struct ServiceA {
        b: Dep<ServiceB>,
    }

    #[derive(Debug, Default)]
    struct ServiceB {
        a: Dep<ServiceA>,
    }

    impl Inject for ServiceA {
        fn declare(points: &mut InjectionPoints<Self>) {
            points.required("b", |a| &a.b);
        }
    }

    impl Inject for ServiceB {
        fn declare(points: &mut InjectionPoints<Self>) {
            points.required("a", |b| &b.a);
        }
    }

    fn register_injected<T: Inject + Default>(registry: &ServiceRegistry) {
        registry.register_lazy_singleton(|owner: &ServiceRegistry| {
            let value = T::default();
            Injector::new(owner.clone()).inject(&value)?;
            Ok(Arc::new(value))
        });
    }

    #[test]
    fn test_mutual_requirement_reports_cycle_path() {
        let diagnostics = Arc::new(ResolutionDiagnostics::new());
        let registry = ServiceRegistry::with_observer(diagnostics.clone());
        register_injected::<ServiceA>(&registry);
        register_injected::<ServiceB>(&registry);

        let err = registry.resolve::<ServiceA>().unwrap_err();
        assert_eq!(
            err.cycle_path().unwrap(),
            &[
                std::any::type_name::<ServiceA>(),
                std::any::type_name::<ServiceB>(),
                std::any::type_name::<ServiceA>(),
            ]
        );
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: ServiceA → ServiceB → ServiceA"
        );

        // Every context was closed on the way out
        assert!(!diagnostics.is_resolving());
    }

    #[test]
    fn test_mutual_requirement_without_diagnostics_still_fails() {
        let registry = ServiceRegistry::new();
        register_injected::<ServiceA>(&registry);
        register_injected::<ServiceB>(&registry);

        let err = registry.resolve::<ServiceB>().unwrap_err();
        assert!(matches!(err, DiError::CircularDependency { .. }));
    }

    #[derive(Default)]
    struct Consumer {
        bar: Dep<Bar>,
    }

    impl Inject for Consumer {
        fn declare(points: &mut InjectionPoints<Self>) {
            points.required("bar", |c| &c.bar);
        }
    }

    #[test]
    fn test_edges_recorded_against_consumer() {
        let created = Arc::new(AtomicU32::new(0));
        let diagnostics = Arc::new(ResolutionDiagnostics::new());
        let registry = ServiceRegistry::with_observer(diagnostics.clone());

        let counter = Arc::clone(&created);
        registry.lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Bar
        });

        let injector = Injector::new(registry);
        injector.inject(&Consumer::default()).unwrap();
        injector.inject(&Consumer::default()).unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(
            diagnostics.dependencies_of(std::any::type_name::<Consumer>()),
            vec![std::any::type_name::<Bar>()]
        );
        assert!(diagnostics
            .initialization_time(std::any::type_name::<Bar>())
            .is_some());
    }

    #[derive(Default)]
    struct Counter {
        hits: Slot<u32>,
    }

    impl Inject for Counter {}

    #[test]
    fn test_target_without_points() {
        let injector = Injector::new(ServiceRegistry::new());
        let counter = Counter::default();
        injector.inject(&counter).unwrap();
        assert!(!counter.hits.is_set());
    }
}
