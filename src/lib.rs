//! # Domain Injector - Hierarchical Dependency Injection for Rust
//!
//! A dependency injection runtime built around *domains*: bounded runtime
//! scopes that each own a service registry, wire the components they
//! contain, and inject objects created later on request.
//!
//! ## Features
//!
//! - 🔒 **Type-safe keys** - Services are keyed by type, including `dyn Trait`
//! - 🏭 **Three lifetimes** - Eager singletons, lazy singletons and transients
//! - 🔄 **Registry chains** - Child registries fall back to their parents
//! - 💉 **Slot injection** - Required, optional, inject-all and method points
//! - 🧭 **Domains** - One global domain plus any number of local ones
//! - ♻️ **Late injection** - Idempotent wiring for pooled or spawned instances
//! - 🔍 **Diagnostics** - Optional cycle detection, dependency graph and timings
//! - 📊 **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use domain_injector::ServiceRegistry;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! let registry = ServiceRegistry::new();
//! registry.register_singleton(Database { url: "postgres://localhost".into() });
//!
//! let db = registry.resolve::<Database>().unwrap();
//! assert_eq!(db.url, "postgres://localhost");
//! ```
//!
//! ## Service Lifetimes
//!
//! ```rust
//! use domain_injector::ServiceRegistry;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! static COUNTER: AtomicU64 = AtomicU64::new(0);
//!
//! struct Config { debug: bool }
//! struct Clock;
//! struct RequestId(u64);
//!
//! let registry = ServiceRegistry::new();
//!
//! // Eager singleton - one instance, shared everywhere
//! registry.register_singleton(Config { debug: true });
//!
//! // Lazy singleton - created on first access
//! registry.lazy(|| Clock);
//!
//! // Transient - new instance every time
//! registry.transient(|| RequestId(COUNTER.fetch_add(1, Ordering::SeqCst)));
//! ```
//!
//! ## Injection
//!
//! ```rust
//! use domain_injector::{Dep, Inject, InjectionPoints, Injector, ServiceRegistry, Slot};
//! use std::sync::Arc;
//!
//! trait Weapon: Send + Sync {}
//! struct Sword;
//! impl Weapon for Sword {}
//!
//! struct Armor;
//! struct Banner;
//!
//! #[derive(Default)]
//! struct Knight {
//!     armor: Dep<Armor>,
//!     banner: Dep<Banner>,
//!     weapons: Slot<Vec<Arc<dyn Weapon>>>,
//! }
//!
//! impl Inject for Knight {
//!     fn declare(points: &mut InjectionPoints<Self>) {
//!         points
//!             .required("armor", |k| &k.armor)
//!             .optional("banner", |k| &k.banner)
//!             .all("weapons", |k| &k.weapons);
//!     }
//! }
//!
//! let registry = ServiceRegistry::new();
//! registry.register_singleton(Armor);
//! registry.register_singleton(Sword);
//! registry.expose::<Sword, dyn Weapon>(|s| s as Arc<dyn Weapon>);
//!
//! let knight = Knight::default();
//! Injector::new(registry).inject(&knight).unwrap();
//!
//! assert!(knight.armor.is_set());
//! assert!(!knight.banner.is_set());
//! assert_eq!(knight.weapons.get().unwrap().len(), 1);
//! ```
//!
//! ## Domains
//!
//! ```rust
//! use domain_injector::{service, ComponentSet, Dep, DomainConfig, DomainRuntime, Inject, InjectionPoints};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Score;
//! impl Inject for Score {}
//!
//! #[derive(Default)]
//! struct Hud { score: Dep<Score> }
//!
//! impl Inject for Hud {
//!     fn declare(points: &mut InjectionPoints<Self>) {
//!         points.required("score", |h| &h.score);
//!     }
//! }
//!
//! let runtime = DomainRuntime::new();
//! runtime.activate(DomainConfig::global("app").service(service!(Score))).unwrap();
//!
//! // A level whose existing components are wired on activation
//! let level = Arc::new(ComponentSet::new());
//! let hud = level.add(Hud::default());
//! runtime.activate(DomainConfig::local("level-1").host(level)).unwrap();
//!
//! assert!(hud.score.is_set());
//! ```

mod declaration;
mod diagnostics;
mod domain;
mod error;
mod factory;
mod inject;
mod injector;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod provider;
mod registry;
mod runtime;
mod storage;

pub use declaration::{ServiceDeclaration, ServiceManifest};
pub use diagnostics::*;
pub use domain::*;
pub use error::*;
pub use inject::*;
pub use injector::Injector;
pub use key::*;
pub use provider::*;
pub use registry::ServiceRegistry;
pub use runtime::*;

#[cfg(feature = "derive")]
pub use domain_injector_derive::Inject;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Component, ComponentSet, Dep, DiError, Domain, DomainConfig, DomainHost, DomainId,
        DomainRuntime, Inject, Injectable, InjectionPoints, Injector, LateInjection, Lifetime,
        Optional, Required, ResolutionDiagnostics, Result, ServiceDeclaration, ServiceManifest,
        ServiceRegistry, Slot, service,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Logger {
        name: &'static str,
    }

    struct Config {
        url: String,
    }

    #[test]
    fn test_eager_singleton_same_instance() {
        let registry = ServiceRegistry::new();
        registry.register_singleton(Logger { name: "L" });

        let l1 = registry.resolve::<Logger>().unwrap();
        let l2 = registry.resolve::<Logger>().unwrap();

        assert_eq!(l1.name, "L");
        assert!(Arc::ptr_eq(&l1, &l2));
    }

    #[test]
    fn test_lazy_clock_counter() {
        static CREATED: AtomicU32 = AtomicU32::new(0);

        struct Clock;

        let registry = ServiceRegistry::new();
        registry.lazy(|| {
            CREATED.fetch_add(1, Ordering::SeqCst);
            Clock
        });

        assert_eq!(CREATED.load(Ordering::SeqCst), 0);

        let _ = registry.resolve::<Clock>().unwrap();
        let _ = registry.resolve::<Clock>().unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_child_sees_parent_config() {
        let parent = ServiceRegistry::new();
        parent.register_singleton(Config { url: "cfg".into() });

        let child = parent.child();

        assert!(child.is_registered::<Config>());
        assert_eq!(child.resolve::<Config>().unwrap().url, "cfg");
        assert!(Arc::ptr_eq(
            &child.resolve::<Config>().unwrap(),
            &parent.resolve::<Config>().unwrap()
        ));
    }

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

    #[test]
    fn test_inject_missing_bar() {
        let injector = Injector::new(ServiceRegistry::new());
        let err = injector.inject(&Foo::default()).unwrap_err();

        match &err {
            DiError::MissingDependency { target, slot, key } => {
                assert_eq!(short_type_name(target), "Foo");
                assert_eq!(*slot, "bar");
                assert_eq!(short_type_name(key), "Bar");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

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

    #[test]
    fn test_mutual_services_detected_on_resolve() {
        let runtime = DomainRuntime::new();
        let domain = runtime
            .activate(
                DomainConfig::global("app")
                    .service(service!(ServiceA))
                    .service(service!(ServiceB))
                    .diagnostics(Arc::new(ResolutionDiagnostics::new())),
            )
            .unwrap();

        let err = domain.registry().resolve::<ServiceA>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: ServiceA → ServiceB → ServiceA"
        );

        // The failed resolve does not poison later attempts' reporting
        let err = domain.registry().resolve::<ServiceB>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: ServiceB → ServiceA → ServiceB"
        );
    }
}
