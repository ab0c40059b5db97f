//! Domain runtime
//!
//! [`DomainRuntime`] owns the set of active domains. It enforces the single
//! global domain, chains local registries to the global one, and routes
//! late injection to the nearest applicable domain.

use crate::domain::{Domain, DomainConfig, DomainId, DomainKind, DomainState};
use crate::inject::Component;
use crate::{DiError, Result};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Outcome of a successful [`DomainRuntime::request_injection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateInjection {
    /// The instance was injected by this domain now
    Injected(DomainId),
    /// This domain had already injected the instance; nothing was done
    AlreadyInjected(DomainId),
}

impl LateInjection {
    #[inline]
    pub fn domain(&self) -> DomainId {
        match self {
            LateInjection::Injected(id) | LateInjection::AlreadyInjected(id) => *id,
        }
    }

    #[inline]
    pub fn was_injected(&self) -> bool {
        matches!(self, LateInjection::Injected(_))
    }
}

/// The process-owned set of active domains.
///
/// # Examples
///
/// ```rust
/// use domain_injector::{Component, Dep, DomainConfig, DomainRuntime, Inject, InjectionPoints};
/// use std::sync::Arc;
///
/// struct Settings { volume: u8 }
///
/// #[derive(Default)]
/// struct Player { settings: Dep<Settings> }
///
/// impl Inject for Player {
///     fn declare(points: &mut InjectionPoints<Self>) {
///         points.required("settings", |p| &p.settings);
///     }
/// }
///
/// let runtime = DomainRuntime::new();
/// runtime
///     .activate(DomainConfig::global("app").configure(|registry| {
///         registry.register_singleton(Settings { volume: 7 });
///         Ok(())
///     }))
///     .unwrap();
///
/// // An instance created after activation, e.g. handed out by a pool
/// let player = Arc::new(Player::default());
/// let component: Arc<dyn Component> = player.clone();
/// runtime.request_injection(&component).unwrap();
/// assert_eq!(player.settings.get().unwrap().volume, 7);
/// ```
#[derive(Default)]
pub struct DomainRuntime {
    /// Active domains, oldest first
    domains: RwLock<Vec<Arc<Domain>>>,
}

impl DomainRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn domains(&self) -> RwLockReadGuard<'_, Vec<Arc<Domain>>> {
        self.domains.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn domains_mut(&self) -> RwLockWriteGuard<'_, Vec<Arc<Domain>>> {
        self.domains.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Active domains, oldest first. Domain code runs against this copy, so
    /// it may call back into the runtime.
    pub fn active_domains(&self) -> Vec<Arc<Domain>> {
        self.domains().clone()
    }

    /// The active global domain
    pub fn global(&self) -> Option<Arc<Domain>> {
        self.domains()
            .iter()
            .find(|domain| domain.kind() == DomainKind::Global)
            .cloned()
    }

    /// An active domain by id
    pub fn domain(&self, id: DomainId) -> Option<Arc<Domain>> {
        self.domains().iter().find(|domain| domain.id() == id).cloned()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Activate a domain from `config`.
    ///
    /// Fails without side effects on the runtime if a second global domain
    /// is requested, or if registration, configuration or the sweep fail.
    pub fn activate(&self, config: DomainConfig) -> Result<Arc<Domain>> {
        self.start(DomainId::new(), config)
    }

    fn start(&self, id: DomainId, config: DomainConfig) -> Result<Arc<Domain>> {
        let active = self.active_domains();
        let global = active
            .iter()
            .find(|domain| domain.kind() == DomainKind::Global)
            .cloned();

        if config.kind() == DomainKind::Global {
            if let Some(existing) = &global {
                return Err(DiError::DuplicateGlobalDomain {
                    existing: existing.name().to_string(),
                });
            }
        }

        let parent = if config.inherits_global() {
            global.as_ref().map(|domain| domain.registry())
        } else {
            None
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            domain = %id,
            name = config.name(),
            kind = ?config.kind(),
            chained = parent.is_some(),
            "Activating domain"
        );

        let skip = |instance: &Arc<dyn Component>| {
            active.iter().any(|domain| domain.has_injected(instance))
        };
        let domain = Domain::start(id, config, parent, &skip)?;

        let mut domains = self.domains_mut();
        if domain.kind() == DomainKind::Global {
            // Another global may have been activated while this one configured
            if let Some(existing) = domains.iter().find(|d| d.kind() == DomainKind::Global) {
                let existing = existing.name().to_string();
                domain.retire();
                return Err(DiError::DuplicateGlobalDomain { existing });
            }
        }
        domains.push(Arc::clone(&domain));

        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            domain = %id,
            name = domain.name(),
            active = domains.len(),
            "Domain active"
        );

        Ok(domain)
    }

    /// Remove a domain from the active set.
    ///
    /// Registered services are not disposed; they are released when the
    /// last handle to them drops. Once the retired global domain itself is
    /// dropped, local registries chained to it fail lookups that reach it
    /// with `ParentDropped`.
    pub fn retire(&self, id: DomainId) -> Result<Arc<Domain>> {
        let domain = {
            let mut domains = self.domains_mut();
            let index = domains
                .iter()
                .position(|domain| domain.id() == id)
                .ok_or_else(|| DiError::InvalidDomainState {
                    domain: id.to_string(),
                    operation: "retire",
                    state: DomainState::Retired.as_str(),
                })?;
            domains.remove(index)
        };

        domain.retire();

        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            domain = %id,
            name = domain.name(),
            "Domain retired"
        );

        Ok(domain)
    }

    /// Retire a domain and activate it again from the same configuration,
    /// with a fresh registry and an empty injected-instance set.
    pub fn restart(&self, id: DomainId) -> Result<Arc<Domain>> {
        let retired = self.retire(id)?;
        self.start(id, retired.config().clone())
    }

    /// Retire every domain, newest first
    pub fn retire_all(&self) -> usize {
        let retired: Vec<_> = self.domains_mut().drain(..).rev().collect();
        for domain in &retired {
            domain.retire();
        }
        retired.len()
    }

    // =========================================================================
    // Late injection
    // =========================================================================

    /// Inject an instance created after the domains' sweeps.
    ///
    /// Idempotent per instance: if any active domain already injected it,
    /// nothing happens. Otherwise the newest active local domain whose host
    /// contains it is used, then the global domain. Failures are logged and
    /// returned; `NoApplicableDomain` is expected before any domain exists.
    pub fn request_injection(&self, instance: &Arc<dyn Component>) -> Result<LateInjection> {
        let result = self.inject_late(instance);

        #[cfg(feature = "logging")]
        if let Err(err) = &result {
            warn!(
                target: "domain_injector",
                component = instance.component_name(),
                recoverable = err.is_recoverable(),
                error = %err,
                "Late injection skipped"
            );
        }

        result
    }

    fn inject_late(&self, instance: &Arc<dyn Component>) -> Result<LateInjection> {
        let active = self.active_domains();

        if let Some(domain) = active.iter().find(|domain| domain.has_injected(instance)) {
            #[cfg(feature = "logging")]
            trace!(
                target: "domain_injector",
                domain = %domain.id(),
                component = instance.component_name(),
                "Instance already injected"
            );
            return Ok(LateInjection::AlreadyInjected(domain.id()));
        }

        let target = active
            .iter()
            .rev()
            .find(|domain| domain.kind() == DomainKind::Local && domain.contains(instance))
            .or_else(|| {
                active
                    .iter()
                    .find(|domain| domain.kind() == DomainKind::Global)
            })
            .ok_or_else(|| DiError::NoApplicableDomain {
                instance: instance.component_name(),
            })?;

        target.inject_instance(instance)?;
        Ok(LateInjection::Injected(target.id()))
    }
}

impl std::fmt::Debug for DomainRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let domains = self.domains();
        f.debug_struct("DomainRuntime")
            .field(
                "domains",
                &domains
                    .iter()
                    .map(|domain| (domain.id(), domain.name().to_string()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticWarning, ResolutionDiagnostics};
    use crate::domain::ComponentSet;
    use crate::inject::{Dep, Inject, InjectionPoints, Slot};
    use crate::{ServiceDeclaration, ServiceManifest, service};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Settings {
        label: &'static str,
    }

    #[derive(Default)]
    struct Player {
        settings: Dep<Settings>,
    }

    impl Inject for Player {
        fn declare(points: &mut InjectionPoints<Self>) {
            points.required("settings", |p| &p.settings);
        }
    }

    fn settings(label: &'static str) -> impl Fn(&crate::ServiceRegistry) -> Result<()> + Send + Sync {
        move |registry| {
            registry.register_singleton(Settings { label });
            Ok(())
        }
    }

    fn component<T: Inject>(value: &Arc<T>) -> Arc<dyn Component> {
        value.clone()
    }

    #[test]
    fn test_late_injection_is_idempotent() {
        let counter = Arc::new(AtomicU32::new(0));
        let runtime = DomainRuntime::new();

        let c = Arc::clone(&counter);
        runtime
            .activate(DomainConfig::global("app").configure(move |registry| {
                let c = Arc::clone(&c);
                registry.register_transient(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(Settings { label: "fresh" }))
                });
                Ok(())
            }))
            .unwrap();

        let player = Arc::new(Player::default());
        let first = runtime.request_injection(&component(&player)).unwrap();
        let second = runtime.request_injection(&component(&player)).unwrap();

        assert!(first.was_injected());
        assert_eq!(second, LateInjection::AlreadyInjected(first.domain()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_applicable_domain_is_recoverable() {
        let runtime = DomainRuntime::new();
        let player = Arc::new(Player::default());

        let err = runtime.request_injection(&component(&player)).unwrap_err();
        assert!(matches!(err, DiError::NoApplicableDomain { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_second_global_domain_fails() {
        let runtime = DomainRuntime::new();
        let first = runtime.activate(DomainConfig::global("first")).unwrap();

        let err = runtime.activate(DomainConfig::global("second")).unwrap_err();
        assert!(matches!(err, DiError::DuplicateGlobalDomain { ref existing } if existing == "first"));
        assert_eq!(runtime.active_domains().len(), 1);

        runtime.retire(first.id()).unwrap();
        assert!(runtime.activate(DomainConfig::global("second")).is_ok());
    }

    #[test]
    fn test_local_chains_to_global_and_overrides() {
        let runtime = DomainRuntime::new();
        let global = runtime
            .activate(DomainConfig::global("app").configure(settings("global")))
            .unwrap();

        let inherit = runtime.activate(DomainConfig::local("inherit")).unwrap();
        assert_eq!(inherit.registry().resolve::<Settings>().unwrap().label, "global");

        let local = runtime
            .activate(DomainConfig::local("override").configure(settings("local")))
            .unwrap();
        assert_eq!(local.registry().resolve::<Settings>().unwrap().label, "local");
        assert_eq!(global.registry().resolve::<Settings>().unwrap().label, "global");

        let isolated = runtime
            .activate(DomainConfig::local("isolated").inherit_global(false))
            .unwrap();
        assert!(!isolated.registry().is_registered::<Settings>());
    }

    #[test]
    fn test_late_injection_prefers_containing_local_domain() {
        let runtime = DomainRuntime::new();
        let global = runtime
            .activate(DomainConfig::global("app").configure(settings("global")))
            .unwrap();

        let host = Arc::new(ComponentSet::new());
        let local = runtime
            .activate(
                DomainConfig::local("level")
                    .configure(settings("local"))
                    .host(host.clone()),
            )
            .unwrap();

        // Spawned into the level after its sweep
        let spawned = host.add(Player::default());
        let outcome = runtime.request_injection(&component(&spawned)).unwrap();
        assert_eq!(outcome, LateInjection::Injected(local.id()));
        assert_eq!(spawned.settings.get().unwrap().label, "local");

        // Not part of any host: falls back to the global domain
        let stray = Arc::new(Player::default());
        let outcome = runtime.request_injection(&component(&stray)).unwrap();
        assert_eq!(outcome, LateInjection::Injected(global.id()));
        assert_eq!(stray.settings.get().unwrap().label, "global");
    }

    #[test]
    fn test_sweep_skips_instances_injected_elsewhere() {
        let runtime = DomainRuntime::new();
        let shared = Arc::new(Player::default());

        let global_host = Arc::new(ComponentSet::new());
        global_host.insert(component(&shared));
        runtime
            .activate(
                DomainConfig::global("app")
                    .configure(settings("global"))
                    .host(global_host),
            )
            .unwrap();

        let local_host = Arc::new(ComponentSet::new());
        local_host.insert(component(&shared));
        let local = runtime
            .activate(
                DomainConfig::local("level")
                    .configure(settings("local"))
                    .host(local_host),
            )
            .unwrap();

        assert_eq!(shared.settings.get().unwrap().label, "global");
        assert!(!local.has_injected(&component(&shared)));
    }

    #[test]
    fn test_restart_clears_injected_set_and_registry() {
        let built = Arc::new(AtomicU32::new(0));
        let runtime = DomainRuntime::new();
        let host = Arc::new(ComponentSet::new());
        let player = host.add(Player::default());

        let b = Arc::clone(&built);
        let domain = runtime
            .activate(
                DomainConfig::global("app")
                    .configure(move |registry| {
                        let b = Arc::clone(&b);
                        registry.register_lazy_singleton(move |_| {
                            b.fetch_add(1, Ordering::SeqCst);
                            Ok(Arc::new(Settings { label: "lazy" }))
                        });
                        Ok(())
                    })
                    .host(host),
            )
            .unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        let before = player.settings.get().unwrap();

        let restarted = runtime.restart(domain.id()).unwrap();
        assert_eq!(restarted.id(), domain.id());
        assert_eq!(domain.state(), DomainState::Retired);
        assert!(restarted.is_active());
        assert!(!restarted.registry().ptr_eq(domain.registry()));

        // The sweep ran again against the fresh registry
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&before, &player.settings.get().unwrap()));
        assert!(restarted.has_injected(&component(&player)));
    }

    #[test]
    fn test_retire_unknown_domain() {
        let runtime = DomainRuntime::new();
        let domain = runtime.activate(DomainConfig::local("level")).unwrap();
        runtime.retire(domain.id()).unwrap();

        let err = runtime.retire(domain.id()).unwrap_err();
        assert!(matches!(err, DiError::InvalidDomainState { operation: "retire", .. }));
        assert_eq!(runtime.retire_all(), 0);
    }

    // Services that require each other, auto-registered lazily
    #[derive(Default)]
    struct ServiceA {
        b: Dep<ServiceB>,
    }

    #[derive(Default)]
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

    #[derive(Default)]
    struct Trigger {
        a: Dep<ServiceA>,
    }

    impl Inject for Trigger {
        fn declare(points: &mut InjectionPoints<Self>) {
            points.required("a", |t| &t.a);
        }
    }

    #[test]
    fn test_mutual_services_fail_activation_during_sweep() {
        let runtime = DomainRuntime::new();
        let host = Arc::new(ComponentSet::new());
        host.add(Trigger::default());

        let manifest = ServiceManifest::new()
            .with(service!(ServiceA))
            .with(service!(ServiceB));

        let err = runtime
            .activate(
                DomainConfig::global("app")
                    .manifest(manifest)
                    .host(host)
                    .diagnostics(Arc::new(ResolutionDiagnostics::new())),
            )
            .unwrap_err();

        let path = err.cycle_path().expect("cycle");
        assert_eq!(
            &path[path.len() - 3..],
            &[
                std::any::type_name::<ServiceA>(),
                std::any::type_name::<ServiceB>(),
                std::any::type_name::<ServiceA>(),
            ]
        );
        assert!(runtime.global().is_none());
    }

    #[test]
    fn test_mutual_eager_services_report_exact_cycle() {
        let runtime = DomainRuntime::new();
        let err = runtime
            .activate(
                DomainConfig::global("app")
                    .service(service!(eager ServiceB))
                    .service(service!(ServiceA))
                    .diagnostics(Arc::new(ResolutionDiagnostics::new())),
            )
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Circular dependency detected: ServiceB → ServiceA → ServiceB"
        );
    }

    static EAGER_BUILT: AtomicU32 = AtomicU32::new(0);

    struct Warm;
    impl Inject for Warm {}

    fn warm() -> Warm {
        EAGER_BUILT.fetch_add(1, Ordering::SeqCst);
        Warm
    }

    #[test]
    fn test_eager_service_built_during_activation() {
        let runtime = DomainRuntime::new();
        let domain = runtime
            .activate(
                DomainConfig::local("level")
                    .service(ServiceDeclaration::with_constructor(warm).eager()),
            )
            .unwrap();

        assert_eq!(EAGER_BUILT.load(Ordering::SeqCst), 1);
        domain.registry().resolve::<Warm>().unwrap();
        assert_eq!(EAGER_BUILT.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct Hud {
        settings: Dep<Settings>,
    }

    impl Inject for Hud {
        fn declare(points: &mut InjectionPoints<Self>) {
            points.required("settings", |h| &h.settings);
        }
    }

    #[test]
    fn test_host_bound_service_reuses_existing_instance() {
        let runtime = DomainRuntime::new();
        let host = Arc::new(ComponentSet::new());
        let existing = host.add(Hud::default());

        let domain = runtime
            .activate(
                DomainConfig::local("level")
                    .service(service!(host Hud))
                    .configure(settings("local"))
                    .host(host.clone()),
            )
            .unwrap();

        let registered = domain.registry().resolve::<Hud>().unwrap();
        assert!(Arc::ptr_eq(&registered, &existing));
        assert!(existing.settings.is_set());
        assert_eq!(host.len(), 1);
    }

    #[test]
    fn test_host_bound_service_created_and_adopted() {
        let runtime = DomainRuntime::new();
        let host = Arc::new(ComponentSet::new());

        let domain = runtime
            .activate(
                DomainConfig::local("level")
                    .service(service!(host Hud))
                    .configure(settings("local"))
                    .host(host.clone()),
            )
            .unwrap();

        assert_eq!(host.len(), 1);
        let created = domain.registry().resolve::<Hud>().unwrap();
        assert!(created.settings.is_set());
        assert!(domain.has_injected(&component(&created)));
    }

    #[test]
    fn test_explicit_configuration_overwrites_manifest() {
        #[derive(Default)]
        struct Volume(u8);
        impl Inject for Volume {}

        let diagnostics = Arc::new(ResolutionDiagnostics::new());
        let runtime = DomainRuntime::new();
        let domain = runtime
            .activate(
                DomainConfig::global("app")
                    .service(service!(Volume))
                    .configure(|registry| {
                        registry.register_singleton(Volume(9));
                        Ok(())
                    })
                    .diagnostics(diagnostics.clone()),
            )
            .unwrap();

        assert_eq!(domain.registry().resolve::<Volume>().unwrap().0, 9);
        assert_eq!(
            diagnostics.warnings(),
            vec![DiagnosticWarning::DuplicateRegistration {
                key: std::any::type_name::<Volume>()
            }]
        );
    }

    trait Weapon: Send + Sync {
        fn name(&self) -> &'static str;
    }

    #[derive(Default)]
    struct Sword;
    impl Inject for Sword {}
    impl Weapon for Sword {
        fn name(&self) -> &'static str {
            "sword"
        }
    }

    #[derive(Default)]
    struct Axe;
    impl Inject for Axe {}
    impl Weapon for Axe {
        fn name(&self) -> &'static str {
            "axe"
        }
    }

    #[derive(Default)]
    struct Armory {
        weapons: Slot<Vec<Arc<dyn Weapon>>>,
    }

    impl Inject for Armory {
        fn declare(points: &mut InjectionPoints<Self>) {
            points.all("weapons", |a| &a.weapons);
        }
    }

    #[test]
    fn test_inject_all_collects_declared_services() {
        let runtime = DomainRuntime::new();
        let host = Arc::new(ComponentSet::new());
        let armory = host.add(Armory::default());

        let domain = runtime
            .activate(
                DomainConfig::global("app")
                    .service(service!(Sword: dyn Weapon))
                    .service(service!(eager Axe: dyn Weapon))
                    .host(host),
            )
            .unwrap();

        let names: Vec<_> = armory
            .weapons
            .get()
            .unwrap()
            .iter()
            .map(|w| w.name())
            .collect();
        assert_eq!(names, vec!["sword", "axe"]);

        // Each keeps its own key
        assert!(domain.registry().is_registered::<Sword>());
        assert!(domain.registry().is_registered::<Axe>());
        assert_eq!(domain.registry().resolve_all::<dyn Weapon>().unwrap().len(), 2);
    }
}
