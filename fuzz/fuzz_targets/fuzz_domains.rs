#![no_main]

//! Fuzz target for domain lifecycles
//!
//! Activates, retires and restarts domains in arbitrary order while
//! spawning components and requesting late injection.

use arbitrary::Arbitrary;
use domain_injector::{
    Component, ComponentSet, Dep, DiError, DomainConfig, DomainId, DomainRuntime, Inject,
    InjectionPoints, LateInjection, service,
};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Default)]
struct Clock;
impl Inject for Clock {}

#[derive(Default)]
struct LevelRules;
impl Inject for LevelRules {}

#[derive(Default)]
struct Actor {
    clock: Dep<Clock>,
    rules: Dep<LevelRules>,
}

impl Inject for Actor {
    fn declare(points: &mut InjectionPoints<Self>) {
        points
            .required("clock", |actor| &actor.clock)
            .optional("rules", |actor| &actor.rules);
    }
}

#[derive(Debug, Arbitrary)]
enum DomainOp {
    ActivateGlobal,
    ActivateLocal { inherit_global: bool, actors: u8 },
    Retire(u8),
    Restart(u8),
    SpawnLoose,
    SpawnInLocal(u8),
    Reinject(u8),
    RetireAll,
}

fuzz_target!(|ops: Vec<DomainOp>| {
    let runtime = DomainRuntime::new();
    let mut hosts: Vec<(DomainId, Arc<ComponentSet>)> = Vec::new();
    let mut spawned: Vec<Arc<dyn Component>> = Vec::new();

    for op in ops.into_iter().take(64) {
        match op {
            DomainOp::ActivateGlobal => {
                let had_global = runtime.global().is_some();
                let result =
                    runtime.activate(DomainConfig::global("app").service(service!(Clock)));
                match result {
                    Ok(domain) => assert!(!had_global && domain.is_active()),
                    Err(DiError::DuplicateGlobalDomain { .. }) => assert!(had_global),
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            DomainOp::ActivateLocal {
                inherit_global,
                actors,
            } => {
                let host = Arc::new(ComponentSet::new());
                for _ in 0..actors % 8 {
                    host.add(Actor::default());
                }
                let config = DomainConfig::local("level")
                    .service(service!(LevelRules))
                    .host(host.clone())
                    .inherit_global(inherit_global);

                // Actors need a Clock, which only the global domain provides
                let reachable = inherit_global && runtime.global().is_some();
                match runtime.activate(config) {
                    Ok(domain) => {
                        assert!(reachable || host.is_empty());
                        assert_eq!(domain.injected_count(), host.len());
                        hosts.push((domain.id(), host));
                    }
                    Err(err) => {
                        assert!(!reachable);
                        assert!(err.is_recoverable());
                    }
                }
            }
            DomainOp::Retire(idx) => {
                if let Some((id, _)) = hosts.get(idx as usize % hosts.len().max(1)) {
                    let _ = runtime.retire(*id);
                    assert!(runtime.domain(*id).is_none());
                }
            }
            DomainOp::Restart(idx) => {
                if let Some((id, _)) = hosts.get(idx as usize % hosts.len().max(1)) {
                    if let Ok(domain) = runtime.restart(*id) {
                        assert_eq!(domain.id(), *id);
                    }
                }
            }
            DomainOp::SpawnLoose => {
                let actor: Arc<dyn Component> = Arc::new(Actor::default());
                let _ = runtime.request_injection(&actor);
                spawned.push(actor);
            }
            DomainOp::SpawnInLocal(idx) => {
                if let Some((_, host)) = hosts.get(idx as usize % hosts.len().max(1)) {
                    let actor = host.add(Actor::default());
                    let component: Arc<dyn Component> = actor.clone();
                    if let Ok(LateInjection::Injected(_)) = runtime.request_injection(&component) {
                        assert!(actor.clock.is_set());
                    }
                    spawned.push(component);
                }
            }
            DomainOp::Reinject(idx) => {
                if let Some(actor) = spawned.get(idx as usize % spawned.len().max(1)) {
                    let first = runtime.request_injection(actor);
                    let second = runtime.request_injection(actor);
                    if first.is_ok() {
                        assert!(matches!(second, Ok(LateInjection::AlreadyInjected(_))));
                    }
                }
            }
            DomainOp::RetireAll => {
                runtime.retire_all();
                assert!(runtime.active_domains().is_empty());
            }
        }
    }
});
