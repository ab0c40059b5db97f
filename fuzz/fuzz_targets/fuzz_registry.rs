#![no_main]

//! Fuzz target for registry operations
//!
//! Registers, overrides and removes bindings on a parent/child pair and
//! checks lookups against a model of which registry holds what.

use arbitrary::Arbitrary;
use domain_injector::{Lifetime, ServiceRegistry};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Clone, Debug, Arbitrary)]
struct SmallService {
    id: u32,
    name: String,
}

#[derive(Clone, Debug, Arbitrary)]
struct MediumService {
    id: u64,
    data: Vec<u8>,
}

trait Named: Send + Sync {
    fn name(&self) -> &str;
}

impl Named for SmallService {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Target {
    Parent,
    Child,
}

/// Operations to perform on the registries
#[derive(Debug, Arbitrary)]
enum RegistryOp {
    RegisterSmall(Target, SmallService),
    RegisterMedium(Target, MediumService),
    RegisterLazySmall(Target),
    RegisterTransientSmall(Target),
    ExposeSmall(Target),
    ResolveSmall(Target),
    ResolveMedium(Target),
    ResolveAllNamed(Target),
    RemoveSmall(Target),
    Clear(Target),
}

#[derive(Default, Clone, Copy)]
struct Model {
    small: Option<Lifetime>,
    medium: bool,
    exposed: bool,
}

fuzz_target!(|ops: Vec<RegistryOp>| {
    let parent = ServiceRegistry::new();
    let child = parent.child();
    let mut models = [Model::default(), Model::default()];

    let pick = |target: Target| match target {
        Target::Parent => (&parent, 0usize),
        Target::Child => (&child, 1usize),
    };

    for op in ops {
        match op {
            RegistryOp::RegisterSmall(target, svc) => {
                let (registry, idx) = pick(target);
                registry.singleton(svc);
                models[idx].small = Some(Lifetime::EagerSingleton);
            }
            RegistryOp::RegisterMedium(target, svc) => {
                let (registry, idx) = pick(target);
                registry.singleton(svc);
                models[idx].medium = true;
            }
            RegistryOp::RegisterLazySmall(target) => {
                let (registry, idx) = pick(target);
                registry.lazy(|| SmallService {
                    id: 42,
                    name: "lazy".into(),
                });
                models[idx].small = Some(Lifetime::LazySingleton);
            }
            RegistryOp::RegisterTransientSmall(target) => {
                let (registry, idx) = pick(target);
                registry.transient(|| SmallService {
                    id: 0,
                    name: "transient".into(),
                });
                models[idx].small = Some(Lifetime::Transient);
            }
            RegistryOp::ExposeSmall(target) => {
                let (registry, idx) = pick(target);
                registry.expose::<SmallService, dyn Named>(|s| s as Arc<dyn Named>);
                models[idx].exposed = true;
            }
            RegistryOp::ResolveSmall(target) => {
                let (registry, idx) = pick(target);
                let visible = models[idx].small.or(if idx == 1 { models[0].small } else { None });
                let first = registry.resolve::<SmallService>();
                assert_eq!(first.is_ok(), visible.is_some());

                if let (Ok(first), Some(lifetime)) = (first, visible) {
                    let second = registry.resolve::<SmallService>().unwrap();
                    assert_eq!(Arc::ptr_eq(&first, &second), lifetime != Lifetime::Transient);
                }
            }
            RegistryOp::ResolveMedium(target) => {
                let (registry, idx) = pick(target);
                let visible = models[idx].medium || (idx == 1 && models[0].medium);
                assert_eq!(registry.resolve::<MediumService>().is_ok(), visible);
                assert_eq!(registry.is_registered::<MediumService>(), visible);
            }
            RegistryOp::ResolveAllNamed(target) => {
                let (registry, idx) = pick(target);
                // Exposures only cover the local registry; a missing base
                // binding is an error
                if let Ok(all) = registry.resolve_all::<dyn Named>() {
                    assert!(all.len() <= 1);
                    if !models[idx].exposed {
                        assert!(all.is_empty());
                    }
                }
            }
            RegistryOp::RemoveSmall(target) => {
                let (registry, idx) = pick(target);
                assert_eq!(registry.remove::<SmallService>(), models[idx].small.is_some());
                models[idx].small = None;
                models[idx].exposed = false;
            }
            RegistryOp::Clear(target) => {
                let (registry, idx) = pick(target);
                registry.clear();
                models[idx] = Model::default();
                assert_eq!(registry.len(), 0);
            }
        }
    }
});
