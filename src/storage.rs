//! Binding storage for a single registry
//!
//! Uses DashMap for the key → descriptor map. Descriptors are held behind
//! `Arc` so resolution can clone one out and drop the map guard before
//! running a factory (factories re-enter the registry).

use crate::factory::{Binding, ErasedService};
use crate::ServiceKey;
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Type-erased upcast from a binding's own value to a base key's value
pub(crate) type CastFn = Arc<dyn Fn(&ErasedService) -> Option<ErasedService> + Send + Sync>;

/// One binding owned by a registry
pub(crate) struct ServiceDescriptor {
    /// Key the binding is registered under
    pub key: ServiceKey,
    /// Concrete type behind the binding (used for cycle paths)
    pub implementation: &'static str,
    /// Lifetime and value source
    pub binding: Binding,
    /// Registration order, for stable `resolve_all` results
    pub sequence: u64,
}

/// Makes a binding assignable to an additional base key
#[derive(Clone)]
pub(crate) struct Exposure {
    pub base: TypeId,
    pub cast: CastFn,
}

/// Storage for service descriptors
pub(crate) struct ServiceStorage {
    /// Map from key TypeId to descriptor
    descriptors: DashMap<TypeId, Arc<ServiceDescriptor>, RandomState>,
    /// Base keys each bound key is assignable to
    exposures: DashMap<TypeId, Vec<Exposure>, RandomState>,
    /// Next registration sequence number
    sequence: AtomicU64,
}

impl ServiceStorage {
    /// Create new empty storage with 8 shards per map.
    #[inline]
    pub fn new() -> Self {
        Self {
            descriptors: DashMap::with_capacity_and_hasher_and_shard_amount(
                0,
                RandomState::new(),
                8,
            ),
            exposures: DashMap::with_capacity_and_hasher_and_shard_amount(
                0,
                RandomState::new(),
                8,
            ),
            sequence: AtomicU64::new(0),
        }
    }

    /// Insert a binding, returning the descriptor it replaced
    #[inline]
    pub fn insert(
        &self,
        key: ServiceKey,
        implementation: &'static str,
        binding: Binding,
    ) -> Option<Arc<ServiceDescriptor>> {
        let descriptor = ServiceDescriptor {
            key,
            implementation,
            binding,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.descriptors.insert(key.type_id(), Arc::new(descriptor))
    }

    /// Look up a descriptor; the map guard is released before returning
    #[inline]
    pub fn get(&self, type_id: &TypeId) -> Option<Arc<ServiceDescriptor>> {
        self.descriptors.get(type_id).map(|d| Arc::clone(d.value()))
    }

    /// Check if key exists
    #[inline]
    pub fn contains(&self, type_id: &TypeId) -> bool {
        self.descriptors.contains_key(type_id)
    }

    /// Remove a binding together with its exposures
    #[inline]
    pub fn remove(&self, type_id: &TypeId) -> bool {
        self.exposures.remove(type_id);
        self.descriptors.remove(type_id).is_some()
    }

    /// Record that values bound under `key` are assignable to `exposure.base`
    pub fn expose(&self, key: TypeId, exposure: Exposure) {
        let mut entry = self.exposures.entry(key).or_default();
        entry.retain(|e| e.base != exposure.base);
        entry.push(exposure);
    }

    /// The cast from `key`'s value to `base`, if one was exposed
    pub fn exposure(&self, key: &TypeId, base: &TypeId) -> Option<CastFn> {
        self.exposures
            .get(key)
            .and_then(|list| list.iter().find(|e| e.base == *base).map(|e| Arc::clone(&e.cast)))
    }

    /// All descriptors in registration order
    pub fn ordered(&self) -> Vec<Arc<ServiceDescriptor>> {
        let mut all: Vec<_> = self
            .descriptors
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by_key(|d| d.sequence);
        all
    }

    /// Get number of registered services
    #[inline]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Clear all bindings and exposures
    #[inline]
    pub fn clear(&self) {
        self.descriptors.clear();
        self.exposures.clear();
    }
}

impl Default for ServiceStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceStorage")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::erase;

    #[allow(dead_code)]
    struct TestService {
        value: i32,
    }

    struct Other;

    fn eager(value: i32) -> Binding {
        Binding::Eager(erase(Arc::new(TestService { value })))
    }

    #[test]
    fn test_storage_insert_and_get() {
        let storage = ServiceStorage::new();
        let key = ServiceKey::of::<TestService>();

        assert!(storage.insert(key, key.type_name(), eager(42)).is_none());

        let descriptor = storage.get(&key.type_id()).unwrap();
        assert_eq!(descriptor.key, key);
        assert!(storage.contains(&key.type_id()));
    }

    #[test]
    fn test_insert_reports_replaced_descriptor() {
        let storage = ServiceStorage::new();
        let key = ServiceKey::of::<TestService>();

        storage.insert(key, key.type_name(), eager(1));
        let replaced = storage.insert(key, key.type_name(), eager(2));
        assert!(replaced.is_some());
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_ordered_follows_registration() {
        let storage = ServiceStorage::new();
        let a = ServiceKey::of::<TestService>();
        let b = ServiceKey::of::<Other>();

        storage.insert(b, b.type_name(), Binding::Eager(erase(Arc::new(Other))));
        storage.insert(a, a.type_name(), eager(1));

        let order: Vec<_> = storage.ordered().iter().map(|d| d.key).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn test_storage_remove() {
        let storage = ServiceStorage::new();
        let key = ServiceKey::of::<TestService>();

        storage.insert(key, key.type_name(), eager(0));
        assert!(storage.remove(&key.type_id()));
        assert!(!storage.contains(&key.type_id()));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_remove_drops_exposures() {
        let storage = ServiceStorage::new();
        let key = ServiceKey::of::<TestService>();
        let base = TypeId::of::<Other>();
        let cast: CastFn = Arc::new(|value| Some(Arc::clone(value)));

        storage.insert(key, key.type_name(), eager(0));
        storage.expose(key.type_id(), Exposure { base, cast });
        assert!(storage.exposure(&key.type_id(), &base).is_some());

        // A later registration under the same key starts without them
        storage.remove(&key.type_id());
        storage.insert(key, key.type_name(), eager(1));
        assert!(storage.exposure(&key.type_id(), &base).is_none());
    }
}
