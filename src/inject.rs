//! Injection points
//!
//! A type takes part in injection by implementing [`Inject`] and declaring
//! its injection points once. Points are [`Slot`] cells reached through
//! plain accessor functions, so targets are filled through `&self` and can
//! be shared behind an `Arc` before they are wired.
//!
//! # Example
//!
//! ```rust
//! use domain_injector::{Dep, Inject, InjectionPoints, Injector, ServiceRegistry};
//!
//! struct Engine { power: u32 }
//!
//! #[derive(Default)]
//! struct Car {
//!     engine: Dep<Engine>,
//! }
//!
//! impl Inject for Car {
//!     fn declare(points: &mut InjectionPoints<Self>) {
//!         points.required("engine", |car| &car.engine);
//!     }
//! }
//!
//! let registry = ServiceRegistry::new();
//! registry.register_singleton(Engine { power: 300 });
//!
//! let car = Car::default();
//! Injector::new(registry).inject(&car).unwrap();
//! assert_eq!(car.engine.get().unwrap().power, 300);
//! ```

use crate::injector::Injector;
use crate::{DiError, Result, ServiceRegistry};
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

// =============================================================================
// Slot
// =============================================================================

/// An injection target cell.
///
/// Empty until the injector fills it; optional points that cannot be
/// resolved leave whatever the slot already holds.
pub struct Slot<V> {
    value: RwLock<Option<V>>,
}

/// A slot holding a single resolved service
pub type Dep<T> = Slot<Arc<T>>;

impl<V> Slot<V> {
    /// An empty slot
    pub const fn new() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }

    /// A slot pre-filled with a default that optional injection keeps
    pub const fn with_value(value: V) -> Self {
        Self {
            value: RwLock::new(Some(value)),
        }
    }

    /// Store `value`, returning the previous content
    pub fn set(&self, value: V) -> Option<V> {
        self.value
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(value)
    }

    pub fn take(&self) -> Option<V> {
        self.value.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn is_set(&self) -> bool {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Borrow the content without cloning it
    pub fn with<R>(&self, f: impl FnOnce(Option<&V>) -> R) -> R {
        let guard = self.value.read().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }
}

impl<V: Clone> Slot<V> {
    /// Clone the content out of the slot
    pub fn get(&self) -> Option<V> {
        self.with(|value| value.cloned())
    }
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for Slot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("is_set", &self.is_set()).finish()
    }
}

// =============================================================================
// Collection shapes
// =============================================================================

/// Shapes an inject-all point can assign to.
///
/// `from_resolved` returns `None` when the resolved bindings do not fit the
/// shape; the injector then warns and leaves the slot untouched.
pub trait Collection: Sized + Send + Sync + 'static {
    /// Element key the bindings are resolved under
    type Item: ?Sized + Send + Sync + 'static;

    /// Shape name used in log output
    const SHAPE: &'static str;

    fn from_resolved(items: Vec<Arc<Self::Item>>) -> Option<Self>;
}

impl<T: ?Sized + Send + Sync + 'static> Collection for Vec<Arc<T>> {
    type Item = T;
    const SHAPE: &'static str = "growable";

    fn from_resolved(items: Vec<Arc<T>>) -> Option<Self> {
        Some(items)
    }
}

impl<T: ?Sized + Send + Sync + 'static> Collection for Box<[Arc<T>]> {
    type Item = T;
    const SHAPE: &'static str = "boxed slice";

    fn from_resolved(items: Vec<Arc<T>>) -> Option<Self> {
        Some(items.into_boxed_slice())
    }
}

impl<T: ?Sized + Send + Sync + 'static> Collection for Arc<[Arc<T>]> {
    type Item = T;
    const SHAPE: &'static str = "shared slice";

    fn from_resolved(items: Vec<Arc<T>>) -> Option<Self> {
        Some(items.into())
    }
}

impl<T: ?Sized + Send + Sync + 'static, const N: usize> Collection for [Arc<T>; N] {
    type Item = T;
    const SHAPE: &'static str = "fixed-size";

    fn from_resolved(items: Vec<Arc<T>>) -> Option<Self> {
        items.try_into().ok()
    }
}

// =============================================================================
// Method parameters
// =============================================================================

/// Method parameter that must resolve
pub struct Required<D: ?Sized>(PhantomData<D>);

/// Method parameter passed as `None` when it cannot be resolved
pub struct Optional<D: ?Sized>(PhantomData<D>);

/// One method-injection parameter
pub trait Param: 'static {
    type Output;

    fn key() -> &'static str;

    fn resolve<T: 'static>(registry: &ServiceRegistry, method: &'static str) -> Result<Self::Output>;
}

impl<D: ?Sized + Send + Sync + 'static> Param for Required<D> {
    type Output = Arc<D>;

    fn key() -> &'static str {
        std::any::type_name::<D>()
    }

    fn resolve<T: 'static>(registry: &ServiceRegistry, method: &'static str) -> Result<Arc<D>> {
        registry
            .resolve_optional::<D>()?
            .ok_or_else(|| DiError::missing::<T, D>(method))
    }
}

impl<D: ?Sized + Send + Sync + 'static> Param for Optional<D> {
    type Output = Option<Arc<D>>;

    fn key() -> &'static str {
        std::any::type_name::<D>()
    }

    fn resolve<T: 'static>(registry: &ServiceRegistry, _method: &'static str) -> Result<Option<Arc<D>>> {
        Ok(resolve_optional_point::<D>(registry))
    }
}

/// A tuple of [`Param`]s resolved left to right
pub trait Params: 'static {
    type Output;

    fn keys() -> Vec<&'static str>;

    fn resolve<T: 'static>(registry: &ServiceRegistry, method: &'static str) -> Result<Self::Output>;
}

macro_rules! impl_params_tuple {
    ($($param:ident),+) => {
        impl<$($param: Param),+> Params for ($($param,)+) {
            type Output = ($(<$param as Param>::Output,)+);

            fn keys() -> Vec<&'static str> {
                vec![$(<$param as Param>::key()),+]
            }

            fn resolve<T: 'static>(
                registry: &ServiceRegistry,
                method: &'static str,
            ) -> Result<Self::Output> {
                Ok(($(<$param as Param>::resolve::<T>(registry, method)?,)+))
            }
        }
    };
}

impl_params_tuple!(A);
impl_params_tuple!(A, B);
impl_params_tuple!(A, B, C);
impl_params_tuple!(A, B, C, D);
impl_params_tuple!(A, B, C, D, E);
impl_params_tuple!(A, B, C, D, E, F);
impl_params_tuple!(A, B, C, D, E, F, G);
impl_params_tuple!(A, B, C, D, E, F, G, H);

/// Optional resolution never fails: any error yields `None` and the slot
/// keeps its current value.
fn resolve_optional_point<D: ?Sized + Send + Sync + 'static>(registry: &ServiceRegistry) -> Option<Arc<D>> {
    match registry.resolve_optional::<D>() {
        Ok(value) => value,
        Err(err) if err.is_recoverable() => {
            #[cfg(feature = "logging")]
            debug!(
                target: "domain_injector",
                dependency = std::any::type_name::<D>(),
                error = %err,
                "Optional dependency unavailable, keeping current value"
            );
            None
        }
        Err(err) => {
            #[cfg(feature = "logging")]
            warn!(
                target: "domain_injector",
                dependency = std::any::type_name::<D>(),
                error = %err,
                "Optional dependency failed to resolve, keeping current value"
            );
            let _ = err;
            None
        }
    }
}

// =============================================================================
// Injection point table
// =============================================================================

/// Kind of an injection point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointKind {
    Required,
    Optional,
    Collection,
    Method,
}

/// Description of one declared injection point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointInfo {
    pub name: &'static str,
    pub kind: PointKind,
    /// Keys the point resolves (element key for collections)
    pub dependencies: Vec<&'static str>,
}

type ApplyFn<T> = Box<dyn Fn(&T, &ServiceRegistry) -> Result<()> + Send + Sync>;

struct InjectionPoint<T> {
    info: PointInfo,
    apply: ApplyFn<T>,
}

/// The injection points declared by `T`.
///
/// Built once per type by [`Inject::declare`] and cached for the process.
pub struct InjectionPoints<T> {
    points: Vec<InjectionPoint<T>>,
}

impl<T: 'static> InjectionPoints<T> {
    fn new() -> Self {
        Self { points: Vec::new() }
    }

    fn push(&mut self, info: PointInfo, apply: ApplyFn<T>) -> &mut Self {
        self.points.push(InjectionPoint { info, apply });
        self
    }

    /// A single slot that must be filled; failure is `MissingDependency`.
    pub fn required<D>(&mut self, name: &'static str, slot: fn(&T) -> &Dep<D>) -> &mut Self
    where
        D: ?Sized + Send + Sync + 'static,
    {
        self.push(
            PointInfo {
                name,
                kind: PointKind::Required,
                dependencies: vec![std::any::type_name::<D>()],
            },
            Box::new(move |target, registry| {
                let value = registry
                    .resolve_optional::<D>()?
                    .ok_or_else(|| DiError::missing::<T, D>(name))?;
                slot(target).set(value);
                Ok(())
            }),
        )
    }

    /// A single slot left as-is when the dependency cannot be resolved for
    /// any reason.
    pub fn optional<D>(&mut self, name: &'static str, slot: fn(&T) -> &Dep<D>) -> &mut Self
    where
        D: ?Sized + Send + Sync + 'static,
    {
        self.push(
            PointInfo {
                name,
                kind: PointKind::Optional,
                dependencies: vec![std::any::type_name::<D>()],
            },
            Box::new(move |target, registry| {
                if let Some(value) = resolve_optional_point::<D>(registry) {
                    slot(target).set(value);
                }
                Ok(())
            }),
        )
    }

    /// Every local binding assignable to the collection's element key.
    pub fn all<C: Collection>(&mut self, name: &'static str, slot: fn(&T) -> &Slot<C>) -> &mut Self {
        self.push(
            PointInfo {
                name,
                kind: PointKind::Collection,
                dependencies: vec![std::any::type_name::<C::Item>()],
            },
            Box::new(move |target, registry| {
                let items = registry.resolve_all::<C::Item>()?;
                #[cfg(feature = "logging")]
                let count = items.len();

                match C::from_resolved(items) {
                    Some(collection) => {
                        slot(target).set(collection);
                    }
                    None => {
                        #[cfg(feature = "logging")]
                        warn!(
                            target: "domain_injector",
                            target_type = std::any::type_name::<T>(),
                            slot = name,
                            shape = C::SHAPE,
                            resolved = count,
                            "Resolved bindings do not fit the slot's collection shape, skipping"
                        );
                    }
                }
                Ok(())
            }),
        )
    }

    /// A method invoked once with every parameter resolved.
    ///
    /// ```rust
    /// use domain_injector::{Inject, InjectionPoints, Injector, Optional, Required, ServiceRegistry, Slot};
    ///
    /// struct Speed(u32);
    /// struct Turbo;
    ///
    /// #[derive(Default)]
    /// struct Racer { top_speed: Slot<u32> }
    ///
    /// impl Inject for Racer {
    ///     fn declare(points: &mut InjectionPoints<Self>) {
    ///         points.method::<(Required<Speed>, Optional<Turbo>)>("tune", |racer, (speed, turbo)| {
    ///             let bonus = if turbo.is_some() { 50 } else { 0 };
    ///             racer.top_speed.set(speed.0 + bonus);
    ///         });
    ///     }
    /// }
    ///
    /// let registry = ServiceRegistry::new();
    /// registry.register_singleton(Speed(200));
    ///
    /// let racer = Racer::default();
    /// Injector::new(registry).inject(&racer).unwrap();
    /// assert_eq!(racer.top_speed.get(), Some(200));
    /// ```
    pub fn method<P: Params>(
        &mut self,
        name: &'static str,
        method: impl Fn(&T, P::Output) + Send + Sync + 'static,
    ) -> &mut Self {
        self.push(
            PointInfo {
                name,
                kind: PointKind::Method,
                dependencies: P::keys(),
            },
            Box::new(move |target, registry| {
                let args = P::resolve::<T>(registry, name)?;
                method(target, args);
                Ok(())
            }),
        )
    }

    /// Every declared point, in declaration order
    pub fn describe(&self) -> Vec<PointInfo> {
        self.points.iter().map(|point| point.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Fill every point of `target`, stopping at the first failure
    pub(crate) fn apply(&self, target: &T, registry: &ServiceRegistry) -> Result<()> {
        for point in &self.points {
            #[cfg(feature = "logging")]
            trace!(
                target: "domain_injector",
                target_type = std::any::type_name::<T>(),
                point = point.info.name,
                kind = ?point.info.kind,
                "Filling injection point"
            );

            (point.apply)(target, registry)?;
        }
        Ok(())
    }
}

impl<T: Inject> InjectionPoints<T> {
    /// The cached table for `T`, declaring it on first use
    pub fn cached() -> Arc<InjectionPoints<T>> {
        let type_id = TypeId::of::<T>();

        let existing = TABLES.get(&type_id).map(|entry| Arc::clone(entry.value()));
        if let Some(table) = existing.and_then(|table| table.downcast::<InjectionPoints<T>>().ok()) {
            return table;
        }

        // Declared outside the map guard: `declare` may touch other tables
        let mut points = InjectionPoints::new();
        T::declare(&mut points);

        #[cfg(feature = "logging")]
        debug!(
            target: "domain_injector",
            target_type = std::any::type_name::<T>(),
            points = points.len(),
            "Built injection table"
        );

        let declared: Arc<dyn Any + Send + Sync> = Arc::new(points);
        let table = TABLES
            .entry(type_id)
            .or_insert(declared)
            .value()
            .clone();

        table
            .downcast::<InjectionPoints<T>>()
            .unwrap_or_else(|_| Arc::new(InjectionPoints::new()))
    }
}

impl<T> fmt::Debug for InjectionPoints<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.points.iter().map(|point| &point.info))
            .finish()
    }
}

/// Injection tables keyed by target type
static TABLES: Lazy<DashMap<TypeId, Arc<dyn Any + Send + Sync>, RandomState>> =
    Lazy::new(|| DashMap::with_hasher(RandomState::new()));

// =============================================================================
// Inject and Component
// =============================================================================

/// A type whose injection points the injector can fill.
///
/// The default declares no points, which is enough for services that only
/// need to be constructed.
pub trait Inject: Send + Sync + Sized + 'static {
    fn declare(points: &mut InjectionPoints<Self>) {
        let _ = points;
    }
}

/// Object-safe view of an injectable instance.
///
/// Sweeps and late injection work on `Arc<dyn Component>`; every [`Inject`]
/// type is a component.
pub trait Component: Send + Sync + 'static {
    /// Fully qualified type name of the instance
    fn component_name(&self) -> &'static str;

    /// Run `injector` over this instance
    fn inject_with(&self, injector: &Injector) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Inject> Component for T {
    fn component_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn inject_with(&self, injector: &Injector) -> Result<()> {
        injector.inject(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl dyn Component {
    /// Whether the instance is a `T`
    pub fn is<T: Inject>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Recover the concrete `Arc<T>`
    pub fn downcast<T: Inject>(self: Arc<Self>) -> Option<Arc<T>> {
        self.into_any().downcast::<T>().ok()
    }
}

/// Identity of a component: the address of its allocation
#[inline]
pub(crate) fn instance_id(component: &Arc<dyn Component>) -> usize {
    Arc::as_ptr(component) as *const () as usize
}
