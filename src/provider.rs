//! Provider traits for dependency injection
//!
//! These traits define what types can be bound and how they behave.

/// Marker trait for types that can be bound in a registry by value.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually. Unsized keys such as
/// `dyn Trait` are bound through the `Arc`-taking registration methods.
///
/// # Examples
///
/// ```rust
/// // Any type that is Send + Sync + 'static works automatically
/// struct Clock {
///     started_at: u64,
/// }
///
/// // No impl needed - it just works!
/// ```
pub trait Injectable: Send + Sync + 'static {}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: Send + Sync + 'static> Injectable for T {}

/// Service lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// Pre-built value shared across all resolves
    EagerSingleton,

    /// Factory invoked on first resolve, value cached for the registry's lifetime
    #[default]
    LazySingleton,

    /// Factory invoked on every resolve
    Transient,
}

impl Lifetime {
    /// Human-readable name used in log fields
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifetime::EagerSingleton => "eager_singleton",
            Lifetime::LazySingleton => "lazy_singleton",
            Lifetime::Transient => "transient",
        }
    }
}

impl std::fmt::Display for Lifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
