//! Service identities.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a binding: the type token a service is registered and
/// resolved under.
///
/// Keys may name unsized types, so `dyn Trait` works as a key alongside
/// concrete structs.
///
/// # Examples
///
/// ```rust
/// use domain_injector::ServiceKey;
///
/// trait Weapon: Send + Sync {}
///
/// let key = ServiceKey::of::<dyn Weapon>();
/// assert_eq!(key.to_string(), "dyn Weapon");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ServiceKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl ServiceKey {
    /// Key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully qualified type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name with module paths stripped.
    pub fn short_name(&self) -> String {
        short_type_name(self.type_name)
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

/// Strip module paths from a type name, keeping generic structure.
///
/// `alloc::vec::Vec<alloc::sync::Arc<dyn app::Weapon>>` becomes
/// `Vec<Arc<dyn Weapon>>`.
pub fn short_type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut segment_start = 0;
    let mut chars = name.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            out.truncate(segment_start);
        } else if c.is_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push(c);
            segment_start = out.len();
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Weapon {}
    struct Sword;

    #[test]
    fn test_short_names() {
        assert_eq!(short_type_name("a::b::Sword"), "Sword");
        assert_eq!(
            short_type_name("alloc::vec::Vec<alloc::sync::Arc<dyn app::Weapon>>"),
            "Vec<Arc<dyn Weapon>>"
        );
        assert_eq!(short_type_name("(a::A, b::B)"), "(A, B)");
        assert_eq!(short_type_name("u32"), "u32");
    }

    #[test]
    fn test_key_equality_uses_type_id() {
        assert_eq!(ServiceKey::of::<Sword>(), ServiceKey::of::<Sword>());
        assert_ne!(ServiceKey::of::<Sword>(), ServiceKey::of::<dyn Weapon>());
        assert_eq!(ServiceKey::of::<Sword>().to_string(), "Sword");
    }
}
