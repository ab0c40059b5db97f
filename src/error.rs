//! Error types for dependency injection

use crate::key::short_type_name;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during registration, resolution, injection and
/// domain lifecycle operations.
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// No registry in the parent chain has a binding for the key
    #[error("Service not registered: {}", short_type_name(.key))]
    ServiceNotRegistered { key: &'static str },

    /// A required injection slot could not be filled
    #[error(
        "Missing dependency {} for {}.{slot}",
        short_type_name(.key),
        short_type_name(.target)
    )]
    MissingDependency {
        target: &'static str,
        slot: &'static str,
        key: &'static str,
    },

    /// A consumer was revisited while it was still being resolved
    #[error("Circular dependency detected: {}", CyclePath(.path))]
    CircularDependency { path: Vec<&'static str> },

    /// Nested resolution went deeper than the supported limit
    #[error("Resolution depth limit exceeded ({depth}) while resolving {}", short_type_name(.key))]
    DepthExceeded { key: &'static str, depth: usize },

    /// Late injection found no active domain for the instance
    #[error("No applicable domain for instance of {}", short_type_name(.instance))]
    NoApplicableDomain { instance: &'static str },

    /// A second global domain was activated while one is still active
    #[error("Global domain already active: {existing}")]
    DuplicateGlobalDomain { existing: String },

    /// A domain operation was attempted in the wrong lifecycle state
    #[error("Domain {domain} cannot {operation} while {state}")]
    InvalidDomainState {
        domain: String,
        operation: &'static str,
        state: &'static str,
    },

    /// Factory failed to create service
    #[error("Failed to create service {}: {reason}", short_type_name(.type_name))]
    CreationFailed {
        type_name: &'static str,
        reason: String,
    },

    /// Parent registry was dropped while a child still needed it
    #[error("Parent registry has been dropped")]
    ParentDropped,

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

impl DiError {
    /// Create a ServiceNotRegistered error for a key type
    #[inline]
    pub fn not_registered<T: ?Sized + 'static>() -> Self {
        Self::ServiceNotRegistered {
            key: std::any::type_name::<T>(),
        }
    }

    /// Create a MissingDependency error for a slot of `Target`
    #[inline]
    pub fn missing<Target: ?Sized + 'static, K: ?Sized + 'static>(slot: &'static str) -> Self {
        Self::MissingDependency {
            target: std::any::type_name::<Target>(),
            slot,
            key: std::any::type_name::<K>(),
        }
    }

    /// Create a CreationFailed error
    #[inline]
    pub fn creation_failed<T: ?Sized + 'static>(reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    /// Create a CircularDependency error from a consumer path
    #[inline]
    pub fn circular(path: Vec<&'static str>) -> Self {
        Self::CircularDependency { path }
    }

    /// The consumer path of a circular dependency, if this is one.
    pub fn cycle_path(&self) -> Option<&[&'static str]> {
        match self {
            Self::CircularDependency { path } => Some(path),
            _ => None,
        }
    }

    /// Errors that late injection reports per instance without
    /// invalidating the domain.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoApplicableDomain { .. }
                | Self::MissingDependency { .. }
                | Self::ServiceNotRegistered { .. }
        )
    }
}

/// Renders a cycle as `A → B → A` using short type names.
struct CyclePath<'a>(&'a [&'static str]);

impl fmt::Display for CyclePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" → ")?;
            }
            f.write_str(&short_type_name(name))?;
        }
        Ok(())
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;
