//! Error types for the injection runtime

use thiserror::Error;

/// Errors raised by wiring, resolution, binding and injector lifecycle
/// operations.
#[derive(Error, Debug, Clone)]
pub enum InjectError {
    /// A key could not be resolved from the active scope chain
    #[error("no provider for {key} in scope '{scope}'")]
    Lookup { key: String, scope: String },

    /// A denied (non-injectable) value was used as a key
    #[error("{key} is not an injectable key")]
    NotInjectable { key: &'static str },

    /// The provider was already registered on another container
    #[error("provider for {key} is already attached to container '{container}'")]
    AlreadyAttached { key: String, container: String },

    /// A sealed (final) provider exists for the key
    #[error("cannot override sealed provider for {key} in container '{container}'")]
    FinalOverride { key: String, container: String },

    /// The provider carries no key and none can be derived from its kind
    #[error("provider has no key; call provide() before registering")]
    UnkeyedProvider,

    /// `include` would create a cycle in the container graph
    #[error("including '{container}' would create a container cycle")]
    CyclicInclude { container: String },

    /// Alias or marker resolution re-entered a key already being resolved
    #[error("cyclic resolution through {key}")]
    CyclicResolution { key: String },

    /// The container was mutated after a scope froze it
    #[error("container '{container}' is frozen; register before building a scope")]
    Frozen { container: String },

    /// An injector lifecycle method was called in the wrong state
    #[error("injector is {actual}, expected {expected}")]
    State {
        expected: &'static str,
        actual: &'static str,
    },

    /// A resolved value could not be downcast to the requested type
    #[error("resolved value is not a {expected}")]
    TypeMismatch { expected: &'static str },

    /// A factory parameter had no override, annotation or default
    #[error("parameter '{param}' was never bound")]
    UnboundParam { param: String },

    /// A synchronous call was made on an async binding
    #[error("binding for {key} is async; drive it through an executor")]
    AsyncBinding { key: String },

    /// One or more resource releases failed during reset
    #[error("resource disposal failed: {}", failures.join("; "))]
    Disposal { failures: Vec<String> },

    /// Internal invariant violation
    #[error("internal injection error: {0}")]
    Internal(String),
}

impl InjectError {
    /// Create a Lookup error for a key in a named scope
    #[inline]
    pub fn lookup(key: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::Lookup {
            key: key.into(),
            scope: scope.into(),
        }
    }

    /// Create a TypeMismatch error for the requested type
    #[inline]
    pub fn type_mismatch<T: ?Sized>() -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a State error from lifecycle state names
    #[inline]
    pub fn state(expected: &'static str, actual: &'static str) -> Self {
        Self::State { expected, actual }
    }

    /// True for resolution misses (as opposed to wiring or state errors)
    #[inline]
    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup { .. })
    }
}

/// Result type alias for injection operations
pub type Result<T> = std::result::Result<T, InjectError>;
