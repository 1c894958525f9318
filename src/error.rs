//! Errors surfaced by registry and binding operations.
//!
//! Only malformed input is reported to callers. Lifecycle hook failures are
//! isolated where the hook runs and never travel through these types.

use crate::registry::Key;

/// Error returned by [`ControllerRegistry`](crate::ControllerRegistry) and
/// [`ConsumerBindings`](crate::ConsumerBindings) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The key was empty.
    #[error("invalid registry key: keys must be non-empty")]
    InvalidKey,

    /// The entry stored under `key` is not of the requested type.
    #[error("entry {key} is not a {expected}")]
    TypeMismatch { key: Key, expected: &'static str },
}

/// Convenience alias for results carrying a [`RegistryError`].
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
