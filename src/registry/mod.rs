//! Keyed registry of shared controllers.
//!
//! This module provides the store that hands out one instance per key, the
//! lifecycle capability stored instances may implement, and the executors
//! their hooks run on.

mod hooks;
mod key;
mod lifecycle;
mod registry;

#[cfg(feature = "tokio")]
pub use hooks::TokioExecutor;
pub use hooks::{HookDrainStats, HookExecutor, HookOutcome, HookQueue, HookTask};
pub use key::{Key, KeyDerivation, ANONYMOUS_IDENTITY, DEFAULT_SEPARATOR};
pub use lifecycle::{Controller, HookError, HookFuture, HookKind, Lifecycle};
pub use registry::{ControllerRegistry, RegistryBuilder};
