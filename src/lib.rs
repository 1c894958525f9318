//! # Corral
//!
//! Shared controllers for independent UI components.
//!
//! Corral lets many components share one piece of state and the logic around
//! it without a global store. It has three layers:
//!
//! ## Cells (reactive values)
//!
//! - `ReactiveCell<T>` - Holds one value and calls its subscribers
//!   synchronously, in subscription order, on every write
//!
//! ## Registry (shared controllers)
//!
//! - `ControllerRegistry` - Hands out one instance per key, created on first use
//! - `Lifecycle` - Optional init and close hooks, dispatched without being awaited
//! - `HookQueue` - Default executor for those hooks, drained by the host
//!
//! ## Bindings (shared lifetimes)
//!
//! - `ConsumerBindings` - Counts the observers of each key and evicts the
//!   entry when the last one releases it
//! - `Attachment<C>` - One observer's binding, released on drop

pub mod binding;
pub mod cell;
pub mod error;
pub mod registry;

// Re-export main types for convenience
pub use binding::{Attachment, ConsumerBindings, Persistence, Release};
pub use cell::{Callback, ReactiveCell, SubscriptionGuard};
pub use error::{RegistryError, Result};
#[cfg(feature = "tokio")]
pub use registry::TokioExecutor;
pub use registry::{
    Controller, ControllerRegistry, HookDrainStats, HookError, HookExecutor, HookFuture, HookKind,
    HookOutcome, HookQueue, HookTask, Key, KeyDerivation, Lifecycle, RegistryBuilder,
};
