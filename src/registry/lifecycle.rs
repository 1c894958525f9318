use std::error::Error;
use std::fmt;
use std::sync::Arc;

use futures_lite::future::Boxed;

/// A lifecycle hook in flight.
pub type HookFuture = Boxed<Result<(), HookError>>;

/// Failure reported by a lifecycle hook.
///
/// Hook failures are logged by the registry and never returned to the caller
/// that triggered the hook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    Other(#[from] Box<dyn Error + Send + Sync>),

    #[error("hook panicked: {0}")]
    Panicked(String),
}

impl HookError {
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Which lifecycle hook a task runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    Init,
    Close,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookKind::Init => "init",
            HookKind::Close => "close",
        })
    }
}

/// Optional init and close hooks for anything stored in a
/// [`ControllerRegistry`](crate::ControllerRegistry).
///
/// Both hooks default to "not implemented". A hook that returns `Some` is
/// dispatched to the registry's [`HookExecutor`](crate::HookExecutor) and is
/// never awaited by the operation that triggered it.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use corral::{HookFuture, Lifecycle, ReactiveCell};
/// use futures_lite::FutureExt;
///
/// struct Profile {
///     name: ReactiveCell<String>,
/// }
///
/// impl Lifecycle for Profile {
///     fn on_init(self: Arc<Self>) -> Option<HookFuture> {
///         Some(
///             async move {
///                 self.name.write("loaded".to_string());
///                 Ok(())
///             }
///             .boxed(),
///         )
///     }
/// }
/// ```
pub trait Lifecycle: Send + Sync + 'static {
    /// Called once, right after the factory produced the instance.
    fn on_init(self: Arc<Self>) -> Option<HookFuture> {
        None
    }

    /// Called once, when the instance is evicted.
    fn on_close(self: Arc<Self>) -> Option<HookFuture> {
        None
    }
}

/// A controller type with a stable, explicitly chosen identity.
///
/// The identity is the base of keys built by
/// [`ControllerRegistry::put_controller`](crate::ControllerRegistry::put_controller).
/// An empty identity falls back to the registry's anonymous identity.
pub trait Controller: Lifecycle {
    const IDENTITY: &'static str;
}
