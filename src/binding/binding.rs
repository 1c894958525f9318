use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use crate::cell::ReactiveCell;
use crate::error::Result;
use crate::registry::{ControllerRegistry, Key, Lifecycle};

/// What a binding asks for once the last binding of its key is released.
///
/// A single `Keep` from any binding of the current holders, at bind or at
/// release, keeps the entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Persistence {
    /// Evict the entry.
    #[default]
    Evict,
    /// Leave the entry in the registry with no bindings.
    Keep,
}

impl Persistence {
    pub fn is_keep(self) -> bool {
        self == Persistence::Keep
    }
}

/// Result of a [`ConsumerBindings::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// Other bindings still hold the entry.
    Shared { remaining: usize },
    /// The last binding was released and the entry evicted.
    Evicted,
    /// The last binding was released and some binding asked to keep the entry.
    Kept,
    /// The key had no bindings. Nothing changed.
    Unpaired,
}

/// Reference counts of independent observers sharing registry entries.
///
/// The first [`bind`](Self::bind) of a key creates or reuses the entry, later
/// binds only count. When the last binding is [`release`](Self::release)d the
/// entry is evicted, unless any binding since the key was last unbound asked
/// to keep it.
///
/// Every bind must be paired with exactly one release. Extra releases are
/// logged and ignored; missing releases keep the entry alive.
///
/// # Examples
///
/// ```
/// use corral::{ConsumerBindings, ControllerRegistry, Lifecycle, Persistence};
/// use std::sync::Arc;
///
/// struct Theme;
/// impl Lifecycle for Theme {}
///
/// let registry = Arc::new(ControllerRegistry::new());
/// let bindings = ConsumerBindings::new(registry.clone());
///
/// bindings.bind("theme", || Theme).unwrap();
/// bindings.bind("theme", || Theme).unwrap();
///
/// bindings.release("theme", Persistence::Evict).unwrap();
/// assert!(registry.exists("theme").unwrap());
///
/// bindings.release("theme", Persistence::Evict).unwrap();
/// assert!(!registry.exists("theme").unwrap());
/// ```
pub struct ConsumerBindings {
    registry: Arc<ControllerRegistry>,
    // Held across registry calls, so a bind cannot slip between a count
    // reaching zero and the eviction it causes.
    counts: ReentrantMutex<RefCell<HashMap<Key, Holders>>>,
}

/// Live bindings of one key. Removed when `count` reaches zero.
#[derive(Debug, Default)]
struct Holders {
    count: usize,
    keep: bool,
}

impl ConsumerBindings {
    pub fn new(registry: Arc<ControllerRegistry>) -> Self {
        Self {
            registry,
            counts: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<ControllerRegistry> {
        &self.registry
    }

    /// Bind one observer to `key`, creating the entry with `factory` if needed.
    ///
    /// # Errors
    ///
    /// Whatever [`ControllerRegistry::put`] reports. The count is unchanged
    /// on error.
    pub fn bind<C, F>(&self, key: impl AsRef<str>, factory: F) -> Result<Arc<C>>
    where
        C: Lifecycle,
        F: FnOnce() -> C,
    {
        self.bind_with(key, factory, Persistence::Evict)
    }

    /// [`bind`](Self::bind), declaring up front what should happen once the
    /// last binding is released. `Keep` holds until the key is unbound.
    pub fn bind_with<C, F>(
        &self,
        key: impl AsRef<str>,
        factory: F,
        persistence: Persistence,
    ) -> Result<Arc<C>>
    where
        C: Lifecycle,
        F: FnOnce() -> C,
    {
        let key = Key::new(key.as_ref())?;

        let guard = self.counts.lock();
        let controller = self.registry.put(&key, factory)?;
        let (count, keep) = {
            let mut counts = guard.borrow_mut();
            let holders = counts.entry(key.clone()).or_default();
            holders.count += 1;
            holders.keep |= persistence.is_keep();
            (holders.count, holders.keep)
        };

        tracing::debug!(key = %key, count, keep, "binding.bind");
        Ok(controller)
    }

    /// Release one observer's binding of `key`.
    ///
    /// When this was the last binding, the entry is evicted unless this
    /// release or any binding since the key was last unbound asked for
    /// [`Persistence::Keep`].
    pub fn release(&self, key: impl AsRef<str>, persistence: Persistence) -> Result<Release> {
        let key = Key::new(key.as_ref())?;

        let guard = self.counts.lock();
        let (remaining, keep) = {
            let mut counts = guard.borrow_mut();
            let Some(holders) = counts.get_mut(&key) else {
                tracing::warn!(key = %key, "binding.unpaired_release");
                return Ok(Release::Unpaired);
            };
            holders.count -= 1;
            holders.keep |= persistence.is_keep();
            let state = (holders.count, holders.keep);
            if holders.count == 0 {
                counts.remove(&key);
            }
            state
        };

        if remaining > 0 {
            tracing::debug!(key = %key, remaining, keep, "binding.release");
            return Ok(Release::Shared { remaining });
        }

        if keep {
            tracing::debug!(key = %key, "binding.keep");
            return Ok(Release::Kept);
        }

        self.registry.delete(&key)?;
        tracing::debug!(key = %key, "binding.evict");
        Ok(Release::Evicted)
    }

    /// Number of live bindings of `key`.
    pub fn count(&self, key: impl AsRef<str>) -> Result<usize> {
        let key = Key::new(key.as_ref())?;
        let guard = self.counts.lock();
        let count = guard.borrow().get(&key).map_or(0, |holders| holders.count);
        Ok(count)
    }

    /// Bind `key` and return a handle that releases it exactly once, on
    /// [`Attachment::detach`] or when dropped.
    ///
    /// `persistence` is declared at bind time and used again at release.
    ///
    /// This is the entry point for a UI component: attach when it first
    /// needs the controller, drop the attachment when it goes away.
    pub fn attach<C, F>(
        self: &Arc<Self>,
        key: impl AsRef<str>,
        factory: F,
        persistence: Persistence,
    ) -> Result<Attachment<C>>
    where
        C: Lifecycle,
        F: FnOnce() -> C,
    {
        let key = Key::new(key.as_ref())?;
        let controller = self.bind_with(&key, factory, persistence)?;

        Ok(Attachment {
            bindings: Arc::clone(self),
            key,
            controller,
            persistence,
            subscriptions: Vec::new(),
            released: false,
        })
    }
}

impl fmt::Debug for ConsumerBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.counts.lock();
        let counts = guard.borrow();
        let result = f
            .debug_struct("ConsumerBindings")
            .field("counts", &*counts)
            .finish_non_exhaustive();
        result
    }
}

/// One observer's binding of a registry entry, plus the cell subscriptions it
/// made on the entry's behalf.
///
/// Dropping the attachment unsubscribes everything it watched and releases
/// the binding with its [`Persistence`].
pub struct Attachment<C> {
    bindings: Arc<ConsumerBindings>,
    key: Key,
    controller: Arc<C>,
    persistence: Persistence,
    subscriptions: Vec<Box<dyn Any + Send + Sync>>,
    released: bool,
}

impl<C> Attachment<C> {
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn controller(&self) -> &Arc<C> {
        &self.controller
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    /// Change what the release will ask for. A `Keep` declared when attaching
    /// still counts.
    pub fn set_persistence(&mut self, persistence: Persistence) {
        self.persistence = persistence;
    }

    /// Watch `cell` for as long as this attachment lives.
    pub fn watch<T, F>(&mut self, cell: &ReactiveCell<T>, f: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscriptions.push(Box::new(cell.watch(f)));
    }

    /// Release with the persistence chosen at attach time.
    pub fn detach(mut self) -> Result<Release> {
        self.release_with(self.persistence)
    }

    /// Release with `persistence` instead of the one chosen at attach time.
    /// `Evict` does not undo a `Keep` asked for by any current binding.
    pub fn detach_with(mut self, persistence: Persistence) -> Result<Release> {
        self.release_with(persistence)
    }

    fn release_with(&mut self, persistence: Persistence) -> Result<Release> {
        self.subscriptions.clear();
        self.released = true;
        self.bindings.release(&self.key, persistence)
    }
}

impl<C> Deref for Attachment<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}

impl<C> Drop for Attachment<C> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(error) = self.release_with(self.persistence) {
                tracing::warn!(key = %self.key, %error, "binding.detach_failed");
            }
        }
    }
}

impl<C> fmt::Debug for Attachment<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("key", &self.key)
            .field("persistence", &self.persistence)
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}
