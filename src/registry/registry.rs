use std::any::{type_name, Any};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::ReentrantMutex;

use super::hooks::{cancellation, start_hook, HookExecutor, HookQueue, HookTask, InitGuard};
use super::key::{Key, KeyDerivation};
use super::lifecycle::{Controller, HookFuture, HookKind, Lifecycle};
use crate::error::{RegistryError, Result};

type Instance = Arc<dyn Any + Send + Sync>;
type CloseHook = Box<dyn FnOnce() -> Option<HookFuture> + Send>;

/// A stored controller and the lifecycle thunks captured when it was inserted.
struct Entry {
    instance: Instance,
    close: CloseHook,
    init_guard: InitGuard,
}

/// Keyed store of shared controller instances.
///
/// Holds at most one instance per key. [`put`](Self::put) creates an instance on
/// first use and hands out the same `Arc` afterwards; [`delete`](Self::delete)
/// evicts it. Lifecycle hooks run on the registry's [`HookExecutor`] and their
/// failures never reach the caller.
///
/// The registry is an ordinary value: build one per host and share it, or use
/// [`global`](Self::global) when a single process-wide instance is wanted.
///
/// # Examples
///
/// ```
/// use corral::{ControllerRegistry, Lifecycle, ReactiveCell};
/// use std::sync::Arc;
///
/// struct Counter {
///     count: ReactiveCell<i32>,
/// }
///
/// impl Lifecycle for Counter {}
///
/// let registry = ControllerRegistry::new();
/// let first = registry
///     .put("counter", || Counter { count: ReactiveCell::with_value(0) })
///     .unwrap();
/// let second = registry
///     .put("counter", || Counter { count: ReactiveCell::with_value(99) })
///     .unwrap();
///
/// assert!(Arc::ptr_eq(&first, &second));
/// assert_eq!(second.count.read(), Some(0));
///
/// registry.delete("counter").unwrap();
/// assert!(registry.find::<Counter>("counter").unwrap().is_none());
/// ```
pub struct ControllerRegistry {
    // Reentrant so that factories and hooks may use the registry for other keys.
    entries: ReentrantMutex<RefCell<HashMap<Key, Entry>>>,
    keys: KeyDerivation,
    executor: Arc<dyn HookExecutor>,
    queue: Option<Arc<HookQueue>>,
}

impl ControllerRegistry {
    /// Create an empty registry that queues hooks on its own [`HookQueue`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Get or create the process-wide registry.
    ///
    /// Nothing in this crate uses it implicitly; it exists for hosts that want
    /// exactly one registry per process without threading it through.
    pub fn global() -> Arc<Self> {
        static REGISTRY: OnceLock<Arc<ControllerRegistry>> = OnceLock::new();
        Arc::clone(REGISTRY.get_or_init(|| Arc::new(Self::new())))
    }

    /// The queue hooks are dispatched to, unless a custom executor was configured.
    pub fn hook_queue(&self) -> Option<&Arc<HookQueue>> {
        self.queue.as_ref()
    }

    pub fn key_derivation(&self) -> &KeyDerivation {
        &self.keys
    }

    /// Build a key from `identity` and an optional `tag` using this registry's
    /// separator and anonymous identity.
    pub fn derive_key(&self, identity: Option<&str>, tag: Option<&str>) -> Result<Key> {
        self.keys.derive(identity, tag)
    }

    /// Look up the instance stored under `key`. Never creates.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidKey`] for an empty key,
    /// [`RegistryError::TypeMismatch`] if the stored instance is not a `C`.
    pub fn find<C: Any + Send + Sync>(&self, key: impl AsRef<str>) -> Result<Option<Arc<C>>> {
        let key = Key::new(key.as_ref())?;
        match self.lookup(&key) {
            Some(instance) => downcast(&key, instance).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`find`](Self::find), without committing to a type.
    pub fn find_any(&self, key: impl AsRef<str>) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let key = Key::new(key.as_ref())?;
        Ok(self.lookup(&key))
    }

    pub fn exists(&self, key: impl AsRef<str>) -> Result<bool> {
        let key = Key::new(key.as_ref())?;
        let guard = self.entries.lock();
        let present = guard.borrow().contains_key(&key);
        Ok(present)
    }

    /// Return the instance under `key`, creating it with `factory` if absent.
    ///
    /// `factory` runs at most once per entry lifetime, even when several
    /// threads race on the same key. A newly created instance gets its
    /// [`Lifecycle::on_init`] hook dispatched without waiting for it.
    ///
    /// `factory` runs under the registry lock. It may use the registry for
    /// other keys, but must not `put` the key it is building. It must not bind
    /// through [`ConsumerBindings`](crate::ConsumerBindings) either: a bind
    /// takes the bindings lock and then the registry lock, so a factory doing
    /// the reverse can deadlock against a bind on another thread. Binds of the
    /// key being built already run the factory from inside `bind`, where this
    /// cannot happen.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidKey`] for an empty key,
    /// [`RegistryError::TypeMismatch`] if an instance of another type is
    /// already stored under `key`.
    pub fn put<C, F>(&self, key: impl AsRef<str>, factory: F) -> Result<Arc<C>>
    where
        C: Lifecycle,
        F: FnOnce() -> C,
    {
        let key = Key::new(key.as_ref())?;

        let guard = self.entries.lock();
        let existing = guard
            .borrow()
            .get(&key)
            .map(|entry| Arc::clone(&entry.instance));
        if let Some(instance) = existing {
            return downcast(&key, instance);
        }

        // No borrow is held while the factory runs.
        let instance = Arc::new(factory());
        let (init_guard, cancel) = cancellation();
        let closing = Arc::clone(&instance);
        guard.borrow_mut().insert(
            key.clone(),
            Entry {
                instance: Arc::clone(&instance) as Instance,
                close: Box::new(move || closing.on_close()),
                init_guard,
            },
        );
        drop(guard);

        tracing::debug!(key = %key, controller = type_name::<C>(), "registry.put");

        let init = Arc::clone(&instance);
        if let Some(hook) = start_hook(move || init.on_init()) {
            self.executor
                .spawn(HookTask::new(key, HookKind::Init, hook, Some(cancel)));
        }

        Ok(instance)
    }

    /// [`put`](Self::put) under the key derived from `C::IDENTITY` and `tag`.
    pub fn put_controller<C, F>(&self, tag: Option<&str>, factory: F) -> Result<Arc<C>>
    where
        C: Controller,
        F: FnOnce() -> C,
    {
        let key = self.derive_key(Some(C::IDENTITY), tag)?;
        self.put(key, factory)
    }

    /// Evict the instance under `key`.
    ///
    /// The entry is removed immediately; its [`Lifecycle::on_close`] hook is
    /// dispatched afterwards and not awaited. An init hook that has not
    /// finished yet is cancelled. Returns whether anything was evicted.
    ///
    /// This does not consult [`ConsumerBindings`](crate::ConsumerBindings).
    /// Deleting a key that still has bindings leaves them counted: holders
    /// keep the evicted instance, and the next bind builds a new one.
    pub fn delete(&self, key: impl AsRef<str>) -> Result<bool> {
        let key = Key::new(key.as_ref())?;

        let removed = {
            let guard = self.entries.lock();
            let removed = guard.borrow_mut().remove(&key);
            removed
        };

        match removed {
            Some(entry) => {
                self.evict(key, entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Evict every entry, in key order. Returns how many were evicted.
    ///
    /// Like [`delete`](Self::delete), this ignores bindings; use it when the
    /// host shuts down.
    pub fn clear(&self) -> usize {
        let mut drained: Vec<(Key, Entry)> = {
            let guard = self.entries.lock();
            let drained = guard.borrow_mut().drain().collect();
            drained
        };
        drained.sort_by(|(a, _), (b, _)| a.cmp(b));

        let count = drained.len();
        for (key, entry) in drained {
            self.evict(key, entry);
        }
        count
    }

    pub fn len(&self) -> usize {
        let guard = self.entries.lock();
        let len = guard.borrow().len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently present, sorted.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = {
            let guard = self.entries.lock();
            let keys = guard.borrow().keys().cloned().collect();
            keys
        };
        keys.sort();
        keys
    }

    fn lookup(&self, key: &Key) -> Option<Instance> {
        let guard = self.entries.lock();
        let instance = guard
            .borrow()
            .get(key)
            .map(|entry| Arc::clone(&entry.instance));
        instance
    }

    fn evict(&self, key: Key, entry: Entry) {
        let Entry {
            instance,
            close,
            init_guard,
        } = entry;
        drop(init_guard);
        self.executor.discard_cancelled();

        tracing::debug!(key = %key, "registry.evict");

        if let Some(hook) = start_hook(close) {
            self.executor
                .spawn(HookTask::new(key, HookKind::Close, hook, None));
        }
        drop(instance);
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("len", &self.len())
            .field("key_derivation", &self.keys)
            .finish_non_exhaustive()
    }
}

fn downcast<C: Any + Send + Sync>(key: &Key, instance: Instance) -> Result<Arc<C>> {
    instance
        .downcast::<C>()
        .map_err(|_| RegistryError::TypeMismatch {
            key: key.clone(),
            expected: type_name::<C>(),
        })
}

/// Configuration for a [`ControllerRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    keys: KeyDerivation,
    executor: Option<Arc<dyn HookExecutor>>,
}

impl RegistryBuilder {
    /// Separator between identity and tag in derived keys. Defaults to `"-"`.
    pub fn key_separator(mut self, separator: impl Into<String>) -> Self {
        self.keys.separator = separator.into();
        self
    }

    /// Identity used for controllers without one. Defaults to `"AnonymousController"`.
    pub fn anonymous_identity(mut self, identity: impl Into<String>) -> Self {
        self.keys.anonymous_identity = identity.into();
        self
    }

    /// Run lifecycle hooks on `executor` instead of a fresh [`HookQueue`].
    pub fn executor(mut self, executor: Arc<dyn HookExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> ControllerRegistry {
        let (executor, queue) = match self.executor {
            Some(executor) => (executor, None),
            None => {
                let queue = Arc::new(HookQueue::new());
                (Arc::clone(&queue) as Arc<dyn HookExecutor>, Some(queue))
            }
        };

        ControllerRegistry {
            entries: ReentrantMutex::new(RefCell::new(HashMap::new())),
            keys: self.keys,
            executor,
            queue,
        }
    }
}
