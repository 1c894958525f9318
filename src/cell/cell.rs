use parking_lot::RwLock;
use std::sync::Arc;

/// A subscriber callback. Identity is the `Arc` allocation.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A single-value reactive cell.
///
/// Every [`write`](Self::write) synchronously calls each subscriber with the
/// new value, in subscription order, before returning. Clones share the same
/// value and subscribers.
///
/// # Examples
///
/// ```
/// use corral::ReactiveCell;
/// use std::sync::{Arc, Mutex};
///
/// let cell = ReactiveCell::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let _guard = cell.watch({
///     let seen = seen.clone();
///     move |value: &i32| seen.lock().unwrap().push(*value)
/// });
///
/// cell.write(5);
/// cell.write(6);
/// assert_eq!(*seen.lock().unwrap(), vec![5, 6]);
/// ```
pub struct ReactiveCell<T> {
    value: Arc<RwLock<Option<Arc<T>>>>,
    subscribers: Arc<RwLock<Vec<Callback<T>>>>,
}

impl<T> ReactiveCell<T> {
    /// Create a cell with no value.
    pub fn new() -> Self {
        Self {
            value: Arc::new(RwLock::new(None)),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create a cell holding `initial`.
    pub fn with_value(initial: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(Some(Arc::new(initial)))),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get a clone of the current value.
    pub fn read(&self) -> Option<T>
    where
        T: Clone,
    {
        self.current().map(|value| T::clone(&value))
    }

    /// Read the current value without cloning it.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(Option<&T>) -> R,
    {
        let value = self.current();
        f(value.as_deref())
    }

    pub fn is_set(&self) -> bool {
        self.value.read().is_some()
    }

    /// Replace the value and notify subscribers.
    pub fn write(&self, new_value: T) {
        let new_value = Arc::new(new_value);
        *self.value.write() = Some(Arc::clone(&new_value));
        self.broadcast(&new_value);
    }

    /// Update the value in place and notify subscribers once.
    ///
    /// Does nothing if the cell has no value. `f` runs under the cell's write
    /// lock and must not touch this cell.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
        T: Clone,
    {
        let updated = {
            let mut slot = self.value.write();
            let Some(value) = &mut *slot else {
                return;
            };
            f(Arc::make_mut(value));
            Arc::clone(value)
        };
        self.broadcast(&updated);
    }

    /// Subscribe to changes.
    ///
    /// If the cell already holds a value, `callback` is called with it once
    /// before this returns.
    pub fn subscribe(&self, callback: Callback<T>) {
        self.subscribers.write().push(Arc::clone(&callback));
        if let Some(value) = self.current() {
            callback(&value);
        }
    }

    /// Remove every registration of `callback`.
    pub fn unsubscribe(&self, callback: &Callback<T>) {
        self.subscribers
            .write()
            .retain(|registered| !Arc::ptr_eq(registered, callback));
    }

    /// Subscribe `f` until the returned guard is dropped.
    pub fn watch<F>(&self, f: F) -> SubscriptionGuard<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(f);
        self.subscribe(Arc::clone(&callback));
        SubscriptionGuard {
            cell: self.clone(),
            callback,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn current(&self) -> Option<Arc<T>> {
        self.value.read().clone()
    }

    /// Call the subscribers registered right now. No lock is held while they
    /// run, so they may use this cell freely.
    fn broadcast(&self, value: &T) {
        let subscribers = self.subscribers.read().clone();
        for subscriber in &subscribers {
            subscriber(value);
        }
    }
}

impl<T> Default for ReactiveCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReactiveCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("value", &self.current())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// RAII guard for a cell subscription.
pub struct SubscriptionGuard<T> {
    cell: ReactiveCell<T>,
    callback: Callback<T>,
}

impl<T> SubscriptionGuard<T> {
    pub fn callback(&self) -> &Callback<T> {
        &self.callback
    }
}

impl<T> Drop for SubscriptionGuard<T> {
    fn drop(&mut self) {
        self.cell.unsubscribe(&self.callback);
    }
}
