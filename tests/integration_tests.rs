//! Integration tests for Corral

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use corral::{
    Callback, ConsumerBindings, Controller, ControllerRegistry, HookError, HookFuture, Lifecycle,
    Persistence, ReactiveCell, RegistryError,
};
use futures_lite::{future, FutureExt};
use proptest::prelude::*;

#[derive(Debug)]
struct Counter {
    count: ReactiveCell<i32>,
}

impl Counter {
    fn new() -> Self {
        Self {
            count: ReactiveCell::with_value(0),
        }
    }

    fn increment(&self) {
        self.count.update(|n| *n += 1);
    }
}

impl Lifecycle for Counter {}

impl Controller for Counter {
    const IDENTITY: &'static str = "Counter";
}

fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Callback<i32> {
    let log = Arc::clone(log);
    Arc::new(move |value: &i32| log.lock().unwrap().push(format!("{name}:{value}")))
}

#[test]
fn counter_scenario() {
    let registry = ControllerRegistry::new();

    let e1 = registry.put("counter", Counter::new).unwrap();
    let again = registry.put("counter", Counter::new).unwrap();
    assert!(Arc::ptr_eq(&e1, &again));

    registry.delete("counter").unwrap();
    assert!(registry.find::<Counter>("counter").unwrap().is_none());
}

#[test]
fn find_before_put_and_after_delete() {
    let registry = ControllerRegistry::new();
    assert!(registry.find::<Counter>("k").unwrap().is_none());

    registry.put("k", Counter::new).unwrap();
    assert!(registry.find::<Counter>("k").unwrap().is_some());

    registry.delete("k").unwrap();
    assert!(registry.find::<Counter>("k").unwrap().is_none());
}

#[test]
fn invalid_key_fails_immediately() {
    let registry = Arc::new(ControllerRegistry::new());
    let bindings = ConsumerBindings::new(registry.clone());

    assert_eq!(
        registry.put("", Counter::new).unwrap_err(),
        RegistryError::InvalidKey
    );
    assert_eq!(
        bindings.bind("", Counter::new).unwrap_err(),
        RegistryError::InvalidKey
    );
    assert_eq!(
        bindings.release("", Persistence::Evict).unwrap_err(),
        RegistryError::InvalidKey
    );
}

#[test]
fn bind_release_scenario() {
    let registry = Arc::new(ControllerRegistry::new());
    let bindings = ConsumerBindings::new(registry.clone());

    bindings.bind("x", Counter::new).unwrap();
    bindings.bind("x", Counter::new).unwrap();

    bindings.release("x", Persistence::Evict).unwrap();
    assert!(registry.exists("x").unwrap());

    bindings.release("x", Persistence::Evict).unwrap();
    assert!(!registry.exists("x").unwrap());
}

#[test]
fn cell_scenario() {
    let cell = ReactiveCell::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    cell.subscribe(recorder(&log, "cb"));
    assert!(log.lock().unwrap().is_empty());

    cell.write(5);
    assert_eq!(*log.lock().unwrap(), vec!["cb:5"]);

    cell.subscribe(recorder(&log, "cb2"));
    assert_eq!(*log.lock().unwrap(), vec!["cb:5", "cb2:5"]);

    cell.write(6);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["cb:5", "cb2:5", "cb:6", "cb2:6"]
    );
}

#[test]
fn components_share_one_controller() {
    let registry = Arc::new(ControllerRegistry::new());
    let bindings = Arc::new(ConsumerBindings::new(registry.clone()));
    let left_renders = Arc::new(Mutex::new(Vec::new()));
    let right_renders = Arc::new(Mutex::new(Vec::new()));

    let mut left = bindings
        .attach("counter", Counter::new, Persistence::Evict)
        .unwrap();
    let cell = left.count.clone();
    left.watch(&cell, {
        let renders = left_renders.clone();
        move |value: &i32| renders.lock().unwrap().push(*value)
    });

    let mut right = bindings
        .attach("counter", Counter::new, Persistence::Evict)
        .unwrap();
    let cell = right.count.clone();
    right.watch(&cell, {
        let renders = right_renders.clone();
        move |value: &i32| renders.lock().unwrap().push(*value)
    });

    left.increment();
    right.increment();

    assert_eq!(*left_renders.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(*right_renders.lock().unwrap(), vec![0, 1, 2]);

    drop(left);
    assert!(registry.exists("counter").unwrap());
    right.increment();
    assert_eq!(*left_renders.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(*right_renders.lock().unwrap(), vec![0, 1, 2, 3]);

    drop(right);
    assert!(!registry.exists("counter").unwrap());
}

#[test]
fn put_controller_uses_stable_identity() {
    let registry = ControllerRegistry::new();
    let tagged = registry
        .put_controller(Some("sidebar"), Counter::new)
        .unwrap();
    let untagged = registry.put_controller(None, Counter::new).unwrap();

    assert!(!Arc::ptr_eq(&tagged, &untagged));
    assert!(registry.exists("Counter-sidebar").unwrap());
    assert!(registry.exists("Counter").unwrap());
}

struct Loader {
    status: ReactiveCell<&'static str>,
    fail: bool,
}

impl Lifecycle for Loader {
    fn on_init(self: Arc<Self>) -> Option<HookFuture> {
        Some(
            async move {
                self.status.write("loading");
                future::yield_now().await;
                if self.fail {
                    return Err(HookError::msg("fetch failed"));
                }
                self.status.write("ready");
                Ok(())
            }
            .boxed(),
        )
    }
}

#[test]
fn failing_init_leaves_partial_state_and_other_entries_work() {
    let registry = ControllerRegistry::new();
    let queue = registry.hook_queue().unwrap().clone();

    let broken = registry
        .put("broken", || Loader {
            status: ReactiveCell::new(),
            fail: true,
        })
        .unwrap();
    let healthy = registry
        .put("healthy", || Loader {
            status: ReactiveCell::new(),
            fail: false,
        })
        .unwrap();

    // Init ran up to its first await; put did not wait for the rest.
    assert_eq!(broken.status.read(), Some("loading"));
    assert_eq!(healthy.status.read(), Some("loading"));

    let stats = queue.drain_blocking();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);

    assert_eq!(broken.status.read(), Some("loading"));
    assert_eq!(healthy.status.read(), Some("ready"));
    assert!(registry.exists("broken").unwrap());
}

#[test]
fn init_pending_at_eviction_never_resumes() {
    let registry = ControllerRegistry::new();
    let queue = registry.hook_queue().unwrap().clone();

    let loader = registry
        .put("loader", || Loader {
            status: ReactiveCell::new(),
            fail: false,
        })
        .unwrap();
    registry.delete("loader").unwrap();

    assert!(!queue.has_pending());

    let stats = queue.drain_blocking();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(loader.status.read(), Some("loading"));
}

#[test]
fn one_keeping_component_keeps_the_entry() {
    let registry = Arc::new(ControllerRegistry::new());
    let bindings = Arc::new(ConsumerBindings::new(registry.clone()));

    let keeper = bindings
        .attach("k", Counter::new, Persistence::Keep)
        .unwrap();
    let evicter = bindings
        .attach("k", Counter::new, Persistence::Evict)
        .unwrap();
    keeper.increment();

    drop(keeper);
    drop(evicter);
    assert_eq!(bindings.count("k").unwrap(), 0);

    let kept = registry.find::<Counter>("k").unwrap().unwrap();
    assert_eq!(kept.count.read(), Some(1));

    registry.delete("k").unwrap();
    assert!(!registry.exists("k").unwrap());
}

#[test]
fn concurrent_binds_evict_once() {
    let registry = Arc::new(ControllerRegistry::new());
    let bindings = Arc::new(ConsumerBindings::new(registry.clone()));
    let constructed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let bindings = Arc::clone(&bindings);
            let constructed = Arc::clone(&constructed);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    bindings
                        .bind("shared", || {
                            constructed.fetch_add(1, Ordering::SeqCst);
                            Counter::new()
                        })
                        .unwrap();
                    bindings.release("shared", Persistence::Evict).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(bindings.count("shared").unwrap(), 0);
    assert!(!registry.exists("shared").unwrap());
    assert!(constructed.load(Ordering::SeqCst) >= 1);
}

#[derive(Debug, Clone)]
enum Op {
    Bind(bool),
    Release(bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(Op::Bind),
        any::<bool>().prop_map(Op::Release)
    ]
}

fn persistence(keep: bool) -> Persistence {
    if keep {
        Persistence::Keep
    } else {
        Persistence::Evict
    }
}

proptest! {
    #[test]
    fn cell_delivers_every_write_in_order(values in proptest::collection::vec(any::<i32>(), 0..32)) {
        let cell = ReactiveCell::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _guard = cell.watch({
            let seen = seen.clone();
            move |value: &i32| seen.lock().unwrap().push(*value)
        });

        for value in &values {
            cell.write(*value);
        }
        prop_assert_eq!(&*seen.lock().unwrap(), &values);
    }

    #[test]
    fn entry_exists_while_bound(ops in proptest::collection::vec(op(), 0..64)) {
        let registry = Arc::new(ControllerRegistry::new());
        let bindings = ConsumerBindings::new(registry.clone());
        let mut live = 0usize;
        let mut keep_asked = false;
        let mut present = false;

        for op in ops {
            match op {
                Op::Bind(keep) => {
                    bindings.bind_with("k", Counter::new, persistence(keep)).unwrap();
                    keep_asked = if live == 0 { keep } else { keep_asked || keep };
                    live += 1;
                    present = true;
                }
                Op::Release(keep) => {
                    if live == 0 {
                        continue;
                    }
                    bindings.release("k", persistence(keep)).unwrap();
                    keep_asked |= keep;
                    live -= 1;
                    if live == 0 && !keep_asked {
                        present = false;
                    }
                }
            }

            prop_assert_eq!(bindings.count("k").unwrap(), live);
            let exists = registry.exists("k").unwrap();
            if live > 0 {
                prop_assert!(exists);
            }
            prop_assert_eq!(exists, present);
        }
    }
}
