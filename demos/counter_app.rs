//! Two components sharing one counter controller, from mount to unmount

use std::sync::Arc;

use corral::{
    Attachment, ConsumerBindings, Controller, ControllerRegistry, HookFuture, Lifecycle,
    Persistence, ReactiveCell,
};
use futures_lite::{future, FutureExt};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug)]
struct CounterState {
    count: i32,
    step: i32,
    history: Vec<i32>,
}

impl CounterState {
    fn new() -> Self {
        Self {
            count: 0,
            step: 1,
            history: vec![0],
        }
    }
}

struct CounterController {
    state: ReactiveCell<CounterState>,
}

impl CounterController {
    fn new() -> Self {
        Self {
            state: ReactiveCell::with_value(CounterState::new()),
        }
    }

    fn increment(&self) {
        self.state.update(|state| {
            state.count += state.step;
            state.history.push(state.count);
        });
    }

    fn decrement(&self) {
        self.state.update(|state| {
            state.count -= state.step;
            state.history.push(state.count);
        });
    }

    fn set_step(&self, step: i32) {
        self.state.update(|state| state.step = step);
    }
}

impl Lifecycle for CounterController {
    fn on_init(self: Arc<Self>) -> Option<HookFuture> {
        Some(
            async move {
                println!("   [Controller] init: loading saved step size");
                future::yield_now().await;
                self.set_step(2);
                Ok(())
            }
            .boxed(),
        )
    }

    fn on_close(self: Arc<Self>) -> Option<HookFuture> {
        Some(
            async move {
                future::yield_now().await;
                let history = self.state.read().map(|state| state.history);
                println!("   [Controller] close: final history {history:?}");
                Ok(())
            }
            .boxed(),
        )
    }
}

impl Controller for CounterController {
    const IDENTITY: &'static str = "Counter";
}

fn mount(
    bindings: &Arc<ConsumerBindings>,
    key: &str,
    name: &'static str,
) -> Attachment<CounterController> {
    let mut component = bindings
        .attach(key, CounterController::new, Persistence::Evict)
        .expect("valid key");
    let state = component.state.clone();
    component.watch(&state, move |snapshot: &CounterState| {
        println!(
            "   [{name}] render: count = {}, step = {}",
            snapshot.count, snapshot.step
        );
    });
    component
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Shared Counter Application ===\n");

    let registry = Arc::new(ControllerRegistry::new());
    let bindings = Arc::new(ConsumerBindings::new(registry.clone()));
    let hooks = registry.hook_queue().expect("default queue").clone();
    let key = registry
        .derive_key(Some(CounterController::IDENTITY), Some("main"))
        .expect("valid key");

    println!("1. Mounting the header component");
    let header = mount(&bindings, key.as_str(), "Header");

    println!("\n2. Finishing init hooks");
    hooks.drain_blocking();

    println!("\n3. Mounting the sidebar component (same controller)");
    let sidebar = mount(&bindings, key.as_str(), "Sidebar");
    println!("   bindings for {key}: {}", bindings.count(&key).expect("valid key"));

    println!("\n4. Incrementing from the header");
    header.increment();

    println!("\n5. Decrementing from the sidebar");
    sidebar.decrement();

    println!("\n6. Unmounting the header");
    drop(header);
    println!("   still registered: {}", registry.exists(&key).expect("valid key"));

    println!("\n7. Incrementing from the sidebar");
    sidebar.increment();

    println!("\n8. Unmounting the sidebar");
    drop(sidebar);
    println!("   still registered: {}", registry.exists(&key).expect("valid key"));

    println!("\n9. Finishing close hooks");
    hooks.drain_blocking();

    println!("\n✓ Counter application complete!");
}
