//! Dispatch of lifecycle hooks.
//!
//! The registry never awaits a hook. It wraps each one in a [`HookTask`], which
//! catches errors and panics, logs them and reports a [`HookOutcome`], and hands
//! the task to a [`HookExecutor`]. [`HookQueue`] runs each task up to its first
//! suspension and keeps the rest until the host drains it; [`TokioExecutor`]
//! (feature `tokio`) spawns tasks right away.

use std::any::Any;
use std::collections::VecDeque;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use futures_channel::oneshot;
use futures_lite::future::{self, Boxed};
use futures_lite::FutureExt;
use parking_lot::Mutex;

use super::key::Key;
use super::lifecycle::{HookError, HookFuture, HookKind};

/// How a hook task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookOutcome {
    Completed,
    /// The hook returned an error or panicked. Already logged.
    Failed,
    /// The entry was evicted before its init hook finished.
    Cancelled,
}

/// Held by a registry entry. Dropping it cancels the entry's pending init hook.
pub(crate) struct InitGuard {
    _sender: Arc<oneshot::Sender<()>>,
}

/// The task side of an [`InitGuard`].
pub(crate) struct Cancellation {
    receiver: oneshot::Receiver<()>,
    live: Weak<oneshot::Sender<()>>,
}

pub(crate) fn cancellation() -> (InitGuard, Cancellation) {
    let (sender, receiver) = oneshot::channel();
    let sender = Arc::new(sender);
    let live = Arc::downgrade(&sender);
    (InitGuard { _sender: sender }, Cancellation { receiver, live })
}

/// An isolated lifecycle hook, ready to be driven by an executor.
///
/// Running a task never panics and never fails: the outcome is reported
/// instead.
pub struct HookTask {
    key: Key,
    kind: HookKind,
    live: Option<Weak<oneshot::Sender<()>>>,
    future: Boxed<HookOutcome>,
}

impl HookTask {
    pub(crate) fn new(
        key: Key,
        kind: HookKind,
        hook: HookFuture,
        cancel: Option<Cancellation>,
    ) -> Self {
        let isolated = isolate(key.clone(), kind, hook);
        let (live, future) = match cancel {
            Some(Cancellation { receiver, live }) => {
                let cancelled_key = key.clone();
                let future = future::or(
                    async move {
                        // Resolves once the owning entry drops its guard.
                        let _ = receiver.await;
                        tracing::debug!(key = %cancelled_key, hook = %kind, "hook.cancelled");
                        HookOutcome::Cancelled
                    },
                    isolated,
                )
                .boxed();
                (Some(live), future)
            }
            None => (None, isolated.boxed()),
        };

        Self {
            key,
            kind,
            live,
            future,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// Whether the entry this task belongs to has been evicted. A cancelled
    /// task resolves to [`HookOutcome::Cancelled`] without running further.
    pub fn is_cancelled(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.strong_count() == 0)
    }

    /// Poll the task once on the current thread. Returns the outcome if it
    /// finished; a finished task must not be run again.
    pub fn poll_once(&mut self) -> Option<HookOutcome> {
        future::block_on(future::poll_once(&mut self.future))
    }

    /// Drive the hook to completion.
    pub async fn run(self) -> HookOutcome {
        self.future.await
    }
}

impl std::fmt::Debug for HookTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookTask")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Start a hook, turning a panic in its synchronous part into a failed hook.
pub(crate) fn start_hook(start: impl FnOnce() -> Option<HookFuture>) -> Option<HookFuture> {
    match panic::catch_unwind(AssertUnwindSafe(start)) {
        Ok(hook) => hook,
        Err(payload) => {
            let error = HookError::Panicked(panic_message(&*payload));
            Some(future::ready(Err(error)).boxed())
        }
    }
}

async fn isolate(key: Key, kind: HookKind, hook: HookFuture) -> HookOutcome {
    let result = match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HookError::Panicked(panic_message(&*payload))),
    };

    match result {
        Ok(()) => {
            tracing::trace!(key = %key, hook = %kind, "hook.complete");
            HookOutcome::Completed
        }
        Err(error) => {
            tracing::error!(key = %key, hook = %kind, %error, "hook.failed");
            HookOutcome::Failed
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Somewhere to run lifecycle hooks.
///
/// `spawn` may start the task on the calling thread, but must not block
/// waiting for it to finish.
pub trait HookExecutor: Send + Sync {
    fn spawn(&self, task: HookTask);

    /// Drop held tasks whose entry has been evicted. The registry calls this
    /// after every eviction.
    fn discard_cancelled(&self) {}
}

/// Totals reported by [`HookQueue::drain`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HookDrainStats {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl HookDrainStats {
    fn record(&mut self, outcome: HookOutcome) {
        match outcome {
            HookOutcome::Completed => self.completed += 1,
            HookOutcome::Failed => self.failed += 1,
            HookOutcome::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    fn absorb(&mut self, other: HookDrainStats) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<HookTask>,
    // Outcomes of tasks that settled outside a drain.
    settled: HookDrainStats,
}

/// FIFO of hook tasks, drained by the host's main loop.
///
/// This is the default executor of a [`ControllerRegistry`](crate::ControllerRegistry).
/// Each task is polled once when it is spawned; a hook that finishes without
/// suspending is never queued. The rest wait for [`drain`](Self::drain) and
/// run one after another in the order they were queued. Init tasks of evicted
/// entries are discarded right away, so an entry's init hook always settles
/// before its close hook starts.
#[derive(Default)]
pub struct HookQueue {
    state: Mutex<QueueState>,
}

impl HookQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().tasks.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Run queued tasks until the queue is empty.
    ///
    /// Tasks queued by hooks while draining are run by the same call. The
    /// stats also count tasks that settled since the previous drain without
    /// being queued.
    pub async fn drain(&self) -> HookDrainStats {
        let mut stats = HookDrainStats::default();

        loop {
            let next = self.state.lock().tasks.pop_front();
            let Some(task) = next else {
                break;
            };
            stats.record(task.run().await);
        }

        let settled = mem::take(&mut self.state.lock().settled);
        stats.absorb(settled);

        if stats.total() > 0 {
            tracing::debug!(
                completed = stats.completed,
                failed = stats.failed,
                cancelled = stats.cancelled,
                "hook.drain"
            );
        }
        stats
    }

    /// [`drain`](Self::drain) on the current thread.
    pub fn drain_blocking(&self) -> HookDrainStats {
        future::block_on(self.drain())
    }
}

impl HookExecutor for HookQueue {
    fn spawn(&self, mut task: HookTask) {
        if let Some(outcome) = task.poll_once() {
            self.state.lock().settled.record(outcome);
            return;
        }

        tracing::trace!(key = %task.key, hook = %task.kind, "hook.queued");
        self.state.lock().tasks.push_back(task);
    }

    fn discard_cancelled(&self) {
        // Dropped after the lock is released; they own controller handles.
        let cancelled: VecDeque<HookTask> = {
            let mut state = self.state.lock();
            let (cancelled, pending): (VecDeque<HookTask>, VecDeque<HookTask>) = state
                .tasks
                .drain(..)
                .partition(|task| task.is_cancelled());
            state.tasks = pending;
            state.settled.cancelled += cancelled.len() as u64;
            cancelled
        };

        if !cancelled.is_empty() {
            tracing::debug!(discarded = cancelled.len(), "hook.discarded");
        }
    }
}

impl std::fmt::Debug for HookQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookQueue")
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Spawns hook tasks onto a tokio runtime.
#[cfg(feature = "tokio")]
#[derive(Clone, Debug)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Executor for the runtime this thread is running in, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

#[cfg(feature = "tokio")]
impl HookExecutor for TokioExecutor {
    fn spawn(&self, task: HookTask) {
        drop(self.handle.spawn(task.run()));
    }
}
