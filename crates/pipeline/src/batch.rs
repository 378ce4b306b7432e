//! The batching engine: the Buffer/Batch stage and the hardest subsystem in
//! the pipeline. Coalesces items into bounded groups under simultaneous
//! size, time and flush triggers, dispatches groups concurrently up to an
//! inflight cap, and honors a cooperative start/stop lifecycle with a
//! bounded drain.
//!
//! Generic over the item type `T` so the engine itself can be exercised in
//! isolation (the concrete pipeline always instantiates it over `Event`,
//! but the hardest correctness properties, size/time/flush triggers,
//! back-pressure, cancellation races, don't depend on that).

use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::executor::{Executor, Task};
use crate::stage::Stage;

/// One of the four lifecycle states a [`BatchingProcessor`] (and, by
/// extension, the whole pipeline built around it) progresses through.
/// Linear: `New -> Running -> Stopping -> Stopped`, no back-transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    New,
    Running,
    Stopping,
    Stopped,
}

struct EngineState<T> {
    open_batch: Vec<T>,
    opened_at: Option<Instant>,
    inflight: usize,
    /// Bumped every time `open_batch` transitions from empty to non-empty.
    /// A timer thread captures the generation at arm time; on fire it only
    /// acts if the generation still matches *and* the batch is still
    /// non-empty. This stands in for explicit timer cancellation (which a
    /// thread that's already sleeping can't be sent) and additionally
    /// guards against the subtler race where a stale timer could otherwise
    /// detach a *newer* batch that happens to occupy the same slot.
    generation: u64,
}

impl<T> EngineState<T> {
    fn new() -> Self {
        Self {
            open_batch: Vec::new(),
            opened_at: None,
            inflight: 0,
            generation: 0,
        }
    }
}

struct Inner<T> {
    max_batch_size: usize,
    max_batch_open: Duration,
    max_inflight_batches: usize,
    executor: Arc<dyn Executor>,
    downstream: Arc<dyn Stage<T>>,
    on_shutdown_drop: Option<Arc<dyn Fn(Vec<T>) + Send + Sync>>,
    state: Mutex<EngineState<T>>,
    not_full: Condvar,
}

/// Coalesces items of type `T` into bounded batches and hands them to an
/// [`Executor`] for concurrent dispatch to a downstream [`Stage`].
///
/// See the module docs and `crate::config::BatchConfig` for the governing
/// parameters. This type is itself a [`Stage<T>`]: `process`/`process_batch`
/// are the producer-facing entry points, and `flush`/`start`/`stop` round
/// out the lifecycle.
pub struct BatchingProcessor<T> {
    inner: Arc<Inner<T>>,
    lifecycle: Mutex<LifecycleState>,
}

impl<T: Send + 'static> BatchingProcessor<T> {
    pub fn new(
        config: crate::config::BatchConfig,
        executor: Arc<dyn Executor>,
        downstream: Arc<dyn Stage<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_batch_size: config.max_batch_size,
                max_batch_open: config.max_batch_open,
                max_inflight_batches: config.max_inflight_batches,
                executor,
                downstream,
                on_shutdown_drop: None,
                state: Mutex::new(EngineState::new()),
                not_full: Condvar::new(),
            }),
            lifecycle: Mutex::new(LifecycleState::New),
        }
    }

    /// Registers a hook invoked with any items that had to be dropped
    /// because `stop`'s drain deadline passed while they were still
    /// waiting on the inflight gate (see `spec.md` §3: "explicitly dropped
    /// during shutdown with that drop reported as a failure callback").
    /// The concrete pipeline wires this to fan `onFailure` out to every
    /// dropped event's callbacks; the engine itself stays agnostic to what
    /// `T` is.
    pub fn with_shutdown_drop_hook(mut self, hook: Arc<dyn Fn(Vec<T>) + Send + Sync>) -> Self {
        // Safe to assume sole ownership here: this is only ever chained
        // directly onto `new()`, before `self.inner` has been cloned into
        // any spawned thread.
        Arc::get_mut(&mut self.inner)
            .expect("with_shutdown_drop_hook must be called before start()")
            .on_shutdown_drop = Some(hook);
        self
    }

    fn is_running(&self) -> bool {
        *self.lifecycle.lock().unwrap() == LifecycleState::Running
    }

    fn arm_timer(&self, generation: u64) {
        if self.inner.max_batch_open == Duration::ZERO {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.max_batch_open;
        thread::spawn(move || {
            thread::sleep(delay);
            Inner::timer_fire(&inner, generation);
        });
    }

    /// Appends `item` to the open batch, closing and dispatching it if this
    /// append fills it to `max_batch_size`. See `spec.md` §4.5 step-by-step.
    fn append_and_maybe_close(&self, item: T) {
        let mut guard = self.inner.state.lock().unwrap();
        guard.open_batch.push(item);
        if guard.open_batch.len() == 1 {
            guard.opened_at = Some(Instant::now());
            guard.generation += 1;
            self.arm_timer(guard.generation);
        }

        if guard.open_batch.len() == self.inner.max_batch_size {
            let ready = mem::take(&mut guard.open_batch);
            guard.opened_at = None;
            while guard.inflight >= self.inner.max_inflight_batches {
                guard = self.inner.not_full.wait(guard).unwrap();
            }
            guard.inflight += 1;
            drop(guard);
            Inner::dispatch(Arc::clone(&self.inner), ready);
        }
    }

    /// Idempotent forced close of the open batch. Returns after the batch
    /// (if any) has been handed to the executor, not after it has
    /// dispatched (see `spec.md` §9 open question).
    pub fn flush(&self) {
        let mut guard = self.inner.state.lock().unwrap();
        if guard.open_batch.is_empty() {
            return;
        }
        let ready = mem::take(&mut guard.open_batch);
        guard.opened_at = None;
        while guard.inflight >= self.inner.max_inflight_batches {
            guard = self.inner.not_full.wait(guard).unwrap();
        }
        guard.inflight += 1;
        drop(guard);
        Inner::dispatch(Arc::clone(&self.inner), ready);
    }

    /// Like `flush`, but bounded by `deadline`: if the inflight gate can't
    /// be cleared before `deadline`, the batch is dropped via
    /// `on_shutdown_drop` rather than dispatched. Used only from `stop`.
    fn flush_bounded(&self, deadline: Instant) -> bool {
        let mut guard = self.inner.state.lock().unwrap();
        if guard.open_batch.is_empty() {
            return true;
        }
        let ready = mem::take(&mut guard.open_batch);
        guard.opened_at = None;
        loop {
            if guard.inflight < self.inner.max_inflight_batches {
                guard.inflight += 1;
                drop(guard);
                Inner::dispatch(Arc::clone(&self.inner), ready);
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                drop(guard);
                self.drop_on_shutdown(ready);
                return false;
            }
            let (g, timeout_result) = self.inner.not_full.wait_timeout(guard, remaining).unwrap();
            guard = g;
            if timeout_result.timed_out() && guard.inflight >= self.inner.max_inflight_batches {
                drop(guard);
                self.drop_on_shutdown(ready);
                return false;
            }
        }
    }

    fn drop_on_shutdown(&self, ready: Vec<T>) {
        let count = ready.len();
        match &self.inner.on_shutdown_drop {
            Some(hook) => hook(ready),
            None => tracing::warn!(
                count,
                "dropping batch on shutdown: drain deadline passed with no shutdown-drop hook registered"
            ),
        }
    }
}

impl<T> Inner<T> {
    fn timer_fire(inner: &Arc<Inner<T>>, generation: u64)
    where
        T: Send + 'static,
    {
        let mut guard = inner.state.lock().unwrap();
        if guard.generation != generation || guard.open_batch.is_empty() {
            return;
        }
        let ready = mem::take(&mut guard.open_batch);
        guard.opened_at = None;
        while guard.inflight >= inner.max_inflight_batches {
            guard = inner.not_full.wait(guard).unwrap();
        }
        guard.inflight += 1;
        drop(guard);
        Self::dispatch(Arc::clone(inner), ready);
    }

    fn dispatch(inner: Arc<Inner<T>>, ready: Vec<T>)
    where
        T: Send + 'static,
    {
        let task: Task = Box::new(move || {
            let downstream = Arc::clone(&inner.downstream);
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                downstream.process_batch(ready);
            }));
            if result.is_err() {
                tracing::error!("downstream stage panicked while processing a batch; swallowed");
            }
            let mut guard = inner.state.lock().unwrap();
            guard.inflight -= 1;
            drop(guard);
            inner.not_full.notify_all();
        });
        inner.executor.execute(task);
    }
}

impl<T: Send + 'static> Stage<T> for BatchingProcessor<T> {
    fn process(&self, item: T) {
        if !self.is_running() {
            tracing::debug!("process() called after stop; dropping item");
            return;
        }
        self.append_and_maybe_close(item);
    }

    /// Bulk submission: slices `items` into `max_batch_size`-sized chunks,
    /// filling any already-open batch first before seeding fresh ones with
    /// the remainder (see `spec.md` §9 open question).
    fn process_batch(&self, items: Vec<T>) {
        if !self.is_running() {
            tracing::debug!("process_batch() called after stop; dropping {} item(s)", items.len());
            return;
        }
        let mut remaining: std::collections::VecDeque<T> = items.into();
        while !remaining.is_empty() {
            let mut guard = self.inner.state.lock().unwrap();
            let space = self.inner.max_batch_size - guard.open_batch.len();
            let take_n = space.min(remaining.len());
            let was_empty = guard.open_batch.is_empty();
            for item in remaining.drain(..take_n) {
                guard.open_batch.push(item);
            }
            if was_empty && take_n > 0 {
                guard.opened_at = Some(Instant::now());
                guard.generation += 1;
                let generation = guard.generation;
                drop(guard);
                self.arm_timer(generation);
                guard = self.inner.state.lock().unwrap();
            }
            if guard.open_batch.len() == self.inner.max_batch_size {
                let ready = mem::take(&mut guard.open_batch);
                guard.opened_at = None;
                while guard.inflight >= self.inner.max_inflight_batches {
                    guard = self.inner.not_full.wait(guard).unwrap();
                }
                guard.inflight += 1;
                drop(guard);
                Inner::dispatch(Arc::clone(&self.inner), ready);
            }
        }
    }

    fn start(&self) {
        self.inner.downstream.start();
        *self.lifecycle.lock().unwrap() = LifecycleState::Running;
    }

    fn stop(&self, timeout: Duration) -> bool {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if *lifecycle != LifecycleState::Running {
                return true;
            }
            *lifecycle = LifecycleState::Stopping;
        }

        let deadline = Instant::now() + timeout;
        let flush_ok = self.flush_bounded(deadline);

        let mut guard = self.inner.state.lock().unwrap();
        let mut drained = guard.inflight == 0;
        while guard.inflight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                drained = false;
                break;
            }
            let (g, timeout_result) = self.inner.not_full.wait_timeout(guard, remaining).unwrap();
            guard = g;
            if timeout_result.timed_out() && guard.inflight > 0 {
                drained = false;
                break;
            }
            drained = guard.inflight == 0;
        }
        drop(guard);

        *self.lifecycle.lock().unwrap() = LifecycleState::Stopped;

        let downstream_timeout = deadline.saturating_duration_since(Instant::now());
        let downstream_ok = self.inner.downstream.stop(downstream_timeout);

        flush_ok && drained && downstream_ok
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::executor::ThreadExecutor;
    use proptest::prelude::*;
    use std::sync::Mutex as StdMutex;

    struct CountingSink {
        total_items: StdMutex<usize>,
        max_seen_batch: StdMutex<usize>,
    }

    impl Stage<u32> for CountingSink {
        fn process(&self, _item: u32) {
            *self.total_items.lock().unwrap() += 1;
        }
        fn process_batch(&self, items: Vec<u32>) {
            let mut max_seen = self.max_seen_batch.lock().unwrap();
            *max_seen = (*max_seen).max(items.len());
            *self.total_items.lock().unwrap() += items.len();
        }
        fn start(&self) {}
        fn stop(&self, _timeout: Duration) -> bool {
            true
        }
    }

    proptest! {
        // For all inputs: every emitted batch has size in [1, max_batch_size],
        // and the total emitted item count equals the total submitted.
        #[test]
        fn batches_never_exceed_configured_max(
            max_batch_size in 1usize..12,
            item_count in 0usize..200,
        ) {
            let sink = Arc::new(CountingSink {
                total_items: StdMutex::new(0),
                max_seen_batch: StdMutex::new(0),
            });
            let config = crate::config::BatchConfig::builder()
                .max_batch_size(max_batch_size)
                .max_batch_open(Duration::from_secs(3600))
                .max_inflight_batches(4)
                .build()
                .unwrap();
            let batcher = BatchingProcessor::new(config, Arc::new(ThreadExecutor::new()), sink.clone());
            batcher.start();
            for i in 0..item_count as u32 {
                batcher.process(i);
            }
            batcher.stop(Duration::from_secs(5));

            prop_assert!(*sink.max_seen_batch.lock().unwrap() <= max_batch_size);
            prop_assert_eq!(*sink.total_items.lock().unwrap(), item_count);
        }
    }
}
