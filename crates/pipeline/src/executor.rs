//! The injected execution collaborator for the batching engine.
//!
//! `Executor` is kept deliberately narrow, "submit a `Runnable`", per the
//! design notes: the test suite needs visibility into submission and
//! concurrent-execution counts, but that's provided through a test-only
//! decorator (see `tests::CountingExecutor`) rather than widening the
//! production trait.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// A unit of work the batching engine hands off for execution. Always a
/// batch dispatch (`sink.process_batch(ready)` plus inflight bookkeeping);
/// the executor itself has no knowledge of what the task does.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A narrow capability interface supplying the parallelism the batching
/// engine dispatches batches onto. The pipeline never shuts this down,
/// it is a shared collaborator passed in by construction.
pub trait Executor: Send + Sync {
    /// Run `task` on this executor. Never blocks the caller waiting for
    /// `task` to complete.
    fn execute(&self, task: Task);
}

/// Spawns one OS thread per submitted task.
///
/// Correct and simple: concurrency is already bounded upstream by the
/// batching engine's inflight gate, so an executor that trades thread-reuse
/// for simplicity is an acceptable default. Threads are named so panics are
/// attributable in logs, matching the teacher's `thread::Builder::name`
/// convention for per-stage worker threads.
#[derive(Default)]
pub struct ThreadExecutor {
    name_prefix: String,
}

impl ThreadExecutor {
    pub fn new() -> Self {
        Self {
            name_prefix: "batch-dispatch".to_string(),
        }
    }

    pub fn with_name_prefix(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
        }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let builder = thread::Builder::new().name(self.name_prefix.clone());
        let spawned = builder.spawn(move || {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!("batch dispatch task panicked");
            }
        });
        if let Err(e) = spawned {
            tracing::error!("failed to spawn batch dispatch thread: {}", e);
        }
    }
}

/// Dispatches batches via `tokio::runtime::Handle::spawn_blocking` instead
/// of a raw OS thread per task, so batch dispatch shares the host
/// application's existing blocking thread pool. Requires a running Tokio
/// runtime context at construction time.
#[cfg(feature = "tokio-executor")]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio-executor")]
impl TokioExecutor {
    /// Creates a `TokioExecutor` bound to the currently-entered runtime.
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

#[cfg(feature = "tokio-executor")]
impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        self.handle.spawn_blocking(move || {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!("batch dispatch task panicked");
            }
        });
    }
}
