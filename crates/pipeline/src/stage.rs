//! Core definitions for pipeline stages.
//!
//! Every stage in the pipeline (transform, convert, intercept, the
//! batching engine, merge, and the sink adapter) implements [`Stage`].
//! Stages are composed tail-first: the sink is built first, then each
//! upstream stage is constructed holding a handle to its downstream
//! successor. `start`/`stop` recurse through that chain so a stage can
//! rely on its downstream already being up when it starts emitting, and
//! still being alive while it drains.

use std::time::Duration;

/// The core trait for a single stage in the pipeline.
///
/// `In` is the type this stage accepts. A stage forwards internally to
/// whatever it wraps; the trait carries no notion of an output type because
/// each concrete stage already knows its downstream's input type at
/// construction time.
pub trait Stage<In>: Send + Sync {
    /// Submit a single item. Non-blocking in the fast path; may block if a
    /// downstream stage applies back-pressure (only the batching engine
    /// does). Never panics on valid input.
    fn process(&self, item: In);

    /// Submit an ordered group of items. The default behavior iterates and
    /// calls [`Stage::process`] per item; stages that can do better (the
    /// batching engine slicing a bulk submission into batches directly)
    /// override this while preserving the same observable outcome.
    fn process_batch(&self, items: Vec<In>) {
        for item in items {
            self.process(item);
        }
    }

    /// Start this stage. Implementations must call their downstream's
    /// `start()` before performing their own setup.
    fn start(&self);

    /// Stop this stage, draining for up to `timeout`. Implementations must
    /// perform their own teardown/drain before calling their downstream's
    /// `stop()`, and must return `false` (never panic) if the drain did not
    /// complete within `timeout`.
    fn stop(&self, timeout: Duration) -> bool;
}
