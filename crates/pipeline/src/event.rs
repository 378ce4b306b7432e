//! The canonical data model that flows through the pipeline once it has
//! passed the convert stage: [`Event`], [`Request`] and the callback types
//! that ride along with them.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use crate::error::PipelineError;

/// Identifies which account/project an [`Event`] belongs to. Two events are
/// mergeable into the same [`Request`] iff their `Identity` is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub account_id: String,
    pub project_id: String,
}

/// The canonical internal event record. Immutable once it leaves the
/// intercept stage, apart from the callback list it carries until the sink
/// fires it.
pub struct Event {
    pub identity: Identity,
    pub visitor_id: String,
    /// Opaque payload assembled by the out-of-scope domain model
    /// (experiment/feature lookups, variation assignment, etc).
    pub payload: serde_json::Value,
    pub enqueued_at: Instant,
    pub(crate) callbacks: CallbackList,
}

impl Event {
    pub fn new(identity: Identity, visitor_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            identity,
            visitor_id: visitor_id.into(),
            payload,
            enqueued_at: Instant::now(),
            callbacks: CallbackList::new(),
        }
    }

    /// Attaches a callback to be fired when this event's eventual [`Request`]
    /// succeeds or fails (or is dropped during shutdown).
    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Whether `self` and `other` may be folded into the same [`Request`].
    pub fn mergeable_with(&self, other: &Event) -> bool {
        self.identity == other.identity
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("identity", &self.identity)
            .field("visitor_id", &self.visitor_id)
            .field("payload", &self.payload)
            .field("enqueued_at", &self.enqueued_at)
            .field("callbacks", &self.callbacks.0.len())
            .finish()
    }
}

impl Clone for Event {
    /// Clones event data but never callbacks: a callback must fire exactly
    /// once, so a cloned `Event` starts with an empty callback list.
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            visitor_id: self.visitor_id.clone(),
            payload: self.payload.clone(),
            enqueued_at: self.enqueued_at,
            callbacks: CallbackList::new(),
        }
    }
}

/// A success/failure handler pair, registered once per logical submission
/// and fired exactly once when the [`Request`] it ends up part of is
/// dispatched (or dropped during shutdown).
pub struct Callback {
    pub on_success: Box<dyn Fn(&Event) + Send + Sync>,
    pub on_failure: Box<dyn Fn(&Event, &PipelineError) + Send + Sync>,
}

impl Callback {
    pub fn new(
        on_success: impl Fn(&Event) + Send + Sync + 'static,
        on_failure: impl Fn(&Event, &PipelineError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }
}

/// An ordered, append-only list of callbacks. Invoked front-to-back;
/// a panicking callback is caught and logged so later callbacks still run.
#[derive(Default)]
pub struct CallbackList(Vec<Callback>);

impl CallbackList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: Callback) {
        self.0.push(callback);
    }

    pub fn extend(&mut self, other: CallbackList) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fire every `on_success` handler for `event`, in registration order.
    /// A handler that panics is caught and logged; later handlers still run.
    pub fn notify_success(&self, event: &Event) {
        for callback in &self.0 {
            let result = panic::catch_unwind(AssertUnwindSafe(|| (callback.on_success)(event)));
            if result.is_err() {
                tracing::warn!("callback panicked handling onSuccess; continuing with remaining callbacks");
            }
        }
    }

    /// Fire every `on_failure` handler for `event`, in registration order.
    pub fn notify_failure(&self, event: &Event, error: &PipelineError) {
        for callback in &self.0 {
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| (callback.on_failure)(event, error)));
            if result.is_err() {
                tracing::warn!("callback panicked handling onFailure; continuing with remaining callbacks");
            }
        }
    }
}

/// HTTP method of a prepared [`Request`]. The core never interprets this
/// beyond handing it to the [`crate::sink::EventHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
}

/// A fully-prepared wire artifact produced by the merge stage from one or
/// more mergeable [`Event`]s, plus the aggregate callback list that must be
/// notified once the sink has attempted to dispatch it.
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub(crate) events: Vec<Event>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body,
            events: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// The events folded into this request, preserved so callbacks can be
    /// attributed to the originating event on success or failure.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Fires every folded event's `onSuccess` callbacks, each against its
    /// own originating event.
    pub(crate) fn notify_success(&self) {
        for event in &self.events {
            event.callbacks.notify_success(event);
        }
    }

    /// Fires every folded event's `onFailure` callbacks, each against its
    /// own originating event.
    pub(crate) fn notify_failure(&self, error: &PipelineError) {
        for event in &self.events {
            event.callbacks.notify_failure(event, error);
        }
    }
}
