//! The sink stage: the tail of the pipeline, adapting a host-supplied
//! [`EventHandler`] into a [`Stage<Request>`].

use std::time::Duration;

use crate::error::{DispatchError, PipelineError};
use crate::event::Request;

/// Implemented by the host application to actually deliver a [`Request`]
/// (typically an HTTP POST/PUT). The core pipeline never interprets
/// transport details; it only routes the `Result` to callbacks.
pub trait EventHandler: Send + Sync {
    fn dispatch(&self, request: &Request) -> Result<(), DispatchError>;
}

/// Wraps an [`EventHandler`], firing `onSuccess`/`onFailure` callbacks for
/// every event folded into a request based on the dispatch outcome.
///
/// Per the propagation policy shared by every stage, a dispatch failure
/// never escapes this stage: it is routed to the optional exception hook
/// (if configured) and logged, but not re-raised.
pub struct SinkStage {
    handler: std::sync::Arc<dyn EventHandler>,
    exception_handler: Option<Box<dyn Fn(&Request, &DispatchError) + Send + Sync>>,
}

impl SinkStage {
    pub fn new(handler: std::sync::Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            exception_handler: None,
        }
    }

    pub fn with_exception_handler(
        mut self,
        handler: impl Fn(&Request, &DispatchError) + Send + Sync + 'static,
    ) -> Self {
        self.exception_handler = Some(Box::new(handler));
        self
    }
}

impl crate::stage::Stage<Request> for SinkStage {
    fn process(&self, request: Request) {
        match self.handler.dispatch(&request) {
            Ok(()) => request.notify_success(),
            Err(error) => {
                if let Some(handler) = &self.exception_handler {
                    handler(&request, &error);
                } else {
                    tracing::error!("dispatch failed with no exception handler configured: {error}");
                }
                request.notify_failure(&PipelineError::Dispatch(error));
            }
        }
    }

    fn start(&self) {}

    fn stop(&self, _timeout: Duration) -> bool {
        true
    }
}
