//! Error types for the pipeline crate.

use thiserror::Error;

/// Pipeline-specific error types.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid batch configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("pipeline is not running")]
    NotRunning,

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("item dropped during shutdown: drain deadline elapsed before it could be dispatched")]
    DrainTimeout,
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Raised by an [`crate::sink::EventHandler`] when it fails to dispatch a
/// [`crate::event::Request`]. Opaque beyond a message: the core does not
/// interpret the failure, it only routes it to callbacks.
#[derive(Error, Debug, Clone)]
#[error("dispatch failed: {0}")]
pub struct DispatchError(pub String);

impl DispatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
