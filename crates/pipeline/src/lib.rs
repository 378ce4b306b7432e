//! A staged event-processing pipeline for SDK-side event delivery.
//!
//! Items submitted by a host application flow through a fixed chain of
//! stages (transform, convert, intercept, batch, merge, sink), each
//! implementing [`Stage`]. The centerpiece is [`batch::BatchingProcessor`],
//! which coalesces events into bounded batches under simultaneous
//! size/time/flush triggers and dispatches them concurrently up to an
//! inflight cap.
//!
//! Construct a pipeline with [`pipeline::PipelineBuilder`].

pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod event;
pub mod executor;
pub mod intercept;
pub mod merge;
pub mod pipeline;
pub mod sink;
pub mod stage;
pub mod transform;

pub use config::{BatchConfig, BatchConfigBuilder};
pub use error::{DispatchError, PipelineError, PipelineResult};
pub use event::{Callback, CallbackList, Event, Identity, Method, Request};
pub use executor::{Executor, ThreadExecutor};
pub use intercept::Intercepted;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use sink::EventHandler;
pub use stage::Stage;

#[cfg(feature = "tokio-executor")]
pub use executor::TokioExecutor;
