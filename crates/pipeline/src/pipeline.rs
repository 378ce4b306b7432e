//! Top-level `Pipeline`: wires Transform -> Convert -> Intercept ->
//! BatchingProcessor -> Merge -> Sink and exposes the external interface
//! (`process`/`process_batch`/`flush`/`start`/`stop`).

use std::sync::Arc;
use std::time::Duration;

use crate::batch::BatchingProcessor;
use crate::config::BatchConfig;
use crate::error::PipelineError;
use crate::event::{Event, Request};
use crate::executor::{Executor, ThreadExecutor};
use crate::intercept::{InterceptStage, Intercepted};
use crate::merge::MergeStage;
use crate::sink::{EventHandler, SinkStage};
use crate::stage::Stage;
use crate::transform::TransformStage;

/// A fully-wired event pipeline accepting items of type `T`.
///
/// Built via [`PipelineBuilder`]. Owns no state of its own beyond the
/// assembled stage chain: `process`/`process_batch` submit to the head
/// (transform) stage, `flush` reaches directly into the batching engine,
/// and `start`/`stop` recurse through the whole chain.
pub struct Pipeline<T> {
    head: Arc<dyn Stage<T>>,
    batch: Arc<BatchingProcessor<Event>>,
}

impl<T: Send + 'static> Pipeline<T> {
    pub fn process(&self, item: T) {
        self.head.process(item);
    }

    pub fn process_batch(&self, items: Vec<T>) {
        self.head.process_batch(items);
    }

    /// Forces the batching engine's open batch closed immediately,
    /// regardless of its age or size. Idempotent: a no-op if no batch is
    /// currently open. Returns once the batch has been submitted for
    /// dispatch, not once dispatch completes.
    pub fn flush(&self) {
        self.batch.flush();
    }

    pub fn start(&self) {
        self.head.start();
    }

    /// Stops the pipeline, draining for up to `timeout`. Returns `true` iff
    /// every in-flight and open batch was flushed and dispatched within the
    /// deadline. After this returns (regardless of outcome), further
    /// `process`/`process_batch` calls are dropped silently.
    pub fn stop(&self, timeout: Duration) -> bool {
        self.head.stop(timeout)
    }
}

/// Builds a [`Pipeline<T>`] tail-first: the sink is constructed first, then
/// each upstream stage wraps its downstream successor, matching the
/// construction order every stage's `start`/`stop` recursion assumes.
pub struct PipelineBuilder<T> {
    transformers: Vec<Box<dyn Fn(&T) + Send + Sync>>,
    convert: Option<Box<dyn Fn(T) -> Option<Event> + Send + Sync>>,
    interceptors: Vec<Box<dyn Fn(Event) -> Intercepted + Send + Sync>>,
    batch_config: BatchConfig,
    executor: Option<Arc<dyn Executor>>,
    event_factory: Option<Box<dyn Fn(&[Event]) -> Option<Request> + Send + Sync>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    exception_handler: Option<Box<dyn Fn(&Request, &crate::error::DispatchError) + Send + Sync>>,
}

impl<T> Default for PipelineBuilder<T> {
    fn default() -> Self {
        Self {
            transformers: Vec::new(),
            convert: None,
            interceptors: Vec::new(),
            batch_config: BatchConfig::default(),
            executor: None,
            event_factory: None,
            event_handler: None,
            exception_handler: None,
        }
    }
}

impl<T: Send + Sync + 'static> PipelineBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transformer(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.transformers.push(Box::new(f));
        self
    }

    pub fn with_converter(mut self, f: impl Fn(T) -> Option<Event> + Send + Sync + 'static) -> Self {
        self.convert = Some(Box::new(f));
        self
    }

    pub fn with_interceptor(mut self, f: impl Fn(Event) -> Intercepted + Send + Sync + 'static) -> Self {
        self.interceptors.push(Box::new(f));
        self
    }

    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.batch_config = config;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_event_factory(mut self, f: impl Fn(&[Event]) -> Option<Request> + Send + Sync + 'static) -> Self {
        self.event_factory = Some(Box::new(f));
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn with_exception_handler(
        mut self,
        f: impl Fn(&Request, &crate::error::DispatchError) + Send + Sync + 'static,
    ) -> Self {
        self.exception_handler = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<Pipeline<T>, PipelineError> {
        let convert = self.convert.ok_or_else(|| PipelineError::InvalidConfiguration {
            message: "a converter is required".to_string(),
        })?;
        let event_factory = self.event_factory.ok_or_else(|| PipelineError::InvalidConfiguration {
            message: "an event factory is required".to_string(),
        })?;
        let event_handler = self.event_handler.ok_or_else(|| PipelineError::InvalidConfiguration {
            message: "an event handler is required".to_string(),
        })?;
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(ThreadExecutor::new()) as Arc<dyn Executor>);

        let mut sink = SinkStage::new(event_handler);
        if let Some(exception_handler) = self.exception_handler {
            sink = sink.with_exception_handler(exception_handler);
        }
        let sink: Arc<dyn Stage<Request>> = Arc::new(sink);

        let merge: Arc<dyn Stage<Event>> = Arc::new(MergeStage::new(
            move |group: &[Event]| (event_factory)(group),
            sink,
        ));

        let batch = Arc::new(
            BatchingProcessor::new(self.batch_config, executor, merge).with_shutdown_drop_hook(Arc::new(
                |dropped: Vec<Event>| {
                    for event in &dropped {
                        event.callbacks.notify_failure(event, &PipelineError::DrainTimeout);
                    }
                },
            )),
        );
        let batch_as_stage: Arc<dyn Stage<Event>> = batch.clone();

        let intercept: Arc<dyn Stage<Event>> = Arc::new(InterceptStage::new(self.interceptors, batch_as_stage));

        let convert: Arc<dyn Stage<T>> = Arc::new(crate::convert::ConvertStage::new(
            move |item: T| (convert)(item),
            intercept,
        ));

        let head: Arc<dyn Stage<T>> = Arc::new(TransformStage::new(self.transformers, convert));

        Ok(Pipeline { head, batch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Identity, Method};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingHandler(Mutex<Vec<Vec<u8>>>);

    impl EventHandler for RecordingHandler {
        fn dispatch(&self, request: &Request) -> Result<(), crate::error::DispatchError> {
            self.0.lock().unwrap().push(request.body.clone());
            Ok(())
        }
    }

    #[test]
    fn end_to_end_wiring_delivers_converted_events() {
        let handler = Arc::new(RecordingHandler(Mutex::new(Vec::new())));
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = Arc::clone(&delivered);

        let pipeline: Pipeline<i64> = PipelineBuilder::new()
            .with_converter(|n: i64| {
                Some(
                    Event::new(
                        Identity {
                            account_id: "acct".to_string(),
                            project_id: "proj".to_string(),
                        },
                        "visitor-1",
                        serde_json::json!({ "n": n }),
                    )
                    .with_callback(crate::event::Callback::new(
                        {
                            let delivered = Arc::clone(&delivered_clone);
                            move |_e| {
                                delivered.fetch_add(1, Ordering::SeqCst);
                            }
                        },
                        |_e, _err| {},
                    )),
                )
            })
            .with_event_factory(|group: &[Event]| {
                Some(Request::new(Method::Post, "https://example.test", vec![group.len() as u8]))
            })
            .with_event_handler(handler.clone())
            .with_batch_config(
                BatchConfig::builder()
                    .max_batch_size(3)
                    .max_batch_open(Duration::from_secs(3600))
                    .max_inflight_batches(2)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        pipeline.start();
        for n in 0..3 {
            pipeline.process(n);
        }
        assert!(pipeline.stop(Duration::from_secs(5)));
        assert_eq!(delivered.load(Ordering::SeqCst), 3);
        assert_eq!(handler.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn build_fails_without_required_collaborators() {
        let result: Result<Pipeline<i64>, _> = PipelineBuilder::new().build();
        assert!(result.is_err());
    }
}
