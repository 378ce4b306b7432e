//! The intercept stage: ordered predicates/mutators applied to each `Event`
//! before it reaches the batching engine.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::event::Event;
use crate::stage::Stage;

/// The result of running one interceptor over an event.
pub enum Intercepted {
    /// Continue with this (possibly mutated) event.
    Keep(Event),
    /// Drop the event; no later interceptor or stage sees it.
    Drop,
}

/// Runs an ordered chain of interceptors over each event. An interceptor
/// that panics drops the event and logs a warning rather than aborting the
/// remaining pipeline; later events are unaffected.
pub struct InterceptStage {
    interceptors: Vec<Box<dyn Fn(Event) -> Intercepted + Send + Sync>>,
    downstream: Arc<dyn Stage<Event>>,
}

impl InterceptStage {
    pub fn new(
        interceptors: Vec<Box<dyn Fn(Event) -> Intercepted + Send + Sync>>,
        downstream: Arc<dyn Stage<Event>>,
    ) -> Self {
        Self {
            interceptors,
            downstream,
        }
    }
}

impl Stage<Event> for InterceptStage {
    fn process(&self, mut event: Event) {
        for interceptor in &self.interceptors {
            let result = panic::catch_unwind(AssertUnwindSafe(|| interceptor(event)));
            match result {
                Ok(Intercepted::Keep(next)) => event = next,
                Ok(Intercepted::Drop) => return,
                Err(_) => {
                    tracing::warn!("interceptor panicked; dropping event");
                    return;
                }
            }
        }
        self.downstream.process(event);
    }

    fn start(&self) {
        self.downstream.start();
    }

    fn stop(&self, timeout: Duration) -> bool {
        self.downstream.stop(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Identity;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<Event>>);

    impl Stage<Event> for RecordingSink {
        fn process(&self, item: Event) {
            self.0.lock().unwrap().push(item);
        }
        fn start(&self) {}
        fn stop(&self, _timeout: Duration) -> bool {
            true
        }
    }

    fn event(n: i64) -> Event {
        Event::new(
            Identity {
                account_id: "acct".to_string(),
                project_id: "proj".to_string(),
            },
            "visitor-1",
            serde_json::json!({ "n": n }),
        )
    }

    #[test]
    fn mutator_runs_before_downstream() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let stage = InterceptStage::new(
            vec![Box::new(|mut e: Event| {
                e.payload["tagged"] = serde_json::json!(true);
                Intercepted::Keep(e)
            })],
            sink.clone(),
        );
        stage.process(event(1));
        let events = sink.0.lock().unwrap();
        assert_eq!(events[0].payload["tagged"], true);
    }

    #[test]
    fn drop_predicate_stops_propagation() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let stage = InterceptStage::new(vec![Box::new(|_: Event| Intercepted::Drop)], sink.clone());
        stage.process(event(1));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_interceptor_drops_event_without_poisoning_later_ones() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let stage = InterceptStage::new(
            vec![Box::new(|_: Event| -> Intercepted { panic!("boom") })],
            sink.clone(),
        );
        stage.process(event(1));
        assert!(sink.0.lock().unwrap().is_empty());
        stage.process(event(2));
        // second call runs the same interceptor chain independently and
        // also panics/drops, the point is it didn't poison the stage.
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
