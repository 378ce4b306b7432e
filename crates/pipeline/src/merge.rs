//! The merge stage: groups consecutive mergeable events into a single
//! [`Request`] via an injected factory.

use std::sync::Arc;
use std::time::Duration;

use crate::event::{Event, Request};
use crate::stage::Stage;

/// Builds one [`Request`] per group of consecutive mergeable events.
///
/// Grouping only ever merges *consecutive* events in submission order, an
/// event never jumps ahead of one that arrived before it, even if a later
/// event would also be mergeable with an earlier, non-adjacent one. A `None`
/// result from the factory drops the whole group silently (no request is
/// produced, so no callback fires for any event in it).
pub struct MergeStage {
    event_factory: Box<dyn Fn(&[Event]) -> Option<Request> + Send + Sync>,
    downstream: Arc<dyn Stage<Request>>,
}

impl MergeStage {
    pub fn new(
        event_factory: impl Fn(&[Event]) -> Option<Request> + Send + Sync + 'static,
        downstream: Arc<dyn Stage<Request>>,
    ) -> Self {
        Self {
            event_factory: Box::new(event_factory),
            downstream,
        }
    }

    fn flush_group(&self, group: Vec<Event>) {
        if group.is_empty() {
            return;
        }
        if let Some(mut request) = (self.event_factory)(&group) {
            request.events = group;
            self.downstream.process(request);
        }
    }
}

impl Stage<Event> for MergeStage {
    fn process(&self, item: Event) {
        self.flush_group(vec![item]);
    }

    fn process_batch(&self, items: Vec<Event>) {
        let mut group: Vec<Event> = Vec::new();
        for event in items {
            if let Some(last) = group.last() {
                if !last.mergeable_with(&event) {
                    self.flush_group(std::mem::take(&mut group));
                }
            }
            group.push(event);
        }
        self.flush_group(group);
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
    use crate::event::{Identity, Method};
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<Request>>);

    impl Stage<Request> for RecordingSink {
        fn process(&self, item: Request) {
            self.0.lock().unwrap().push(item);
        }
        fn start(&self) {}
        fn stop(&self, _timeout: Duration) -> bool {
            true
        }
    }

    fn event(account: &str, n: i64) -> Event {
        Event::new(
            Identity {
                account_id: account.to_string(),
                project_id: "proj".to_string(),
            },
            "visitor-1",
            serde_json::json!({ "n": n }),
        )
    }

    fn factory() -> impl Fn(&[Event]) -> Option<Request> + Send + Sync + 'static {
        |group: &[Event]| {
            Some(Request::new(
                Method::Post,
                "https://example.test/batch",
                serde_json::to_vec(&group.iter().map(|e| &e.payload).collect::<Vec<_>>()).unwrap(),
            ))
        }
    }

    #[test]
    fn groups_consecutive_mergeable_events() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let stage = MergeStage::new(factory(), sink.clone());
        stage.process_batch(vec![
            event("a", 1),
            event("a", 2),
            event("b", 3),
            event("a", 4),
        ]);
        let requests = sink.0.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].events().len(), 2);
        assert_eq!(requests[1].events().len(), 1);
        assert_eq!(requests[2].events().len(), 1);
    }

    #[test]
    fn null_factory_result_drops_group_silently() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let stage = MergeStage::new(|_: &[Event]| None, sink.clone());
        stage.process_batch(vec![event("a", 1), event("a", 2)]);
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
