//! The convert stage: maps an arbitrary submitted item `T` into the
//! canonical [`crate::event::Event`], or drops it.

use std::sync::Arc;
use std::time::Duration;

use crate::event::Event;
use crate::stage::Stage;

/// A single conversion function `T -> Option<Event>`. A `None` result drops
/// the item silently: it never became an event, so no callback fires for it
/// (there is nothing downstream to attach a failure to).
pub struct ConvertStage<T> {
    convert: Box<dyn Fn(T) -> Option<Event> + Send + Sync>,
    downstream: Arc<dyn Stage<Event>>,
}

impl<T> ConvertStage<T> {
    pub fn new(
        convert: impl Fn(T) -> Option<Event> + Send + Sync + 'static,
        downstream: Arc<dyn Stage<Event>>,
    ) -> Self {
        Self {
            convert: Box::new(convert),
            downstream,
        }
    }
}

impl<T: Send + 'static> Stage<T> for ConvertStage<T> {
    fn process(&self, item: T) {
        if let Some(event) = (self.convert)(item) {
            self.downstream.process(event);
        }
    }

    fn start(&self) {
        self.downstream.start();
    }

    fn stop(&self, timeout: Duration) -> bool {
        self.downstream.stop(timeout)
    }
}
