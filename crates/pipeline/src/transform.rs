//! The transform stage: ordered, read-only side effects on each item before
//! it is converted. Used for things like request-scoped logging or metrics
//! tagging that need the raw item, not yet the canonical `Event`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::stage::Stage;

/// Applies an ordered list of side-effecting functions to each item, then
/// forwards the item unchanged downstream. A panicking transformer is
/// caught and logged; the item still reaches the remaining transformers and
/// the downstream stage.
pub struct TransformStage<T> {
    transformers: Vec<Box<dyn Fn(&T) + Send + Sync>>,
    downstream: Arc<dyn Stage<T>>,
}

impl<T> TransformStage<T> {
    pub fn new(transformers: Vec<Box<dyn Fn(&T) + Send + Sync>>, downstream: Arc<dyn Stage<T>>) -> Self {
        Self {
            transformers,
            downstream,
        }
    }
}

impl<T: Send + Sync + 'static> Stage<T> for TransformStage<T> {
    fn process(&self, item: T) {
        for transformer in &self.transformers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| transformer(&item)));
            if result.is_err() {
                tracing::warn!("transformer panicked; continuing with remaining transformers");
            }
        }
        self.downstream.process(item);
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<i32>>);

    impl Stage<i32> for RecordingSink {
        fn process(&self, item: i32) {
            self.0.lock().unwrap().push(item);
        }
        fn start(&self) {}
        fn stop(&self, _timeout: Duration) -> bool {
            true
        }
    }

    #[test]
    fn runs_transformers_in_order_then_forwards_unchanged() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_a = Arc::clone(&order);
        let order_b = Arc::clone(&order);
        let stage = TransformStage::new(
            vec![
                Box::new(move |_: &i32| order_a.lock().unwrap().push("a")),
                Box::new(move |_: &i32| order_b.lock().unwrap().push("b")),
            ],
            sink.clone(),
        );
        stage.process(7);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(*sink.0.lock().unwrap(), vec![7]);
    }

    #[test]
    fn panicking_transformer_does_not_block_remaining_ones_or_the_item() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        let stage = TransformStage::new(
            vec![
                Box::new(|_: &i32| panic!("boom")),
                Box::new(move |_: &i32| {
                    ran_clone.fetch_add(1, Ordering::SeqCst);
                }),
            ],
            sink.clone(),
        );
        stage.process(1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(*sink.0.lock().unwrap(), vec![1]);
    }
}
