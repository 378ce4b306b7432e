//! Minimal end-to-end pipeline: converts plain strings into events, batches
//! them, merges same-account groups into a request, and "dispatches" by
//! printing it. Run with `cargo run --example basic_pipeline -p pipeline`.

use std::sync::Arc;
use std::time::Duration;

use pipeline::{BatchConfig, DispatchError, Event, EventHandler, Identity, Method, PipelineBuilder, Request};

struct StdoutHandler;

impl EventHandler for StdoutHandler {
    fn dispatch(&self, request: &Request) -> Result<(), DispatchError> {
        println!(
            "dispatching {:?} {} with {} event(s), {} bytes",
            request.method,
            request.url,
            request.events().len(),
            request.body.len()
        );
        Ok(())
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let pipeline = PipelineBuilder::new()
        .with_transformer(|item: &String| tracing::debug!(item, "received"))
        .with_converter(|item: String| {
            Some(Event::new(
                Identity {
                    account_id: "acct-1".to_string(),
                    project_id: "proj-1".to_string(),
                },
                "visitor-1",
                serde_json::json!({ "message": item }),
            ))
        })
        .with_event_factory(|group| {
            let body = serde_json::to_vec(&group.iter().map(|e| &e.payload).collect::<Vec<_>>()).ok()?;
            Some(Request::new(Method::Post, "https://events.example.test/batch", body))
        })
        .with_event_handler(Arc::new(StdoutHandler))
        .with_batch_config(
            BatchConfig::builder()
                .max_batch_size(5)
                .max_batch_open(Duration::from_millis(500))
                .max_inflight_batches(2)
                .build()
                .expect("valid batch config"),
        )
        .build()
        .expect("pipeline builds with all required collaborators configured");

    pipeline.start();
    for i in 0..12 {
        pipeline.process(format!("event-{i}"));
    }
    pipeline.flush();
    let drained = pipeline.stop(Duration::from_secs(5));
    println!("drained cleanly: {drained}");
}
