use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daemon::config::load_config;
use pipeline::{DispatchError, Event, EventHandler, Identity, Method, PipelineBuilder, Request};

/// Demo host process wiring the pipeline crate end to end: converts plain
/// strings into events, batches/merges them, and "dispatches" by logging.
#[derive(Parser, Debug)]
#[command(name = "daemon", about = "Demo host process for the event pipeline")]
struct Cli {
    /// Path to the daemon config file (YAML). Missing files fall back to defaults.
    #[arg(long, default_value = "daemon.yaml")]
    config: String,
}

struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn dispatch(&self, request: &Request) -> Result<(), DispatchError> {
        tracing::info!(
            method = ?request.method,
            url = %request.url,
            events = request.events().len(),
            bytes = request.body.len(),
            "dispatched request"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "daemon=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    tracing::info!(?config, "daemon starting");

    let pipeline = Arc::new(
        PipelineBuilder::new()
            .with_converter(|item: String| {
                Some(Event::new(
                    Identity {
                        account_id: "demo-account".to_string(),
                        project_id: "demo-project".to_string(),
                    },
                    "demo-visitor",
                    serde_json::json!({ "message": item }),
                ))
            })
            .with_event_factory(|group| {
                let body =
                    serde_json::to_vec(&group.iter().map(|e| &e.payload).collect::<Vec<_>>()).ok()?;
                Some(Request::new(Method::Post, "https://events.example.test/batch", body))
            })
            .with_event_handler(Arc::new(LoggingEventHandler))
            .with_batch_config(config.batch.clone())
            .build()?,
    );
    pipeline.start();

    let worker_pipeline = Arc::clone(&pipeline);
    std::thread::spawn(move || {
        let mut i: u64 = 0;
        loop {
            worker_pipeline.process(format!("demo-event-{i}"));
            i += 1;
            std::thread::sleep(Duration::from_millis(100));
        }
    });

    tracing::info!("daemon running, press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining pipeline");

    if !pipeline.stop(Duration::from_secs(5)) {
        tracing::warn!("pipeline did not drain cleanly within the shutdown timeout");
    }

    Ok(())
}
