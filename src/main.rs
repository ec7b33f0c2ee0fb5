use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use obico_guardian::{Config, InMemoryHost, Integration, TargetSelector};

/// Obico Guardian - remote print-failure detection for a single camera.
///
/// Binds one camera to an Obico ML API server, probes the server's health
/// check every interval and runs a detection pass whenever a command asks for
/// one. Every state change is logged.
///
/// # Environment Variables
///
/// Required:
/// * `OBICO_URL` - Detection endpoint, e.g. `http://obico.local:3333/detect`
/// * `CAMERA_ENTITY` - Camera entity id, e.g. `camera.printer`
/// * `CAMERA_IMAGE_URL` - Picture URL of the camera (absolute, or relative to `EXTERNAL_URL`)
///
/// Optional (with defaults):
/// * `OBICO_INTERVAL` - Health probe interval in seconds (default: "60")
/// * `OBICO_THRESHOLD` - Confidence threshold (default: "0.38")
/// * `EXTERNAL_URL` - Base URL for relative pictures (default: "http://localhost:8123")
///
/// # Commands (stdin)
///
/// * `trigger` or an empty line - run a detection pass
/// * `state` - print every entity's state as JSON
/// * `quit` - shut down
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger to output to stdout, using RUST_LOG env var or info level by default
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(log::LevelFilter::Info),
        )
        .init();

    let config = Config::load().context(
        "Failed to load configuration. Please ensure all required environment variables are set.",
    )?;

    info!("Obico Guardian starting...");
    info!("Using Obico ML API URL: {}", config.entry.url);
    info!(
        "Monitoring {} via {}",
        config.entry.camera_entity, config.camera_image_url
    );

    let host = Arc::new(InMemoryHost::new(config.external_url.clone()));
    host.set_camera(&config.entry.camera_entity, &config.camera_image_url);

    let integration = Integration::new(host);
    let entry = integration.new_entry(config.entry.clone()).await?;
    let entry_id = entry.entry_id.clone();
    let coordinator = integration.setup_entry(entry, &HashMap::new()).await?;
    let entities = integration
        .entities(&entry_id)
        .await
        .context("Entry vanished right after setup")?;

    let mut updates = coordinator.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            info!(
                "API connected: {}, failure detected: {}, confidence: {:.2}%, inference: {}ms, provider: {}, last run: {}",
                state.api_connected,
                state.error_detected,
                state.avg_confidence,
                state.inference_ms,
                state.provider,
                state.last_run().as_deref().unwrap_or("never")
            );
        }
    });

    info!("Obico Guardian ready. Type 'trigger' to run a detection, 'state' to print entities, 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(command) = line? else {
                    stdin_open = false;
                    continue;
                };
                match command.trim() {
                    "" | "trigger" => {
                        for (entry_id, outcome) in integration.trigger_detection(&TargetSelector::default()).await {
                            info!("Detection on {}: {:?}", entry_id, outcome);
                        }
                    }
                    "state" => {
                        let rendered = Value::Object(entities.render());
                        println!("{}", serde_json::to_string_pretty(&rendered)?);
                    }
                    "quit" | "exit" => break,
                    other => warn!("Unknown command '{}'", other),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Cannot listen for Ctrl-C")?;
                info!("Interrupted");
                break;
            }
        }
    }

    integration.shutdown().await;
    info!("Obico Guardian stopped");
    Ok(())
}
