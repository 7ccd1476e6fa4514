use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use tokio::sync::broadcast;

use cascade_core::events::SequenceEvent;
use cascade_engine::{ModelLineup, Sequencer};
use cascade_llm::ChatCompletionsGenerator;
use cascade_store::SessionStore;
use cascade_telemetry::{init_telemetry, TelemetryConfig};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Parser)]
#[command(name = "cascade", about = "Sequential multi-model chat server")]
struct Args {
    /// Listen port. Falls back to CASCADE_PORT, then 9800.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_telemetry(&TelemetryConfig::default());

    tracing::info!("starting cascade server");

    let lineup = ModelLineup::from_env();
    anyhow::ensure!(!lineup.is_empty(), "CASCADE_MODELS resolved to an empty lineup");
    tracing::info!(
        models = ?lineup.models.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        "model lineup loaded"
    );

    let api_base =
        std::env::var("CASCADE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
    let api_key = SecretString::from(
        std::env::var("CASCADE_API_KEY").context("CASCADE_API_KEY is not set")?,
    );
    let generator = Arc::new(
        ChatCompletionsGenerator::new(api_base, api_key)
            .context("failed to build HTTP generator")?,
    );

    let store = Arc::new(SessionStore::new());
    let (event_tx, _) = broadcast::channel::<SequenceEvent>(1024);

    let sequencer = Arc::new(Sequencer::new(
        generator,
        Arc::clone(&store),
        event_tx.clone(),
        lineup,
    ));

    let port = args
        .port
        .or_else(|| {
            std::env::var("CASCADE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
        })
        .unwrap_or_else(|| cascade_server::ServerConfig::default().port);

    let config = cascade_server::ServerConfig {
        port,
        ..Default::default()
    };
    let handle = cascade_server::start(config, store, sequencer, event_tx)
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "cascade server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    Ok(())
}
