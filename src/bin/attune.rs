use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use attune::config::CoachConfig;
use attune::database::CoachDatabase;
use attune::llm::LlmClient;
use attune::server::{self, ServerState};
use attune::session::SessionRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,attune=debug")),
        )
        .init();

    tracing::info!("Attune coaching backend starting...");

    let config = CoachConfig::load();

    let db = Arc::new(
        CoachDatabase::new(&config.database_path)
            .with_context(|| format!("Failed to open database {}", config.database_path))?,
    );
    tracing::info!("Session database: {}", config.database_path);

    let model = Arc::new(LlmClient::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
    ));
    tracing::info!("LLM endpoint: {} ({})", config.llm_api_url, config.llm_model);

    let (event_tx, event_rx) = flume::unbounded();
    let (ws_tx, _) = broadcast::channel(256);
    server::spawn_event_bridge(event_rx, ws_tx.clone());

    let state = ServerState {
        config,
        db,
        registry: Arc::new(tokio::sync::Mutex::new(SessionRegistry::new())),
        model,
        events: event_tx,
        ws_events: ws_tx,
    };

    server::serve(state).await
}
