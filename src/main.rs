//! storyloom - session engine for LLM-narrated interactive fiction
//!
//! Owns each player's game state, serializes their commands, and calls an
//! external text-generation backend for narration.

mod api;
mod config;
mod db;
mod llm;
mod parser;
mod prompt;
mod runtime;
mod state_machine;
mod world;

use api::{create_router, AppState};
use config::EngineConfig;
use db::Database;
use llm::{LoggingService, NarrativeService, OllamaService};
use runtime::{DatabaseSnapshotStore, ServiceNarrativeClient, SessionRegistry};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle sessions are looked for
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyloom=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = EngineConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize database
    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    // Generation backend
    let backend: Arc<dyn NarrativeService> = Arc::new(OllamaService::new(&config.generation)?);
    let service: Arc<dyn NarrativeService> = Arc::new(LoggingService::new(backend));
    tracing::info!(
        base_url = %config.generation.base_url,
        model = %config.generation.model,
        timeout_ms = %config.generation.timeout.as_millis(),
        max_retries = config.generation.retry.max_retries,
        "Generation backend configured"
    );

    // Session registry
    let registry = Arc::new(SessionRegistry::new(
        ServiceNarrativeClient::new(service),
        DatabaseSnapshotStore::new(db),
        config.generation.clone(),
        config.session.clone(),
    ));
    let sweeper = registry.spawn_idle_sweeper(IDLE_SWEEP_INTERVAL);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(registry.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("storyloom server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Save every live session before exiting
    sweeper.cancel();
    registry.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
