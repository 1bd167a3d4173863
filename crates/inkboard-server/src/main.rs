//! Inkboard collaboration server.
//!
//! Configured through `INKBOARD_ADDR`, `INKBOARD_DATA_DIR`,
//! `INKBOARD_PRESENCE_TIMEOUT_SECS` and `INKBOARD_CHANNEL_CAPACITY`.

use inkboard_core::FileBoardStore;
use inkboard_server::config::ServerConfig;
use inkboard_server::error::ServerError;
use inkboard_server::{AppState, router, spawn_presence_pruner};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkboard_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let store = match &config.data_dir {
        Some(dir) => FileBoardStore::new(dir.clone())?,
        None => FileBoardStore::default_location()?,
    };
    info!("Storing boards in {}", store.base_path().display());

    let addr = config.addr;
    let state = AppState::new(config, Arc::new(store));
    let pruner = spawn_presence_pruner(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Inkboard server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pruner.abort();
    info!("Checkpointing {} active boards", state.registry.len());
    state.registry.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
