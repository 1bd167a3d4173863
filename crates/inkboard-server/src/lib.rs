//! Inkboard collaboration server.
//!
//! Sessions connect over WebSocket at `/ws` and exchange JSON messages
//! (see [`inkboard_core::protocol`]):
//! ```json
//! { "type": "join", "board": "team", "session": "<uuid>" }
//! { "type": "submit", "mutation": { "session": "<uuid>", "local_seq": 1, "op": { ... } } }
//! { "type": "presence", "presence": { "cursor": { "x": 100, "y": 200 } } }
//! ```
//!
//! Every board is owned by one task that assigns commit sequence numbers.
//! Boards can also be exported over HTTP at
//! `/boards/{board}/export/{format}` as SVG, PNG or JSON.

pub mod board;
pub mod config;
pub mod error;
pub mod presence;
pub mod registry;
pub mod socket;

use axum::{
    Json, Router,
    extract::{Path, Query, State, ws::WebSocketUpgrade},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use board::SharedStore;
use bytes::Bytes;
use config::ServerConfig;
use error::ServerError;
use inkboard_core::BoardId;
use inkboard_render::{ExportFormat, ExportOptions};
use registry::BoardRegistry;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Shared application state
pub struct AppState {
    pub registry: BoardRegistry,
}

impl AppState {
    pub fn new(config: ServerConfig, store: SharedStore) -> Arc<Self> {
        Arc::new(Self {
            registry: BoardRegistry::new(store, config),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        self.registry.config()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/boards", get(list_boards))
        .route("/boards/{board}/export/{format}", get(export_board))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically clear presence of sessions that went quiet.
pub fn spawn_presence_pruner(state: Arc<AppState>) -> JoinHandle<()> {
    let period = state.config().presence_timeout / 2;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let pruned = state.registry.prune_presence();
            if pruned > 0 {
                debug!("Cleared {} stale presence records", pruned);
            }
        }
    })
}

/// Index page
async fn index() -> &'static str {
    "Inkboard Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// Boards with at least one connected session
async fn list_boards(State(state): State<Arc<AppState>>) -> Json<Vec<BoardId>> {
    Json(state.registry.active())
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket::handle_socket(socket, state))
}

#[derive(Debug, Default, Deserialize)]
struct ExportQuery {
    scale: Option<f64>,
    padding: Option<f64>,
}

async fn export_board(
    Path((board, format)): Path<(String, String)>,
    Query(query): Query<ExportQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ServerError> {
    let format: ExportFormat = format.parse()?;
    let board = BoardId::new(board);
    let snapshot = state.registry.snapshot(&board).await?;

    let mut options = ExportOptions::default();
    if let Some(scale) = query.scale {
        options = options.with_scale(scale);
    }
    if let Some(padding) = query.padding {
        options = options.with_padding(padding);
    }

    let body = tokio::task::spawn_blocking(move || {
        inkboard_render::render_with(&snapshot, format, &options)
    })
    .await??;
    debug!("Exported {} as {} ({} bytes)", board, format, body.len());

    Ok(([(header::CONTENT_TYPE, format.mime_type())], Bytes::from(body)).into_response())
}
