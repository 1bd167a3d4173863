//! Server errors and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inkboard_core::{BoardId, StoreError};
use inkboard_render::RenderError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Invalid board id: {0:?}")]
    InvalidBoard(String),
    #[error("Board {0} not found")]
    BoardNotFound(BoardId),
    /// The board's actor stopped, usually because its state failed to load.
    #[error("Board {0} is unavailable")]
    BoardClosed(BoardId),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Export failed: {0}")]
    Render(#[from] RenderError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidBoard(_) => StatusCode::BAD_REQUEST,
            ServerError::Render(RenderError::UnknownFormat(_) | RenderError::InvalidOptions(_)) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::BoardNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BoardClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        }
        let body = Json(serde_json::json!({ "message": self.to_string() }));
        (status, body).into_response()
    }
}
