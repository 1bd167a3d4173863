//! Export errors.

use inkboard_core::ValidationError;
use thiserror::Error;

/// Export errors.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Unknown export format: {0}")]
    UnknownFormat(String),
    #[error("Invalid export option: {0}")]
    InvalidOptions(&'static str),
    #[error("Snapshot is malformed: {0}")]
    InvalidSnapshot(#[from] ValidationError),
    #[error("Output of {width}x{height} pixels is too large")]
    TooLarge { width: u64, height: u64 },
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SVG formatting failed")]
    Format(#[from] std::fmt::Error),
}

/// Result type for export operations.
pub type RenderResult<T> = Result<T, RenderError>;
