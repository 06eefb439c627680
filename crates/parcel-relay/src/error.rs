//! Error types for the relay server and client.

use thiserror::Error;

/// Errors returned by relay server handlers and the relay client.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No upload exists with the given id.
    #[error("upload not found: {0}")]
    UploadNotFound(uuid::Uuid),

    /// The upload existed but has expired and was reaped.
    #[error("upload expired: {0}")]
    UploadExpired(uuid::Uuid),

    /// No PIN session exists, or it expired / was cancelled.
    #[error("pin not found or expired: {0:06}")]
    PinNotFound(u32),

    /// Every 6-digit code is currently in use (practically unreachable).
    #[error("no pin codes available")]
    PinSpaceExhausted,

    /// The requested byte range could not be satisfied.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Underlying file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Request body or query parameters were malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The client-side HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server returned a non-success status the client was not expecting.
    #[error("unexpected server response: {0}")]
    UnexpectedStatus(http::StatusCode),
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
