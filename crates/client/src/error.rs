//! Upload error types.

use upwire_protocol::{ApiError, RangeError};
use upwire_source::SourceError;

use crate::transport::TransportError;

/// Errors produced by an upload session.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Rejected at construction: empty method, bad chunk size, missing base URL.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport failure that survived the retry layer.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The server violated the protocol: missing `Location`, malformed
    /// `Range`, a cursor outside the resendable window.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Structured server error document from a 4xx response.
    #[error("server error: {0}")]
    Api(ApiError),

    /// Non-success response without a decodable error document.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("cancelled")]
    Cancelled,
}

impl From<TransportError> for UploadError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => UploadError::Cancelled,
            other => UploadError::Transport(other),
        }
    }
}

impl From<SourceError> for UploadError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Io(e) => UploadError::Io(e),
            SourceError::Cancelled => UploadError::Cancelled,
            desync @ SourceError::AckOutOfWindow { .. } => {
                UploadError::Protocol(desync.to_string())
            }
        }
    }
}

impl From<RangeError> for UploadError {
    fn from(err: RangeError) -> Self {
        UploadError::Protocol(err.to_string())
    }
}
