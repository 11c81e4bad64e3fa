//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or classifying frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Failed to serialize or parse JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or unexpected `jsonrpc` marker.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// Well-formed JSON that is neither a reply nor a server message.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl ProtocolError {
    /// Creates a malformed frame error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame(reason.into())
    }
}
