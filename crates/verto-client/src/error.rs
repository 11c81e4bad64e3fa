//! Client error types.

use thiserror::Error;

use verto_protocol::{ErrorObject, ProtocolError};

use crate::negotiator::NegotiationError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with an error object.
    #[error("server error: {0}")]
    Rpc(#[from] ErrorObject),

    /// Protocol/framing error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,

    /// The request was dropped from the pending table before any reply.
    #[error("request abandoned before a reply arrived")]
    Abandoned,

    /// The media negotiator rejected an operation.
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// No call is registered under this id.
    #[error("unknown call: {0}")]
    UnknownCall(String),
}

impl ClientError {
    /// Returns the server error object if this is a server error.
    pub fn as_rpc(&self) -> Option<&ErrorObject> {
        match self {
            Self::Rpc(error) => Some(error),
            _ => None,
        }
    }
}
