//! JSON-RPC 2.0 envelope types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AUTH_REQUIRED_CODE, JSONRPC_VERSION, Method};

/// A client request.
///
/// Every request carries an integer id used to correlate the server's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol marker (always "2.0").
    pub jsonrpc: String,
    /// Method name, e.g. `login` or `verto.invite`.
    pub method: String,
    /// Method parameters (always an object on the wire).
    pub params: Value,
    /// Correlation id.
    pub id: u64,
}

impl Request {
    /// Creates a request with the current protocol marker.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Returns a copy of this request carrying a different id.
    pub fn with_id(&self, id: u64) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    /// Checks if this request uses a compatible protocol version.
    pub fn is_compatible(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

/// Error object of a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message, when the server sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Additional server-supplied data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Creates an error object with a code and message.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Returns true if the server asks the client to authenticate first.
    pub fn is_auth_required(&self) -> bool {
        self.code == AUTH_REQUIRED_CODE
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} (code {})", message, self.code),
            None => write!(f, "error code {}", self.code),
        }
    }
}

impl std::error::Error for ErrorObject {}

/// Outcome carried by a reply: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyOutcome {
    /// Successful result.
    Result(Value),
    /// Failure.
    Error(ErrorObject),
}

/// A reply to a request.
///
/// The id is kept as a raw JSON value so that acknowledgements can echo
/// whatever id the server used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Protocol marker (always "2.0").
    pub jsonrpc: String,
    /// Id of the request being answered.
    pub id: Value,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
}

impl Reply {
    /// Creates a successful reply.
    pub fn result(id: impl Into<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            outcome: ReplyOutcome::Result(result),
        }
    }

    /// Creates a failed reply.
    pub fn error(id: impl Into<Value>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            outcome: ReplyOutcome::Error(error),
        }
    }
}

/// An inbound frame after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Server-initiated message. Never correlated with pending requests.
    Notification {
        /// Method name.
        method: String,
        /// Parameters (an empty object when absent).
        params: Value,
        /// Id to acknowledge, when the server sent one.
        id: Option<Value>,
    },
    /// Reply to one of our requests.
    Reply {
        /// Id of the request being answered.
        id: u64,
        /// Result or error.
        outcome: ReplyOutcome,
    },
}
