//! Text-frame encoding and inbound frame classification.
//!
//! Each WebSocket text frame carries exactly one JSON object. Outbound frames
//! are produced from [`Request`] and [`Reply`] values; inbound frames are
//! classified into a [`Frame`]:
//!
//! ```text
//! has "method"            -> Frame::Notification (id kept for acknowledgement)
//! has "result" or "error" -> Frame::Reply (id must be an unsigned integer)
//! anything else           -> ProtocolError
//! ```

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{ErrorObject, Frame, Reply, ReplyOutcome, Request};
use crate::{JSONRPC_VERSION, MAX_MESSAGE_SIZE};

/// Encodes a request to a text frame.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use verto_protocol::{encode_request, Request};
///
/// let text = encode_request(&Request::new(1, "login", json!({}))).unwrap();
/// assert_eq!(text, r#"{"jsonrpc":"2.0","method":"login","params":{},"id":1}"#);
/// ```
pub fn encode_request(request: &Request) -> ProtocolResult<String> {
    encode(request)
}

/// Encodes a reply to a text frame.
pub fn encode_reply(reply: &Reply) -> ProtocolResult<String> {
    encode(reply)
}

fn encode<T: Serialize>(message: &T) -> ProtocolResult<String> {
    let text = serde_json::to_string(message)?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(text)
}

/// Classifies an inbound text frame.
///
/// # Example
///
/// ```rust
/// use verto_protocol::{decode_frame, Frame};
///
/// let frame = decode_frame(r#"{"jsonrpc":"2.0","method":"verto.bye","params":{"callID":"X"}}"#)
///     .unwrap();
/// assert!(matches!(frame, Frame::Notification { ref method, id: None, .. } if method == "verto.bye"));
/// ```
pub fn decode_frame(text: &str) -> ProtocolResult<Frame> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut object) = value else {
        return Err(ProtocolError::malformed("frame is not a JSON object"));
    };

    match object.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => return Err(ProtocolError::UnsupportedVersion(other.to_string())),
        None => return Err(ProtocolError::UnsupportedVersion("missing".to_string())),
    }

    if let Some(method) = object.remove("method") {
        let Value::String(method) = method else {
            return Err(ProtocolError::malformed("method is not a string"));
        };
        let params = match object.remove("params") {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(params) => params,
        };
        return Ok(Frame::Notification {
            method,
            params,
            id: object.remove("id").filter(|id| !id.is_null()),
        });
    }

    let id = object
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::malformed("reply without an integer id"))?;

    // `result` wins if a non-conforming server sends both.
    if object.contains_key("result") {
        let result = object.remove("result").unwrap_or(Value::Null);
        return Ok(Frame::Reply {
            id,
            outcome: ReplyOutcome::Result(result),
        });
    }

    if let Some(error) = object.remove("error") {
        // The id is known, so a bad error member still fails the call.
        let error = match serde_json::from_value::<ErrorObject>(error.clone()) {
            Ok(error) => error,
            Err(_) => ErrorObject {
                code: 0,
                message: Some(match &error {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                }),
                data: Some(error),
            },
        };
        return Ok(Frame::Reply {
            id,
            outcome: ReplyOutcome::Error(error),
        });
    }

    Err(ProtocolError::malformed("neither method, result nor error"))
}
