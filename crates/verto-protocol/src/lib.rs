//! JSON-RPC 2.0 framing and Verto message types.
//!
//! This crate defines the wire format spoken between the verto client and a
//! Verto call-control server over a WebSocket.
//!
//! # Protocol Overview
//!
//! Every WebSocket text frame carries one JSON-RPC 2.0 object:
//! - request: `{"jsonrpc":"2.0","method":..,"params":{..},"id":N}`
//! - reply: `{"jsonrpc":"2.0","id":N,"result":{..}}` or `{..,"error":{"code":..}}`
//! - server-initiated message: `{"jsonrpc":"2.0","method":..,"params":{..}}`
//!   (optionally carrying an `id` the client acknowledges)
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use verto_protocol::{Frame, Method, Request, decode_frame, encode_request};
//!
//! let request = Request::new(1, Method::Login, json!({"login": "1000"}));
//! let text = encode_request(&request).unwrap();
//! assert!(text.contains("\"method\":\"login\""));
//!
//! let frame = decode_frame(r#"{"jsonrpc":"2.0","id":1,"result":{"sessid":"abc"}}"#).unwrap();
//! assert!(matches!(frame, Frame::Reply { id: 1, .. }));
//! ```

mod error;
mod framing;
mod method;
mod params;
mod types;


pub use error::{ProtocolError, ProtocolResult};
pub use framing::{decode_frame, encode_reply, encode_request};
pub use method::Method;
pub use params::{
    BroadcastParams, ByeParams, CallParams, ChannelParams, DialogParams, DtmfParams, HoldAction,
    LoginParams, ModifyParams, ModifyResult, SdpParams,
};
pub use types::{ErrorObject, Frame, Reply, ReplyOutcome, Request};

/// JSON-RPC version marker carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code the server returns when the session must (re-)authenticate.
pub const AUTH_REQUIRED_CODE: i64 = -32000;

/// Maximum frame size accepted or produced (1 MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
