//! Verto signaling client.
//!
//! A [`Session`] logs in to a Verto server over a reconnecting JSON-RPC
//! WebSocket ([`JsonRpcClient`]) and tracks the [`Call`]s placed or received
//! on it. Session descriptions are produced by a [`MediaNegotiator`]
//! supplied by the embedding application, raced against a gathering timeout
//! by a [`NegotiationEngine`].
//!
//! This crate also provides the `verto` command-line interface.

pub mod call;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod negotiation;
pub mod negotiator;
pub mod secret;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use call::{Call, CallEvent, CallOptions, Direction};
pub use cli::Cli;
pub use error::{ClientError, ClientResult};
pub use negotiation::{NegotiationEngine, NegotiationEvent, NegotiationOptions, NegotiationState};
pub use negotiator::{
    GatheringState, MediaNegotiator, MediaTrack, NegotiationError, NegotiatorEvent,
    NegotiatorFactory, RtcConfig, SdpKind, SessionDescription, SignalingOnly, TrackKind,
};
pub use session::{Session, SessionEvent, SessionOptions};
pub use transport::{
    ConnectionState, JsonRpcClient, ReconnectPolicy, ReconnectRequest, TransportOptions,
};

/// Error object carried by a failed server reply.
pub type RpcError = verto_protocol::ErrorObject;
