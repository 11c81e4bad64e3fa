//! Interface to the media-negotiation engine.
//!
//! The client never builds session descriptions itself. A
//! [`MediaNegotiator`] (typically a WebRTC peer connection) does that, and
//! reports asynchronous happenings through the [`NegotiatorEvent`] channel
//! handed to it by a [`NegotiatorFactory`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error returned by a negotiator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// The negotiator cannot perform this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The negotiator rejected a description or track.
    #[error("{0}")]
    Rejected(String),
}

/// Whether a description is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// An opaque media track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Candidate gathering progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

/// Asynchronous signals from a negotiator.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiatorEvent {
    /// A remote track became available.
    TrackReceived(MediaTrack),
    /// Local tracks changed and an offer should be built.
    NegotiationNeeded,
    /// Candidate gathering progressed.
    IceGatheringStateChanged(GatheringState),
}

/// ICE configuration handed to new negotiators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfig {
    /// STUN/TURN server URLs.
    pub ice_servers: Vec<String>,
    /// Number of candidates to pre-gather.
    pub ice_candidate_pool_size: u8,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            ice_candidate_pool_size: 1,
        }
    }
}

/// Builds and applies session descriptions for one call.
#[async_trait]
pub trait MediaNegotiator: Send + Sync {
    /// Adds a local track. The negotiator signals
    /// [`NegotiatorEvent::NegotiationNeeded`] when an offer is due.
    async fn add_local_track(&self, track: MediaTrack) -> Result<(), NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    /// Applies a local description; gathering starts here.
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    /// Current local description, including candidates gathered so far.
    fn local_description(&self) -> Option<SessionDescription>;
}

/// Creates one negotiator per call.
pub trait NegotiatorFactory: Send + Sync {
    fn create(
        &self,
        config: &RtcConfig,
        events: mpsc::UnboundedSender<NegotiatorEvent>,
    ) -> Arc<dyn MediaNegotiator>;
}

impl<F> NegotiatorFactory for F
where
    F: Fn(&RtcConfig, mpsc::UnboundedSender<NegotiatorEvent>) -> Arc<dyn MediaNegotiator>
        + Send
        + Sync,
{
    fn create(
        &self,
        config: &RtcConfig,
        events: mpsc::UnboundedSender<NegotiatorEvent>,
    ) -> Arc<dyn MediaNegotiator> {
        self(config, events)
    }
}

/// Negotiator for endpoints without a media engine.
///
/// Every description operation fails with [`NegotiationError::Unsupported`],
/// so such an endpoint can log in, receive invites and hang up, but not
/// answer or place calls.
#[derive(Default)]
pub struct SignalingOnly;

impl fmt::Debug for SignalingOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignalingOnly")
    }
}

impl SignalingOnly {
    /// Factory producing [`SignalingOnly`] negotiators.
    pub fn factory() -> Arc<dyn NegotiatorFactory> {
        Arc::new(
            |_: &RtcConfig, _: mpsc::UnboundedSender<NegotiatorEvent>| -> Arc<dyn MediaNegotiator> {
                Arc::new(SignalingOnly)
            },
        )
    }
}

#[async_trait]
impl MediaNegotiator for SignalingOnly {
    async fn add_local_track(&self, _track: MediaTrack) -> Result<(), NegotiationError> {
        Err(NegotiationError::Unsupported("add_local_track"))
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        Err(NegotiationError::Unsupported("create_offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        Err(NegotiationError::Unsupported("create_answer"))
    }

    async fn set_local_description(
        &self,
        _description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        Err(NegotiationError::Unsupported("set_local_description"))
    }

    async fn set_remote_description(
        &self,
        _description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        Err(NegotiationError::Unsupported("set_remote_description"))
    }

    fn local_description(&self) -> Option<SessionDescription> {
        None
    }
}
