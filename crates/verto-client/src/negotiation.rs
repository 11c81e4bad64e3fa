//! Per-call negotiation state machine.
//!
//! The engine drives one [`MediaNegotiator`] through the offer/answer
//! exchange and decides when the local description is ready to be signaled.
//! Gathering candidates can take a long time, so the first of two triggers
//! wins:
//!
//! ```text
//!            build starts             gathering complete
//!   Idle ───────────────► Gathering ─────────────────────► Sent
//!                             │        or timer elapsed      ▲
//!                             └──────────────────────────────┘
//! ```
//!
//! `Sent` is terminal: the losing trigger, and any later one, is a no-op.
//! If the timer elapses before the local description has been set, the send
//! happens as soon as it is.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use verto_core::{EventBus, Topic};

use crate::negotiator::{
    GatheringState, MediaNegotiator, MediaTrack, NegotiationError, NegotiatorEvent,
    NegotiatorFactory, RtcConfig, SdpKind, SessionDescription,
};

/// Default time allowed for candidate gathering.
pub const DEFAULT_GATHERING_TIMEOUT: Duration = Duration::from_millis(3000);

/// Options for negotiation engines.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationOptions {
    /// Upper bound on waiting for gathering to complete.
    pub gathering_timeout: Duration,
    /// Configuration handed to each negotiator.
    pub rtc: RtcConfig,
}

impl Default for NegotiationOptions {
    fn default() -> Self {
        Self {
            gathering_timeout: DEFAULT_GATHERING_TIMEOUT,
            rtc: RtcConfig::default(),
        }
    }
}

impl NegotiationOptions {
    /// Builder: set the gathering timeout.
    pub fn with_gathering_timeout(mut self, timeout: Duration) -> Self {
        self.gathering_timeout = timeout;
        self
    }

    /// Builder: set the ICE server URLs.
    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        self.rtc.ice_servers = servers;
        self
    }

    /// Builder: set the candidate pool size.
    pub fn with_candidate_pool_size(mut self, size: u8) -> Self {
        self.rtc.ice_candidate_pool_size = size;
        self
    }
}

/// Which side initiated the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

/// Negotiation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Gathering,
    Sent,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Gathering => "gathering",
            Self::Sent => "sent",
        }
    }
}

/// Events published by a [`NegotiationEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationEvent {
    /// The local offer is ready to be signaled.
    SendOffer(SessionDescription),
    /// The local answer is ready to be signaled.
    SendAnswer(SessionDescription),
    /// The remote answer has been applied.
    Answer(SessionDescription),
    /// A remote description was applied outside the initial exchange.
    Media(SessionDescription),
    /// A remote track arrived.
    Track(MediaTrack),
    /// Building or applying a description failed.
    NegotiationFailed(String),
}

impl NegotiationEvent {
    /// Every topic an engine publishes on.
    pub const TOPICS: [&'static str; 6] = [
        "send-offer",
        "send-answer",
        "answer",
        "media",
        "track",
        "negotiation-failed",
    ];
}

impl Topic for NegotiationEvent {
    fn topic(&self) -> &'static str {
        match self {
            Self::SendOffer(_) => "send-offer",
            Self::SendAnswer(_) => "send-answer",
            Self::Answer(_) => "answer",
            Self::Media(_) => "media",
            Self::Track(_) => "track",
            Self::NegotiationFailed(_) => "negotiation-failed",
        }
    }
}

#[derive(Debug)]
struct Race {
    state: NegotiationState,
    building: Option<SdpKind>,
    local_ready: bool,
    deferred: bool,
    timer: Option<AbortHandle>,
    remote_offer: Option<SessionDescription>,
}

impl Race {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Shared {
    negotiator: Arc<dyn MediaNegotiator>,
    options: NegotiationOptions,
    direction: Direction,
    events: EventBus<NegotiationEvent>,
    race: Mutex<Race>,
}

/// Negotiation engine of one call. Cloning yields another handle to the
/// same engine.
#[derive(Clone)]
pub struct NegotiationEngine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for NegotiationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationEngine")
            .field("direction", &self.shared.direction)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl NegotiationEngine {
    /// Creates an engine around a fresh negotiator from `factory`.
    ///
    /// Spawns a task consuming the negotiator's events; it ends once the
    /// engine is dropped.
    pub fn new(
        factory: &dyn NegotiatorFactory,
        options: NegotiationOptions,
        direction: Direction,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let negotiator = factory.create(&options.rtc, tx);
        let shared = Arc::new(Shared {
            negotiator,
            options,
            direction,
            events: EventBus::new(),
            race: Mutex::new(Race {
                state: NegotiationState::Idle,
                building: None,
                local_ready: false,
                deferred: false,
                timer: None,
                remote_offer: None,
            }),
        });

        tokio::spawn(listen(Arc::downgrade(&shared), rx));
        Self { shared }
    }

    /// Returns the event bus observers subscribe to.
    pub fn events(&self) -> &EventBus<NegotiationEvent> {
        &self.shared.events
    }

    pub fn state(&self) -> NegotiationState {
        self.shared.race.lock().state
    }

    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    /// Returns the wrapped negotiator.
    pub fn negotiator(&self) -> &Arc<dyn MediaNegotiator> {
        &self.shared.negotiator
    }

    /// Adds a local track. On outgoing calls this starts the offer.
    pub async fn attach_local_track(&self, track: MediaTrack) -> Result<(), NegotiationError> {
        debug!(track = %track.id, kind = track.kind.as_str(), "attaching local track");
        self.shared
            .negotiator
            .add_local_track(track)
            .await
            .map_err(|e| self.fail("attach local track", e))
    }

    /// Stores the remote offer of an incoming call until it is answered.
    pub fn receive_remote_offer(&self, description: SessionDescription) {
        self.shared.race.lock().remote_offer = Some(description);
    }

    /// Answers the stored remote offer with `tracks`.
    ///
    /// The timer starts before the offer is applied; `send-answer` follows
    /// once gathering completes or the timer elapses.
    pub async fn produce_answer(&self, tracks: Vec<MediaTrack>) -> Result<(), NegotiationError> {
        for track in tracks {
            self.attach_local_track(track).await?;
        }

        if !self.begin(SdpKind::Answer) {
            debug!(state = self.state().as_str(), "answer already in progress");
            return Ok(());
        }
        self.start_timer();

        let offer = self.shared.race.lock().remote_offer.clone();
        let Some(offer) = offer else {
            return Err(self.fail(
                "produce answer",
                NegotiationError::Rejected("no remote offer received".into()),
            ));
        };

        let negotiator = &self.shared.negotiator;
        negotiator
            .set_remote_description(offer)
            .await
            .map_err(|e| self.fail("apply remote offer", e))?;
        let answer = negotiator
            .create_answer()
            .await
            .map_err(|e| self.fail("create answer", e))?;
        negotiator
            .set_local_description(answer)
            .await
            .map_err(|e| self.fail("apply local answer", e))?;

        self.local_set();
        Ok(())
    }

    /// Applies the remote answer of an outgoing call and emits `answer`.
    pub async fn apply_remote_answer(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.shared
            .negotiator
            .set_remote_description(description.clone())
            .await
            .map_err(|e| self.fail("apply remote answer", e))?;
        self.shared
            .events
            .dispatch(NegotiationEvent::Answer(description));
        Ok(())
    }

    /// Applies a remote description outside the initial exchange and emits
    /// `media`.
    pub async fn receive_media_update(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.shared
            .negotiator
            .set_remote_description(description.clone())
            .await
            .map_err(|e| self.fail("apply media update", e))?;
        self.shared
            .events
            .dispatch(NegotiationEvent::Media(description));
        Ok(())
    }

    async fn build_offer(&self) {
        if !self.begin(SdpKind::Offer) {
            debug!(state = self.state().as_str(), "offer already in progress");
            return;
        }

        let negotiator = &self.shared.negotiator;
        let offer = match negotiator.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                self.fail("create offer", e);
                return;
            }
        };

        self.start_timer();
        if let Err(e) = negotiator.set_local_description(offer).await {
            self.fail("apply local offer", e);
            return;
        }
        self.local_set();
    }

    /// Moves Idle to Gathering. Returns false if negotiation already started.
    fn begin(&self, kind: SdpKind) -> bool {
        let mut race = self.shared.race.lock();
        if race.state != NegotiationState::Idle {
            return false;
        }
        race.state = NegotiationState::Gathering;
        race.building = Some(kind);
        debug!(state = race.state.as_str(), "negotiation started");
        true
    }

    fn start_timer(&self) {
        let shared = Arc::downgrade(&self.shared);
        let timeout = self.shared.options.gathering_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                NegotiationEngine { shared }.on_timer();
            }
        });

        let mut race = self.shared.race.lock();
        race.cancel_timer();
        race.timer = Some(timer.abort_handle());
    }

    fn on_timer(&self) {
        let mut race = self.shared.race.lock();
        race.timer = None;
        if race.state != NegotiationState::Gathering {
            return;
        }
        debug!(
            timeout_ms = self.shared.options.gathering_timeout.as_millis() as u64,
            "gathering timer elapsed"
        );
        if race.local_ready {
            drop(race);
            self.finish();
        } else {
            race.deferred = true;
        }
    }

    fn on_gathering_complete(&self) {
        let mut race = self.shared.race.lock();
        race.cancel_timer();
        if race.state != NegotiationState::Gathering {
            return;
        }
        debug!("gathering complete");
        if race.local_ready {
            drop(race);
            self.finish();
        } else {
            race.deferred = true;
        }
    }

    fn local_set(&self) {
        let mut race = self.shared.race.lock();
        race.local_ready = true;
        let due = race.state == NegotiationState::Gathering && race.deferred;
        drop(race);
        if due {
            self.finish();
        }
    }

    /// Gathering -> Sent, emitting the current local description. Only the
    /// first caller gets past the state check.
    fn finish(&self) {
        let kind = {
            let mut race = self.shared.race.lock();
            if race.state != NegotiationState::Gathering {
                return;
            }
            race.state = NegotiationState::Sent;
            race.cancel_timer();
            race.building
        };

        let Some(description) = self.shared.negotiator.local_description() else {
            self.fail(
                "signal local description",
                NegotiationError::Rejected("no local description".into()),
            );
            return;
        };

        debug!(state = NegotiationState::Sent.as_str(), "local description ready");
        let event = match kind {
            Some(SdpKind::Answer) => NegotiationEvent::SendAnswer(description),
            _ => NegotiationEvent::SendOffer(description),
        };
        self.shared.events.dispatch(event);
    }

    fn fail(&self, context: &str, error: NegotiationError) -> NegotiationError {
        warn!(
            direction = self.shared.direction.as_str(),
            error = %error,
            "{} failed",
            context
        );
        self.shared.race.lock().cancel_timer();
        self.shared
            .events
            .dispatch(NegotiationEvent::NegotiationFailed(format!(
                "{}: {}",
                context, error
            )));
        error
    }

    async fn on_negotiator_event(&self, event: NegotiatorEvent) {
        match event {
            NegotiatorEvent::NegotiationNeeded => match self.shared.direction {
                Direction::Outgoing => self.build_offer().await,
                Direction::Incoming => debug!("ignoring negotiation-needed on incoming call"),
            },
            NegotiatorEvent::IceGatheringStateChanged(GatheringState::Complete) => {
                self.on_gathering_complete()
            }
            NegotiatorEvent::IceGatheringStateChanged(state) => {
                debug!(?state, "gathering state changed")
            }
            NegotiatorEvent::TrackReceived(track) => {
                self.shared.events.dispatch(NegotiationEvent::Track(track))
            }
        }
    }
}

async fn listen(shared: Weak<Shared>, mut events: mpsc::UnboundedReceiver<NegotiatorEvent>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        NegotiationEngine { shared }.on_negotiator_event(event).await;
    }
}
