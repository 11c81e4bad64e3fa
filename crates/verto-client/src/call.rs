//! A single call and its call-control operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use verto_core::{EventBus, Topic};
use verto_protocol::{
    ByeParams, DialogParams, DtmfParams, HoldAction, Method, ModifyParams, ModifyResult,
    SdpParams,
};

use crate::error::{ClientError, ClientResult};
use crate::negotiation::{NegotiationEngine, NegotiationEvent, NegotiationState};
use crate::negotiator::{MediaTrack, SessionDescription};
use crate::transport::JsonRpcClient;

pub use crate::negotiation::Direction;

/// Session id shared by a session and its calls, read when a call signals.
pub(crate) type SharedSessid = Arc<Mutex<Option<String>>>;

/// Caller and callee identity of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub caller_id_name: Option<String>,
    pub caller_id_number: Option<String>,
    pub callee_id_name: Option<String>,
    pub callee_id_number: Option<String>,
}

impl CallOptions {
    /// Builder: set the caller identity.
    pub fn with_caller(mut self, name: impl Into<String>, number: impl Into<String>) -> Self {
        self.caller_id_name = Some(name.into());
        self.caller_id_number = Some(number.into());
        self
    }

    /// Builder: set the callee identity.
    pub fn with_callee(mut self, name: impl Into<String>, number: impl Into<String>) -> Self {
        self.callee_id_name = Some(name.into());
        self.callee_id_number = Some(number.into());
        self
    }
}

/// Events published by a [`Call`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// The remote side answered.
    Answer,
    /// A remote description was applied mid-call.
    Media,
    /// A remote track arrived.
    Track(MediaTrack),
    /// The server reports the call as held.
    Hold,
    /// The server reports the call as active.
    Unhold,
    /// The call ended.
    Bye,
    /// The remote display identity changed.
    Display {
        name: Option<String>,
        number: Option<String>,
    },
    /// Negotiation failed.
    NegotiationFailed(String),
}

impl CallEvent {
    /// Every topic a call publishes on.
    pub const TOPICS: [&'static str; 8] = [
        "answer",
        "media",
        "track",
        "hold",
        "unhold",
        "bye",
        "display",
        "negotiation-failed",
    ];
}

impl Topic for CallEvent {
    fn topic(&self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::Media => "media",
            Self::Track(_) => "track",
            Self::Hold => "hold",
            Self::Unhold => "unhold",
            Self::Bye => "bye",
            Self::Display { .. } => "display",
            Self::NegotiationFailed(_) => "negotiation-failed",
        }
    }
}

struct CallInner {
    id: String,
    direction: Direction,
    destination: Option<String>,
    engine: NegotiationEngine,
    transport: JsonRpcClient,
    sessid: SharedSessid,
    options: Mutex<CallOptions>,
    held: AtomicBool,
    events: EventBus<CallEvent>,
}

/// Handle to a call. Cloning yields another handle to the same call.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .field("destination", &self.inner.destination)
            .field("held", &self.is_held())
            .finish_non_exhaustive()
    }
}

impl Call {
    pub(crate) fn new(
        id: String,
        direction: Direction,
        destination: Option<String>,
        options: CallOptions,
        engine: NegotiationEngine,
        transport: JsonRpcClient,
        sessid: SharedSessid,
    ) -> Self {
        let call = Self {
            inner: Arc::new(CallInner {
                id,
                direction,
                destination,
                engine,
                transport,
                sessid,
                options: Mutex::new(options),
                held: AtomicBool::new(false),
                events: EventBus::new(),
            }),
        };
        call.wire_engine();
        call
    }

    /// Connects engine events to signaling and to the call's own bus.
    fn wire_engine(&self) {
        let engine_events = self.inner.engine.events();
        for topic in NegotiationEvent::TOPICS {
            let call = Arc::downgrade(&self.inner);
            engine_events.subscribe(topic, move |event: &NegotiationEvent| {
                if let Some(inner) = call.upgrade() {
                    Call { inner }.on_engine_event(event);
                }
            });
        }
    }

    fn on_engine_event(&self, event: &NegotiationEvent) {
        match event {
            NegotiationEvent::SendOffer(description) => self.signal(Method::Invite, description),
            NegotiationEvent::SendAnswer(description) => self.signal(Method::Answer, description),
            NegotiationEvent::Answer(_) => self.inner.events.dispatch(CallEvent::Answer),
            NegotiationEvent::Media(_) => self.inner.events.dispatch(CallEvent::Media),
            NegotiationEvent::Track(track) => {
                self.inner.events.dispatch(CallEvent::Track(track.clone()))
            }
            NegotiationEvent::NegotiationFailed(reason) => self
                .inner
                .events
                .dispatch(CallEvent::NegotiationFailed(reason.clone())),
        }
    }

    /// Sends the local description as `verto.invite` or `verto.answer`.
    fn signal(&self, method: Method, description: &SessionDescription) {
        let params = SdpParams {
            dialog_params: self.dialog_params(),
            sdp: description.sdp.clone(),
            sessid: self.inner.sessid.lock().clone(),
        };
        let Some(params) = to_params(&params) else {
            return;
        };

        info!(call_id = %self.inner.id, method = %method, "signaling local description");
        let transport = self.inner.transport.clone();
        let call_id = self.inner.id.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.call(method, params).await {
                warn!(call_id = %call_id, method = %method, error = %e, "signaling failed");
            }
        });
    }

    fn dialog_params(&self) -> DialogParams {
        let options = self.inner.options.lock();
        DialogParams {
            call_id: self.inner.id.clone(),
            destination_number: self.inner.destination.clone(),
            caller_id_name: options.caller_id_name.clone(),
            caller_id_number: options.caller_id_number.clone(),
            callee_id_name: options.callee_id_name.clone(),
            callee_id_number: options.callee_id_number.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Destination number of an outgoing call.
    pub fn destination(&self) -> Option<&str> {
        self.inner.destination.as_deref()
    }

    /// Caller/callee identity, including display updates.
    pub fn options(&self) -> CallOptions {
        self.inner.options.lock().clone()
    }

    pub fn is_held(&self) -> bool {
        self.inner.held.load(Ordering::SeqCst)
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.inner.engine.state()
    }

    pub fn engine(&self) -> &NegotiationEngine {
        &self.inner.engine
    }

    /// Returns the event bus observers subscribe to.
    pub fn events(&self) -> &EventBus<CallEvent> {
        &self.inner.events
    }

    /// Answers an incoming call with `tracks`.
    pub async fn answer(&self, tracks: Vec<MediaTrack>) -> ClientResult<()> {
        debug!(call_id = %self.inner.id, tracks = tracks.len(), "answering");
        self.inner.engine.produce_answer(tracks).await?;
        Ok(())
    }

    /// Ends the call: sends `verto.bye` (with `extra` merged into the params)
    /// and emits `bye`.
    ///
    /// The bye is not awaited; `bye` is emitted even if it cannot be sent.
    pub fn hangup(&self, extra: Map<String, Value>) -> ClientResult<()> {
        info!(call_id = %self.inner.id, "hanging up");
        let params = ByeParams {
            dialog_params: DialogParams::new(self.inner.id.clone()),
            extra,
        };
        let sent = match to_params(&params) {
            Some(params) => self.inner.transport.send(Method::Bye, params),
            None => Ok(()),
        };
        self.clear();
        sent
    }

    /// Sends DTMF digits.
    pub async fn dtmf(&self, digits: &str) -> ClientResult<()> {
        let params = DtmfParams {
            dialog_params: DialogParams::new(self.inner.id.clone()),
            dtmf: digits.to_string(),
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| ClientError::Protocol(e.into()))?;
        self.inner.transport.call(Method::Info, params).await?;
        Ok(())
    }

    /// Puts the call on hold. Returns the hold status after the reply.
    pub async fn hold(&self) -> ClientResult<bool> {
        self.modify(HoldAction::Hold).await
    }

    /// Resumes the call. Returns the hold status after the reply.
    pub async fn unhold(&self) -> ClientResult<bool> {
        self.modify(HoldAction::Unhold).await
    }

    /// Flips the hold state. Returns the hold status after the reply.
    pub async fn toggle_hold(&self) -> ClientResult<bool> {
        self.modify(HoldAction::Toggle).await
    }

    /// Sends `verto.modify`. The hold status follows the `holdState` the
    /// server reports, not the requested action.
    async fn modify(&self, action: HoldAction) -> ClientResult<bool> {
        let params = ModifyParams {
            action,
            dialog_params: DialogParams::new(self.inner.id.clone()),
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| ClientError::Protocol(e.into()))?;
        let result = self.inner.transport.call(Method::Modify, params).await?;

        let reply: ModifyResult = serde_json::from_value(result).unwrap_or_default();
        match reply.is_held() {
            Some(true) => {
                self.inner.held.store(true, Ordering::SeqCst);
                self.inner.events.dispatch(CallEvent::Hold);
            }
            Some(false) => {
                self.inner.held.store(false, Ordering::SeqCst);
                self.inner.events.dispatch(CallEvent::Unhold);
            }
            None => debug!(call_id = %self.inner.id, ?action, "modify reply without hold state"),
        }
        Ok(self.is_held())
    }

    /// Stores the remote offer of an incoming call.
    pub(crate) fn preload_offer(&self, sdp: String) {
        self.inner
            .engine
            .receive_remote_offer(SessionDescription::offer(sdp));
    }

    /// Handles `verto.answer`. An answer without a description still
    /// signals `answer` (the media may have arrived through `verto.media`).
    pub(crate) async fn on_remote_answer(&self, sdp: Option<String>) {
        match sdp {
            Some(sdp) => {
                let _ = self
                    .inner
                    .engine
                    .apply_remote_answer(SessionDescription::answer(sdp))
                    .await;
            }
            None => self.inner.events.dispatch(CallEvent::Answer),
        }
    }

    /// Handles `verto.media` and `verto.attach`.
    pub(crate) async fn on_media(&self, sdp: String) {
        let _ = self
            .inner
            .engine
            .receive_media_update(SessionDescription::answer(sdp))
            .await;
    }

    /// Handles `verto.display`.
    pub(crate) fn set_display(&self, name: Option<String>, number: Option<String>) {
        {
            let mut options = self.inner.options.lock();
            if name.is_some() {
                options.callee_id_name = name.clone();
            }
            if number.is_some() {
                options.callee_id_number = number.clone();
            }
        }
        self.inner
            .events
            .dispatch(CallEvent::Display { name, number });
    }

    /// Emits `bye` without contacting the server.
    pub(crate) fn clear(&self) {
        self.inner.events.dispatch(CallEvent::Bye);
    }
}

fn to_params<T: Serialize>(params: &T) -> Option<Value> {
    serde_json::to_value(params)
        .map_err(|e| warn!(error = %e, "failed to encode call parameters"))
        .ok()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::negotiation::NegotiationOptions;
    use crate::negotiator::TrackKind;
    use crate::testing::{FakeFactory, ServerConnection, TestServer};
    use crate::transport::TransportOptions;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        server: TestServer,
        transport: JsonRpcClient,
        factory: FakeFactory,
        sessid: SharedSessid,
    }

    impl Fixture {
        async fn new() -> Self {
            let server = TestServer::start().await;
            let transport = JsonRpcClient::new(TransportOptions::new(server.url()));
            Self {
                server,
                transport,
                factory: FakeFactory::with_gathering(Duration::from_millis(10)),
                sessid: Arc::new(Mutex::new(Some("sess-1".to_string()))),
            }
        }

        fn call(&self, direction: Direction, destination: Option<&str>) -> Call {
            let engine = NegotiationEngine::new(
                &self.factory,
                NegotiationOptions::default(),
                direction,
            );
            Call::new(
                "call-1".to_string(),
                direction,
                destination.map(str::to_string),
                CallOptions::default().with_caller("Alice", "1001"),
                engine,
                self.transport.clone(),
                self.sessid.clone(),
            )
        }

        /// Forces the connection up so the server side can be accepted.
        async fn connect(&mut self) -> ServerConnection {
            self.transport.send("verto.info", json!({})).unwrap();
            let mut conn = self.server.accept().await;
            conn.recv_request().await;
            conn
        }
    }

    fn collect(call: &Call) -> mpsc::UnboundedReceiver<CallEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for topic in CallEvent::TOPICS {
            let tx = tx.clone();
            call.events().subscribe(topic, move |event: &CallEvent| {
                let _ = tx.send(event.clone());
            });
        }
        rx
    }

    async fn next(events: &mut mpsc::UnboundedReceiver<CallEvent>) -> CallEvent {
        timeout(WAIT, events.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn outgoing_call_sends_invite_with_gathered_offer() {
        let mut fixture = Fixture::new().await;
        let mut conn = fixture.connect().await;
        let call = fixture.call(Direction::Outgoing, Some("9664"));

        call.engine()
            .attach_local_track(MediaTrack::new("mic", TrackKind::Audio))
            .await
            .unwrap();

        let invite = conn.recv_request().await;
        assert_eq!(invite["method"], "verto.invite");
        assert_eq!(
            invite["params"],
            json!({
                "dialogParams": {
                    "callID": "call-1",
                    "destination_number": "9664",
                    "caller_id_name": "Alice",
                    "caller_id_number": "1001"
                },
                "sdp": "v=0 offer a=candidate",
                "sessid": "sess-1"
            })
        );
        assert_eq!(call.negotiation_state(), NegotiationState::Sent);
    }

    #[tokio::test]
    async fn signaling_uses_current_session_id() {
        let mut fixture = Fixture::new().await;
        let mut conn = fixture.connect().await;
        *fixture.sessid.lock() = None;
        let call = fixture.call(Direction::Outgoing, Some("9664"));

        *fixture.sessid.lock() = Some("sess-2".to_string());
        call.engine()
            .attach_local_track(MediaTrack::new("mic", TrackKind::Audio))
            .await
            .unwrap();

        let invite = conn.recv_request().await;
        assert_eq!(invite["params"]["sessid"], "sess-2");
    }

    #[tokio::test]
    async fn incoming_call_answers_preloaded_offer() {
        let mut fixture = Fixture::new().await;
        let mut conn = fixture.connect().await;
        let call = fixture.call(Direction::Incoming, None);

        call.preload_offer("v=0 remote".to_string());
        call.answer(vec![MediaTrack::new("mic", TrackKind::Audio)])
            .await
            .unwrap();

        let answer = conn.recv_request().await;
        assert_eq!(answer["method"], "verto.answer");
        assert_eq!(answer["params"]["dialogParams"]["callID"], "call-1");
        assert_eq!(answer["params"]["sdp"], "v=0 answer a=candidate");
        assert_eq!(
            fixture.factory.last().remote_descriptions(),
            vec![SessionDescription::offer("v=0 remote")]
        );
    }

    #[tokio::test]
    async fn hold_follows_reported_state() {
        let mut fixture = Fixture::new().await;
        let mut conn = fixture.connect().await;
        let call = fixture.call(Direction::Outgoing, Some("9664"));
        let mut events = collect(&call);

        let pending = tokio::spawn({
            let call = call.clone();
            async move { call.hold().await }
        });
        let request = conn.recv_request().await;
        assert_eq!(request["method"], "verto.modify");
        assert_eq!(
            request["params"],
            json!({"action": "hold", "dialogParams": {"callID": "call-1"}})
        );
        conn.reply(&request, json!({"holdState": "held"})).await;
        assert!(pending.await.unwrap().unwrap());
        assert_eq!(next(&mut events).await, CallEvent::Hold);
        assert!(call.is_held());

        // The server's report wins over the requested action.
        let pending = tokio::spawn({
            let call = call.clone();
            async move { call.toggle_hold().await }
        });
        let request = conn.recv_request().await;
        assert_eq!(request["params"]["action"], "toggleHold");
        conn.reply(&request, json!({"holdState": "active"})).await;
        assert!(!pending.await.unwrap().unwrap());
        assert_eq!(next(&mut events).await, CallEvent::Unhold);

        let pending = tokio::spawn({
            let call = call.clone();
            async move { call.unhold().await }
        });
        let request = conn.recv_request().await;
        assert_eq!(request["params"]["action"], "unhold");
        conn.reply(&request, json!({})).await;
        assert!(!pending.await.unwrap().unwrap());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn hold_error_leaves_state_untouched() {
        let mut fixture = Fixture::new().await;
        let mut conn = fixture.connect().await;
        let call = fixture.call(Direction::Outgoing, Some("9664"));

        let pending = tokio::spawn({
            let call = call.clone();
            async move { call.hold().await }
        });
        let request = conn.recv_request().await;
        conn.send_json(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": -32602, "message": "Invalid call"}
        }))
        .await;

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.as_rpc().unwrap().code, -32602);
        assert!(!call.is_held());
    }

    #[tokio::test]
    async fn hangup_sends_bye_and_emits_event() {
        let mut fixture = Fixture::new().await;
        let mut conn = fixture.connect().await;
        let call = fixture.call(Direction::Outgoing, Some("9664"));
        let mut events = collect(&call);

        let mut extra = Map::new();
        extra.insert("cause".into(), json!("NORMAL_CLEARING"));
        call.hangup(extra).unwrap();

        assert_eq!(next(&mut events).await, CallEvent::Bye);
        let bye = conn.recv_request().await;
        assert_eq!(bye["method"], "verto.bye");
        assert_eq!(
            bye["params"],
            json!({"dialogParams": {"callID": "call-1"}, "cause": "NORMAL_CLEARING"})
        );
    }

    #[tokio::test]
    async fn dtmf_sends_info() {
        let mut fixture = Fixture::new().await;
        let mut conn = fixture.connect().await;
        let call = fixture.call(Direction::Outgoing, Some("9664"));

        let pending = tokio::spawn({
            let call = call.clone();
            async move { call.dtmf("12#").await }
        });
        let request = conn.recv_request().await;
        assert_eq!(request["method"], "verto.info");
        assert_eq!(
            request["params"],
            json!({"dialogParams": {"callID": "call-1"}, "dtmf": "12#"})
        );
        conn.reply(&request, json!({})).await;
        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn remote_answer_with_and_without_description() {
        let fixture = Fixture::new().await;
        let call = fixture.call(Direction::Outgoing, Some("9664"));
        let mut events = collect(&call);

        call.on_remote_answer(Some("v=0 remote".into())).await;
        assert_eq!(next(&mut events).await, CallEvent::Answer);
        assert_eq!(
            fixture.factory.last().remote_descriptions(),
            vec![SessionDescription::answer("v=0 remote")]
        );

        call.on_remote_answer(None).await;
        assert_eq!(next(&mut events).await, CallEvent::Answer);

        call.on_media("v=0 update".into()).await;
        assert_eq!(next(&mut events).await, CallEvent::Media);
    }

    #[tokio::test]
    async fn display_updates_callee_identity() {
        let fixture = Fixture::new().await;
        let call = fixture.call(Direction::Outgoing, Some("9664"));
        let mut events = collect(&call);

        call.set_display(Some("Bob".into()), Some("1002".into()));

        assert_eq!(
            next(&mut events).await,
            CallEvent::Display {
                name: Some("Bob".into()),
                number: Some("1002".into())
            }
        );
        let options = call.options();
        assert_eq!(options.callee_id_name.as_deref(), Some("Bob"));
        assert_eq!(options.caller_id_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn negotiation_failure_reaches_call_observers() {
        let server = TestServer::start().await;
        let factory = FakeFactory::never_completing().failing_remote();
        let engine = NegotiationEngine::new(
            &factory,
            NegotiationOptions::default(),
            Direction::Outgoing,
        );
        let call = Call::new(
            "call-2".into(),
            Direction::Outgoing,
            Some("9664".into()),
            CallOptions::default(),
            engine,
            JsonRpcClient::new(TransportOptions::new(server.url())),
            Arc::new(Mutex::new(None)),
        );
        let mut events = collect(&call);

        call.on_remote_answer(Some("v=0".into())).await;

        assert!(matches!(
            next(&mut events).await,
            CallEvent::NegotiationFailed(_)
        ));
    }
}
