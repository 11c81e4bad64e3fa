//! Session manager: login state, the call registry and inbound dispatch.
//!
//! Server-initiated messages are forwarded from the transport to a single
//! dispatcher task and handled in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use verto_core::{EventBus, Topic, generate_guid};
use verto_protocol::{BroadcastParams, CallParams, ChannelParams, LoginParams, Method};

use crate::call::{Call, CallOptions, SharedSessid};
use crate::error::{ClientError, ClientResult};
use crate::negotiation::{Direction, NegotiationEngine, NegotiationOptions};
use crate::negotiator::{MediaTrack, NegotiatorFactory};
use crate::transport::{ConnectionState, JsonRpcClient, ReconnectRequest, TransportOptions};

/// Options for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Transport options; their credentials are used for login.
    pub transport: TransportOptions,
    /// Options for every call's negotiation engine.
    pub negotiation: NegotiationOptions,
}

impl SessionOptions {
    pub fn new(transport: TransportOptions) -> Self {
        Self {
            transport,
            negotiation: NegotiationOptions::default(),
        }
    }

    /// Builder: set negotiation options.
    pub fn with_negotiation(mut self, negotiation: NegotiationOptions) -> Self {
        self.negotiation = negotiation;
        self
    }
}

/// Events published by a [`Session`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new incoming call.
    Invite(Call),
    /// The server finished restoring the session (`verto.clientReady`).
    Ready,
    /// Parameters of a `verto.info` message.
    Info(Value),
    /// Parameters of a `verto.event` or `verto.broadcast` message.
    Broadcast(Value),
}

impl SessionEvent {
    /// Every topic a session publishes on.
    pub const TOPICS: [&'static str; 4] = ["invite", "ready", "info", "broadcast"];
}

impl Topic for SessionEvent {
    fn topic(&self) -> &'static str {
        match self {
            Self::Invite(_) => "invite",
            Self::Ready => "ready",
            Self::Info(_) => "info",
            Self::Broadcast(_) => "broadcast",
        }
    }
}

struct SessionInner {
    transport: JsonRpcClient,
    factory: Arc<dyn NegotiatorFactory>,
    negotiation: NegotiationOptions,
    credentials: LoginParams,
    calls: Mutex<HashMap<String, Call>>,
    logged_in: AtomicBool,
    sessid: SharedSessid,
    events: EventBus<SessionEvent>,
}

/// A logged-in connection to a Verto server and its calls.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("logged_in", &self.is_logged_in())
            .field("sessid", &self.sessid())
            .field("calls", &self.inner.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session. Nothing is sent until [`login`](Self::login) or
    /// another request.
    pub fn new(options: SessionOptions, factory: Arc<dyn NegotiatorFactory>) -> Self {
        let credentials = options.transport.credentials.clone().unwrap_or_default();
        let transport = JsonRpcClient::new(options.transport);

        let inner = Arc::new(SessionInner {
            transport,
            factory,
            negotiation: options.negotiation,
            credentials,
            calls: Mutex::new(HashMap::new()),
            logged_in: AtomicBool::new(false),
            sessid: Arc::new(Mutex::new(None)),
            events: EventBus::new(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        inner.transport.on_notification(move |method, params| {
            let _ = tx.send((method, params));
        });

        let weak = Arc::downgrade(&inner);
        inner.transport.on_reconnect(move || match weak.upgrade() {
            Some(inner) => Session { inner }.relogin().into_iter().collect(),
            None => Vec::new(),
        });

        tokio::spawn(dispatcher(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    /// Authenticates with the configured credentials.
    ///
    /// Resolves with the server's result; on success the session id is
    /// recorded and the session is marked logged in.
    pub async fn login(&self) -> ClientResult<Value> {
        let params = self.login_params()?;
        let result = self.inner.transport.call(Method::Login, params).await?;
        self.record_login(&result);
        Ok(result)
    }

    fn login_params(&self) -> ClientResult<Value> {
        let mut params = self.inner.credentials.clone();
        params.sessid = self.sessid();
        serde_json::to_value(&params).map_err(|e| ClientError::Protocol(e.into()))
    }

    fn record_login(&self, result: &Value) {
        let sessid = result
            .get("sessid")
            .and_then(Value::as_str)
            .map(str::to_string);

        info!(login = %self.inner.credentials.login, sessid = ?sessid, "logged in");
        if sessid.is_some() {
            *self.inner.sessid.lock() = sessid;
        }
        self.inner.logged_in.store(true, Ordering::SeqCst);
    }

    /// Builds the login sent ahead of queued requests when the transport
    /// reopens. Nothing is sent while logged out.
    fn relogin(&self) -> Option<ReconnectRequest> {
        if !self.is_logged_in() {
            return None;
        }
        let params = self
            .login_params()
            .map_err(|e| warn!(error = %e, "cannot build re-login request"))
            .ok()?;

        let (request, response) = ReconnectRequest::call(Method::Login, params);
        let session = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            match response.await {
                Ok(Ok(result)) => {
                    if let Some(inner) = session.upgrade() {
                        Session { inner }.record_login(&result);
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "re-login after reconnect failed"),
                Err(_) => debug!("re-login abandoned"),
            }
        });
        Some(request)
    }

    /// Hangs up every call, closes the transport and clears the login state.
    ///
    /// Resolves once the transport has shut down. A second logout finds no
    /// calls and a closed transport and does nothing.
    pub async fn logout(&self) {
        let calls: Vec<Call> = self.inner.calls.lock().drain().map(|(_, call)| call).collect();
        for call in calls {
            if let Err(e) = call.hangup(Map::new()) {
                debug!(call_id = %call.id(), error = %e, "bye not sent");
            }
        }

        self.inner.transport.close();
        self.inner.logged_in.store(false, Ordering::SeqCst);
        *self.inner.sessid.lock() = None;
        self.inner.transport.closed().await;
        info!("logged out");
    }

    /// Places a call to `destination` with `tracks`.
    ///
    /// The call is registered right away; `verto.invite` is sent once the
    /// offer is ready.
    pub async fn originate_call(
        &self,
        tracks: Vec<MediaTrack>,
        destination: impl Into<String>,
        options: CallOptions,
    ) -> ClientResult<Call> {
        let call = self.new_call(
            generate_guid(),
            Direction::Outgoing,
            Some(destination.into()),
            options,
        );
        info!(call_id = %call.id(), destination = ?call.destination(), "originating call");
        self.register(call.clone());

        for track in tracks {
            if let Err(e) = call.engine().attach_local_track(track).await {
                self.inner.calls.lock().remove(call.id());
                return Err(e.into());
            }
        }
        Ok(call)
    }

    /// Hangs up the registered call `call_id`.
    pub fn hangup(&self, call_id: &str, extra: Map<String, Value>) -> ClientResult<()> {
        let call = self
            .call(call_id)
            .ok_or_else(|| ClientError::UnknownCall(call_id.to_string()))?;
        call.hangup(extra)
    }

    /// Subscribes to event channels.
    pub async fn subscribe(&self, channels: Vec<String>) -> ClientResult<Value> {
        self.channel_request(Method::Subscribe, channels).await
    }

    /// Unsubscribes from event channels.
    pub async fn unsubscribe(&self, channels: Vec<String>) -> ClientResult<Value> {
        self.channel_request(Method::Unsubscribe, channels).await
    }

    async fn channel_request(&self, method: Method, channels: Vec<String>) -> ClientResult<Value> {
        let params = serde_json::to_value(ChannelParams {
            event_channel: channels,
        })
        .map_err(|e| ClientError::Protocol(e.into()))?;
        self.inner.transport.call(method, params).await
    }

    /// Publishes `data` on an event channel.
    pub async fn broadcast(&self, channel: impl Into<String>, data: Value) -> ClientResult<Value> {
        let params = serde_json::to_value(BroadcastParams {
            event_channel: channel.into(),
            data,
        })
        .map_err(|e| ClientError::Protocol(e.into()))?;
        self.inner.transport.call(Method::Broadcast, params).await
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.logged_in.load(Ordering::SeqCst)
    }

    /// Session id returned by the last successful login.
    pub fn sessid(&self) -> Option<String> {
        self.inner.sessid.lock().clone()
    }

    /// Looks up a registered call.
    pub fn call(&self, id: &str) -> Option<Call> {
        self.inner.calls.lock().get(id).cloned()
    }

    /// Returns every registered call.
    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().values().cloned().collect()
    }

    /// Returns the event bus observers subscribe to.
    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.inner.events
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.transport.connection_state()
    }

    pub fn transport(&self) -> &JsonRpcClient {
        &self.inner.transport
    }

    fn new_call(
        &self,
        id: String,
        direction: Direction,
        destination: Option<String>,
        options: CallOptions,
    ) -> Call {
        let engine = NegotiationEngine::new(
            self.inner.factory.as_ref(),
            self.inner.negotiation.clone(),
            direction,
        );
        Call::new(
            id,
            direction,
            destination,
            options,
            engine,
            self.inner.transport.clone(),
            self.inner.sessid.clone(),
        )
    }

    /// Adds a call to the registry; it leaves the registry when it emits `bye`.
    fn register(&self, call: Call) {
        let session = Arc::downgrade(&self.inner);
        let id = call.id().to_string();
        call.events().subscribe("bye", move |_| {
            if let Some(inner) = session.upgrade() {
                inner.calls.lock().remove(&id);
            }
        });
        self.inner.calls.lock().insert(call.id().to_string(), call);
    }

    async fn dispatch(&self, method: String, params: Value) {
        let Some(kind) = Method::from_name(&method) else {
            debug!(method = %method, "ignoring unknown message");
            return;
        };
        debug!(method = %method, "dispatching server message");

        match kind {
            Method::Invite => self.on_invite(params),
            Method::Answer => {
                if let Some((call, params)) = self.lookup(&method, params) {
                    call.on_remote_answer(params.sdp).await;
                }
            }
            Method::Media | Method::Attach => {
                if let Some((call, params)) = self.lookup(&method, params) {
                    match params.sdp {
                        Some(sdp) => call.on_media(sdp).await,
                        None => debug!(call_id = %call.id(), method = %method, "no sdp"),
                    }
                }
            }
            Method::Bye => {
                if let Some(params) = call_params(&method, params) {
                    let call = self.inner.calls.lock().remove(&params.call_id);
                    match call {
                        Some(call) => {
                            info!(call_id = %params.call_id, "remote hangup");
                            call.clear();
                        }
                        None => debug!(call_id = %params.call_id, "bye for unknown call"),
                    }
                }
            }
            Method::Display => {
                if let Some((call, params)) = self.lookup(&method, params) {
                    call.set_display(params.display_name, params.display_number);
                }
            }
            Method::Info => self.inner.events.dispatch(SessionEvent::Info(params)),
            Method::ClientReady => self.inner.events.dispatch(SessionEvent::Ready),
            Method::Event | Method::Broadcast => {
                self.inner.events.dispatch(SessionEvent::Broadcast(params))
            }
            _ => debug!(method = %method, "ignoring message"),
        }
    }

    fn on_invite(&self, params: Value) {
        let Some(params) = call_params(Method::Invite.as_str(), params) else {
            return;
        };
        if self.inner.calls.lock().contains_key(&params.call_id) {
            warn!(call_id = %params.call_id, "ignoring invite for a registered call");
            return;
        }

        let options = CallOptions {
            caller_id_name: params.caller_id_name,
            caller_id_number: params.caller_id_number,
            callee_id_name: params.callee_id_name,
            callee_id_number: params.callee_id_number,
        };
        let call = self.new_call(params.call_id, Direction::Incoming, None, options);
        match params.sdp {
            Some(sdp) => call.preload_offer(sdp),
            None => warn!(call_id = %call.id(), "invite without sdp"),
        }

        info!(call_id = %call.id(), caller = ?call.options().caller_id_number, "incoming call");
        self.register(call.clone());
        self.inner.events.dispatch(SessionEvent::Invite(call));
    }

    fn lookup(&self, method: &str, params: Value) -> Option<(Call, CallParams)> {
        let params = call_params(method, params)?;
        let call = self.call(&params.call_id);
        match call {
            Some(call) => Some((call, params)),
            None => {
                debug!(call_id = %params.call_id, method = %method, "message for unknown call");
                None
            }
        }
    }
}

fn call_params(method: &str, params: Value) -> Option<CallParams> {
    serde_json::from_value(params)
        .map_err(|e| debug!(method = %method, error = %e, "invalid call parameters"))
        .ok()
}

async fn dispatcher(session: Weak<SessionInner>, mut messages: mpsc::UnboundedReceiver<(String, Value)>) {
    while let Some((method, params)) = messages.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        Session { inner }.dispatch(method, params).await;
    }
}
