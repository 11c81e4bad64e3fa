//! Test support: an in-process Verto server and a scripted negotiator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::negotiator::{
    GatheringState, MediaNegotiator, MediaTrack, NegotiationError, NegotiatorEvent,
    NegotiatorFactory, RtcConfig, SessionDescription,
};

const WAIT: Duration = Duration::from_secs(5);

/// WebSocket server accepting any number of connections.
pub(crate) struct TestServer {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::bind("127.0.0.1:0".parse().unwrap()).await
    }

    pub async fn bind(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    if tx.send(ServerConnection { ws }).is_err() {
                        break;
                    }
                }
            }
        });

        Self { addr, connections }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn accept(&mut self) -> ServerConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("listener stopped")
    }

    pub async fn try_accept(&mut self, wait: Duration) -> Option<ServerConnection> {
        timeout(wait, self.connections.recv()).await.ok().flatten()
    }
}

/// Server side of one accepted connection.
pub(crate) struct ServerConnection {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConnection {
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let message = timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .expect("websocket error");
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Receives the next frame carrying a `method` (skips acknowledgements).
    pub async fn recv_request(&mut self) -> Value {
        loop {
            let frame = self.recv_json().await;
            if frame.get("method").is_some() {
                return frame;
            }
        }
    }

    /// Answers a request with a result.
    pub async fn reply(&mut self, request: &Value, result: Value) {
        self.send_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": result,
        }))
        .await;
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Negotiator producing canned descriptions.
///
/// Gathering completes `gathering` after a local description is set (never
/// when `None`); completion appends a candidate line to the local description.
pub(crate) struct FakeNegotiator {
    events: mpsc::UnboundedSender<NegotiatorEvent>,
    gathering: Option<Duration>,
    local_delay: Option<Duration>,
    fail_remote: bool,
    local: Arc<Mutex<Option<SessionDescription>>>,
    remote: Mutex<Vec<SessionDescription>>,
    tracks: Mutex<Vec<MediaTrack>>,
}

impl FakeNegotiator {
    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.lock().clone()
    }

    pub fn emit(&self, event: NegotiatorEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl MediaNegotiator for FakeNegotiator {
    async fn add_local_track(&self, track: MediaTrack) -> Result<(), NegotiationError> {
        self.tracks.lock().push(track);
        self.emit(NegotiatorEvent::NegotiationNeeded);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::offer("v=0 offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if let Some(delay) = self.local_delay {
            tokio::time::sleep(delay).await;
        }
        *self.local.lock() = Some(description);
        self.emit(NegotiatorEvent::IceGatheringStateChanged(
            GatheringState::Gathering,
        ));

        if let Some(delay) = self.gathering {
            let events = self.events.clone();
            let local = self.local.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(description) = local.lock().as_mut() {
                    description.sdp.push_str(" a=candidate");
                }
                let _ = events.send(NegotiatorEvent::IceGatheringStateChanged(
                    GatheringState::Complete,
                ));
            });
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if self.fail_remote {
            return Err(NegotiationError::Rejected("bad remote description".into()));
        }
        self.remote.lock().push(description);
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }
}

/// Factory handing out [`FakeNegotiator`]s and keeping them for inspection.
#[derive(Default)]
pub(crate) struct FakeFactory {
    gathering: Option<Duration>,
    local_delay: Option<Duration>,
    fail_remote: bool,
    created: Mutex<Vec<Arc<FakeNegotiator>>>,
}

impl FakeFactory {
    pub fn with_gathering(delay: Duration) -> Self {
        Self {
            gathering: Some(delay),
            ..Default::default()
        }
    }

    pub fn never_completing() -> Self {
        Self::default()
    }

    pub fn with_slow_local(mut self, delay: Duration) -> Self {
        self.local_delay = Some(delay);
        self
    }

    pub fn failing_remote(mut self) -> Self {
        self.fail_remote = true;
        self
    }

    pub fn last(&self) -> Arc<FakeNegotiator> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no negotiator created")
    }

    pub fn build(&self, events: mpsc::UnboundedSender<NegotiatorEvent>) -> Arc<FakeNegotiator> {
        let negotiator = Arc::new(FakeNegotiator {
            events,
            gathering: self.gathering,
            local_delay: self.local_delay,
            fail_remote: self.fail_remote,
            local: Arc::new(Mutex::new(None)),
            remote: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
        });
        self.created.lock().push(negotiator.clone());
        negotiator
    }
}

impl NegotiatorFactory for FakeFactory {
    fn create(
        &self,
        _config: &RtcConfig,
        events: mpsc::UnboundedSender<NegotiatorEvent>,
    ) -> Arc<dyn MediaNegotiator> {
        self.build(events)
    }
}
