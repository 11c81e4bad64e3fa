//! JSON-RPC transport over a reconnecting WebSocket.
//!
//! A [`JsonRpcClient`] is a cheap handle to a background actor task that owns
//! the socket and the request table. The actor:
//!
//! - connects lazily on the first command
//! - queues outbound frames while the socket is not open and drains them in
//!   order on every successful open, right after the requests returned by the
//!   reconnect handler (typically a re-login) went out
//! - correlates replies to pending requests by id
//! - routes server-initiated messages to the notification handler and
//!   acknowledges those that carry an id
//! - reconnects after a delay from the [`ReconnectPolicy`] whenever the
//!   socket closes, until [`JsonRpcClient::close`] is called

mod options;
mod state;

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use verto_protocol::LoginParams;

use crate::error::{ClientError, ClientResult};

pub use options::{MIN_RECONNECT_DELAY, ReconnectPolicy, TransportOptions};
use state::{FrameAction, ReplySender, RpcState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Callback for server-initiated messages: `(method, params)`.
pub type NotificationHandler = Arc<dyn Fn(String, Value) + Send + Sync>;

/// Callback invoked on every successful (re)connect. The requests it returns
/// are sent before the queue drains.
pub type ReconnectHandler = Arc<dyn Fn() -> Vec<ReconnectRequest> + Send + Sync>;

/// A request sent ahead of the outbound queue after a (re)connect.
pub struct ReconnectRequest {
    method: String,
    params: Value,
    reply: Option<ReplySender>,
}

impl ReconnectRequest {
    /// A request whose reply is delivered through the returned receiver.
    pub fn call(
        method: impl Into<String>,
        params: Value,
    ) -> (Self, oneshot::Receiver<ClientResult<Value>>) {
        let (reply, response) = oneshot::channel();
        let request = Self {
            method: method.into(),
            params,
            reply: Some(reply),
        };
        (request, response)
    }

    /// A request whose reply is not correlated.
    pub fn send(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            reply: None,
        }
    }
}

/// State of the underlying socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket (not yet used, waiting to reconnect, or closed).
    Absent,
    /// A connection attempt is in progress.
    Connecting,
    /// The socket is open.
    Open,
}

impl ConnectionState {
    /// Returns a static string for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }
}

enum Command {
    Call {
        method: String,
        params: Value,
        reply: Option<ReplySender>,
    },
    SetCredentials(Option<LoginParams>),
    Close,
}

#[derive(Default)]
struct Handlers {
    notification: Option<NotificationHandler>,
    reconnect: Option<ReconnectHandler>,
}

/// Handle to the transport actor.
#[derive(Clone)]
pub struct JsonRpcClient {
    commands: mpsc::UnboundedSender<Command>,
    handlers: Arc<Mutex<Handlers>>,
    state: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Creates the client and spawns its actor on the current tokio runtime.
    ///
    /// No connection is made until the first request.
    pub fn new(options: TransportOptions) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Absent);
        let handlers = Arc::new(Mutex::new(Handlers::default()));

        let actor = Actor {
            state: RpcState::new(options.credentials.clone()),
            options,
            commands: receiver,
            handlers: handlers.clone(),
            status: state_tx,
            failures: 0,
        };
        tokio::spawn(actor.run());

        Self {
            commands,
            handlers,
            state,
        }
    }

    /// Sends a request and waits for its reply.
    ///
    /// Resolves with the `result` value, or with [`ClientError::Rpc`] carrying
    /// the server's error object. Requests still pending when the client is
    /// closed resolve with [`ClientError::Abandoned`].
    pub async fn call(&self, method: impl Into<String>, params: Value) -> ClientResult<Value> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Call {
                method: method.into(),
                params,
                reply: Some(reply),
            })
            .map_err(|_| ClientError::Closed)?;

        response.await.map_err(|_| ClientError::Abandoned)?
    }

    /// Sends a request without waiting for (or correlating) a reply.
    pub fn send(&self, method: impl Into<String>, params: Value) -> ClientResult<()> {
        self.commands
            .send(Command::Call {
                method: method.into(),
                params,
                reply: None,
            })
            .map_err(|_| ClientError::Closed)
    }

    /// Replaces the credentials used for transparent re-authentication.
    pub fn set_credentials(&self, credentials: Option<LoginParams>) -> ClientResult<()> {
        self.commands
            .send(Command::SetCredentials(credentials))
            .map_err(|_| ClientError::Closed)
    }

    /// Installs the handler for server-initiated messages.
    pub fn on_notification<F>(&self, handler: F)
    where
        F: Fn(String, Value) + Send + Sync + 'static,
    {
        self.handlers.lock().notification = Some(Arc::new(handler));
    }

    /// Installs the handler run on every successful open.
    pub fn on_reconnect<F>(&self, handler: F)
    where
        F: Fn() -> Vec<ReconnectRequest> + Send + Sync + 'static,
    {
        self.handlers.lock().reconnect = Some(Arc::new(handler));
    }

    /// Returns a receiver tracking the connection state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Shuts the transport down.
    ///
    /// Clears the outbound queue and the pending table without failing the
    /// entries individually, detaches both handlers and closes the socket
    /// without reconnecting. Closing again has no effect.
    pub fn close(&self) {
        {
            let mut handlers = self.handlers.lock();
            handlers.notification = None;
            handlers.reconnect = None;
        }
        let _ = self.commands.send(Command::Close);
    }

    /// Waits until the actor has shut down.
    pub async fn closed(&self) {
        self.commands.closed().await;
    }

    /// Returns true once the actor has shut down.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Why a connected session ended.
enum Disconnect {
    /// The socket dropped; reconnect.
    Lost,
    /// `close()` was requested or every handle is gone.
    Shutdown,
}

struct Actor {
    options: TransportOptions,
    state: RpcState,
    commands: mpsc::UnboundedReceiver<Command>,
    handlers: Arc<Mutex<Handlers>>,
    status: watch::Sender<ConnectionState>,
    failures: u32,
}

impl Actor {
    async fn run(mut self) {
        // Lazy connect: wait for the first command.
        match self.commands.recv().await {
            Some(command) => {
                if !self.accept(command) {
                    return self.shutdown(None).await;
                }
            }
            None => return,
        }

        loop {
            let Some(ws) = self.connect().await else {
                return self.shutdown(None).await;
            };

            match self.serve(ws).await {
                Disconnect::Lost => {}
                Disconnect::Shutdown => return,
            }

            if !self.wait_before_reconnect().await {
                return self.shutdown(None).await;
            }
        }
    }

    fn set_status(&self, state: ConnectionState) {
        self.status.send_replace(state);
        debug!(state = state.as_str(), "connection state changed");
    }

    /// Applies a command while the socket is not open. Returns false on close.
    fn accept(&mut self, command: Command) -> bool {
        match command {
            Command::Call {
                method,
                params,
                reply,
            } => {
                if let Some(text) = self.state.register(method, params, reply) {
                    self.state.enqueue(text);
                }
                true
            }
            Command::SetCredentials(credentials) => {
                self.state.set_credentials(credentials);
                true
            }
            Command::Close => false,
        }
    }

    /// Connects, accepting commands meanwhile. Returns `None` on close.
    async fn connect(&mut self) -> Option<WsStream> {
        loop {
            self.set_status(ConnectionState::Connecting);
            let url = self.options.socket_url.clone();
            let connecting = connect_async(url.as_str());
            tokio::pin!(connecting);

            let result = loop {
                tokio::select! {
                    result = &mut connecting => break result,
                    command = self.commands.recv() => match command {
                        Some(command) => {
                            if !self.accept(command) {
                                return None;
                            }
                        }
                        None => return None,
                    },
                }
            };

            match result {
                Ok((ws, _response)) => {
                    self.failures = 0;
                    info!(url = %url, "connected");
                    return Some(ws);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "connection failed");
                    if !self.wait_before_reconnect().await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleeps for the policy delay while queueing commands. Returns false on close.
    async fn wait_before_reconnect(&mut self) -> bool {
        self.set_status(ConnectionState::Absent);
        self.failures += 1;
        let delay = self.options.reconnect.delay(self.failures);
        debug!(
            attempt = self.failures,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.accept(command) {
                            return false;
                        }
                    }
                    None => return false,
                },
            }
        }
    }

    /// Runs one connected session until the socket drops or close is requested.
    async fn serve(&mut self, ws: WsStream) -> Disconnect {
        let (mut sink, mut source) = ws.split();
        self.set_status(ConnectionState::Open);

        let reconnect = self.handlers.lock().reconnect.clone();
        if let Some(handler) = reconnect {
            for request in handler() {
                debug!(method = %request.method, "sending reconnect request");
                if let Some(text) = self.state.register(request.method, request.params, request.reply)
                {
                    if !self.transmit(&mut sink, text).await {
                        return Disconnect::Lost;
                    }
                }
            }
        }

        if !self.drain(&mut sink).await {
            return Disconnect::Lost;
        }

        loop {
            tokio::select! {
                message = source.next() => {
                    if !self.on_message(message, &mut sink).await {
                        info!("connection lost");
                        return Disconnect::Lost;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Call { method, params, reply }) => {
                        if let Some(text) = self.state.register(method, params, reply) {
                            if !self.transmit(&mut sink, text).await {
                                return Disconnect::Lost;
                            }
                        }
                    }
                    Some(Command::SetCredentials(credentials)) => {
                        self.state.set_credentials(credentials);
                    }
                    Some(Command::Close) | None => {
                        self.shutdown(Some((sink, source))).await;
                        return Disconnect::Shutdown;
                    }
                },
            }
        }
    }

    /// Sends queued frames in order; an entry leaves the queue only once sent.
    async fn drain(&mut self, sink: &mut WsSink) -> bool {
        let queued = self.state.queue_len();
        if queued > 0 {
            debug!(queued, "draining outbound queue");
        }

        while let Some(text) = self.state.queue_front().cloned() {
            if let Err(e) = sink.send(Message::Text(text)).await {
                warn!(error = %e, "failed to send queued frame");
                return false;
            }
            self.state.pop_front();
        }
        true
    }

    /// Sends a frame on the open socket, queueing it if the send fails.
    async fn transmit(&mut self, sink: &mut WsSink, text: String) -> bool {
        debug!(bytes = text.len(), "sending frame");
        match sink.send(Message::Text(text.clone())).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "send failed, queueing frame");
                self.state.enqueue(text);
                false
            }
        }
    }

    /// Handles one inbound message. Returns false when the socket is gone.
    async fn on_message(
        &mut self,
        message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        sink: &mut WsSink,
    ) -> bool {
        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "server closed the connection");
                return false;
            }
            Some(Ok(_)) => return true,
            Some(Err(e)) => {
                warn!(error = %e, "websocket error");
                return false;
            }
            None => return false,
        };

        debug!(bytes = text.len(), "received frame");
        match self.state.handle_text(&text) {
            FrameAction::Notify {
                method,
                params,
                ack,
            } => {
                let handler = self.handlers.lock().notification.clone();
                match handler {
                    Some(handler) => handler(method, params),
                    None => debug!(method = %method, "no notification handler"),
                }
                match ack {
                    Some(ack) => self.transmit(sink, ack).await,
                    None => true,
                }
            }
            FrameAction::Transmit(text) => self.transmit(sink, text).await,
            FrameAction::Handled | FrameAction::Ignored => true,
        }
    }

    async fn shutdown(&mut self, socket: Option<(WsSink, WsSource)>) {
        self.state.clear();
        {
            let mut handlers = self.handlers.lock();
            handlers.notification = None;
            handlers.reconnect = None;
        }
        if let Some((mut sink, _source)) = socket {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "error closing socket");
            }
        }
        self.set_status(ConnectionState::Absent);
        info!("transport closed");
    }
}
