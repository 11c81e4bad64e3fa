//! Request table of the transport: id allocation, outbound queue, pending
//! replies and the re-authentication retry.
//!
//! This is deliberately free of I/O so that the correlation rules can be
//! tested without a socket. The actor in the parent module owns one
//! [`RpcState`] and performs whatever [`FrameAction`] it returns.

use std::collections::{HashMap, VecDeque};

use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use verto_protocol::{
    ErrorObject, Frame, LoginParams, Method, Reply, ReplyOutcome, Request, decode_frame,
    encode_reply, encode_request,
};

use crate::error::{ClientError, ClientResult};

/// Channel resolving an awaited request.
pub(crate) type ReplySender = oneshot::Sender<ClientResult<Value>>;

/// Who gets told when a pending request completes.
#[derive(Debug)]
pub(crate) enum Responder {
    /// A caller awaiting `call()`.
    Caller(ReplySender),
    /// A re-authentication login issued on behalf of another request.
    Relogin {
        original: Box<PendingRequest>,
        error: ErrorObject,
    },
}

/// A request awaiting its reply.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub method: String,
    pub params: Value,
    pub responder: Responder,
    /// Set once the request has been through a re-authentication.
    pub retried: bool,
}

/// What the actor must do after an inbound frame.
#[derive(Debug, PartialEq)]
pub(crate) enum FrameAction {
    /// Route a server-initiated message, then transmit `ack` if present.
    Notify {
        method: String,
        params: Value,
        ack: Option<String>,
    },
    /// Transmit a frame produced by the retry logic.
    Transmit(String),
    /// The reply was delivered.
    Handled,
    /// The frame was discarded.
    Ignored,
}

/// Id counter, outbound queue and pending table.
#[derive(Debug)]
pub(crate) struct RpcState {
    next_id: u64,
    queue: VecDeque<String>,
    pending: HashMap<u64, PendingRequest>,
    credentials: Option<LoginParams>,
}

impl RpcState {
    pub fn new(credentials: Option<LoginParams>) -> Self {
        Self {
            next_id: 1,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            credentials,
        }
    }

    pub fn set_credentials(&mut self, credentials: Option<LoginParams>) {
        self.credentials = credentials;
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Assigns an id, encodes the request and records it as pending when a
    /// responder is given. Returns the text to transmit.
    ///
    /// On encoding failure the responder is resolved with the error and no
    /// entry is recorded.
    pub fn register(
        &mut self,
        method: String,
        params: Value,
        reply: Option<ReplySender>,
    ) -> Option<String> {
        let id = self.allocate_id();
        let text = match encode_request(&Request::new(id, method.as_str(), params.clone())) {
            Ok(text) => text,
            Err(e) => {
                warn!(request_id = id, method = %method, error = %e, "failed to encode request");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(ClientError::Protocol(e)));
                }
                return None;
            }
        };

        if let Some(reply) = reply {
            self.pending.insert(
                id,
                PendingRequest {
                    method,
                    params,
                    responder: Responder::Caller(reply),
                    retried: false,
                },
            );
        }

        Some(text)
    }

    fn insert_and_encode(&mut self, pending: PendingRequest) -> Option<String> {
        let id = self.allocate_id();
        let request = Request::new(id, pending.method.as_str(), pending.params.clone());
        match encode_request(&request) {
            Ok(text) => {
                self.pending.insert(id, pending);
                Some(text)
            }
            Err(e) => {
                warn!(request_id = id, method = %pending.method, error = %e, "failed to encode request");
                self.fail(pending.responder, ClientError::Protocol(e));
                None
            }
        }
    }

    pub fn enqueue(&mut self, text: String) {
        self.queue.push_back(text);
    }

    pub fn queue_front(&self) -> Option<&String> {
        self.queue.front()
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops the queue and every pending entry without resolving them.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }

    /// Classifies an inbound text frame and applies it to the table.
    pub fn handle_text(&mut self, text: &str) -> FrameAction {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "discarding malformed frame");
                return FrameAction::Ignored;
            }
        };

        match frame {
            Frame::Notification { method, params, id } => {
                let ack = id.and_then(|id| {
                    encode_reply(&Reply::result(id, json!({ "method": method })))
                        .map_err(|e| warn!(method = %method, error = %e, "failed to encode ack"))
                        .ok()
                });
                FrameAction::Notify { method, params, ack }
            }
            Frame::Reply { id, outcome } => match self.pending.remove(&id) {
                Some(pending) => self.complete(id, pending, outcome),
                None => {
                    debug!(request_id = id, "reply for unknown request");
                    FrameAction::Ignored
                }
            },
        }
    }

    fn complete(&mut self, id: u64, pending: PendingRequest, outcome: ReplyOutcome) -> FrameAction {
        match outcome {
            ReplyOutcome::Error(error)
                if error.is_auth_required() && !pending.retried && self.credentials.is_some() =>
            {
                self.relogin(id, pending, error)
            }
            ReplyOutcome::Error(error) => {
                debug!(request_id = id, method = %pending.method, code = error.code, "request failed");
                self.resolve_error(pending.responder, error)
            }
            ReplyOutcome::Result(result) => {
                debug!(request_id = id, method = %pending.method, "request succeeded");
                self.resolve_success(pending.responder, result)
            }
        }
    }

    fn relogin(&mut self, id: u64, pending: PendingRequest, error: ErrorObject) -> FrameAction {
        let Some(credentials) = self.credentials.clone() else {
            return self.resolve_error(pending.responder, error);
        };
        let params = match serde_json::to_value(&credentials) {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "failed to encode credentials");
                return self.resolve_error(pending.responder, error);
            }
        };

        debug!(request_id = id, method = %pending.method, "authentication required, logging in");
        let login = PendingRequest {
            method: Method::Login.into(),
            params,
            responder: Responder::Relogin {
                original: Box::new(pending),
                error,
            },
            retried: true,
        };
        self.transmit(login)
    }

    fn resolve_success(&mut self, responder: Responder, result: Value) -> FrameAction {
        match responder {
            Responder::Caller(reply) => {
                let _ = reply.send(Ok(result));
                FrameAction::Handled
            }
            Responder::Relogin { original, .. } => {
                let mut original = *original;
                original.retried = true;
                debug!(method = %original.method, "re-authenticated, resending request");
                self.transmit(original)
            }
        }
    }

    fn resolve_error(&mut self, responder: Responder, error: ErrorObject) -> FrameAction {
        match responder {
            Responder::Caller(reply) => {
                let _ = reply.send(Err(ClientError::Rpc(error)));
            }
            Responder::Relogin { original, error: first } => {
                warn!(method = %original.method, code = error.code, "re-authentication failed");
                self.fail(original.responder, ClientError::Rpc(first));
            }
        }
        FrameAction::Handled
    }

    fn fail(&mut self, responder: Responder, error: ClientError) {
        match responder {
            Responder::Caller(reply) => {
                let _ = reply.send(Err(error));
            }
            Responder::Relogin { original, .. } => self.fail(original.responder, error),
        }
    }

    fn transmit(&mut self, pending: PendingRequest) -> FrameAction {
        match self.insert_and_encode(pending) {
            Some(text) => FrameAction::Transmit(text),
            None => FrameAction::Handled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_id(text: &str) -> u64 {
        let value: Value = serde_json::from_str(text).unwrap();
        value["id"].as_u64().unwrap()
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    fn credentials() -> LoginParams {
        LoginParams::new("1000@example.com", "secret")
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut state = RpcState::new(None);
        let first = state.register("verto.info".into(), json!({}), None).unwrap();
        let second = state.register("verto.info".into(), json!({}), None).unwrap();
        let third = state.register("verto.info".into(), json!({}), None).unwrap();

        assert_eq!(request_id(&first), 1);
        assert_eq!(request_id(&second), 2);
        assert_eq!(request_id(&third), 3);
    }

    #[test]
    fn fire_and_forget_leaves_no_pending_entry() {
        let mut state = RpcState::new(None);
        state.register("verto.info".into(), json!({}), None).unwrap();
        assert_eq!(state.pending_len(), 0);

        // A stray reply for that id is ignored.
        let action = state.handle_text(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        assert_eq!(action, FrameAction::Ignored);
    }

    #[test]
    fn register_encodes_params() {
        let mut state = RpcState::new(None);
        let params = json!({"dialogParams": {"callID": "abc"}, "dtmf": "1#"});
        let text = state.register("verto.info".into(), params.clone(), None).unwrap();

        let frame = parse(&text);
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["method"], "verto.info");
        assert_eq!(frame["params"], params);
    }

    #[test]
    fn replies_resolve_their_own_caller_in_any_order() {
        let mut state = RpcState::new(None);
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        state.register("a".into(), json!({}), Some(tx1));
        state.register("b".into(), json!({}), Some(tx2));

        let action = state.handle_text(r#"{"jsonrpc":"2.0","id":2,"result":{"n":2}}"#);
        assert_eq!(action, FrameAction::Handled);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap().unwrap(), json!({"n": 2}));

        state.handle_text(r#"{"jsonrpc":"2.0","id":1,"result":{"n":1}}"#);
        assert_eq!(rx1.try_recv().unwrap().unwrap(), json!({"n": 1}));
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn duplicate_reply_is_ignored() {
        let mut state = RpcState::new(None);
        let (tx, mut rx) = oneshot::channel();
        state.register("a".into(), json!({}), Some(tx));

        assert_eq!(
            state.handle_text(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#),
            FrameAction::Handled
        );
        assert_eq!(
            state.handle_text(r#"{"jsonrpc":"2.0","id":1,"error":{"code":1}}"#),
            FrameAction::Ignored
        );
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn error_reply_surfaces_error_object() {
        let mut state = RpcState::new(None);
        let (tx, mut rx) = oneshot::channel();
        state.register("verto.modify".into(), json!({}), Some(tx));

        state.handle_text(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Invalid params"}}"#,
        );

        let err = rx.try_recv().unwrap().unwrap_err();
        let rpc = err.as_rpc().unwrap();
        assert_eq!(rpc.code, -32602);
        assert_eq!(rpc.message.as_deref(), Some("Invalid params"));
    }

    #[test]
    fn nonconforming_error_reply_still_fails_caller() {
        let mut state = RpcState::new(None);
        let (tx, mut rx) = oneshot::channel();
        state.register("verto.modify".into(), json!({}), Some(tx));

        state.handle_text(r#"{"jsonrpc":"2.0","id":1,"error":"CALL DOES NOT EXIST"}"#);

        let err = rx.try_recv().unwrap().unwrap_err();
        let rpc = err.as_rpc().unwrap();
        assert_eq!(rpc.code, 0);
        assert_eq!(rpc.message.as_deref(), Some("CALL DOES NOT EXIST"));
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn notification_never_touches_pending_table() {
        let mut state = RpcState::new(None);
        let (tx, mut rx) = oneshot::channel();
        state.register("a".into(), json!({}), Some(tx));

        let action = state
            .handle_text(r#"{"jsonrpc":"2.0","method":"verto.bye","params":{"callID":"X"},"id":1}"#);

        match action {
            FrameAction::Notify { method, params, ack } => {
                assert_eq!(method, "verto.bye");
                assert_eq!(params, json!({"callID": "X"}));
                let ack = parse(&ack.unwrap());
                assert_eq!(
                    ack,
                    json!({"jsonrpc": "2.0", "id": 1, "result": {"method": "verto.bye"}})
                );
            }
            other => panic!("unexpected action: {:?}", other),
        }
        assert_eq!(state.pending_len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn notification_without_id_has_no_ack() {
        let mut state = RpcState::new(None);
        let action = state.handle_text(r#"{"jsonrpc":"2.0","method":"verto.clientReady"}"#);
        assert!(matches!(action, FrameAction::Notify { ack: None, .. }));
    }

    #[test]
    fn malformed_frames_are_ignored() {
        let mut state = RpcState::new(None);
        let (tx, mut rx) = oneshot::channel();
        state.register("a".into(), json!({}), Some(tx));

        assert_eq!(state.handle_text("garbage"), FrameAction::Ignored);
        assert_eq!(
            state.handle_text(r#"{"id":1,"result":{}}"#),
            FrameAction::Ignored
        );
        assert_eq!(state.pending_len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn auth_required_without_credentials_propagates() {
        let mut state = RpcState::new(None);
        let (tx, mut rx) = oneshot::channel();
        state.register("verto.invite".into(), json!({}), Some(tx));

        let action = state.handle_text(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000}}"#);
        assert_eq!(action, FrameAction::Handled);
        assert!(rx.try_recv().unwrap().unwrap_err().as_rpc().unwrap().is_auth_required());
    }

    #[test]
    fn auth_required_logs_in_and_resends_under_new_id() {
        let mut state = RpcState::new(Some(credentials()));
        let (tx, mut rx) = oneshot::channel();
        let params = json!({"sdp": "v=0"});
        state.register("verto.invite".into(), params.clone(), Some(tx));

        let login = match state
            .handle_text(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"Authentication Required"}}"#)
        {
            FrameAction::Transmit(text) => parse(&text),
            other => panic!("expected login, got {:?}", other),
        };
        assert_eq!(login["method"], "login");
        assert_eq!(login["id"], 2);
        assert_eq!(login["params"]["login"], "1000@example.com");
        assert_eq!(login["params"]["passwd"], "secret");
        assert!(rx.try_recv().is_err());

        let resent = match state.handle_text(r#"{"jsonrpc":"2.0","id":2,"result":{"sessid":"s"}}"#) {
            FrameAction::Transmit(text) => parse(&text),
            other => panic!("expected resend, got {:?}", other),
        };
        assert_eq!(resent["method"], "verto.invite");
        assert_eq!(resent["id"], 3);
        assert_eq!(resent["params"], params);

        state.handle_text(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"ok": true}));
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn failed_relogin_fails_original_with_original_error() {
        let mut state = RpcState::new(Some(credentials()));
        let (tx, mut rx) = oneshot::channel();
        state.register("verto.invite".into(), json!({}), Some(tx));

        state.handle_text(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"Authentication Required"}}"#,
        );
        let action = state.handle_text(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32001,"message":"Authentication Failure"}}"#,
        );
        assert_eq!(action, FrameAction::Handled);

        let err = rx.try_recv().unwrap().unwrap_err();
        let rpc = err.as_rpc().unwrap();
        assert_eq!(rpc.code, -32000);
        assert_eq!(rpc.message.as_deref(), Some("Authentication Required"));
    }

    #[test]
    fn auth_error_on_resent_request_propagates() {
        let mut state = RpcState::new(Some(credentials()));
        let (tx, mut rx) = oneshot::channel();
        state.register("verto.invite".into(), json!({}), Some(tx));

        state.handle_text(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000}}"#);
        state.handle_text(r#"{"jsonrpc":"2.0","id":2,"result":{}}"#);
        let action = state.handle_text(r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32000}}"#);

        assert_eq!(action, FrameAction::Handled);
        assert!(rx.try_recv().unwrap().unwrap_err().as_rpc().unwrap().is_auth_required());
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn auth_error_on_relogin_itself_does_not_loop() {
        let mut state = RpcState::new(Some(credentials()));
        let (tx, mut rx) = oneshot::channel();
        state.register("verto.invite".into(), json!({}), Some(tx));

        state.handle_text(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"first"}}"#);
        let action =
            state.handle_text(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32000,"message":"again"}}"#);

        assert_eq!(action, FrameAction::Handled);
        let err = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(err.as_rpc().unwrap().message.as_deref(), Some("first"));
    }

    #[test]
    fn queue_is_fifo() {
        let mut state = RpcState::new(None);
        state.enqueue("a".into());
        state.enqueue("b".into());
        state.enqueue("c".into());

        assert_eq!(state.queue_front().map(String::as_str), Some("a"));
        assert_eq!(state.pop_front().as_deref(), Some("a"));
        assert_eq!(state.pop_front().as_deref(), Some("b"));
        assert_eq!(state.queue_len(), 1);
    }

    #[test]
    fn clear_drops_pending_without_resolving() {
        let mut state = RpcState::new(None);
        let (tx, mut rx) = oneshot::channel();
        state.register("a".into(), json!({}), Some(tx));
        state.enqueue("queued".into());

        state.clear();

        assert_eq!(state.pending_len(), 0);
        assert_eq!(state.queue_len(), 0);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }
}
