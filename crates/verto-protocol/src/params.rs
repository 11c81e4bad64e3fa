//! Parameter and result types of Verto methods.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Dialog identification sent with every call-control request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogParams {
    /// Call identifier.
    #[serde(rename = "callID")]
    pub call_id: String,

    /// Number or extension being called.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_number: Option<String>,

    /// Caller display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id_name: Option<String>,

    /// Caller number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id_number: Option<String>,

    /// Callee display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee_id_name: Option<String>,

    /// Callee number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee_id_number: Option<String>,
}

impl DialogParams {
    /// Creates dialog params for a call id.
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            ..Default::default()
        }
    }

    /// Builder: set the destination number.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination_number = Some(destination.into());
        self
    }
}

/// Parameters of `verto.invite` and `verto.answer` requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpParams {
    /// Dialog identification.
    #[serde(rename = "dialogParams")]
    pub dialog_params: DialogParams,

    /// Local session description.
    pub sdp: String,

    /// Session id returned by login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessid: Option<String>,
}

/// Parameters of a `verto.bye` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByeParams {
    /// Dialog identification.
    #[serde(rename = "dialogParams")]
    pub dialog_params: DialogParams,

    /// Caller-supplied extra fields (e.g. `cause`, `causeCode`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parameters of a `verto.info` request carrying DTMF digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtmfParams {
    /// Dialog identification.
    #[serde(rename = "dialogParams")]
    pub dialog_params: DialogParams,

    /// Digits to send.
    pub dtmf: String,
}

/// Hold operations, all realized as `verto.modify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldAction {
    /// Put the call on hold.
    #[serde(rename = "hold")]
    Hold,
    /// Resume the call.
    #[serde(rename = "unhold")]
    Unhold,
    /// Flip the hold state.
    #[serde(rename = "toggleHold")]
    Toggle,
}

/// Parameters of a `verto.modify` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyParams {
    /// Requested modification.
    pub action: HoldAction,

    /// Dialog identification.
    #[serde(rename = "dialogParams")]
    pub dialog_params: DialogParams,
}

/// Result of a `verto.modify` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyResult {
    /// Hold state reported by the server ("held" or "active").
    #[serde(default, rename = "holdState", skip_serializing_if = "Option::is_none")]
    pub hold_state: Option<String>,
}

impl ModifyResult {
    /// Returns whether the server reports the call as held, if it says so.
    pub fn is_held(&self) -> Option<bool> {
        match self.hold_state.as_deref() {
            Some("held") => Some(true),
            Some("active") => Some(false),
            _ => None,
        }
    }
}

/// Parameters of a `login` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginParams {
    /// Login (usually `user@domain`).
    pub login: String,

    /// Password.
    pub passwd: String,

    /// Opaque login parameters passed through unmodified.
    #[serde(default, rename = "loginParams", skip_serializing_if = "Option::is_none")]
    pub login_params: Option<Value>,

    /// Opaque user variables passed through unmodified.
    #[serde(default, rename = "userVariables", skip_serializing_if = "Option::is_none")]
    pub user_variables: Option<Value>,

    /// Session id to resume, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessid: Option<String>,
}

impl LoginParams {
    /// Creates login params from a credential pair.
    pub fn new(login: impl Into<String>, passwd: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            passwd: passwd.into(),
            ..Default::default()
        }
    }

    /// Returns true if both login and password are set.
    pub fn has_credentials(&self) -> bool {
        !self.login.is_empty() && !self.passwd.is_empty()
    }
}

/// Parameters of server-initiated call messages
/// (`verto.invite`, `verto.answer`, `verto.media`, `verto.bye`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParams {
    /// Call identifier.
    #[serde(rename = "callID")]
    pub call_id: String,

    /// Remote session description, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,

    /// Caller display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id_name: Option<String>,

    /// Caller number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id_number: Option<String>,

    /// Callee display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee_id_name: Option<String>,

    /// Callee number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee_id_number: Option<String>,

    /// Updated display name (`verto.display`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Updated display number (`verto.display`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_number: Option<String>,
}

/// Parameters of `verto.subscribe` / `verto.unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    /// Event channels.
    #[serde(rename = "eventChannel")]
    pub event_channel: Vec<String>,
}

/// Parameters of `verto.broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastParams {
    /// Target event channel.
    #[serde(rename = "eventChannel")]
    pub event_channel: String,

    /// Payload.
    pub data: Value,
}
