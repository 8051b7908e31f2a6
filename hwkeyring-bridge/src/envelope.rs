//! The message envelope spoken between the extension context and the
//! offscreen contexts that own device connections.
//!
//! Requests are `{ target, action, params }`; replies are either a bare
//! result value or `{ "error": <message> }`. A transport-level success with
//! an `error` field is still a failure, and every proxy checks for it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing targets on the extension-internal channel. One offscreen
/// document per vendor, plus the extension context itself for unsolicited
/// events flowing the other way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelTarget {
    LedgerOffscreen,
    OnekeyOffscreen,
    Bitbox02Offscreen,
    ImkeyOffscreen,
    Extension,
}

/// Operations an offscreen device owner can be asked to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BridgeAction {
    Init,
    CleanUp,
    SearchDevices,
    GetAddress,
    GetPublicKey,
    GetAppConfiguration,
    SignTransaction,
    SignPersonalMessage,
    SignTypedData,
}

/// One call serialized onto the channel. `params` is a positional tuple.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub target: ChannelTarget,
    pub action: BridgeAction,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// A reply from the remote context. Remote-side exceptions travel as an
/// `error` field rather than a channel failure, so the failure shape has to
/// be tried first when decoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeResponse {
    Failure { error: String },
    Success(Value),
}

impl BridgeResponse {
    pub fn ok(value: Value) -> Self {
        BridgeResponse::Success(value)
    }

    pub fn err(message: impl Into<String>) -> Self {
        BridgeResponse::Failure {
            error: message.into(),
        }
    }
}

/// Unsolicited device notifications pushed from an offscreen context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceEvent {
    /// The device displays a pairing code the user has to compare.
    PairingCode,
    /// The pairing interaction finished; any popup showing it can close.
    ClosePopup,
    Connected,
    Disconnected,
}

/// Envelope for the unsolicited event stream, addressed at the extension
/// context rather than at an offscreen document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub target: ChannelTarget,
    pub event: DeviceEvent,
    #[serde(default)]
    pub payload: Value,
}

impl BridgeEvent {
    pub fn new(event: DeviceEvent, payload: Value) -> Self {
        Self {
            target: ChannelTarget::Extension,
            event,
            payload,
        }
    }
}
