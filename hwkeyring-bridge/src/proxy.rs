//! The client half of the offscreen RPC: serializes calls onto a
//! [`MessageChannel`] and settles on the remote reply.

use crate::{
    channel::{DeviceEventListener, MessageChannel},
    envelope::{BridgeAction, BridgeRequest, BridgeResponse, ChannelTarget},
    error::BridgeError,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// One RPC client per vendor offscreen document.
///
/// Construction wires the unsolicited event pump *before* any request can
/// go out; otherwise a pairing code raced against listener registration
/// would be lost.
pub struct ProxyClient {
    channel: Arc<dyn MessageChannel>,
    target: ChannelTarget,
}

impl ProxyClient {
    /// Must be called from within an async runtime: the event pump is a
    /// spawned task.
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        target: ChannelTarget,
        listener: Option<Arc<dyn DeviceEventListener>>,
    ) -> Self {
        if let Some(listener) = listener {
            let mut events = channel.subscribe();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if event.target == ChannelTarget::Extension {
                        trace!(?event.event, "unsolicited device event");
                        listener.on_event(&event);
                    }
                }
            });
        }
        Self { channel, target }
    }

    pub fn target(&self) -> ChannelTarget {
        self.target
    }

    /// Sends one call and decodes the reply. A reply carrying an `error`
    /// field rejects locally even though the channel round trip succeeded.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        action: BridgeAction,
        params: Vec<Value>,
    ) -> Result<T, BridgeError> {
        debug!(target = ?self.target, ?action, "forwarding bridge call offscreen");
        let response = self
            .channel
            .request(BridgeRequest {
                target: self.target,
                action,
                params,
            })
            .await?;
        match response {
            BridgeResponse::Failure { error } => Err(BridgeError::Remote(error)),
            BridgeResponse::Success(value) => {
                serde_json::from_value(value).map_err(|e| BridgeError::ResponseShape(e.to_string()))
            }
        }
    }

    /// Like [`invoke`](Self::invoke) for calls whose result value carries no
    /// information.
    pub async fn invoke_unit(
        &self,
        action: BridgeAction,
        params: Vec<Value>,
    ) -> Result<(), BridgeError> {
        let response = self
            .channel
            .request(BridgeRequest {
                target: self.target,
                action,
                params,
            })
            .await?;
        match response {
            BridgeResponse::Failure { error } => Err(BridgeError::Remote(error)),
            BridgeResponse::Success(_) => Ok(()),
        }
    }
}
