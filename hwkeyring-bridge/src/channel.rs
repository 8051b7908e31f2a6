use crate::{
    envelope::{BridgeEvent, BridgeRequest, BridgeResponse},
    error::ChannelError,
};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// The extension-internal messaging transport, as seen from this side: an
/// asynchronous request/response pair plus a subscription for unsolicited
/// events flowing back from the remote context.
///
/// A resolved `request` only means the message made a round trip; the
/// semantic outcome is inside the [`BridgeResponse`].
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn request(&self, request: BridgeRequest) -> Result<BridgeResponse, ChannelError>;

    /// Registers a new independent subscriber for unsolicited events.
    fn subscribe(&self) -> UnboundedReceiver<BridgeEvent>;
}

/// Receives unsolicited device notifications: pairing codes to display,
/// popups to close, connects and disconnects. The UI layer implements this;
/// bridges only emit into it.
pub trait DeviceEventListener: Send + Sync {
    fn on_event(&self, event: &BridgeEvent);
}
