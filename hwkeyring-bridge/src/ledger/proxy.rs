//! Offscreen Ledger bridge: every call is forwarded over the extension
//! channel to the context holding the real HID handle.

use crate::{
    channel::{DeviceEventListener, MessageChannel},
    envelope::{BridgeAction, ChannelTarget},
    error::BridgeError,
    ledger::LedgerBridge,
    proxy::ProxyClient,
    types::DeviceAccount,
};
use async_trait::async_trait;
use ethers_core::types::H256;
use hwkeyring_core::RawSignature;
use serde_json::json;
use std::sync::Arc;

pub struct ProxyLedgerBridge {
    client: ProxyClient,
}

impl ProxyLedgerBridge {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        listener: Option<Arc<dyn DeviceEventListener>>,
    ) -> Self {
        Self {
            client: ProxyClient::new(channel, ChannelTarget::LedgerOffscreen, listener),
        }
    }
}

#[async_trait]
impl LedgerBridge for ProxyLedgerBridge {
    async fn init(&self) -> Result<(), BridgeError> {
        self.client.invoke_unit(BridgeAction::Init, vec![]).await
    }

    async fn app_configuration(&self) -> Result<String, BridgeError> {
        self.client
            .invoke(BridgeAction::GetAppConfiguration, vec![])
            .await
    }

    async fn get_address(&self, hd_path: &str) -> Result<DeviceAccount, BridgeError> {
        self.client
            .invoke(BridgeAction::GetAddress, vec![json!(hd_path)])
            .await
    }

    async fn sign_transaction(
        &self,
        hd_path: &str,
        raw_tx: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        self.client
            .invoke(
                BridgeAction::SignTransaction,
                vec![json!(hd_path), json!(format!("0x{}", hex::encode(raw_tx)))],
            )
            .await
    }

    async fn sign_personal_message(
        &self,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        self.client
            .invoke(
                BridgeAction::SignPersonalMessage,
                vec![json!(hd_path), json!(format!("0x{}", hex::encode(message)))],
            )
            .await
    }

    async fn sign_typed_data(
        &self,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError> {
        self.client
            .invoke(
                BridgeAction::SignTypedData,
                vec![json!(hd_path), json!(domain_separator), json!(message_hash)],
            )
            .await
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        self.client.invoke_unit(BridgeAction::CleanUp, vec![]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BridgeEvent, BridgeRequest, BridgeResponse, DeviceEvent};
    use crate::error::ChannelError;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    struct ScriptedChannel {
        responses: StdMutex<Vec<BridgeResponse>>,
        requests: StdMutex<Vec<BridgeRequest>>,
        event_subscribers: StdMutex<Vec<UnboundedSender<BridgeEvent>>>,
    }

    impl ScriptedChannel {
        fn new(responses: Vec<BridgeResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: StdMutex::new(responses),
                requests: StdMutex::new(Vec::new()),
                event_subscribers: StdMutex::new(Vec::new()),
            })
        }

        fn emit(&self, event: BridgeEvent) {
            for subscriber in self.event_subscribers.lock().unwrap().iter() {
                let _ = subscriber.send(event.clone());
            }
        }
    }

    #[async_trait]
    impl MessageChannel for ScriptedChannel {
        async fn request(&self, request: BridgeRequest) -> Result<BridgeResponse, ChannelError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.responses.lock().unwrap().remove(0))
        }

        fn subscribe(&self) -> UnboundedReceiver<BridgeEvent> {
            let (tx, rx) = unbounded_channel();
            self.event_subscribers.lock().unwrap().push(tx);
            rx
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        events: StdMutex<Vec<BridgeEvent>>,
    }

    impl DeviceEventListener for RecordingListener {
        fn on_event(&self, event: &BridgeEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn remote_error_field_rejects_the_call() {
        let channel = ScriptedChannel::new(vec![BridgeResponse::err("Unknown error")]);
        let bridge = ProxyLedgerBridge::new(channel, None);

        let err = bridge.get_address("m/44'/60'/0'/0/0").await.unwrap_err();
        match err {
            BridgeError::Remote(message) => assert_eq!(message, "Unknown error"),
            other => panic!("expected a remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn requests_carry_the_envelope_shape() {
        let channel = ScriptedChannel::new(vec![BridgeResponse::ok(serde_json::json!({
            "address": "0x2ed7afa17473e17ac59908f088b4371d28585476",
        }))]);
        let bridge = ProxyLedgerBridge::new(channel.clone(), None);

        let account = bridge.get_address("m/44'/60'/0'/0/3").await.unwrap();
        assert_eq!(
            account.address,
            "0x2ed7afa17473e17ac59908f088b4371d28585476"
                .parse()
                .unwrap()
        );

        let requests = channel.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].target, ChannelTarget::LedgerOffscreen);
        assert_eq!(requests[0].action, BridgeAction::GetAddress);
        assert_eq!(requests[0].params, vec![serde_json::json!("m/44'/60'/0'/0/3")]);
    }

    #[tokio::test]
    async fn event_pump_is_wired_before_any_request() {
        let channel = ScriptedChannel::new(vec![]);
        let listener = Arc::new(RecordingListener::default());
        let _bridge = ProxyLedgerBridge::new(channel.clone(), Some(listener.clone()));

        // an event arriving right after construction, before any outbound
        // call, must still reach the listener
        channel.emit(BridgeEvent::new(
            DeviceEvent::PairingCode,
            serde_json::json!({ "code": "1234" }),
        ));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let events = listener.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, DeviceEvent::PairingCode);
    }
}
