//! Offscreen OneKey bridge.

use crate::{
    channel::{DeviceEventListener, MessageChannel},
    envelope::{BridgeAction, ChannelTarget},
    error::BridgeError,
    onekey::{OneKeyBridge, OneKeyDevice, OneKeyFeatures, OneKeyTransaction},
    proxy::ProxyClient,
};
use async_trait::async_trait;
use ethers_core::types::H256;
use hwkeyring_core::RawSignature;
use serde_json::json;
use std::sync::Arc;

pub struct ProxyOneKeyBridge {
    client: ProxyClient,
}

impl ProxyOneKeyBridge {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        listener: Option<Arc<dyn DeviceEventListener>>,
    ) -> Self {
        Self {
            client: ProxyClient::new(channel, ChannelTarget::OnekeyOffscreen, listener),
        }
    }
}

#[async_trait]
impl OneKeyBridge for ProxyOneKeyBridge {
    async fn init(&self) -> Result<(), BridgeError> {
        self.client.invoke_unit(BridgeAction::Init, vec![]).await
    }

    async fn search_devices(&self) -> Result<Vec<OneKeyDevice>, BridgeError> {
        self.client
            .invoke(BridgeAction::SearchDevices, vec![])
            .await
    }

    async fn get_features(&self, connect_id: &str) -> Result<OneKeyFeatures, BridgeError> {
        self.client
            .invoke(BridgeAction::Init, vec![json!(connect_id)])
            .await
    }

    async fn get_public_key(
        &self,
        connect_id: &str,
        hd_path: &str,
    ) -> Result<String, BridgeError> {
        self.client
            .invoke(
                BridgeAction::GetPublicKey,
                vec![json!(connect_id), json!(hd_path)],
            )
            .await
    }

    async fn sign_transaction(
        &self,
        connect_id: &str,
        hd_path: &str,
        tx: &OneKeyTransaction,
    ) -> Result<RawSignature, BridgeError> {
        self.client
            .invoke(
                BridgeAction::SignTransaction,
                vec![json!(connect_id), json!(hd_path), json!(tx)],
            )
            .await
    }

    async fn sign_personal_message(
        &self,
        connect_id: &str,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        self.client
            .invoke(
                BridgeAction::SignPersonalMessage,
                vec![
                    json!(connect_id),
                    json!(hd_path),
                    json!(format!("0x{}", hex::encode(message))),
                ],
            )
            .await
    }

    async fn sign_typed_data(
        &self,
        connect_id: &str,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError> {
        self.client
            .invoke(
                BridgeAction::SignTypedData,
                vec![
                    json!(connect_id),
                    json!(hd_path),
                    json!(domain_separator),
                    json!(message_hash),
                ],
            )
            .await
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        self.client.invoke_unit(BridgeAction::CleanUp, vec![]).await
    }
}
