//! Offscreen imKey bridge.

use crate::{
    channel::{DeviceEventListener, MessageChannel},
    envelope::{BridgeAction, ChannelTarget},
    error::BridgeError,
    imkey::{ImKeyBridge, ImKeyTransaction},
    proxy::ProxyClient,
    types::DeviceAccount,
};
use async_trait::async_trait;
use ethers_core::types::H256;
use hwkeyring_core::RawSignature;
use serde_json::json;
use std::sync::Arc;

pub struct ProxyImKeyBridge {
    client: ProxyClient,
}

impl ProxyImKeyBridge {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        listener: Option<Arc<dyn DeviceEventListener>>,
    ) -> Self {
        Self {
            client: ProxyClient::new(channel, ChannelTarget::ImkeyOffscreen, listener),
        }
    }
}

#[async_trait]
impl ImKeyBridge for ProxyImKeyBridge {
    async fn init(&self) -> Result<(), BridgeError> {
        self.client.invoke_unit(BridgeAction::Init, vec![]).await
    }

    async fn get_address(&self, hd_path: &str) -> Result<DeviceAccount, BridgeError> {
        self.client
            .invoke(BridgeAction::GetAddress, vec![json!(hd_path)])
            .await
    }

    async fn sign_transaction(
        &self,
        hd_path: &str,
        tx: &ImKeyTransaction,
    ) -> Result<Vec<u8>, BridgeError> {
        let raw: String = self
            .client
            .invoke(
                BridgeAction::SignTransaction,
                vec![json!(hd_path), json!(tx)],
            )
            .await?;
        Ok(hex::decode(raw.strip_prefix("0x").unwrap_or(&raw))?)
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
