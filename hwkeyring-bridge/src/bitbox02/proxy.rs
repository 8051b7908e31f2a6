//! Offscreen BitBox02 bridge. The pairing code is displayed by the remote
//! context's event stream; this side only forwards calls and relays events
//! to the local listener.

use crate::{
    bitbox02::{BitBox02Bridge, BitBox02Transaction},
    channel::{DeviceEventListener, MessageChannel},
    envelope::{BridgeAction, ChannelTarget},
    error::BridgeError,
    proxy::ProxyClient,
};
use async_trait::async_trait;
use hwkeyring_core::RawSignature;
use serde_json::json;
use std::sync::Arc;

pub struct ProxyBitBox02Bridge {
    client: ProxyClient,
}

impl ProxyBitBox02Bridge {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        listener: Option<Arc<dyn DeviceEventListener>>,
    ) -> Self {
        Self {
            client: ProxyClient::new(channel, ChannelTarget::Bitbox02Offscreen, listener),
        }
    }
}

#[async_trait]
impl BitBox02Bridge for ProxyBitBox02Bridge {
    async fn init(&self) -> Result<(), BridgeError> {
        self.client.invoke_unit(BridgeAction::Init, vec![]).await
    }

    async fn root_public_key(&self, keypath: &str) -> Result<String, BridgeError> {
        self.client
            .invoke(BridgeAction::GetPublicKey, vec![json!(keypath)])
            .await
    }

    async fn sign_transaction(
        &self,
        keypath: &str,
        tx: &BitBox02Transaction,
    ) -> Result<RawSignature, BridgeError> {
        self.client
            .invoke(
                BridgeAction::SignTransaction,
                vec![json!(keypath), json!(tx)],
            )
            .await
    }

    async fn sign_personal_message(
        &self,
        keypath: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        self.client
            .invoke(
                BridgeAction::SignPersonalMessage,
                vec![json!(keypath), json!(format!("0x{}", hex::encode(message)))],
            )
            .await
    }

    async fn sign_typed_data(
        &self,
        keypath: &str,
        typed_data_json: &str,
    ) -> Result<RawSignature, BridgeError> {
        self.client
            .invoke(
                BridgeAction::SignTypedData,
                vec![json!(keypath), json!(typed_data_json)],
            )
            .await
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        self.client.invoke_unit(BridgeAction::CleanUp, vec![]).await
    }
}
