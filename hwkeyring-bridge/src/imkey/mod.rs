//! imKey bridge. The device builds and RLP-encodes the signed transaction
//! itself, so transaction signing returns an encoded blob rather than bare
//! signature fields.

mod direct;
mod proxy;
mod types;

pub use direct::{DirectImKeyBridge, ImKeyTransport};
pub use proxy::ProxyImKeyBridge;
pub use types::{ImKeyTransaction, ImKeyTxType};

use crate::{error::BridgeError, types::DeviceAccount};
use async_trait::async_trait;
use ethers_core::types::H256;
use hwkeyring_core::RawSignature;

/// Device operations the imKey keyring relies on.
#[async_trait]
pub trait ImKeyBridge: Send + Sync {
    async fn init(&self) -> Result<(), BridgeError>;

    /// Address and public key at one derivation path.
    async fn get_address(&self, hd_path: &str) -> Result<DeviceAccount, BridgeError>;

    /// Returns the fully-signed transaction, RLP-encoded on-device.
    async fn sign_transaction(
        &self,
        hd_path: &str,
        tx: &ImKeyTransaction,
    ) -> Result<Vec<u8>, BridgeError>;

    async fn sign_personal_message(
        &self,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError>;

    async fn sign_typed_data(
        &self,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError>;

    async fn clean_up(&self) -> Result<(), BridgeError>;
}
