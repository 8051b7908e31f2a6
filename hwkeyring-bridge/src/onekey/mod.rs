//! OneKey-family bridge. The devices speak a Trezor-derived protocol:
//! session-oriented, multi-device capable, transactions shipped as trimmed
//! big-endian fields rather than RLP.

mod direct;
mod proxy;
mod types;

pub use direct::{DirectOneKeyBridge, OneKeyTransport, SessionCachePolicy};
pub use proxy::ProxyOneKeyBridge;
pub use types::{OneKeyAccessListItem, OneKeyDevice, OneKeyFeatures, OneKeyTransaction};

use crate::error::BridgeError;
use async_trait::async_trait;
use ethers_core::types::H256;
use hwkeyring_core::RawSignature;

/// Device operations the OneKey keyring relies on.
#[async_trait]
pub trait OneKeyBridge: Send + Sync {
    async fn init(&self) -> Result<(), BridgeError>;

    /// Enumerates attached devices. An empty result is not an error at this
    /// layer; the keyring decides what to do about it.
    async fn search_devices(&self) -> Result<Vec<OneKeyDevice>, BridgeError>;

    /// Opens (or resumes) the session with `connect_id` and reports the
    /// device features. Firmware too old for EIP-1559/EIP-712 is refused
    /// here, before any signing is attempted.
    async fn get_features(&self, connect_id: &str) -> Result<OneKeyFeatures, BridgeError>;

    /// Extended public key at a hardened path, for local child derivation.
    async fn get_public_key(&self, connect_id: &str, hd_path: &str)
        -> Result<String, BridgeError>;

    async fn sign_transaction(
        &self,
        connect_id: &str,
        hd_path: &str,
        tx: &OneKeyTransaction,
    ) -> Result<RawSignature, BridgeError>;

    async fn sign_personal_message(
        &self,
        connect_id: &str,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError>;

    async fn sign_typed_data(
        &self,
        connect_id: &str,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError>;

    async fn clean_up(&self) -> Result<(), BridgeError>;
}
