//! Ledger-family bridge: the Ethereum app spoken over APDUs.

mod direct;
mod proxy;

pub use direct::{ApduAnswer, ApduCommand, DirectLedgerBridge, LedgerTransport};
pub use proxy::ProxyLedgerBridge;

use crate::{error::BridgeError, types::DeviceAccount};
use async_trait::async_trait;
use ethers_core::types::H256;
use hwkeyring_core::RawSignature;

/// Device operations the Ledger keyring relies on. Direct and offscreen
/// implementations are interchangeable.
#[async_trait]
pub trait LedgerBridge: Send + Sync {
    async fn init(&self) -> Result<(), BridgeError>;

    /// Semver of the Ethereum app running on the device.
    async fn app_configuration(&self) -> Result<String, BridgeError>;

    async fn get_address(&self, hd_path: &str) -> Result<DeviceAccount, BridgeError>;

    /// Signs the RLP encoding of an unsigned transaction (requires
    /// confirmation on the device).
    async fn sign_transaction(
        &self,
        hd_path: &str,
        raw_tx: &[u8],
    ) -> Result<RawSignature, BridgeError>;

    async fn sign_personal_message(
        &self,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError>;

    /// Signs a typed-data payload from its pre-computed domain separator and
    /// struct hash; the device never sees the full AST.
    async fn sign_typed_data(
        &self,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError>;

    async fn clean_up(&self) -> Result<(), BridgeError>;
}
