//! BitBox02 bridge. The device pairs with the host through a verification
//! code the user confirms on-device; only a paired connection can export
//! xpubs or sign. Unlike most vendors it parses full EIP-712 payloads
//! itself, so typed data is shipped as JSON rather than pre-hashed.

mod direct;
mod proxy;
mod types;

pub use direct::{BitBox02Transport, DirectBitBox02Bridge, PairingHandshake, PairingState};
pub use proxy::ProxyBitBox02Bridge;
pub use types::BitBox02Transaction;

use crate::error::BridgeError;
use async_trait::async_trait;
use hwkeyring_core::RawSignature;

/// Device operations the BitBox02 keyring relies on.
#[async_trait]
pub trait BitBox02Bridge: Send + Sync {
    /// Connects and, when the device is not yet paired with this host, runs
    /// the pairing handshake. Surfaces the pairing code through the device
    /// event stream and blocks until the user confirms on-device.
    async fn init(&self) -> Result<(), BridgeError>;

    /// Extended public key at a hardened keypath, for local child
    /// derivation.
    async fn root_public_key(&self, keypath: &str) -> Result<String, BridgeError>;

    async fn sign_transaction(
        &self,
        keypath: &str,
        tx: &BitBox02Transaction,
    ) -> Result<RawSignature, BridgeError>;

    async fn sign_personal_message(
        &self,
        keypath: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError>;

    /// Ships the typed-data payload as JSON; the device hashes it itself.
    async fn sign_typed_data(
        &self,
        keypath: &str,
        typed_data_json: &str,
    ) -> Result<RawSignature, BridgeError>;

    async fn clean_up(&self) -> Result<(), BridgeError>;
}
