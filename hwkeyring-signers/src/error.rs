use hwkeyring_bridge::BridgeError;
use hwkeyring_core::CoreError;
use thiserror::Error;

/// Error when using a hardware keyring.
///
/// Transport and channel failures are unwrapped into this taxonomy before
/// they reach callers; the UI never interprets raw transport errors.
#[derive(Error, Debug)]
pub enum KeyringError {
    /// A keyring cannot exist without a bridge
    #[error("Bridge is required")]
    BridgeRequired,
    /// Asked to remove an address the keyring does not hold
    #[error("Address {0} not found in this keyring")]
    AddressNotFound(String),
    /// Path resolution exhausted the bounded index scan
    #[error("Unknown address")]
    UnknownAddress,
    /// Capability gap on this vendor (operation or typed-data revision)
    #[error("Not supported on this device")]
    NotSupported,
    /// Underlying bridge error (connectivity, pairing, firmware, remote)
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    /// Derivation or signature-assembly error, including the post-sign
    /// signer verification failure
    #[error(transparent)]
    Core(#[from] CoreError),
}
