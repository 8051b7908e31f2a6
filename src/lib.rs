//! # hwkeyring
//!
//! Hardware-wallet keyrings and signing bridges for Ethereum wallet
//! extensions: account discovery over HD derivation paths, transaction and
//! message signing on Ledger, OneKey, BitBox02 and imKey devices, and a
//! cross-context bridge layer that lets the device connection live in a
//! separate long-lived execution context when the host runtime tears down
//! the main one.
//!
//! The crate is a facade over the workspace members:
//!
//! - [`core`]: shared types, HD-path math, EIP-712 digests, signature
//!   assembly and verification.
//! - [`bridge`]: per-vendor bridge traits, direct device bridges, offscreen
//!   proxy bridges and the bridge factory.
//! - [`signers`]: the per-vendor keyrings built on top of the bridges.

/// Shared types and signing primitives.
pub use hwkeyring_core as core;

/// Device bridges: direct, proxied, and the factory that picks between them.
pub use hwkeyring_bridge as bridge;

/// Per-vendor hardware keyrings.
pub use hwkeyring_signers as signers;

/// Easy imports of the commonly used types.
pub mod prelude {
    pub use super::{
        bridge::{
            BridgeError, BridgeFactory, ChannelProvider, DeviceEnvironment, MessageChannel,
            RuntimeMode, VendorBridge,
        },
        core::{
            AccountDetail, CoreError, HdPathType, KeyringType, PageAccount, TypedDataVersion,
            UnlockStatus,
        },
        signers::{
            BitBox02Keyring, ImKeyKeyring, Keyring, KeyringError, LedgerKeyring, OneKeyKeyring,
            SerializedKeyring, SignedTransaction,
        },
    };
}
