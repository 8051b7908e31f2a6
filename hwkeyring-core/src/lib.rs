//! Shared building blocks for the hardware keyrings: vendor and HD-path
//! discriminants, xpub-based address derivation, EIP-712 digest computation,
//! signature assembly from raw device responses, and the bounded retry
//! policy used for flaky device links.
//!
//! Everything in here is a pure function or a plain data type; device I/O
//! lives in `hwkeyring-bridge` and orchestration in `hwkeyring-signers`.

mod derive;
mod eip712;
mod error;
mod retry;
mod signature;
mod types;

pub use derive::{address_from_pubkey, derive_child_address, parse_xpub, pubkey_fingerprint};
pub use eip712::{hash_typed_data, TypedDataDigest};
pub use error::CoreError;
pub use retry::RetryPolicy;
pub use signature::{
    assemble_tx_signature, extract_signature_from_signed_rlp, recovery_parity, to_eip155_v,
    verify_signer, RawSignature,
};
pub use types::{
    AccountDetail, HdPathType, KeyringType, PageAccount, TypedDataVersion, UnknownKeyringType,
    UnlockStatus,
};

/// Formats an address the way it is shown to users and persisted: EIP-55
/// checksummed.
pub fn checksum(address: &ethers_core::types::Address) -> String {
    ethers_core::utils::to_checksum(address, None)
}
