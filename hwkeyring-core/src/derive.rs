//! Local address derivation from device-exported extended public keys.
//!
//! Vendors that can export an xpub at a hardened base path let us derive the
//! non-hardened account children locally, so paging through accounts does
//! not cost one device round-trip per row.

use crate::error::CoreError;
use coins_bip32::xkeys::{Parent, XPub};
use ethers_core::{
    k256::{ecdsa::VerifyingKey, elliptic_curve::sec1::ToEncodedPoint},
    types::Address,
    utils::keccak256,
};

/// Computes the Ethereum address of a secp256k1 public key.
pub fn address_from_pubkey(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Parses a base58 `xpub...` string as exported by a device.
pub fn parse_xpub(xpub: &str) -> Result<XPub, CoreError> {
    Ok(xpub.parse::<XPub>()?)
}

/// Derives the address of the non-hardened child at `index`.
pub fn derive_child_address(xpub: &XPub, index: u32) -> Result<Address, CoreError> {
    let child = xpub.derive_child(index)?;
    Ok(address_from_pubkey(child.as_ref()))
}

/// Compressed SEC1 hex of an extended public key, used to fingerprint the
/// path convention it was exported under.
pub fn pubkey_fingerprint(xpub: &XPub) -> String {
    let key: &VerifyingKey = xpub.as_ref();
    hex::encode(key.to_encoded_point(true).as_bytes())
}
