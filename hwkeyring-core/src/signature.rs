//! Reassembly of canonical signatures from raw device responses.
//!
//! Vendors disagree on how a signature comes back: some return `r`/`s`/`v`
//! fields directly (with `v` as 0/1, 27/28, or already EIP-155 adjusted),
//! others return the fully signed transaction as an RLP blob the signature
//! has to be dug out of. Everything here normalizes those shapes into
//! [`Signature`] and enforces that the recovered signer matches the account
//! the caller asked for.

use crate::error::CoreError;
use ethers_core::{
    types::{
        transaction::eip2718::TypedTransaction, Address, RecoveryMessage, Signature, H256, U256,
    },
    utils::rlp::Rlp,
};
use serde::{Deserialize, Serialize};

/// Raw signature components as reported by a device: hex-encoded `r`/`s`
/// and whatever `v` flavor the vendor firmware emits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignature {
    pub r: String,
    pub s: String,
    pub v: u64,
}

impl RawSignature {
    pub fn from_bytes(r: &[u8], s: &[u8], v: u64) -> Self {
        Self {
            r: format!("0x{}", hex::encode(r)),
            s: format!("0x{}", hex::encode(s)),
            v,
        }
    }

    /// Parses `r`/`s` as big-endian 256-bit quantities.
    pub fn components(&self) -> Result<(U256, U256, u64), CoreError> {
        Ok((parse_quantity(&self.r)?, parse_quantity(&self.s)?, self.v))
    }
}

fn parse_quantity(value: &str) -> Result<U256, CoreError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    // tolerate odd nibble counts from firmwares that trim leading zeros
    let padded = if stripped.len() % 2 == 1 {
        format!("0{stripped}")
    } else {
        stripped.to_owned()
    };
    let bytes = hex::decode(padded)?;
    if bytes.len() > 32 {
        return Err(CoreError::MalformedSignature(format!(
            "quantity `{value}` is longer than 32 bytes"
        )));
    }
    Ok(U256::from_big_endian(&bytes))
}

/// Applies [EIP-155](https://github.com/ethereum/EIPs/blob/master/EIPS/eip-155.md)
pub fn to_eip155_v(recovery_id: u8, chain_id: Option<u64>) -> u64 {
    if let Some(chain_id) = chain_id {
        // When signing with a chain ID, add chain replay protection.
        (recovery_id as u64) + 35 + chain_id * 2
    } else {
        // Otherwise, convert to 'Electrum' notation.
        (recovery_id as u64) + 27
    }
}

/// Extracts the y-parity bit from a device-reported `v`, which may be 0/1,
/// 27/28, or already EIP-155 adjusted — possibly truncated to a single byte
/// by firmwares that only have one byte of `v` on the wire.
pub fn recovery_parity(v: u64, chain_id: u64) -> Result<u8, CoreError> {
    match v {
        0 | 1 => Ok(v as u8),
        27 | 28 => Ok((v - 27) as u8),
        _ => {
            let base = chain_id * 2 + 35;
            let parity = if v >= base {
                v - base
            } else {
                (v + 256 - base % 256) % 256
            };
            if parity > 1 {
                return Err(CoreError::MalformedSignature(format!(
                    "unexpected v value {v}"
                )));
            }
            Ok(parity as u8)
        }
    }
}

/// Builds the canonical signature for `tx` from raw device components,
/// normalizing `v` to the encoding the transaction envelope expects:
/// EIP-155 for legacy transactions, the bare y-parity for typed ones.
pub fn assemble_tx_signature(
    tx: &TypedTransaction,
    r: U256,
    s: U256,
    device_v: u64,
) -> Result<Signature, CoreError> {
    let chain_id = tx.chain_id().map(|id| id.as_u64());
    let parity = recovery_parity(device_v, chain_id.unwrap_or_default())?;
    let v = match tx {
        TypedTransaction::Legacy(_) => to_eip155_v(parity, chain_id),
        _ => parity as u64,
    };
    Ok(Signature { r, s, v })
}

/// Pulls `v`/`r`/`s` out of a fully signed, RLP-encoded transaction blob.
///
/// The signature slots depend on the envelope because the field counts
/// differ:
/// legacy `[nonce, gasPrice, gas, to, value, data, v, r, s]`,
/// EIP-2930 `[chainId, nonce, gasPrice, gas, to, value, data, accessList, v, r, s]`,
/// EIP-1559 `[chainId, nonce, maxPriorityFeePerGas, maxFeePerGas, gas, to,
/// value, data, accessList, v, r, s]`.
pub fn extract_signature_from_signed_rlp(
    tx: &TypedTransaction,
    raw: &[u8],
) -> Result<Signature, CoreError> {
    let (payload, v_at) = match tx {
        TypedTransaction::Legacy(_) => (raw, 6),
        TypedTransaction::Eip2930(_) => (strip_type_byte(raw, 0x01)?, 8),
        TypedTransaction::Eip1559(_) => (strip_type_byte(raw, 0x02)?, 9),
    };
    let rlp = Rlp::new(payload);
    let v: u64 = rlp.val_at(v_at)?;
    let r: U256 = rlp.val_at(v_at + 1)?;
    let s: U256 = rlp.val_at(v_at + 2)?;
    Ok(Signature { r, s, v })
}

fn strip_type_byte(raw: &[u8], expected: u8) -> Result<&[u8], CoreError> {
    match raw.split_first() {
        Some((first, rest)) if *first == expected => Ok(rest),
        Some((first, _)) => Err(CoreError::MalformedSignature(format!(
            "expected transaction type {expected:#04x}, device returned {first:#04x}"
        ))),
        None => Err(CoreError::MalformedSignature(
            "empty signed transaction payload".to_owned(),
        )),
    }
}

/// Recovers the signer behind `sig` over `digest` and compares it to the
/// account the caller asked for. A mismatch invalidates the signature.
pub fn verify_signer(sig: &Signature, digest: H256, expected: Address) -> Result<(), CoreError> {
    let recovered = sig.recover(RecoveryMessage::Hash(digest))?;
    if recovered != expected {
        return Err(CoreError::SignatureMismatch {
            expected,
            recovered,
        });
    }
    Ok(())
}
