//! Per-vendor hardware keyrings.
//!
//! A keyring orchestrates one device session: it discovers accounts over HD
//! derivation paths, remembers which path produced which address, paginates
//! through the device's address space for the account picker, and signs
//! transactions and messages by delegating all device I/O to its injected
//! bridge. Every produced signature is verified — the recovered signer must
//! be the requested account — before it is handed back.
//!
//! State comes in two tiers with fixed precedence: `account_details` is the
//! durable record (survives serialize/deserialize), `paths` a session-only
//! cache. Removal invalidates both; a stale cache entry could resolve a
//! future address to the wrong path.

mod account_store;
mod error;
mod paging;

pub mod bitbox02;
pub mod imkey;
pub mod ledger;
pub mod onekey;

#[cfg(test)]
pub(crate) mod test_utils;

pub use bitbox02::BitBox02Keyring;
pub use error::KeyringError;
pub use imkey::ImKeyKeyring;
pub use ledger::LedgerKeyring;
pub use onekey::OneKeyKeyring;

use async_trait::async_trait;
use ethers_core::{
    types::{
        transaction::{eip2718::TypedTransaction, eip712::TypedData},
        Address, Bytes, Signature, H256, U256,
    },
    utils::keccak256,
};
use hwkeyring_core::{
    assemble_tx_signature, recovery_parity, verify_signer, AccountDetail, HdPathType, KeyringType,
    PageAccount, RawSignature, TypedDataVersion, UnlockStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A fully-signed transaction reassembled from a device response.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedTransaction {
    pub tx: TypedTransaction,
    pub signature: Signature,
    /// Canonical signed encoding, ready to broadcast.
    pub raw: Bytes,
    pub hash: H256,
}

impl SignedTransaction {
    pub fn new(tx: TypedTransaction, signature: Signature) -> Self {
        let raw = tx.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        Self {
            tx,
            signature,
            raw,
            hash,
        }
    }
}

/// The persisted form of a keyring. Every field may be absent on input;
/// vendor defaults fill the gaps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerializedKeyring {
    /// Checksummed addresses, in insertion order.
    pub accounts: Vec<String>,
    pub page: i32,
    pub per_page: u32,
    pub unlocked_account: u32,
    /// Session cache of address → derivation index. Persisted for
    /// compatibility, but `account_details` wins whenever both know an
    /// address.
    pub paths: HashMap<String, u32>,
    pub account_details: HashMap<String, AccountDetail>,
    pub hd_path: String,
    pub hd_path_type: Option<HdPathType>,
}

/// The outer interface every keyring presents to the wallet, hardware or
/// not. Hardware keyrings add device unlocking and pagination on top of the
/// signing operations.
#[async_trait]
pub trait Keyring: Send + Sync {
    fn keyring_type(&self) -> KeyringType;

    fn serialize(&self) -> SerializedKeyring;

    fn deserialize(&mut self, opts: SerializedKeyring) -> Result<(), KeyringError>;

    /// Checksummed addresses in insertion order.
    fn accounts(&self) -> Vec<String>;

    /// Accounts reachable under the presently selected path convention.
    /// Accounts derived under another convention are hidden, not deleted.
    fn current_accounts(&self) -> Vec<String> {
        self.accounts()
    }

    fn remove_account(&mut self, address: Address) -> Result<(), KeyringError>;

    fn set_account_to_unlock(&mut self, index: u32);

    fn set_hd_path_type(&mut self, hd_path_type: HdPathType) -> Result<(), KeyringError>;

    async fn unlock(&mut self) -> Result<UnlockStatus, KeyringError>;

    async fn add_accounts(&mut self, count: usize) -> Result<Vec<String>, KeyringError>;

    async fn get_first_page(&mut self) -> Result<Vec<PageAccount>, KeyringError>;

    async fn get_next_page(&mut self) -> Result<Vec<PageAccount>, KeyringError>;

    async fn get_previous_page(&mut self) -> Result<Vec<PageAccount>, KeyringError>;

    /// Resolves the derivation index behind an address: durable record
    /// first, session cache second, bounded brute-force re-derivation last.
    async fn index_from_address(&mut self, address: Address) -> Result<u32, KeyringError>;

    async fn sign_transaction(
        &mut self,
        address: Address,
        tx: &TypedTransaction,
    ) -> Result<SignedTransaction, KeyringError>;

    async fn sign_personal_message(
        &mut self,
        address: Address,
        message: &[u8],
    ) -> Result<Signature, KeyringError>;

    async fn sign_typed_data(
        &mut self,
        address: Address,
        typed_data: &TypedData,
        version: TypedDataVersion,
    ) -> Result<Signature, KeyringError>;

    /// Drops the device session and every account. The opposite of
    /// deserialize.
    async fn forget_device(&mut self) -> Result<(), KeyringError>;
}

/// Assembles, verifies and wraps a transaction signature. Shared tail of
/// every vendor's `sign_transaction`.
pub(crate) fn finish_transaction(
    tx: &TypedTransaction,
    expected: Address,
    r: U256,
    s: U256,
    device_v: u64,
) -> Result<SignedTransaction, KeyringError> {
    let signature = assemble_tx_signature(tx, r, s, device_v)?;
    verify_signer(&signature, tx.sighash(), expected)?;
    Ok(SignedTransaction::new(tx.clone(), signature))
}

/// Normalizes and verifies a message signature (personal or typed-data).
pub(crate) fn finish_message_signature(
    digest: H256,
    expected: Address,
    raw: &RawSignature,
) -> Result<Signature, KeyringError> {
    let (r, s, v) = raw.components()?;
    let parity = recovery_parity(v, 0)?;
    let signature = Signature {
        r,
        s,
        v: 27 + parity as u64,
    };
    verify_signer(&signature, digest, expected)?;
    Ok(signature)
}

pub(crate) use account_store::AccountStore;
pub(crate) use paging::Pager;
