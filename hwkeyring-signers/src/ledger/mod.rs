//! Ledger keyring. Every address costs a device round-trip (the Ethereum
//! app exposes no shared xpub across its path conventions), so the session
//! cache earns its keep during pagination.

use crate::{
    finish_message_signature, finish_transaction, AccountStore, Keyring, KeyringError, Pager,
    SerializedKeyring, SignedTransaction,
};
use async_trait::async_trait;
use ethers_core::{
    types::{
        transaction::{eip2718::TypedTransaction, eip712::TypedData},
        Address, Signature,
    },
    utils::hash_message,
};
use hwkeyring_bridge::LedgerBridge;
use hwkeyring_core::{
    checksum, hash_typed_data, AccountDetail, CoreError, HdPathType, KeyringType, PageAccount,
    TypedDataVersion, UnlockStatus,
};
use std::sync::Arc;
use tracing::debug;

/// Upper bound of the brute-force index scan when an address has no
/// recorded path.
pub const MAX_INDEX: u32 = 1000;

pub struct LedgerKeyring {
    bridge: Arc<dyn LedgerBridge>,
    store: AccountStore,
    pager: Pager,
    unlocked_account: u32,
    hd_path_type: HdPathType,
    initialized: bool,
}

impl LedgerKeyring {
    pub fn new(bridge: Arc<dyn LedgerBridge>) -> Self {
        Self {
            bridge,
            store: AccountStore::default(),
            pager: Pager::default(),
            unlocked_account: 0,
            hd_path_type: HdPathType::LedgerLive,
            initialized: false,
        }
    }

    /// Factory-boundary constructor: a keyring cannot exist without a
    /// bridge.
    pub fn with_bridge(bridge: Option<Arc<dyn LedgerBridge>>) -> Result<Self, KeyringError> {
        Ok(Self::new(bridge.ok_or(KeyringError::BridgeRequired)?))
    }

    async fn ensure_unlocked(&mut self) -> Result<UnlockStatus, KeyringError> {
        if self.initialized {
            return Ok(UnlockStatus::AlreadyUnlocked);
        }
        self.bridge.init().await?;
        self.initialized = true;
        Ok(UnlockStatus::Unlocked)
    }

    async fn derive_address(&mut self, index: u32) -> Result<Address, KeyringError> {
        let path = self.hd_path_type.child_path(index);
        let account = self.bridge.get_address(&path).await?;
        self.store.cache_index(account.address, index);
        Ok(account.address)
    }

    async fn resolve_index(&mut self, address: Address) -> Result<u32, KeyringError> {
        if let Some(index) = self.store.index_of(&address) {
            return Ok(index);
        }
        debug!(address = %checksum(&address), "address has no recorded path, re-deriving");
        for index in 0..MAX_INDEX {
            if self.derive_address(index).await? == address {
                return Ok(index);
            }
        }
        Err(KeyringError::UnknownAddress)
    }

    async fn resolve_path(&mut self, address: Address) -> Result<String, KeyringError> {
        if let Some(detail) = self.store.detail(&address) {
            return Ok(detail.hd_path.clone());
        }
        let index = self.resolve_index(address).await?;
        Ok(self.hd_path_type.child_path(index))
    }

    async fn page(&mut self, increment: i32) -> Result<Vec<PageAccount>, KeyringError> {
        self.ensure_unlocked().await?;
        let window = self.pager.window(increment, MAX_INDEX);
        let mut accounts = Vec::with_capacity(window.len());
        for index in window {
            let address = self.derive_address(index).await?;
            accounts.push(PageAccount {
                address: checksum(&address),
                index: index + 1,
            });
        }
        Ok(accounts)
    }
}

#[async_trait]
impl Keyring for LedgerKeyring {
    fn keyring_type(&self) -> KeyringType {
        KeyringType::Ledger
    }

    fn serialize(&self) -> SerializedKeyring {
        let mut out = SerializedKeyring {
            page: self.pager.page,
            per_page: self.pager.per_page,
            unlocked_account: self.unlocked_account,
            hd_path: self.hd_path_type.base_path().to_owned(),
            hd_path_type: Some(self.hd_path_type),
            ..Default::default()
        };
        self.store.write_to(&mut out);
        out
    }

    fn deserialize(&mut self, opts: SerializedKeyring) -> Result<(), KeyringError> {
        self.hd_path_type = opts
            .hd_path_type
            .or_else(|| HdPathType::from_base_path(&opts.hd_path))
            .unwrap_or(HdPathType::LedgerLive);
        self.pager.page = opts.page;
        self.pager.per_page = if opts.per_page == 0 {
            Pager::DEFAULT_PER_PAGE
        } else {
            opts.per_page
        };
        self.unlocked_account = opts.unlocked_account;
        self.store.read_from(&opts);
        Ok(())
    }

    fn accounts(&self) -> Vec<String> {
        self.store.checksummed()
    }

    fn remove_account(&mut self, address: Address) -> Result<(), KeyringError> {
        self.store.remove(&address)
    }

    fn set_account_to_unlock(&mut self, index: u32) {
        self.unlocked_account = index;
    }

    fn set_hd_path_type(&mut self, hd_path_type: HdPathType) -> Result<(), KeyringError> {
        if hd_path_type != self.hd_path_type {
            self.hd_path_type = hd_path_type;
            // indices cached under the previous convention no longer apply
            self.store.clear_session_cache();
        }
        Ok(())
    }

    async fn unlock(&mut self) -> Result<UnlockStatus, KeyringError> {
        self.ensure_unlocked().await
    }

    async fn add_accounts(&mut self, count: usize) -> Result<Vec<String>, KeyringError> {
        self.ensure_unlocked().await?;
        let start = self.unlocked_account;
        let mut added = Vec::new();
        for index in start..start + count as u32 {
            let address = self.derive_address(index).await?;
            if self.store.contains(&address) {
                continue;
            }
            self.store.add(
                address,
                AccountDetail {
                    hd_path: self.hd_path_type.child_path(index),
                    hd_path_type: self.hd_path_type,
                    index,
                    hd_path_base_public_key: None,
                },
            );
            added.push(checksum(&address));
        }
        Ok(added)
    }

    async fn get_first_page(&mut self) -> Result<Vec<PageAccount>, KeyringError> {
        self.pager.reset();
        self.page(1).await
    }

    async fn get_next_page(&mut self) -> Result<Vec<PageAccount>, KeyringError> {
        self.page(1).await
    }

    async fn get_previous_page(&mut self) -> Result<Vec<PageAccount>, KeyringError> {
        self.page(-1).await
    }

    async fn index_from_address(&mut self, address: Address) -> Result<u32, KeyringError> {
        self.ensure_unlocked().await?;
        self.resolve_index(address).await
    }

    async fn sign_transaction(
        &mut self,
        address: Address,
        tx: &TypedTransaction,
    ) -> Result<SignedTransaction, KeyringError> {
        self.ensure_unlocked().await?;
        let path = self.resolve_path(address).await?;
        let raw_unsigned = tx.rlp();
        let raw_sig = self.bridge.sign_transaction(&path, raw_unsigned.as_ref()).await?;
        let (r, s, v) = raw_sig.components()?;
        finish_transaction(tx, address, r, s, v)
    }

    async fn sign_personal_message(
        &mut self,
        address: Address,
        message: &[u8],
    ) -> Result<Signature, KeyringError> {
        self.ensure_unlocked().await?;
        let path = self.resolve_path(address).await?;
        let raw_sig = self.bridge.sign_personal_message(&path, message).await?;
        finish_message_signature(hash_message(message), address, &raw_sig)
    }

    async fn sign_typed_data(
        &mut self,
        address: Address,
        typed_data: &TypedData,
        version: TypedDataVersion,
    ) -> Result<Signature, KeyringError> {
        self.ensure_unlocked().await?;
        let digests = hash_typed_data(typed_data, version).map_err(|err| match err {
            CoreError::UnsupportedTypedDataVersion(_) => KeyringError::NotSupported,
            other => KeyringError::from(other),
        })?;
        let path = self.resolve_path(address).await?;
        let raw_sig = self
            .bridge
            .sign_typed_data(&path, digests.domain_separator, digests.message_hash)
            .await?;
        finish_message_signature(digests.digest, address, &raw_sig)
    }

    async fn forget_device(&mut self) -> Result<(), KeyringError> {
        self.bridge.clean_up().await?;
        self.store.clear();
        self.pager.reset();
        self.unlocked_account = 0;
        self.initialized = false;
        Ok(())
    }
}
