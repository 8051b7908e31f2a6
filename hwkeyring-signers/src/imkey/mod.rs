//! imKey keyring. Addresses come from the device one path at a time, and
//! transaction signing returns the fully-signed RLP blob, so the signature
//! is extracted positionally from the envelope-specific slots before the
//! usual signer verification.

use crate::{
    finish_message_signature, AccountStore, Keyring, KeyringError, Pager, SerializedKeyring,
    SignedTransaction,
};
use async_trait::async_trait;
use ethers_core::{
    types::{
        transaction::{eip2718::TypedTransaction, eip712::TypedData},
        Address, Signature,
    },
    utils::hash_message,
};
use hwkeyring_bridge::{BridgeError, ImKeyBridge, ImKeyTransaction};
use hwkeyring_core::{
    checksum, extract_signature_from_signed_rlp, hash_typed_data, verify_signer, AccountDetail,
    CoreError, HdPathType, KeyringType, PageAccount, TypedDataVersion, UnlockStatus,
};
use std::{collections::HashMap, sync::Arc};

/// Upper bound of the brute-force index scan when an address has no
/// recorded path.
pub const MAX_INDEX: u32 = 100;

const DEFAULT_CHAIN_ID: u64 = 1;

pub struct ImKeyKeyring {
    bridge: Arc<dyn ImKeyBridge>,
    store: AccountStore,
    pager: Pager,
    unlocked_account: u32,
    hd_path_type: HdPathType,
    base_public_keys: HashMap<HdPathType, String>,
    initialized: bool,
}

impl ImKeyKeyring {
    pub fn new(bridge: Arc<dyn ImKeyBridge>) -> Self {
        Self {
            bridge,
            store: AccountStore::default(),
            pager: Pager::default(),
            unlocked_account: 0,
            hd_path_type: HdPathType::Bip44,
            base_public_keys: HashMap::new(),
            initialized: false,
        }
    }

    pub fn with_bridge(bridge: Option<Arc<dyn ImKeyBridge>>) -> Result<Self, KeyringError> {
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

    /// Fingerprint of the presently selected convention: the device's
    /// public key at the convention's base path.
    async fn active_fingerprint(&mut self) -> Result<String, KeyringError> {
        if let Some(fingerprint) = self.base_public_keys.get(&self.hd_path_type) {
            return Ok(fingerprint.clone());
        }
        let account = self
            .bridge
            .get_address(&self.hd_path_type.fingerprint_path())
            .await?;
        let fingerprint = account.public_key.ok_or_else(|| {
            KeyringError::Bridge(BridgeError::ResponseShape(
                "device did not return a public key".to_owned(),
            ))
        })?;
        self.base_public_keys
            .insert(self.hd_path_type, fingerprint.clone());
        Ok(fingerprint)
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
impl Keyring for ImKeyKeyring {
    fn keyring_type(&self) -> KeyringType {
        KeyringType::ImKey
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
            .unwrap_or(HdPathType::Bip44);
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

    fn current_accounts(&self) -> Vec<String> {
        let active = self.base_public_keys.get(&self.hd_path_type);
        self.store
            .accounts()
            .iter()
            .copied()
            .filter(|address| match self.store.detail(address) {
                Some(detail) => match (&detail.hd_path_base_public_key, active) {
                    (Some(fingerprint), Some(active_fingerprint)) => {
                        fingerprint == active_fingerprint
                    }
                    _ => detail.hd_path_type == self.hd_path_type,
                },
                None => false,
            })
            .map(|address| checksum(&address))
            .collect()
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
            self.store.clear_session_cache();
        }
        Ok(())
    }

    async fn unlock(&mut self) -> Result<UnlockStatus, KeyringError> {
        let status = self.ensure_unlocked().await?;
        if status == UnlockStatus::Unlocked {
            self.active_fingerprint().await?;
        }
        Ok(status)
    }

    async fn add_accounts(&mut self, count: usize) -> Result<Vec<String>, KeyringError> {
        self.ensure_unlocked().await?;
        let fingerprint = self.active_fingerprint().await?;
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
                    hd_path_base_public_key: Some(fingerprint.clone()),
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
        let payload = ImKeyTransaction::load(tx, DEFAULT_CHAIN_ID)?;
        let raw_signed = self.bridge.sign_transaction(&path, &payload).await?;
        // the device returns the whole signed transaction; dig the
        // signature out of the envelope-specific slots
        let signature = extract_signature_from_signed_rlp(tx, &raw_signed)?;
        verify_signer(&signature, tx.sighash(), address)?;
        Ok(SignedTransaction::new(tx.clone(), signature))
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
        self.base_public_keys.clear();
        self.initialized = false;
        Ok(())
    }
}
