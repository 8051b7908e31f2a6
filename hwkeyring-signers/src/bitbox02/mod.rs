//! BitBox02 keyring. One path convention, one root xpub fetched after
//! pairing, all account derivation local. Typed data goes to the device as
//! full JSON (it hashes the payload itself), but the digest is still
//! computed locally so the returned signature can be verified.

use crate::{
    finish_message_signature, finish_transaction, AccountStore, Keyring, KeyringError, Pager,
    SerializedKeyring, SignedTransaction,
};
use async_trait::async_trait;
use coins_bip32::xkeys::XPub;
use ethers_core::{
    types::{
        transaction::{eip2718::TypedTransaction, eip712::TypedData},
        Address, Signature,
    },
    utils::hash_message,
};
use hwkeyring_bridge::{BitBox02Bridge, BitBox02Transaction};
use hwkeyring_core::{
    checksum, derive_child_address, hash_typed_data, parse_xpub, AccountDetail, HdPathType,
    KeyringType, PageAccount, TypedDataVersion, UnlockStatus,
};
use std::sync::Arc;

/// Upper bound of the brute-force index scan when an address has no
/// recorded path.
pub const MAX_INDEX: u32 = 100;

const DEFAULT_CHAIN_ID: u64 = 1;

pub struct BitBox02Keyring {
    bridge: Arc<dyn BitBox02Bridge>,
    store: AccountStore,
    pager: Pager,
    unlocked_account: u32,
    xpub: Option<XPub>,
    initialized: bool,
}

impl BitBox02Keyring {
    pub fn new(bridge: Arc<dyn BitBox02Bridge>) -> Self {
        Self {
            bridge,
            store: AccountStore::default(),
            pager: Pager::default(),
            unlocked_account: 0,
            xpub: None,
            initialized: false,
        }
    }

    pub fn with_bridge(bridge: Option<Arc<dyn BitBox02Bridge>>) -> Result<Self, KeyringError> {
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

    async fn root_xpub(&mut self) -> Result<XPub, KeyringError> {
        if let Some(xpub) = &self.xpub {
            return Ok(xpub.clone());
        }
        self.ensure_unlocked().await?;
        let path = HdPathType::Bip44.base_path();
        let encoded = self.bridge.root_public_key(path).await?;
        let xpub = parse_xpub(&encoded)?;
        self.xpub = Some(xpub.clone());
        Ok(xpub)
    }

    async fn derive_address(&mut self, index: u32) -> Result<Address, KeyringError> {
        let xpub = self.root_xpub().await?;
        let address = derive_child_address(&xpub, index)?;
        self.store.cache_index(address, index);
        Ok(address)
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
        Ok(HdPathType::Bip44.child_path(index))
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
impl Keyring for BitBox02Keyring {
    fn keyring_type(&self) -> KeyringType {
        KeyringType::BitBox02
    }

    fn serialize(&self) -> SerializedKeyring {
        let mut out = SerializedKeyring {
            page: self.pager.page,
            per_page: self.pager.per_page,
            unlocked_account: self.unlocked_account,
            hd_path: HdPathType::Bip44.base_path().to_owned(),
            hd_path_type: Some(HdPathType::Bip44),
            ..Default::default()
        };
        self.store.write_to(&mut out);
        out
    }

    fn deserialize(&mut self, opts: SerializedKeyring) -> Result<(), KeyringError> {
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
        if hd_path_type != HdPathType::Bip44 {
            return Err(KeyringError::NotSupported);
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
                    hd_path: HdPathType::Bip44.child_path(index),
                    hd_path_type: HdPathType::Bip44,
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
        let payload = BitBox02Transaction::load(tx, DEFAULT_CHAIN_ID)?;
        let raw_sig = self.bridge.sign_transaction(&path, &payload).await?;
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
        // the device only speaks the V4 encoding
        if version != TypedDataVersion::V4 {
            return Err(KeyringError::NotSupported);
        }
        self.ensure_unlocked().await?;
        let digests = hash_typed_data(typed_data, version)?;
        let path = self.resolve_path(address).await?;
        let payload = serde_json::to_string(typed_data)
            .map_err(|e| KeyringError::Bridge(hwkeyring_bridge::BridgeError::ResponseShape(
                e.to_string(),
            )))?;
        let raw_sig = self.bridge.sign_typed_data(&path, &payload).await?;
        finish_message_signature(digests.digest, address, &raw_sig)
    }

    async fn forget_device(&mut self) -> Result<(), KeyringError> {
        self.bridge.clean_up().await?;
        self.store.clear();
        self.pager.reset();
        self.unlocked_account = 0;
        self.xpub = None;
        self.initialized = false;
        Ok(())
    }
}
