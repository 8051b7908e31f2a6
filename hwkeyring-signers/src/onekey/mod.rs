//! OneKey keyring. The device exports an xpub at the active convention's
//! base path, so account pages derive locally; only the LedgerLive-style
//! convention (hardened account component) needs one device round-trip per
//! index. Tracks a base-public-key fingerprint per convention so accounts
//! derived under an inactive convention are hidden, not deleted.

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
use hwkeyring_bridge::{BridgeError, OneKeyBridge, OneKeyTransaction};
use hwkeyring_core::{
    address_from_pubkey, checksum, derive_child_address, hash_typed_data, parse_xpub,
    pubkey_fingerprint, AccountDetail, CoreError, HdPathType, KeyringType, PageAccount,
    TypedDataVersion, UnlockStatus,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::debug;

/// Upper bound of the brute-force index scan when an address has no
/// recorded path.
pub const MAX_INDEX: u32 = 1000;

// after a fresh unlock the passphrase popup needs a moment to settle
// before the next device prompt grabs focus
const SETTLE_DELAY: Duration = Duration::from_millis(200);

const DEFAULT_CHAIN_ID: u64 = 1;

struct DeviceSession {
    device_id: String,
    connect_id: String,
    #[allow(dead_code)]
    passphrase_protection: bool,
}

pub struct OneKeyKeyring {
    bridge: Arc<dyn OneKeyBridge>,
    store: AccountStore,
    pager: Pager,
    unlocked_account: u32,
    hd_path_type: HdPathType,
    session: Option<DeviceSession>,
    xpubs: HashMap<HdPathType, XPub>,
    base_public_keys: HashMap<HdPathType, String>,
}

impl OneKeyKeyring {
    pub fn new(bridge: Arc<dyn OneKeyBridge>) -> Self {
        Self {
            bridge,
            store: AccountStore::default(),
            pager: Pager::default(),
            unlocked_account: 0,
            hd_path_type: HdPathType::Bip44,
            session: None,
            xpubs: HashMap::new(),
            base_public_keys: HashMap::new(),
        }
    }

    pub fn with_bridge(bridge: Option<Arc<dyn OneKeyBridge>>) -> Result<Self, KeyringError> {
        Ok(Self::new(bridge.ok_or(KeyringError::BridgeRequired)?))
    }

    fn connect_id(&self) -> Result<String, KeyringError> {
        self.session
            .as_ref()
            .map(|session| session.connect_id.clone())
            .ok_or(KeyringError::Bridge(BridgeError::Disconnected))
    }

    async fn ensure_ready(&mut self) -> Result<(), KeyringError> {
        if self.session.is_none() {
            let status = self.unlock().await?;
            if status == UnlockStatus::Unlocked {
                tokio::time::sleep(SETTLE_DELAY).await;
            }
        }
        Ok(())
    }

    async fn fetch_xpub(&self, path: &str) -> Result<XPub, KeyringError> {
        let connect_id = self.connect_id()?;
        let encoded = self.bridge.get_public_key(&connect_id, path).await?;
        Ok(parse_xpub(&encoded)?)
    }

    async fn active_xpub(&mut self) -> Result<XPub, KeyringError> {
        if let Some(xpub) = self.xpubs.get(&self.hd_path_type) {
            return Ok(xpub.clone());
        }
        let path = self
            .hd_path_type
            .xpub_path()
            .ok_or(KeyringError::NotSupported)?;
        let xpub = self.fetch_xpub(path).await?;
        self.xpubs.insert(self.hd_path_type, xpub.clone());
        Ok(xpub)
    }

    /// Fingerprint of the presently selected convention: the compressed
    /// public key at its base path.
    async fn active_fingerprint(&mut self) -> Result<String, KeyringError> {
        if let Some(fingerprint) = self.base_public_keys.get(&self.hd_path_type) {
            return Ok(fingerprint.clone());
        }
        let fingerprint = match self.hd_path_type.xpub_path() {
            Some(_) => {
                let xpub = self.active_xpub().await?;
                pubkey_fingerprint(&xpub)
            }
            None => {
                let path = self.hd_path_type.fingerprint_path();
                let xpub = self.fetch_xpub(&path).await?;
                pubkey_fingerprint(&xpub)
            }
        };
        self.base_public_keys
            .insert(self.hd_path_type, fingerprint.clone());
        Ok(fingerprint)
    }

    async fn derive_address(&mut self, index: u32) -> Result<Address, KeyringError> {
        let address = match self.hd_path_type.xpub_path() {
            Some(_) => {
                let xpub = self.active_xpub().await?;
                derive_child_address(&xpub, index)?
            }
            None => {
                let path = self.hd_path_type.child_path(index);
                let xpub = self.fetch_xpub(&path).await?;
                address_from_pubkey(xpub.as_ref())
            }
        };
        self.store.cache_index(address, index);
        Ok(address)
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
        self.ensure_ready().await?;
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
impl Keyring for OneKeyKeyring {
    fn keyring_type(&self) -> KeyringType {
        KeyringType::OneKey
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

    /// Only the accounts whose recorded fingerprint matches the presently
    /// selected convention. The rest stay hidden until the user switches
    /// back.
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
        let devices = self.bridge.search_devices().await?;
        let device = devices
            .into_iter()
            .next()
            .ok_or(KeyringError::Bridge(BridgeError::NoDeviceFound))?;

        if let Some(session) = &self.session {
            if session.device_id == device.device_id && session.connect_id == device.connect_id {
                // same device, live session: no second pairing prompt
                return Ok(UnlockStatus::AlreadyUnlocked);
            }
        }

        let features = self.bridge.get_features(&device.connect_id).await?;
        self.session = Some(DeviceSession {
            device_id: device.device_id,
            connect_id: device.connect_id,
            passphrase_protection: features.passphrase_protection,
        });
        self.xpubs.clear();
        self.base_public_keys.clear();
        self.active_fingerprint().await?;
        Ok(UnlockStatus::Unlocked)
    }

    async fn add_accounts(&mut self, count: usize) -> Result<Vec<String>, KeyringError> {
        self.ensure_ready().await?;
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
        self.ensure_ready().await?;
        self.resolve_index(address).await
    }

    async fn sign_transaction(
        &mut self,
        address: Address,
        tx: &TypedTransaction,
    ) -> Result<SignedTransaction, KeyringError> {
        self.ensure_ready().await?;
        let path = self.resolve_path(address).await?;
        let connect_id = self.connect_id()?;
        let payload = OneKeyTransaction::load(tx, DEFAULT_CHAIN_ID)?;
        let raw_sig = self
            .bridge
            .sign_transaction(&connect_id, &path, &payload)
            .await?;
        let (r, s, v) = raw_sig.components()?;
        finish_transaction(tx, address, r, s, v)
    }

    async fn sign_personal_message(
        &mut self,
        address: Address,
        message: &[u8],
    ) -> Result<Signature, KeyringError> {
        self.ensure_ready().await?;
        let path = self.resolve_path(address).await?;
        let connect_id = self.connect_id()?;
        let raw_sig = self
            .bridge
            .sign_personal_message(&connect_id, &path, message)
            .await?;
        finish_message_signature(hash_message(message), address, &raw_sig)
    }

    async fn sign_typed_data(
        &mut self,
        address: Address,
        typed_data: &TypedData,
        version: TypedDataVersion,
    ) -> Result<Signature, KeyringError> {
        self.ensure_ready().await?;
        let digests = hash_typed_data(typed_data, version).map_err(|err| match err {
            CoreError::UnsupportedTypedDataVersion(_) => KeyringError::NotSupported,
            other => KeyringError::from(other),
        })?;
        let path = self.resolve_path(address).await?;
        let connect_id = self.connect_id()?;
        let raw_sig = self
            .bridge
            .sign_typed_data(
                &connect_id,
                &path,
                digests.domain_separator,
                digests.message_hash,
            )
            .await?;
        finish_message_signature(digests.digest, address, &raw_sig)
    }

    async fn forget_device(&mut self) -> Result<(), KeyringError> {
        self.bridge.clean_up().await?;
        self.session = None;
        self.xpubs.clear();
        self.base_public_keys.clear();
        self.store.clear();
        self.pager.reset();
        self.unlocked_account = 0;
        Ok(())
    }
}
