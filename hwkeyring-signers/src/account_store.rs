//! Account bookkeeping shared by every vendor keyring.
//!
//! Two stores with fixed precedence: `details` is durable and
//! authoritative, `paths` is a session cache that speeds up repeated
//! lookups within one unlock. Removal clears both — leaving a dangling
//! cache entry behind a removed account could resolve a future address to
//! a stale path.

use crate::{error::KeyringError, SerializedKeyring};
use ethers_core::types::Address;
use hwkeyring_core::{checksum, AccountDetail};
use std::collections::HashMap;
use tracing::warn;

#[derive(Clone, Debug, Default)]
pub(crate) struct AccountStore {
    accounts: Vec<Address>,
    details: HashMap<Address, AccountDetail>,
    paths: HashMap<Address, u32>,
}

impl AccountStore {
    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains(address)
    }

    pub fn accounts(&self) -> &[Address] {
        &self.accounts
    }

    pub fn checksummed(&self) -> Vec<String> {
        self.accounts.iter().map(checksum).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Adds an account with its durable derivation record. Idempotent on
    /// the address; the detail snapshot of the first addition wins.
    pub fn add(&mut self, address: Address, detail: AccountDetail) {
        if !self.contains(&address) {
            self.accounts.push(address);
            self.paths.insert(address, detail.index);
            self.details.insert(address, detail);
        }
    }

    pub fn cache_index(&mut self, address: Address, index: u32) {
        self.paths.insert(address, index);
    }

    /// The derivation index behind an address. The durable record wins over
    /// the session cache.
    pub fn index_of(&self, address: &Address) -> Option<u32> {
        self.details
            .get(address)
            .map(|detail| detail.index)
            .or_else(|| self.paths.get(address).copied())
    }

    pub fn detail(&self, address: &Address) -> Option<&AccountDetail> {
        self.details.get(address)
    }

    pub fn remove(&mut self, address: &Address) -> Result<(), KeyringError> {
        if !self.contains(address) {
            return Err(KeyringError::AddressNotFound(checksum(address)));
        }
        self.accounts.retain(|existing| existing != address);
        self.details.remove(address);
        self.paths.remove(address);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.accounts.clear();
        self.details.clear();
        self.paths.clear();
    }

    pub fn clear_session_cache(&mut self) {
        self.paths.clear();
    }

    pub fn write_to(&self, out: &mut SerializedKeyring) {
        out.accounts = self.checksummed();
        out.account_details = self
            .details
            .iter()
            .map(|(address, detail)| (checksum(address), detail.clone()))
            .collect();
        out.paths = self
            .paths
            .iter()
            .map(|(address, index)| (checksum(address), *index))
            .collect();
    }

    pub fn read_from(&mut self, opts: &SerializedKeyring) {
        self.clear();
        for entry in &opts.accounts {
            match entry.parse::<Address>() {
                Ok(address) => self.accounts.push(address),
                Err(_) => warn!(%entry, "dropping unparseable persisted account"),
            }
        }
        for (entry, detail) in &opts.account_details {
            match entry.parse::<Address>() {
                Ok(address) => {
                    self.details.insert(address, detail.clone());
                }
                Err(_) => warn!(%entry, "dropping unparseable persisted account detail"),
            }
        }
        for (entry, index) in &opts.paths {
            if let Ok(address) = entry.parse::<Address>() {
                self.paths.insert(address, *index);
            }
        }
    }
}
