//! Vendor and derivation-path discriminants shared across the workspace.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// The hardware vendor families a keyring can be built for.
///
/// The string form is the identifier persisted alongside keyring state and
/// used at the bridge-factory boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyringType {
    Ledger,
    OneKey,
    BitBox02,
    ImKey,
}

impl KeyringType {
    /// All supported vendor families.
    pub const ALL: [KeyringType; 4] = [
        KeyringType::Ledger,
        KeyringType::OneKey,
        KeyringType::BitBox02,
        KeyringType::ImKey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyringType::Ledger => "Ledger Hardware",
            KeyringType::OneKey => "Onekey Hardware",
            KeyringType::BitBox02 => "BitBox02 Hardware",
            KeyringType::ImKey => "imKey Hardware",
        }
    }
}

impl fmt::Display for KeyringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a keyring-type identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown keyring type: {0}")]
pub struct UnknownKeyringType(pub String);

impl FromStr for KeyringType {
    type Err = UnknownKeyringType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyringType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownKeyringType(s.to_owned()))
    }
}

/// HD-path conventions a vendor may offer for account derivation.
///
/// The conventions are mutually exclusive per unlock session; switching the
/// active convention never rewrites the paths already recorded for existing
/// accounts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HdPathType {
    /// `m/44'/60'/0'/0/i`
    #[default]
    #[serde(rename = "BIP44")]
    Bip44,
    /// `m/44'/60'/0'/i`
    Legacy,
    /// `m/44'/60'/i'/0/0` — the account index is the hardened third
    /// component, not the final one.
    LedgerLive,
}

impl HdPathType {
    /// Path of the account at `index` under this convention.
    pub fn child_path(&self, index: u32) -> String {
        match self {
            HdPathType::Bip44 => format!("m/44'/60'/0'/0/{index}"),
            HdPathType::Legacy => format!("m/44'/60'/0'/{index}"),
            HdPathType::LedgerLive => format!("m/44'/60'/{index}'/0/0"),
        }
    }

    /// The hardened path an extended public key can be exported at so that
    /// accounts are plain (non-hardened) children of it. `None` when the
    /// convention hardens the account index itself, in which case every
    /// account needs its own device round-trip.
    pub fn xpub_path(&self) -> Option<&'static str> {
        match self {
            HdPathType::Bip44 => Some("m/44'/60'/0'/0"),
            HdPathType::Legacy => Some("m/44'/60'/0'"),
            HdPathType::LedgerLive => None,
        }
    }

    /// Path whose public key fingerprints the convention. Distinct across
    /// all conventions, unlike the first account path (which BIP44 and the
    /// LedgerLive-style convention share).
    pub fn fingerprint_path(&self) -> String {
        match self.xpub_path() {
            Some(base) => base.to_owned(),
            None => self.child_path(0),
        }
    }

    /// The string persisted as `hdPath` for this convention.
    pub fn base_path(&self) -> &'static str {
        match self {
            HdPathType::Bip44 => "m/44'/60'/0'/0",
            HdPathType::Legacy => "m/44'/60'/0'",
            HdPathType::LedgerLive => "m/44'/60'/0'/0/0",
        }
    }

    /// Recovers the convention from a persisted `hdPath` written before the
    /// enum form existed.
    pub fn from_base_path(path: &str) -> Option<Self> {
        match path {
            "m/44'/60'/0'/0" => Some(HdPathType::Bip44),
            "m/44'/60'/0'" => Some(HdPathType::Legacy),
            "m/44'/60'/0'/0/0" => Some(HdPathType::LedgerLive),
            _ => None,
        }
    }
}

impl fmt::Display for HdPathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HdPathType::Bip44 => "BIP44",
            HdPathType::Legacy => "Legacy",
            HdPathType::LedgerLive => "LedgerLive",
        };
        f.write_str(name)
    }
}

/// The durable record of how an account was derived. One entry per added
/// address; survives serialize/deserialize cycles and is authoritative over
/// any session cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetail {
    pub hd_path: String,
    pub hd_path_type: HdPathType,
    pub index: u32,
    /// Fingerprint of the path convention the account was derived under,
    /// for vendors that track several conventions at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hd_path_base_public_key: Option<String>,
}

/// The `eth_signTypedData` revisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypedDataVersion {
    V1,
    V3,
    V4,
}

/// Whether `unlock` had to establish a fresh device session.
///
/// Callers use this to decide if a settling delay is needed before issuing
/// the next popup-driven device operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnlockStatus {
    Unlocked,
    AlreadyUnlocked,
}

/// One row of the "browse accounts on device" listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAccount {
    /// Checksummed address.
    pub address: String,
    /// 1-based position, i.e. the derivation index plus one.
    pub index: u32,
}
