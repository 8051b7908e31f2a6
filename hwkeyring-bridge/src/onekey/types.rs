use crate::error::BridgeError;
use ethers_core::types::{transaction::eip2718::TypedTransaction, NameOrAddress, U256};
use serde::{Deserialize, Serialize};

/// One attached device as reported by discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneKeyDevice {
    pub device_id: String,
    pub connect_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Session features reported by the device on init.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneKeyFeatures {
    pub device_id: String,
    /// `major.minor.patch`
    pub firmware_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub passphrase_protection: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneKeyAccessListItem {
    pub address: String,
    pub storage_keys: Vec<String>,
}

/// Field-wise transaction payload in the shape the device protocol expects:
/// trimmed big-endian quantities as hex, empty strings for absent fields.
/// An EIP-1559 transaction is recognized by its fee fields; a legacy or
/// EIP-2930 one by `gas_price`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneKeyTransaction {
    pub nonce: String,
    pub gas_price: String,
    pub gas_limit: String,
    pub to: String,
    pub value: String,
    pub data: String,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_fee_per_gas: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_priority_fee_per_gas: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_list: Vec<OneKeyAccessListItem>,
}

impl OneKeyTransaction {
    fn trimmed_hex(value: &U256) -> String {
        let mut buf = [0u8; 32];
        value.to_big_endian(&mut buf);
        let bytes = &buf[value.leading_zeros() as usize / 8..];
        format!("0x{}", hex::encode(bytes))
    }

    /// Flattens a typed transaction into the device payload.
    pub fn load(tx: &TypedTransaction, chain_id: u64) -> Result<Self, BridgeError> {
        let to = match tx.to() {
            Some(NameOrAddress::Name(_)) => return Err(BridgeError::NoEnsSupport),
            Some(NameOrAddress::Address(value)) => format!("0x{}", hex::encode(value)),
            // contract creation
            None => String::new(),
        };

        let nonce = tx.nonce().map_or_else(String::new, Self::trimmed_hex);
        let gas_limit = tx.gas().map_or_else(String::new, Self::trimmed_hex);
        let value = tx.value().map_or_else(String::new, Self::trimmed_hex);
        let data = tx
            .data()
            .map_or_else(String::new, |d| format!("0x{}", hex::encode(d)));
        let chain_id = tx.chain_id().map(|id| id.as_u64()).unwrap_or(chain_id);

        match tx {
            TypedTransaction::Legacy(_) | TypedTransaction::Eip2930(_) => Ok(Self {
                nonce,
                gas_price: tx
                    .gas_price()
                    .map_or_else(String::new, |v| Self::trimmed_hex(&v)),
                gas_limit,
                to,
                value,
                data,
                chain_id,
                ..Default::default()
            }),
            TypedTransaction::Eip1559(inner) => {
                let access_list = inner
                    .access_list
                    .0
                    .iter()
                    .map(|item| OneKeyAccessListItem {
                        address: format!("0x{}", hex::encode(item.address)),
                        storage_keys: item
                            .storage_keys
                            .iter()
                            .map(|key| format!("0x{}", hex::encode(key)))
                            .collect(),
                    })
                    .collect();

                Ok(Self {
                    nonce,
                    gas_price: String::new(),
                    gas_limit,
                    to,
                    value,
                    data,
                    chain_id,
                    max_fee_per_gas: inner
                        .max_fee_per_gas
                        .map_or_else(String::new, |v| Self::trimmed_hex(&v)),
                    max_priority_fee_per_gas: inner
                        .max_priority_fee_per_gas
                        .map_or_else(String::new, |v| Self::trimmed_hex(&v)),
                    access_list,
                })
            }
        }
    }
}
