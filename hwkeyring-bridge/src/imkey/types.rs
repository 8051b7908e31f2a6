use crate::error::BridgeError;
use ethers_core::types::{transaction::eip2718::TypedTransaction, NameOrAddress, U256};
use serde::{Deserialize, Serialize};

/// Transaction envelope discriminant on the imKey wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImKeyTxType {
    #[default]
    Legacy,
    Eip1559,
}

/// The transaction fields the device needs to rebuild and sign the RLP
/// itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImKeyTransaction {
    pub tx_type: ImKeyTxType,
    pub chain_id: u64,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gas_price: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_fee_per_gas: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_priority_fee_per_gas: String,
    pub gas_limit: String,
    pub to: String,
    pub value: String,
    pub data: String,
}

impl ImKeyTransaction {
    fn trimmed_hex(value: &U256) -> String {
        let mut buf = [0u8; 32];
        value.to_big_endian(&mut buf);
        let bytes = &buf[value.leading_zeros() as usize / 8..];
        format!("0x{}", hex::encode(bytes))
    }

    pub fn load(tx: &TypedTransaction, chain_id: u64) -> Result<Self, BridgeError> {
        let to = match tx.to() {
            Some(NameOrAddress::Name(_)) => return Err(BridgeError::NoEnsSupport),
            Some(NameOrAddress::Address(value)) => format!("0x{}", hex::encode(value)),
            None => String::new(),
        };

        let mut payload = Self {
            chain_id: tx.chain_id().map(|id| id.as_u64()).unwrap_or(chain_id),
            nonce: tx.nonce().map_or_else(String::new, Self::trimmed_hex),
            gas_limit: tx.gas().map_or_else(String::new, Self::trimmed_hex),
            to,
            value: tx.value().map_or_else(String::new, Self::trimmed_hex),
            data: tx
                .data()
                .map_or_else(String::new, |d| format!("0x{}", hex::encode(d))),
            ..Default::default()
        };

        match tx {
            TypedTransaction::Legacy(_) | TypedTransaction::Eip2930(_) => {
                payload.tx_type = ImKeyTxType::Legacy;
                payload.gas_price = tx
                    .gas_price()
                    .map_or_else(String::new, |v| Self::trimmed_hex(&v));
            }
            TypedTransaction::Eip1559(inner) => {
                payload.tx_type = ImKeyTxType::Eip1559;
                payload.max_fee_per_gas = inner
                    .max_fee_per_gas
                    .map_or_else(String::new, |v| Self::trimmed_hex(&v));
                payload.max_priority_fee_per_gas = inner
                    .max_priority_fee_per_gas
                    .map_or_else(String::new, |v| Self::trimmed_hex(&v));
            }
        }
        Ok(payload)
    }
}
