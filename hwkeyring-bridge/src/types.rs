use ethers_core::types::Address;
use serde::{Deserialize, Serialize};

/// What a device reports for one derivation path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAccount {
    pub address: Address,
    /// SEC1 hex of the public key, when the vendor protocol returns it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// BIP-32 chain code hex, when requested from the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_code: Option<String>,
}

impl DeviceAccount {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            public_key: None,
            chain_code: None,
        }
    }
}
