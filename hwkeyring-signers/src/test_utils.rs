//! Deterministic fake devices for keyring tests. Every mock signs with real
//! keys derived from a fixed seed, so signature recovery genuinely succeeds
//! — or genuinely fails when a test tells the "device" to use a wrong key.

use async_trait::async_trait;
use coins_bip32::{
    enc::{MainnetEncoder, XKeyEncoder},
    xkeys::{Parent, XPriv},
};
use ethers_core::{
    k256::{ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint},
    types::{
        transaction::eip2718::TypedTransaction,
        transaction::eip2930::{AccessList, AccessListItem},
        Address, Bytes, Eip1559TransactionRequest, TransactionRequest, H256, U256,
    },
    utils::{hash_message, keccak256, secret_key_to_address},
};
use hwkeyring_bridge::{
    BitBox02Bridge, BitBox02Transaction, BridgeError, DeviceAccount, ImKeyBridge,
    ImKeyTransaction, ImKeyTxType, LedgerBridge, OneKeyBridge, OneKeyDevice, OneKeyFeatures,
    OneKeyTransaction,
};
use hwkeyring_core::{assemble_tx_signature, hash_typed_data, RawSignature, TypedDataVersion};
use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) struct TestDevice {
    root: XPriv,
}

impl TestDevice {
    pub fn new() -> Self {
        Self::with_seed(b"hwkeyring signer test seed......")
    }

    pub fn with_seed(seed: &[u8]) -> Self {
        Self {
            root: XPriv::root_from_seed(seed, None).unwrap(),
        }
    }

    fn xpriv_at(&self, path: &str) -> XPriv {
        self.root.derive_path(path).unwrap()
    }

    pub fn key_at(&self, path: &str) -> SigningKey {
        let xpriv = self.xpriv_at(path);
        let key: &SigningKey = xpriv.as_ref();
        key.clone()
    }

    pub fn address_at(&self, path: &str) -> Address {
        secret_key_to_address(&self.key_at(path))
    }

    pub fn xpub_at(&self, path: &str) -> String {
        MainnetEncoder::xpub_to_base58(&self.xpriv_at(path).verify_key()).unwrap()
    }

    pub fn compressed_pubkey_at(&self, path: &str) -> String {
        let key = self.key_at(path);
        hex::encode(key.verifying_key().to_encoded_point(true).as_bytes())
    }
}

fn sign_digest(key: &SigningKey, digest: H256) -> (Vec<u8>, Vec<u8>, u8) {
    let (sig, recid) = key.sign_prehash_recoverable(digest.as_bytes()).unwrap();
    let bytes = sig.to_bytes();
    (bytes[..32].to_vec(), bytes[32..].to_vec(), recid.to_byte())
}

fn u256(hex_str: &str) -> U256 {
    let stripped = hex_str.trim_start_matches("0x");
    if stripped.is_empty() {
        U256::zero()
    } else {
        U256::from_str_radix(stripped, 16).unwrap()
    }
}

fn data_bytes(hex_str: &str) -> Option<Bytes> {
    let stripped = hex_str.trim_start_matches("0x");
    if hex_str.is_empty() || stripped.is_empty() {
        None
    } else {
        Some(Bytes::from(hex::decode(stripped).unwrap()))
    }
}

pub(crate) fn rebuild_onekey_tx(payload: &OneKeyTransaction) -> TypedTransaction {
    if payload.max_fee_per_gas.is_empty() && payload.max_priority_fee_per_gas.is_empty() {
        let mut req = TransactionRequest::new().chain_id(payload.chain_id);
        if !payload.nonce.is_empty() {
            req = req.nonce(u256(&payload.nonce));
        }
        if !payload.gas_limit.is_empty() {
            req = req.gas(u256(&payload.gas_limit));
        }
        if !payload.gas_price.is_empty() {
            req = req.gas_price(u256(&payload.gas_price));
        }
        if !payload.value.is_empty() {
            req = req.value(u256(&payload.value));
        }
        if !payload.to.is_empty() {
            req = req.to(payload.to.parse::<Address>().unwrap());
        }
        if let Some(data) = data_bytes(&payload.data) {
            req = req.data(data);
        }
        req.into()
    } else {
        let mut req = Eip1559TransactionRequest::new().chain_id(payload.chain_id);
        if !payload.nonce.is_empty() {
            req = req.nonce(u256(&payload.nonce));
        }
        if !payload.gas_limit.is_empty() {
            req = req.gas(u256(&payload.gas_limit));
        }
        if !payload.max_fee_per_gas.is_empty() {
            req = req.max_fee_per_gas(u256(&payload.max_fee_per_gas));
        }
        if !payload.max_priority_fee_per_gas.is_empty() {
            req = req.max_priority_fee_per_gas(u256(&payload.max_priority_fee_per_gas));
        }
        if !payload.value.is_empty() {
            req = req.value(u256(&payload.value));
        }
        if !payload.to.is_empty() {
            req = req.to(payload.to.parse::<Address>().unwrap());
        }
        if let Some(data) = data_bytes(&payload.data) {
            req = req.data(data);
        }
        if !payload.access_list.is_empty() {
            req = req.access_list(AccessList(
                payload
                    .access_list
                    .iter()
                    .map(|item| AccessListItem {
                        address: item.address.parse().unwrap(),
                        storage_keys: item
                            .storage_keys
                            .iter()
                            .map(|key| key.parse().unwrap())
                            .collect(),
                    })
                    .collect(),
            ));
        }
        req.into()
    }
}

pub(crate) fn rebuild_bitbox02_tx(payload: &BitBox02Transaction) -> TypedTransaction {
    let proxy = OneKeyTransaction {
        nonce: payload.nonce.clone(),
        gas_price: payload.gas_price.clone(),
        gas_limit: payload.gas_limit.clone(),
        to: payload.recipient.clone(),
        value: payload.value.clone(),
        data: payload.data.clone(),
        chain_id: payload.chain_id,
        max_fee_per_gas: payload.max_fee_per_gas.clone(),
        max_priority_fee_per_gas: payload.max_priority_fee_per_gas.clone(),
        access_list: vec![],
    };
    rebuild_onekey_tx(&proxy)
}

pub(crate) fn rebuild_imkey_tx(payload: &ImKeyTransaction) -> TypedTransaction {
    let proxy = OneKeyTransaction {
        nonce: payload.nonce.clone(),
        gas_price: payload.gas_price.clone(),
        gas_limit: payload.gas_limit.clone(),
        to: payload.to.clone(),
        value: payload.value.clone(),
        data: payload.data.clone(),
        chain_id: payload.chain_id,
        max_fee_per_gas: payload.max_fee_per_gas.clone(),
        max_priority_fee_per_gas: payload.max_priority_fee_per_gas.clone(),
        access_list: vec![],
    };
    let rebuilt = rebuild_onekey_tx(&proxy);
    match (payload.tx_type, &rebuilt) {
        (ImKeyTxType::Legacy, TypedTransaction::Legacy(_))
        | (ImKeyTxType::Eip1559, TypedTransaction::Eip1559(_)) => rebuilt,
        _ => panic!("payload discriminant does not match its fields"),
    }
}

pub(crate) struct MockLedgerBridge {
    pub device: TestDevice,
    pub sign_with: Option<SigningKey>,
    pub init_calls: AtomicU32,
}

impl MockLedgerBridge {
    pub fn new() -> Self {
        Self {
            device: TestDevice::new(),
            sign_with: None,
            init_calls: AtomicU32::new(0),
        }
    }

    pub fn signing_with(key: SigningKey) -> Self {
        Self {
            sign_with: Some(key),
            ..Self::new()
        }
    }

    fn sign(&self, hd_path: &str, digest: H256) -> RawSignature {
        let key = self
            .sign_with
            .clone()
            .unwrap_or_else(|| self.device.key_at(hd_path));
        let (r, s, parity) = sign_digest(&key, digest);
        RawSignature::from_bytes(&r, &s, 27 + parity as u64)
    }
}

#[async_trait]
impl LedgerBridge for MockLedgerBridge {
    async fn init(&self) -> Result<(), BridgeError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn app_configuration(&self) -> Result<String, BridgeError> {
        Ok("1.10.0".to_owned())
    }

    async fn get_address(&self, hd_path: &str) -> Result<DeviceAccount, BridgeError> {
        Ok(DeviceAccount::new(self.device.address_at(hd_path)))
    }

    async fn sign_transaction(
        &self,
        hd_path: &str,
        raw_tx: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        Ok(self.sign(hd_path, H256::from(keccak256(raw_tx))))
    }

    async fn sign_personal_message(
        &self,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        Ok(self.sign(hd_path, hash_message(message)))
    }

    async fn sign_typed_data(
        &self,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError> {
        let message_hash = message_hash.ok_or(BridgeError::NotSupported)?;
        let mut preimage = vec![0x19, 0x01];
        preimage.extend_from_slice(domain_separator.as_bytes());
        preimage.extend_from_slice(message_hash.as_bytes());
        Ok(self.sign(hd_path, H256::from(keccak256(&preimage))))
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

pub(crate) struct MockOneKeyBridge {
    pub device: TestDevice,
    pub devices: Vec<OneKeyDevice>,
    pub sign_with: Option<SigningKey>,
    pub features_calls: AtomicU32,
    pub pubkey_calls: AtomicU32,
}

impl MockOneKeyBridge {
    pub fn new() -> Self {
        Self {
            device: TestDevice::new(),
            devices: vec![OneKeyDevice {
                device_id: "device-1".to_owned(),
                connect_id: "connect-1".to_owned(),
                label: None,
            }],
            sign_with: None,
            features_calls: AtomicU32::new(0),
            pubkey_calls: AtomicU32::new(0),
        }
    }

    pub fn without_devices() -> Self {
        Self {
            devices: vec![],
            ..Self::new()
        }
    }

    fn sign(&self, hd_path: &str, digest: H256) -> RawSignature {
        let key = self
            .sign_with
            .clone()
            .unwrap_or_else(|| self.device.key_at(hd_path));
        let (r, s, parity) = sign_digest(&key, digest);
        RawSignature::from_bytes(&r, &s, 27 + parity as u64)
    }
}

#[async_trait]
impl OneKeyBridge for MockOneKeyBridge {
    async fn init(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn search_devices(&self) -> Result<Vec<OneKeyDevice>, BridgeError> {
        Ok(self.devices.clone())
    }

    async fn get_features(&self, _connect_id: &str) -> Result<OneKeyFeatures, BridgeError> {
        self.features_calls.fetch_add(1, Ordering::SeqCst);
        Ok(OneKeyFeatures {
            device_id: "device-1".to_owned(),
            firmware_version: "2.6.0".to_owned(),
            session_id: Some("session-1".to_owned()),
            passphrase_protection: false,
        })
    }

    async fn get_public_key(
        &self,
        _connect_id: &str,
        hd_path: &str,
    ) -> Result<String, BridgeError> {
        self.pubkey_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.device.xpub_at(hd_path))
    }

    async fn sign_transaction(
        &self,
        _connect_id: &str,
        hd_path: &str,
        tx: &OneKeyTransaction,
    ) -> Result<RawSignature, BridgeError> {
        let rebuilt = rebuild_onekey_tx(tx);
        Ok(self.sign(hd_path, rebuilt.sighash()))
    }

    async fn sign_personal_message(
        &self,
        _connect_id: &str,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        Ok(self.sign(hd_path, hash_message(message)))
    }

    async fn sign_typed_data(
        &self,
        _connect_id: &str,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError> {
        let message_hash = message_hash.ok_or(BridgeError::NotSupported)?;
        let mut preimage = vec![0x19, 0x01];
        preimage.extend_from_slice(domain_separator.as_bytes());
        preimage.extend_from_slice(message_hash.as_bytes());
        Ok(self.sign(hd_path, H256::from(keccak256(&preimage))))
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

pub(crate) struct MockBitBox02Bridge {
    pub device: TestDevice,
    pub sign_with: Option<SigningKey>,
    pub init_calls: AtomicU32,
}

impl MockBitBox02Bridge {
    pub fn new() -> Self {
        Self {
            device: TestDevice::new(),
            sign_with: None,
            init_calls: AtomicU32::new(0),
        }
    }

    fn sign(&self, keypath: &str, digest: H256) -> RawSignature {
        let key = self
            .sign_with
            .clone()
            .unwrap_or_else(|| self.device.key_at(keypath));
        let (r, s, parity) = sign_digest(&key, digest);
        // this vendor reports the bare recovery id
        RawSignature::from_bytes(&r, &s, parity as u64)
    }
}

#[async_trait]
impl BitBox02Bridge for MockBitBox02Bridge {
    async fn init(&self) -> Result<(), BridgeError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn root_public_key(&self, keypath: &str) -> Result<String, BridgeError> {
        Ok(self.device.xpub_at(keypath))
    }

    async fn sign_transaction(
        &self,
        keypath: &str,
        tx: &BitBox02Transaction,
    ) -> Result<RawSignature, BridgeError> {
        let rebuilt = rebuild_bitbox02_tx(tx);
        Ok(self.sign(keypath, rebuilt.sighash()))
    }

    async fn sign_personal_message(
        &self,
        keypath: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        Ok(self.sign(keypath, hash_message(message)))
    }

    async fn sign_typed_data(
        &self,
        keypath: &str,
        typed_data_json: &str,
    ) -> Result<RawSignature, BridgeError> {
        // this vendor hashes the full payload on-device
        let typed_data = serde_json::from_str(typed_data_json)
            .map_err(|e| BridgeError::ResponseShape(e.to_string()))?;
        let digests = hash_typed_data(&typed_data, TypedDataVersion::V4)
            .map_err(|e| BridgeError::ResponseShape(e.to_string()))?;
        Ok(self.sign(keypath, digests.digest))
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

pub(crate) struct MockImKeyBridge {
    pub device: TestDevice,
    pub sign_with: Option<SigningKey>,
}

impl MockImKeyBridge {
    pub fn new() -> Self {
        Self {
            device: TestDevice::new(),
            sign_with: None,
        }
    }

    pub fn signing_with(key: SigningKey) -> Self {
        Self {
            sign_with: Some(key),
            ..Self::new()
        }
    }

    fn key_for(&self, hd_path: &str) -> SigningKey {
        self.sign_with
            .clone()
            .unwrap_or_else(|| self.device.key_at(hd_path))
    }
}

#[async_trait]
impl ImKeyBridge for MockImKeyBridge {
    async fn init(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn get_address(&self, hd_path: &str) -> Result<DeviceAccount, BridgeError> {
        Ok(DeviceAccount {
            address: self.device.address_at(hd_path),
            public_key: Some(self.device.compressed_pubkey_at(hd_path)),
            chain_code: None,
        })
    }

    async fn sign_transaction(
        &self,
        hd_path: &str,
        tx: &ImKeyTransaction,
    ) -> Result<Vec<u8>, BridgeError> {
        let rebuilt = rebuild_imkey_tx(tx);
        let key = self.key_for(hd_path);
        let (r, s, parity) = sign_digest(&key, rebuilt.sighash());
        let signature = assemble_tx_signature(
            &rebuilt,
            U256::from_big_endian(&r),
            U256::from_big_endian(&s),
            parity as u64,
        )
        .map_err(|e| BridgeError::ResponseShape(e.to_string()))?;
        Ok(rebuilt.rlp_signed(&signature).to_vec())
    }

    async fn sign_personal_message(
        &self,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        let (r, s, parity) = sign_digest(&self.key_for(hd_path), hash_message(message));
        Ok(RawSignature::from_bytes(&r, &s, 27 + parity as u64))
    }

    async fn sign_typed_data(
        &self,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError> {
        let message_hash = message_hash.ok_or(BridgeError::NotSupported)?;
        let mut preimage = vec![0x19, 0x01];
        preimage.extend_from_slice(domain_separator.as_bytes());
        preimage.extend_from_slice(message_hash.as_bytes());
        let (r, s, parity) =
            sign_digest(&self.key_for(hd_path), H256::from(keccak256(&preimage)));
        Ok(RawSignature::from_bytes(&r, &s, 27 + parity as u64))
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// The typed-data fixture used across keyring tests.
pub(crate) fn mail_typed_data() -> ethers_core::types::transaction::eip712::TypedData {
    serde_json::from_str(
        r#"{
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" }
            ],
            "Person": [
                { "name": "name", "type": "string" },
                { "name": "wallet", "type": "address" }
            ],
            "Mail": [
                { "name": "from", "type": "Person" },
                { "name": "to", "type": "Person" },
                { "name": "contents", "type": "string" }
            ]
        },
        "primaryType": "Mail",
        "domain": {
            "name": "Ether Mail",
            "version": "1",
            "chainId": 1,
            "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
        },
        "message": {
            "from": { "name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826" },
            "to": { "name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB" },
            "contents": "Hello, Bob!"
        }
    }"#,
    )
    .unwrap()
}
