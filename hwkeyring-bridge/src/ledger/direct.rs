//! In-process Ledger bridge: frames the Ethereum app's APDU protocol over
//! an injected transport handle.
//! [Official docs](https://github.com/LedgerHQ/app-ethereum/blob/master/doc/ethapp.asc)

use crate::{
    error::{BridgeError, TransportError},
    factory::TransportFactory,
    ledger::LedgerBridge,
    types::DeviceAccount,
};
use async_trait::async_trait;
use ethers_core::types::{Address, H256};
use futures_util::lock::Mutex;
use hwkeyring_core::{RawSignature, RetryPolicy};
use semver::{Version, VersionReq};
use std::sync::Arc;
use tracing::debug;

/// One APDU sent to the Ethereum app. The class byte is fixed, so only the
/// instruction, its two parameters and the data field vary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApduCommand {
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

/// The data portion of an APDU reply. Status words are the transport's
/// concern; anything but success surfaces as a [`TransportError`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApduAnswer {
    pub data: Vec<u8>,
}

/// The raw device link, usually HID behind the vendor SDK. Implementations
/// exchange one APDU at a time; the device is strictly single-request.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    async fn exchange(&self, command: &ApduCommand) -> Result<ApduAnswer, TransportError>;
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Ins {
    GetPublicKey = 0x02,
    Sign = 0x04,
    GetAppConfiguration = 0x06,
    SignPersonalMessage = 0x08,
    SignEthEip712 = 0x0c,
}

const P1_NON_CONFIRM: u8 = 0x00;
const P1_FIRST: u8 = 0x00;
const P1_MORE: u8 = 0x80;
const P2_NO_CHAINCODE: u8 = 0x00;

// the app signs pre-hashed EIP-712 payloads from this version on
const EIP712_MIN_VERSION: &str = ">=1.6.0";

/// A Ledger bridge that owns the device handle in-process.
pub struct DirectLedgerBridge {
    factory: Arc<dyn TransportFactory<dyn LedgerTransport>>,
    transport: Mutex<Option<Arc<dyn LedgerTransport>>>,
    app_version: Mutex<Option<Version>>,
    retry: RetryPolicy,
}

impl DirectLedgerBridge {
    pub fn new(factory: Arc<dyn TransportFactory<dyn LedgerTransport>>) -> Self {
        Self {
            factory,
            transport: Mutex::new(None),
            app_version: Mutex::new(None),
            retry: RetryPolicy::default(),
        }
    }

    async fn handle(&self) -> Result<Arc<dyn LedgerTransport>, BridgeError> {
        let mut guard = self.transport.lock().await;
        if let Some(transport) = guard.as_ref() {
            return Ok(transport.clone());
        }
        let transport = self.factory.open().await?;
        *guard = Some(transport.clone());
        Ok(transport)
    }

    async fn reset_handle(&self) {
        *self.transport.lock().await = None;
    }

    /// Runs `op` against a live handle, re-opening it and resending on
    /// transient faults; a retry cap overrun becomes a hard disconnect.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, BridgeError>
    where
        F: Fn(Arc<dyn LedgerTransport>) -> Fut,
        Fut: std::future::Future<Output = Result<T, BridgeError>>,
    {
        let result = self
            .retry
            .run(
                |attempt| {
                    let op = &op;
                    async move {
                        if attempt > 0 {
                            self.reset_handle().await;
                        }
                        let transport = self.handle().await?;
                        op(transport).await
                    }
                },
                BridgeError::is_transient,
            )
            .await;
        result.map_err(|err| {
            if err.is_transient() {
                BridgeError::Disconnected
            } else {
                err
            }
        })
    }

    async fn fetch_app_version(&self) -> Result<Version, BridgeError> {
        let answer = self
            .with_retry(|transport| async move {
                let command = ApduCommand {
                    ins: Ins::GetAppConfiguration as u8,
                    p1: P1_NON_CONFIRM,
                    p2: P2_NO_CHAINCODE,
                    data: vec![],
                };
                Ok(transport.exchange(&command).await?)
            })
            .await?;
        if answer.data.len() < 4 {
            return Err(BridgeError::ShortResponse {
                got: answer.data.len(),
                at_least: 4,
            });
        }
        let version = Version::parse(&format!(
            "{}.{}.{}",
            answer.data[1], answer.data[2], answer.data[3]
        ))?;
        *self.app_version.lock().await = Some(version.clone());
        Ok(version)
    }

    async fn require_eip712_support(&self) -> Result<(), BridgeError> {
        let cached = self.app_version.lock().await.clone();
        let version = match cached {
            Some(version) => version,
            None => self.fetch_app_version().await?,
        };
        let req = VersionReq::parse(EIP712_MIN_VERSION)?;
        if !req.matches(&version) {
            return Err(BridgeError::UnsupportedFirmwareVersion(
                EIP712_MIN_VERSION.to_owned(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerBridge for DirectLedgerBridge {
    async fn init(&self) -> Result<(), BridgeError> {
        self.handle().await?;
        self.fetch_app_version().await?;
        Ok(())
    }

    async fn app_configuration(&self) -> Result<String, BridgeError> {
        Ok(self.fetch_app_version().await?.to_string())
    }

    async fn get_address(&self, hd_path: &str) -> Result<DeviceAccount, BridgeError> {
        let payload = path_to_bytes(hd_path)?;
        debug!(hd_path, "requesting address from device");
        self.with_retry(|transport| {
            let data = payload.clone();
            async move {
                let command = ApduCommand {
                    ins: Ins::GetPublicKey as u8,
                    p1: P1_NON_CONFIRM,
                    p2: P2_NO_CHAINCODE,
                    data,
                };
                let answer = transport.exchange(&command).await?;
                parse_address_answer(&answer)
            }
        })
        .await
    }

    async fn sign_transaction(
        &self,
        hd_path: &str,
        raw_tx: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        let mut payload = path_to_bytes(hd_path)?;
        payload.extend_from_slice(raw_tx);
        self.with_retry(|transport| {
            let payload = payload.clone();
            async move { sign_payload(transport.as_ref(), Ins::Sign, payload).await }
        })
        .await
    }

    async fn sign_personal_message(
        &self,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        let mut payload = path_to_bytes(hd_path)?;
        payload.extend_from_slice(&(message.len() as u32).to_be_bytes());
        payload.extend_from_slice(message);
        self.with_retry(|transport| {
            let payload = payload.clone();
            async move {
                sign_payload(transport.as_ref(), Ins::SignPersonalMessage, payload).await
            }
        })
        .await
    }

    async fn sign_typed_data(
        &self,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError> {
        // the EIP-712 instruction takes exactly two pre-computed hashes
        let message_hash = message_hash.ok_or(BridgeError::NotSupported)?;
        self.require_eip712_support().await?;

        let mut payload = path_to_bytes(hd_path)?;
        payload.extend_from_slice(domain_separator.as_bytes());
        payload.extend_from_slice(message_hash.as_bytes());
        self.with_retry(|transport| {
            let payload = payload.clone();
            async move { sign_payload(transport.as_ref(), Ins::SignEthEip712, payload).await }
        })
        .await
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        self.reset_handle().await;
        *self.app_version.lock().await = None;
        Ok(())
    }
}

/// Streams a payload to the device in 255-byte APDU chunks and reads the
/// `v || r || s` answer off the final exchange.
async fn sign_payload(
    transport: &dyn LedgerTransport,
    ins: Ins,
    payload: Vec<u8>,
) -> Result<RawSignature, BridgeError> {
    let mut command = ApduCommand {
        ins: ins as u8,
        p1: P1_FIRST,
        p2: P2_NO_CHAINCODE,
        data: vec![],
    };

    let mut result = Vec::new();
    let mut offset = 0;
    while offset < payload.len() {
        let end = usize::min(offset + 255, payload.len());
        command.data = payload[offset..end].to_vec();
        let answer = transport.exchange(&command).await?;
        result = answer.data;
        // every chunk after the first is a continuation
        command.p1 = P1_MORE;
        offset = end;
    }

    if result.len() < 65 {
        return Err(BridgeError::ShortResponse {
            got: result.len(),
            at_least: 65,
        });
    }
    Ok(RawSignature::from_bytes(
        &result[1..33],
        &result[33..65],
        result[0] as u64,
    ))
}

// [pk_len, pubkey..., addr_len, ascii-hex address...]
fn parse_address_answer(answer: &ApduAnswer) -> Result<DeviceAccount, BridgeError> {
    let result = &answer.data;
    if result.is_empty() {
        return Err(BridgeError::UnexpectedNullResponse);
    }
    let offset = 1 + result[0] as usize;
    if result.len() < offset + 1 {
        return Err(BridgeError::ShortResponse {
            got: result.len(),
            at_least: offset + 1,
        });
    }
    let addr_len = result[offset] as usize;
    if result.len() < offset + 1 + addr_len {
        return Err(BridgeError::ShortResponse {
            got: result.len(),
            at_least: offset + 1 + addr_len,
        });
    }
    let address_str = &result[offset + 1..offset + 1 + addr_len];
    let decoded = hex::decode(address_str)?;
    if decoded.len() != 20 {
        return Err(BridgeError::ResponseShape(format!(
            "expected a 20-byte address, got {} bytes",
            decoded.len()
        )));
    }
    let mut address = [0u8; 20];
    address.copy_from_slice(&decoded);

    Ok(DeviceAccount {
        address: Address::from(address),
        public_key: Some(hex::encode(&result[1..offset])),
        chain_code: None,
    })
}

// depth-prefixed big-endian components, hardened bit folded in
fn path_to_bytes(derivation: &str) -> Result<Vec<u8>, BridgeError> {
    let elements: Vec<&str> = derivation.split('/').skip(1).collect();
    let mut bytes = vec![elements.len() as u8];
    for element in elements {
        let hardened = element.contains('\'');
        let mut index: u32 = element
            .replace('\'', "")
            .parse()
            .map_err(|_| BridgeError::InvalidDerivationPath(derivation.to_owned()))?;
        if hardened {
            index |= 0x8000_0000;
        }
        bytes.extend(&index.to_be_bytes());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn path_bytes_are_depth_prefixed_and_hardened() {
        let bytes = path_to_bytes("m/44'/60'/0'/0/7").unwrap();
        assert_eq!(bytes[0], 5);
        assert_eq!(&bytes[1..5], &(44u32 | 0x8000_0000).to_be_bytes());
        assert_eq!(&bytes[5..9], &(60u32 | 0x8000_0000).to_be_bytes());
        assert_eq!(&bytes[17..21], &7u32.to_be_bytes());
        assert!(path_to_bytes("m/not-a-number").is_err());
    }

    struct ScriptedTransport {
        // queued answers, shared with the test body
        answers: StdMutex<Vec<Result<ApduAnswer, TransportError>>>,
        seen: StdMutex<Vec<ApduCommand>>,
    }

    impl ScriptedTransport {
        fn new(answers: Vec<Result<ApduAnswer, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: StdMutex::new(answers),
                seen: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LedgerTransport for ScriptedTransport {
        async fn exchange(&self, command: &ApduCommand) -> Result<ApduAnswer, TransportError> {
            self.seen.lock().unwrap().push(command.clone());
            self.answers.lock().unwrap().remove(0)
        }
    }

    struct ScriptedFactory {
        transport: Arc<ScriptedTransport>,
        opens: AtomicU32,
    }

    #[async_trait]
    impl TransportFactory<dyn LedgerTransport> for ScriptedFactory {
        async fn open(&self) -> Result<Arc<dyn LedgerTransport>, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(self.transport.clone())
        }
    }

    fn address_answer(address: Address) -> ApduAnswer {
        let pubkey = [0x04u8; 65];
        let ascii = hex::encode(address.as_bytes()).into_bytes();
        let mut data = vec![pubkey.len() as u8];
        data.extend_from_slice(&pubkey);
        data.push(ascii.len() as u8);
        data.extend_from_slice(&ascii);
        ApduAnswer { data }
    }

    #[tokio::test]
    async fn parses_the_address_answer() {
        let address: Address = "0x2ed7afa17473e17ac59908f088b4371d28585476"
            .parse()
            .unwrap();
        let transport = ScriptedTransport::new(vec![Ok(address_answer(address))]);
        let bridge = DirectLedgerBridge::new(Arc::new(ScriptedFactory {
            transport: transport.clone(),
            opens: AtomicU32::new(0),
        }));

        let account = bridge.get_address("m/44'/60'/0'/0/0").await.unwrap();
        assert_eq!(account.address, address);
        assert_eq!(account.public_key.unwrap().len(), 130);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].ins, Ins::GetPublicKey as u8);
    }

    #[tokio::test]
    async fn chunks_large_sign_payloads() {
        let mut signature = vec![27u8];
        signature.extend_from_slice(&[0x11; 32]);
        signature.extend_from_slice(&[0x22; 32]);
        // two chunks: both exchanges answer, only the last one counts
        let transport = ScriptedTransport::new(vec![
            Ok(ApduAnswer { data: vec![] }),
            Ok(ApduAnswer { data: signature }),
        ]);
        let bridge = DirectLedgerBridge::new(Arc::new(ScriptedFactory {
            transport: transport.clone(),
            opens: AtomicU32::new(0),
        }));

        let raw_tx = vec![0xeeu8; 300];
        let sig = bridge
            .sign_transaction("m/44'/60'/0'/0/0", &raw_tx)
            .await
            .unwrap();
        assert_eq!(sig.v, 27);
        assert_eq!(sig.r, format!("0x{}", "11".repeat(32)));

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].p1, P1_FIRST);
        assert_eq!(seen[0].data.len(), 255);
        assert_eq!(seen[1].p1, P1_MORE);
        // 21 path bytes + 300 tx bytes, minus the first chunk
        assert_eq!(seen[1].data.len(), 21 + 300 - 255);
    }

    #[tokio::test]
    async fn reopens_the_handle_on_transient_faults() {
        let address: Address = "0x2ed7afa17473e17ac59908f088b4371d28585476"
            .parse()
            .unwrap();
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Disconnected),
            Ok(address_answer(address)),
        ]);
        let factory = Arc::new(ScriptedFactory {
            transport,
            opens: AtomicU32::new(0),
        });
        let bridge = DirectLedgerBridge::new(factory.clone());

        let account = bridge.get_address("m/44'/60'/0'/0/0").await.unwrap();
        assert_eq!(account.address, address);
        assert_eq!(factory.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_become_a_disconnect() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Disconnected),
            Err(TransportError::Disconnected),
            Err(TransportError::Disconnected),
        ]);
        let bridge = DirectLedgerBridge::new(Arc::new(ScriptedFactory {
            transport,
            opens: AtomicU32::new(0),
        }));

        let err = bridge.get_address("m/44'/60'/0'/0/0").await.unwrap_err();
        assert!(matches!(err, BridgeError::Disconnected));
    }

    #[tokio::test]
    async fn typed_data_needs_a_recent_app() {
        // app reports 1.5.0, too old for pre-hashed EIP-712 signing
        let transport = ScriptedTransport::new(vec![Ok(ApduAnswer {
            data: vec![0, 1, 5, 0],
        })]);
        let bridge = DirectLedgerBridge::new(Arc::new(ScriptedFactory {
            transport,
            opens: AtomicU32::new(0),
        }));

        let err = bridge
            .sign_typed_data(
                "m/44'/60'/0'/0/0",
                H256::zero(),
                Some(H256::zero()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedFirmwareVersion(_)));
    }
}
