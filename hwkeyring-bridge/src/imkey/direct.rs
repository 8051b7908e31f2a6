//! In-process imKey bridge. The SDK handle is notoriously fragile after a
//! reconnect, so every operation runs under the bounded re-init + resend
//! policy.

use crate::{
    error::{BridgeError, TransportError},
    factory::TransportFactory,
    imkey::{ImKeyBridge, ImKeyTransaction},
    types::DeviceAccount,
};
use async_trait::async_trait;
use ethers_core::types::H256;
use futures_util::lock::Mutex;
use hwkeyring_core::{RawSignature, RetryPolicy};
use std::sync::Arc;

/// The vendor SDK seam for imKey devices.
#[async_trait]
pub trait ImKeyTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn get_address(&self, hd_path: &str) -> Result<DeviceAccount, TransportError>;

    /// Returns the fully-signed transaction, RLP-encoded on-device.
    async fn sign_transaction(
        &self,
        hd_path: &str,
        tx: &ImKeyTransaction,
    ) -> Result<Vec<u8>, TransportError>;

    async fn sign_personal_message(
        &self,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, TransportError>;

    async fn sign_typed_hash(
        &self,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// An imKey bridge that owns the device handle in-process.
pub struct DirectImKeyBridge {
    factory: Arc<dyn TransportFactory<dyn ImKeyTransport>>,
    transport: Mutex<Option<Arc<dyn ImKeyTransport>>>,
    retry: RetryPolicy,
}

impl DirectImKeyBridge {
    pub fn new(factory: Arc<dyn TransportFactory<dyn ImKeyTransport>>) -> Self {
        Self {
            factory,
            transport: Mutex::new(None),
            retry: RetryPolicy::default(),
        }
    }

    async fn handle(&self) -> Result<Arc<dyn ImKeyTransport>, BridgeError> {
        let mut guard = self.transport.lock().await;
        if let Some(transport) = guard.as_ref() {
            return Ok(transport.clone());
        }
        let transport = self.factory.open().await?;
        transport.connect().await?;
        *guard = Some(transport.clone());
        Ok(transport)
    }

    async fn reset_handle(&self) {
        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            let _ = transport.disconnect().await;
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, BridgeError>
    where
        F: Fn(Arc<dyn ImKeyTransport>) -> Fut,
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
}

#[async_trait]
impl ImKeyBridge for DirectImKeyBridge {
    async fn init(&self) -> Result<(), BridgeError> {
        self.handle().await?;
        Ok(())
    }

    async fn get_address(&self, hd_path: &str) -> Result<DeviceAccount, BridgeError> {
        self.with_retry(|transport| async move {
            Ok(transport.get_address(hd_path).await?)
        })
        .await
    }

    async fn sign_transaction(
        &self,
        hd_path: &str,
        tx: &ImKeyTransaction,
    ) -> Result<Vec<u8>, BridgeError> {
        self.with_retry(|transport| async move {
            Ok(transport.sign_transaction(hd_path, tx).await?)
        })
        .await
    }

    async fn sign_personal_message(
        &self,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        self.with_retry(|transport| async move {
            Ok(transport.sign_personal_message(hd_path, message).await?)
        })
        .await
    }

    async fn sign_typed_data(
        &self,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError> {
        self.with_retry(|transport| async move {
            Ok(transport
                .sign_typed_hash(hd_path, domain_separator, message_hash)
                .await?)
        })
        .await
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        self.reset_handle().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::Address;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        failures_left: AtomicU32,
        connects: AtomicU32,
        disconnects: AtomicU32,
    }

    #[async_trait]
    impl ImKeyTransport for FlakyTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn get_address(&self, _hd_path: &str) -> Result<DeviceAccount, TransportError> {
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::Disconnected);
            }
            Ok(DeviceAccount::new(Address::repeat_byte(0x42)))
        }

        async fn sign_transaction(
            &self,
            _hd_path: &str,
            _tx: &ImKeyTransaction,
        ) -> Result<Vec<u8>, TransportError> {
            Ok(vec![])
        }

        async fn sign_personal_message(
            &self,
            _hd_path: &str,
            _message: &[u8],
        ) -> Result<RawSignature, TransportError> {
            Ok(RawSignature::from_bytes(&[1u8; 32], &[2u8; 32], 27))
        }

        async fn sign_typed_hash(
            &self,
            _hd_path: &str,
            _domain_separator: H256,
            _message_hash: Option<H256>,
        ) -> Result<RawSignature, TransportError> {
            Ok(RawSignature::from_bytes(&[1u8; 32], &[2u8; 32], 27))
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FlakyFactory(Arc<FlakyTransport>);

    #[async_trait]
    impl TransportFactory<dyn ImKeyTransport> for FlakyFactory {
        async fn open(&self) -> Result<Arc<dyn ImKeyTransport>, TransportError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn reconnects_after_a_torn_handle() {
        let transport = Arc::new(FlakyTransport {
            failures_left: AtomicU32::new(1),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
        });
        let bridge = DirectImKeyBridge::new(Arc::new(FlakyFactory(transport.clone())));

        let account = bridge.get_address("m/44'/60'/0'/0/0").await.unwrap();
        assert_eq!(account.address, Address::repeat_byte(0x42));
        // one reconnect happened: initial connect + one re-init
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_as_disconnected_after_the_cap() {
        let transport = Arc::new(FlakyTransport {
            failures_left: AtomicU32::new(10),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
        });
        let bridge = DirectImKeyBridge::new(Arc::new(FlakyFactory(transport)));

        let err = bridge.get_address("m/44'/60'/0'/0/0").await.unwrap_err();
        assert!(matches!(err, BridgeError::Disconnected));
    }
}
