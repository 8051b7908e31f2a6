//! In-process OneKey bridge: session management, firmware gating and a
//! configurable session cache in front of an injected transport.

use crate::{
    error::{BridgeError, TransportError},
    factory::TransportFactory,
    onekey::{OneKeyBridge, OneKeyDevice, OneKeyFeatures, OneKeyTransaction},
};
use async_trait::async_trait;
use ethers_core::types::H256;
use futures_util::lock::Mutex;
use hwkeyring_core::RawSignature;
use semver::{Version, VersionReq};
use std::{fs, path::PathBuf, sync::Arc};
use tracing::debug;

// we need firmware that supports EIP-1559 and EIP-712
const FIRMWARE_1_MIN_VERSION: &str = ">=1.11.1";
const FIRMWARE_2_MIN_VERSION: &str = ">=2.5.1";

/// The vendor SDK seam: typed calls against one device session.
#[async_trait]
pub trait OneKeyTransport: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<OneKeyDevice>, TransportError>;

    /// Opens a session, resuming `session_id` when the device still knows
    /// it, and reports the device features.
    async fn init_session(
        &self,
        connect_id: &str,
        session_id: Option<&str>,
    ) -> Result<OneKeyFeatures, TransportError>;

    async fn get_public_key(
        &self,
        connect_id: &str,
        session_id: &str,
        hd_path: &str,
    ) -> Result<String, TransportError>;

    async fn sign_transaction(
        &self,
        connect_id: &str,
        session_id: &str,
        hd_path: &str,
        tx: &OneKeyTransaction,
    ) -> Result<RawSignature, TransportError>;

    async fn sign_message(
        &self,
        connect_id: &str,
        session_id: &str,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, TransportError>;

    async fn sign_typed_hash(
        &self,
        connect_id: &str,
        session_id: &str,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, TransportError>;

    async fn end_session(&self, connect_id: &str, session_id: &str)
        -> Result<(), TransportError>;
}

/// Where pairing sessions are remembered between runs.
///
/// Persistence is a deliberate configuration, not a side effect of the
/// runtime mode: in-memory by default, on disk when asked for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionCachePolicy {
    /// Sessions last as long as the bridge instance.
    #[default]
    Memory,
    /// Sessions are written under the given directory and survive restarts.
    Disk(PathBuf),
}

impl SessionCachePolicy {
    /// Disk policy rooted in the user's home directory.
    pub fn disk_default() -> Self {
        let base = home::home_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        SessionCachePolicy::Disk(base.join(".hwkeyring").join("onekey").join("cache"))
    }

    fn session_file(dir: &PathBuf, connect_id: &str) -> PathBuf {
        dir.join(format!("{connect_id}.session"))
    }

    pub fn load(&self, connect_id: &str) -> Option<String> {
        match self {
            SessionCachePolicy::Memory => None,
            SessionCachePolicy::Disk(dir) => fs::read_to_string(Self::session_file(dir, connect_id))
                .ok()
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn store(&self, connect_id: &str, session_id: &str) -> Result<(), BridgeError> {
        match self {
            SessionCachePolicy::Memory => Ok(()),
            SessionCachePolicy::Disk(dir) => {
                fs::create_dir_all(dir).map_err(|e| BridgeError::SessionCache(e.to_string()))?;
                fs::write(Self::session_file(dir, connect_id), session_id)
                    .map_err(|e| BridgeError::SessionCache(e.to_string()))
            }
        }
    }

    pub fn clear(&self, connect_id: &str) {
        if let SessionCachePolicy::Disk(dir) = self {
            let _ = fs::remove_file(Self::session_file(dir, connect_id));
        }
    }
}

struct ActiveSession {
    connect_id: String,
    session_id: String,
}

/// A OneKey bridge that owns the device session in-process.
pub struct DirectOneKeyBridge {
    factory: Arc<dyn TransportFactory<dyn OneKeyTransport>>,
    transport: Mutex<Option<Arc<dyn OneKeyTransport>>>,
    session: Mutex<Option<ActiveSession>>,
    cache: SessionCachePolicy,
}

impl DirectOneKeyBridge {
    pub fn new(
        factory: Arc<dyn TransportFactory<dyn OneKeyTransport>>,
        cache: SessionCachePolicy,
    ) -> Self {
        Self {
            factory,
            transport: Mutex::new(None),
            session: Mutex::new(None),
            cache,
        }
    }

    async fn handle(&self) -> Result<Arc<dyn OneKeyTransport>, BridgeError> {
        let mut guard = self.transport.lock().await;
        if let Some(transport) = guard.as_ref() {
            return Ok(transport.clone());
        }
        let transport = self.factory.open().await?;
        *guard = Some(transport.clone());
        Ok(transport)
    }

    fn check_version(version: &str) -> Result<(), BridgeError> {
        let version = Version::parse(version)?;

        let min_version = match version.major {
            1 => FIRMWARE_1_MIN_VERSION,
            2 => FIRMWARE_2_MIN_VERSION,
            // unknown major version, possibly newer models that we don't
            // know about yet; assume they support EIP-1559 and EIP-712
            _ => return Ok(()),
        };

        let req = VersionReq::parse(min_version)?;
        if !req.matches(&version) {
            return Err(BridgeError::UnsupportedFirmwareVersion(
                min_version.to_owned(),
            ));
        }
        Ok(())
    }

    async fn initiate_session(&self, connect_id: &str) -> Result<OneKeyFeatures, BridgeError> {
        let transport = self.handle().await?;
        let cached = self.cache.load(connect_id);
        debug!(connect_id, resumed = cached.is_some(), "initializing device session");
        let features = transport.init_session(connect_id, cached.as_deref()).await?;

        Self::check_version(&features.firmware_version)?;

        let session_id = features.session_id.clone().ok_or_else(|| {
            BridgeError::ResponseShape("device features did not include a session id".to_owned())
        })?;
        self.cache.store(connect_id, &session_id)?;
        *self.session.lock().await = Some(ActiveSession {
            connect_id: connect_id.to_owned(),
            session_id,
        });
        Ok(features)
    }

    async fn session_for(&self, connect_id: &str) -> Result<String, BridgeError> {
        if let Some(session) = self.session.lock().await.as_ref() {
            if session.connect_id == connect_id {
                return Ok(session.session_id.clone());
            }
        }
        self.initiate_session(connect_id).await?;
        let guard = self.session.lock().await;
        guard
            .as_ref()
            .map(|session| session.session_id.clone())
            .ok_or(BridgeError::Disconnected)
    }
}

#[async_trait]
impl OneKeyBridge for DirectOneKeyBridge {
    async fn init(&self) -> Result<(), BridgeError> {
        self.handle().await?;
        Ok(())
    }

    async fn search_devices(&self) -> Result<Vec<OneKeyDevice>, BridgeError> {
        let transport = self.handle().await?;
        Ok(transport.enumerate().await?)
    }

    async fn get_features(&self, connect_id: &str) -> Result<OneKeyFeatures, BridgeError> {
        self.initiate_session(connect_id).await
    }

    async fn get_public_key(
        &self,
        connect_id: &str,
        hd_path: &str,
    ) -> Result<String, BridgeError> {
        let session = self.session_for(connect_id).await?;
        let transport = self.handle().await?;
        Ok(transport
            .get_public_key(connect_id, &session, hd_path)
            .await?)
    }

    async fn sign_transaction(
        &self,
        connect_id: &str,
        hd_path: &str,
        tx: &OneKeyTransaction,
    ) -> Result<RawSignature, BridgeError> {
        let session = self.session_for(connect_id).await?;
        let transport = self.handle().await?;
        Ok(transport
            .sign_transaction(connect_id, &session, hd_path, tx)
            .await?)
    }

    async fn sign_personal_message(
        &self,
        connect_id: &str,
        hd_path: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        let session = self.session_for(connect_id).await?;
        let transport = self.handle().await?;
        Ok(transport
            .sign_message(connect_id, &session, hd_path, message)
            .await?)
    }

    async fn sign_typed_data(
        &self,
        connect_id: &str,
        hd_path: &str,
        domain_separator: H256,
        message_hash: Option<H256>,
    ) -> Result<RawSignature, BridgeError> {
        let session = self.session_for(connect_id).await?;
        let transport = self.handle().await?;
        Ok(transport
            .sign_typed_hash(connect_id, &session, hd_path, domain_separator, message_hash)
            .await?)
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            self.cache.clear(&session.connect_id);
            if let Some(transport) = self.transport.lock().await.as_ref() {
                let _ = transport
                    .end_session(&session.connect_id, &session.session_id)
                    .await;
            }
        }
        *self.transport.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingTransport {
        init_calls: StdMutex<Vec<Option<String>>>,
        firmware_version: String,
        session_counter: StdMutex<u32>,
    }

    impl RecordingTransport {
        fn with_version(version: &str) -> Arc<Self> {
            Arc::new(Self {
                firmware_version: version.to_owned(),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl OneKeyTransport for RecordingTransport {
        async fn enumerate(&self) -> Result<Vec<OneKeyDevice>, TransportError> {
            Ok(vec![OneKeyDevice {
                device_id: "device-1".to_owned(),
                connect_id: "connect-1".to_owned(),
                label: None,
            }])
        }

        async fn init_session(
            &self,
            _connect_id: &str,
            session_id: Option<&str>,
        ) -> Result<OneKeyFeatures, TransportError> {
            self.init_calls
                .lock()
                .unwrap()
                .push(session_id.map(str::to_owned));
            let session_id = match session_id {
                Some(resumed) => resumed.to_owned(),
                None => {
                    let mut counter = self.session_counter.lock().unwrap();
                    *counter += 1;
                    format!("session-{counter}")
                }
            };
            Ok(OneKeyFeatures {
                device_id: "device-1".to_owned(),
                firmware_version: self.firmware_version.clone(),
                session_id: Some(session_id),
                passphrase_protection: false,
            })
        }

        async fn get_public_key(
            &self,
            _connect_id: &str,
            _session_id: &str,
            _hd_path: &str,
        ) -> Result<String, TransportError> {
            Ok("xpub-fixture".to_owned())
        }

        async fn sign_transaction(
            &self,
            _connect_id: &str,
            _session_id: &str,
            _hd_path: &str,
            _tx: &OneKeyTransaction,
        ) -> Result<RawSignature, TransportError> {
            Ok(RawSignature::from_bytes(&[1u8; 32], &[2u8; 32], 27))
        }

        async fn sign_message(
            &self,
            _connect_id: &str,
            _session_id: &str,
            _hd_path: &str,
            _message: &[u8],
        ) -> Result<RawSignature, TransportError> {
            Ok(RawSignature::from_bytes(&[1u8; 32], &[2u8; 32], 27))
        }

        async fn sign_typed_hash(
            &self,
            _connect_id: &str,
            _session_id: &str,
            _hd_path: &str,
            _domain_separator: H256,
            _message_hash: Option<H256>,
        ) -> Result<RawSignature, TransportError> {
            Ok(RawSignature::from_bytes(&[1u8; 32], &[2u8; 32], 27))
        }

        async fn end_session(
            &self,
            _connect_id: &str,
            _session_id: &str,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct StaticFactory(Arc<RecordingTransport>);

    #[async_trait]
    impl TransportFactory<dyn OneKeyTransport> for StaticFactory {
        async fn open(&self) -> Result<Arc<dyn OneKeyTransport>, TransportError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn disk_policy_resumes_sessions_across_bridges() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SessionCachePolicy::Disk(dir.path().to_path_buf());

        let transport = RecordingTransport::with_version("2.6.0");
        let bridge = DirectOneKeyBridge::new(
            Arc::new(StaticFactory(transport.clone())),
            policy.clone(),
        );
        bridge.get_features("connect-1").await.unwrap();

        // a second bridge (a later run) resumes the same session id
        let bridge2 = DirectOneKeyBridge::new(
            Arc::new(StaticFactory(transport.clone())),
            policy,
        );
        bridge2.get_features("connect-1").await.unwrap();

        let calls = transport.init_calls.lock().unwrap();
        assert_eq!(calls[0], None);
        assert_eq!(calls[1].as_deref(), Some("session-1"));
    }

    #[tokio::test]
    async fn memory_policy_never_resumes() {
        let transport = RecordingTransport::with_version("2.6.0");
        let bridge = DirectOneKeyBridge::new(
            Arc::new(StaticFactory(transport.clone())),
            SessionCachePolicy::Memory,
        );
        bridge.get_features("connect-1").await.unwrap();

        let bridge2 = DirectOneKeyBridge::new(
            Arc::new(StaticFactory(transport.clone())),
            SessionCachePolicy::Memory,
        );
        bridge2.get_features("connect-1").await.unwrap();

        let calls = transport.init_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[None, None]);
    }

    #[tokio::test]
    async fn old_firmware_is_refused() {
        let transport = RecordingTransport::with_version("1.10.0");
        let bridge = DirectOneKeyBridge::new(
            Arc::new(StaticFactory(transport)),
            SessionCachePolicy::Memory,
        );
        let err = bridge.get_features("connect-1").await.unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedFirmwareVersion(_)));
    }

    #[tokio::test]
    async fn session_is_reused_within_a_bridge() {
        let transport = RecordingTransport::with_version("2.6.0");
        let bridge = DirectOneKeyBridge::new(
            Arc::new(StaticFactory(transport.clone())),
            SessionCachePolicy::Memory,
        );
        bridge.get_features("connect-1").await.unwrap();
        bridge
            .get_public_key("connect-1", "m/44'/60'/0'")
            .await
            .unwrap();
        bridge
            .sign_personal_message("connect-1", "m/44'/60'/0'/0/0", b"hello")
            .await
            .unwrap();

        // only the explicit get_features call initialized a session
        assert_eq!(transport.init_calls.lock().unwrap().len(), 1);
    }
}
