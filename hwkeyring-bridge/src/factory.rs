//! Bridge selection. The runtime mode — direct device access or offscreen
//! forwarding — is decided once at extension start; from then on the
//! factory hands out a fresh, explicitly owned bridge handle per keyring
//! construction. No module-level singletons.

use crate::{
    bitbox02::{BitBox02Bridge, BitBox02Transport, DirectBitBox02Bridge, ProxyBitBox02Bridge},
    channel::{DeviceEventListener, MessageChannel},
    envelope::ChannelTarget,
    error::TransportError,
    imkey::{DirectImKeyBridge, ImKeyBridge, ImKeyTransport, ProxyImKeyBridge},
    ledger::{DirectLedgerBridge, LedgerBridge, LedgerTransport, ProxyLedgerBridge},
    onekey::{DirectOneKeyBridge, OneKeyBridge, OneKeyTransport, ProxyOneKeyBridge, SessionCachePolicy},
};
use async_trait::async_trait;
use hwkeyring_core::KeyringType;
use std::sync::Arc;

/// Opens a fresh transport handle to one vendor's device. The factory is
/// the seam the real SDK plugs into; tests plug mocks in instead.
#[async_trait]
pub trait TransportFactory<T: ?Sized + Send + Sync>: Send + Sync {
    async fn open(&self) -> Result<Arc<T>, TransportError>;
}

/// Everything the direct bridges need from the host process.
pub trait DeviceEnvironment: Send + Sync {
    fn ledger(&self) -> Arc<dyn TransportFactory<dyn LedgerTransport>>;
    fn onekey(&self) -> Arc<dyn TransportFactory<dyn OneKeyTransport>>;
    fn bitbox02(&self) -> Arc<dyn TransportFactory<dyn BitBox02Transport>>;
    fn imkey(&self) -> Arc<dyn TransportFactory<dyn ImKeyTransport>>;
}

/// Hands out the extension-internal channel for one offscreen target.
pub trait ChannelProvider: Send + Sync {
    fn channel(&self, target: ChannelTarget) -> Arc<dyn MessageChannel>;
}

/// How bridges reach devices in this process, decided once at startup.
pub enum RuntimeMode {
    /// The process is long-lived and can hold device handles itself.
    Direct(Arc<dyn DeviceEnvironment>),
    /// The process gets torn down aggressively; device handles live in a
    /// separate offscreen context reached over a message channel.
    Offscreen(Arc<dyn ChannelProvider>),
}

/// A vendor bridge handle, typed by keyring family.
#[derive(Clone)]
pub enum VendorBridge {
    Ledger(Arc<dyn LedgerBridge>),
    OneKey(Arc<dyn OneKeyBridge>),
    BitBox02(Arc<dyn BitBox02Bridge>),
    ImKey(Arc<dyn ImKeyBridge>),
}

impl VendorBridge {
    pub fn keyring_type(&self) -> KeyringType {
        match self {
            VendorBridge::Ledger(_) => KeyringType::Ledger,
            VendorBridge::OneKey(_) => KeyringType::OneKey,
            VendorBridge::BitBox02(_) => KeyringType::BitBox02,
            VendorBridge::ImKey(_) => KeyringType::ImKey,
        }
    }

    pub fn into_ledger(self) -> Option<Arc<dyn LedgerBridge>> {
        match self {
            VendorBridge::Ledger(bridge) => Some(bridge),
            _ => None,
        }
    }

    pub fn into_onekey(self) -> Option<Arc<dyn OneKeyBridge>> {
        match self {
            VendorBridge::OneKey(bridge) => Some(bridge),
            _ => None,
        }
    }

    pub fn into_bitbox02(self) -> Option<Arc<dyn BitBox02Bridge>> {
        match self {
            VendorBridge::BitBox02(bridge) => Some(bridge),
            _ => None,
        }
    }

    pub fn into_imkey(self) -> Option<Arc<dyn ImKeyBridge>> {
        match self {
            VendorBridge::ImKey(bridge) => Some(bridge),
            _ => None,
        }
    }
}

/// Builds bridges for keyrings.
pub struct BridgeFactory {
    mode: RuntimeMode,
    listener: Option<Arc<dyn DeviceEventListener>>,
    onekey_session_cache: SessionCachePolicy,
}

impl BridgeFactory {
    pub fn new(mode: RuntimeMode) -> Self {
        Self {
            mode,
            listener: None,
            onekey_session_cache: SessionCachePolicy::default(),
        }
    }

    /// Registers the sink for unsolicited device events (pairing codes,
    /// popup lifecycle). Wired into every bridge built afterwards.
    pub fn with_listener(mut self, listener: Arc<dyn DeviceEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_onekey_session_cache(mut self, policy: SessionCachePolicy) -> Self {
        self.onekey_session_cache = policy;
        self
    }

    /// A fresh bridge handle for the given keyring family. In offscreen
    /// mode this must run inside an async runtime (the event pump is a
    /// spawned task).
    pub fn bridge(&self, keyring_type: KeyringType) -> VendorBridge {
        match keyring_type {
            KeyringType::Ledger => VendorBridge::Ledger(self.ledger()),
            KeyringType::OneKey => VendorBridge::OneKey(self.onekey()),
            KeyringType::BitBox02 => VendorBridge::BitBox02(self.bitbox02()),
            KeyringType::ImKey => VendorBridge::ImKey(self.imkey()),
        }
    }

    /// Resolves a persisted keyring-type identifier; `None` for unknown
    /// ones.
    pub fn bridge_by_name(&self, keyring_type: &str) -> Option<VendorBridge> {
        keyring_type
            .parse::<KeyringType>()
            .ok()
            .map(|t| self.bridge(t))
    }

    pub fn has_bridge(&self, keyring_type: &str) -> bool {
        keyring_type.parse::<KeyringType>().is_ok()
    }

    fn ledger(&self) -> Arc<dyn LedgerBridge> {
        match &self.mode {
            RuntimeMode::Direct(env) => Arc::new(DirectLedgerBridge::new(env.ledger())),
            RuntimeMode::Offscreen(channels) => Arc::new(ProxyLedgerBridge::new(
                channels.channel(ChannelTarget::LedgerOffscreen),
                self.listener.clone(),
            )),
        }
    }

    fn onekey(&self) -> Arc<dyn OneKeyBridge> {
        match &self.mode {
            RuntimeMode::Direct(env) => Arc::new(DirectOneKeyBridge::new(
                env.onekey(),
                self.onekey_session_cache.clone(),
            )),
            RuntimeMode::Offscreen(channels) => Arc::new(ProxyOneKeyBridge::new(
                channels.channel(ChannelTarget::OnekeyOffscreen),
                self.listener.clone(),
            )),
        }
    }

    fn bitbox02(&self) -> Arc<dyn BitBox02Bridge> {
        match &self.mode {
            RuntimeMode::Direct(env) => Arc::new(DirectBitBox02Bridge::new(
                env.bitbox02(),
                self.listener.clone(),
            )),
            RuntimeMode::Offscreen(channels) => Arc::new(ProxyBitBox02Bridge::new(
                channels.channel(ChannelTarget::Bitbox02Offscreen),
                self.listener.clone(),
            )),
        }
    }

    fn imkey(&self) -> Arc<dyn ImKeyBridge> {
        match &self.mode {
            RuntimeMode::Direct(env) => Arc::new(DirectImKeyBridge::new(env.imkey())),
            RuntimeMode::Offscreen(channels) => Arc::new(ProxyImKeyBridge::new(
                channels.channel(ChannelTarget::ImkeyOffscreen),
                self.listener.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BridgeEvent, BridgeRequest, BridgeResponse};
    use crate::error::ChannelError;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    struct NullChannel;

    #[async_trait]
    impl MessageChannel for NullChannel {
        async fn request(&self, _request: BridgeRequest) -> Result<BridgeResponse, ChannelError> {
            Ok(BridgeResponse::ok(serde_json::Value::Null))
        }

        fn subscribe(&self) -> UnboundedReceiver<BridgeEvent> {
            let (_tx, rx) = unbounded_channel();
            rx
        }
    }

    struct NullChannels;

    impl ChannelProvider for NullChannels {
        fn channel(&self, _target: ChannelTarget) -> Arc<dyn MessageChannel> {
            Arc::new(NullChannel)
        }
    }

    #[tokio::test]
    async fn resolves_known_types_and_rejects_unknown_ones() {
        let factory = BridgeFactory::new(RuntimeMode::Offscreen(Arc::new(NullChannels)));

        for keyring_type in KeyringType::ALL {
            assert!(factory.has_bridge(keyring_type.as_str()));
            let bridge = factory.bridge_by_name(keyring_type.as_str()).unwrap();
            assert_eq!(bridge.keyring_type(), keyring_type);
        }

        assert!(!factory.has_bridge("Trezor Hardware"));
        assert!(factory.bridge_by_name("Trezor Hardware").is_none());
    }

    #[tokio::test]
    async fn every_call_returns_a_fresh_handle() {
        let factory = BridgeFactory::new(RuntimeMode::Offscreen(Arc::new(NullChannels)));
        let first = factory.bridge(KeyringType::Ledger).into_ledger().unwrap();
        let second = factory.bridge(KeyringType::Ledger).into_ledger().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
