//! In-process BitBox02 bridge and its pairing state machine.

use crate::{
    bitbox02::{BitBox02Bridge, BitBox02Transaction},
    channel::DeviceEventListener,
    envelope::{BridgeEvent, DeviceEvent},
    error::{BridgeError, TransportError},
    factory::TransportFactory,
};
use async_trait::async_trait;
use futures_util::lock::Mutex;
use hwkeyring_core::RawSignature;
use semver::{Version, VersionReq};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

// EIP-1559 and typed-message support landed in this firmware line
const FIRMWARE_MIN_VERSION: &str = ">=9.10.0";

/// Where the connection is in the pairing handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingState {
    Disconnected,
    /// The code is on both screens, waiting for on-device confirmation.
    Pairing,
    /// Confirmed on-device, firmware not yet vetted.
    Confirmed,
    Ready,
}

/// What the device reports when a connection is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairingHandshake {
    /// `None` when the host is already paired with this device.
    pub pairing_code: Option<String>,
}

/// The vendor SDK seam for the BitBox02.
#[async_trait]
pub trait BitBox02Transport: Send + Sync {
    async fn connect(&self) -> Result<PairingHandshake, TransportError>;

    /// Resolves once the user confirms the pairing code on-device; errors
    /// when they reject it.
    async fn confirm_pairing(&self) -> Result<(), TransportError>;

    async fn firmware_version(&self) -> Result<String, TransportError>;

    async fn root_public_key(&self, keypath: &str) -> Result<String, TransportError>;

    async fn sign_transaction(
        &self,
        keypath: &str,
        tx: &BitBox02Transaction,
    ) -> Result<RawSignature, TransportError>;

    async fn sign_personal_message(
        &self,
        keypath: &str,
        message: &[u8],
    ) -> Result<RawSignature, TransportError>;

    async fn sign_typed_data(
        &self,
        keypath: &str,
        typed_data_json: &str,
    ) -> Result<RawSignature, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

struct Inner {
    transport: Option<Arc<dyn BitBox02Transport>>,
    state: PairingState,
}

/// A BitBox02 bridge that owns the device handle in-process.
pub struct DirectBitBox02Bridge {
    factory: Arc<dyn TransportFactory<dyn BitBox02Transport>>,
    inner: Mutex<Inner>,
    listener: Option<Arc<dyn DeviceEventListener>>,
}

impl DirectBitBox02Bridge {
    pub fn new(
        factory: Arc<dyn TransportFactory<dyn BitBox02Transport>>,
        listener: Option<Arc<dyn DeviceEventListener>>,
    ) -> Self {
        Self {
            factory,
            inner: Mutex::new(Inner {
                transport: None,
                state: PairingState::Disconnected,
            }),
            listener,
        }
    }

    pub async fn pairing_state(&self) -> PairingState {
        self.inner.lock().await.state
    }

    fn emit(&self, event: DeviceEvent, payload: Value) {
        if let Some(listener) = &self.listener {
            listener.on_event(&BridgeEvent::new(event, payload));
        }
    }

    async fn ready_transport(&self) -> Result<Arc<dyn BitBox02Transport>, BridgeError> {
        let inner = self.inner.lock().await;
        match (&inner.transport, inner.state) {
            (Some(transport), PairingState::Ready) => Ok(transport.clone()),
            _ => Err(BridgeError::Disconnected),
        }
    }

    /// Tears the handle down on a failed handshake; a leaked open handle
    /// blocks every subsequent pairing attempt.
    async fn abort(
        &self,
        inner: &mut Inner,
        transport: Arc<dyn BitBox02Transport>,
        error: BridgeError,
    ) -> BridgeError {
        if let Err(close_err) = transport.close().await {
            warn!(%close_err, "failed to close device handle after pairing error");
        }
        inner.transport = None;
        inner.state = PairingState::Disconnected;
        error
    }
}

#[async_trait]
impl BitBox02Bridge for DirectBitBox02Bridge {
    async fn init(&self) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().await;
        if inner.state == PairingState::Ready {
            return Ok(());
        }

        let transport = self.factory.open().await?;
        let handshake = match transport.connect().await {
            Ok(handshake) => handshake,
            Err(err) => {
                return Err(self
                    .abort(&mut inner, transport, BridgeError::Transport(err))
                    .await)
            }
        };

        if let Some(code) = handshake.pairing_code {
            debug!("device pairing code pending confirmation");
            inner.state = PairingState::Pairing;
            self.emit(DeviceEvent::PairingCode, json!({ "code": code }));

            let confirmed = transport.confirm_pairing().await;
            self.emit(DeviceEvent::ClosePopup, Value::Null);
            if let Err(err) = confirmed {
                return Err(self
                    .abort(
                        &mut inner,
                        transport,
                        BridgeError::PairingFailed(err.to_string()),
                    )
                    .await);
            }
        }
        inner.state = PairingState::Confirmed;

        let version = match transport.firmware_version().await {
            Ok(version) => version,
            Err(err) => {
                return Err(self
                    .abort(&mut inner, transport, BridgeError::Transport(err))
                    .await)
            }
        };
        match check_firmware(&version) {
            Ok(()) => {}
            Err(err) => return Err(self.abort(&mut inner, transport, err).await),
        }

        inner.transport = Some(transport);
        inner.state = PairingState::Ready;
        self.emit(DeviceEvent::Connected, Value::Null);
        Ok(())
    }

    async fn root_public_key(&self, keypath: &str) -> Result<String, BridgeError> {
        let transport = self.ready_transport().await?;
        Ok(transport.root_public_key(keypath).await?)
    }

    async fn sign_transaction(
        &self,
        keypath: &str,
        tx: &BitBox02Transaction,
    ) -> Result<RawSignature, BridgeError> {
        let transport = self.ready_transport().await?;
        Ok(transport.sign_transaction(keypath, tx).await?)
    }

    async fn sign_personal_message(
        &self,
        keypath: &str,
        message: &[u8],
    ) -> Result<RawSignature, BridgeError> {
        let transport = self.ready_transport().await?;
        Ok(transport.sign_personal_message(keypath, message).await?)
    }

    async fn sign_typed_data(
        &self,
        keypath: &str,
        typed_data_json: &str,
    ) -> Result<RawSignature, BridgeError> {
        let transport = self.ready_transport().await?;
        Ok(transport.sign_typed_data(keypath, typed_data_json).await?)
    }

    async fn clean_up(&self) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().await;
        if let Some(transport) = inner.transport.take() {
            let _ = transport.close().await;
        }
        inner.state = PairingState::Disconnected;
        self.emit(DeviceEvent::Disconnected, Value::Null);
        Ok(())
    }
}

fn check_firmware(version: &str) -> Result<(), BridgeError> {
    let version = Version::parse(version)?;
    let req = VersionReq::parse(FIRMWARE_MIN_VERSION)?;
    if !req.matches(&version) {
        return Err(BridgeError::UnsupportedFirmwareVersion(
            FIRMWARE_MIN_VERSION.to_owned(),
        ));
    }
    Ok(())
}
