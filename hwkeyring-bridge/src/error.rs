use thiserror::Error;

/// Errors raised by an injected device transport (the seam in front of the
/// vendor SDK).
#[derive(Error, Debug)]
pub enum TransportError {
    /// The device link dropped or the SDK handle was torn down mid-call.
    /// Worth a bounded re-init + resend before giving up.
    #[error("device disconnected")]
    Disconnected,
    /// No device is attached at all.
    #[error("device not found")]
    NotFound,
    /// Anything else the SDK reports verbatim.
    #[error("device communication failed: {0}")]
    Device(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Disconnected)
    }
}

/// Errors raised by the extension-internal message channel itself, as
/// opposed to errors reported by the remote side in a reply.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("channel transport failed: {0}")]
    Transport(String),
}

/// Error when talking to a device bridge, direct or proxied.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Underlying transport error
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The message channel to the offscreen context failed
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The remote context reported an error in its reply
    #[error("{0}")]
    Remote(String),
    /// Connectivity was lost and the bounded retries did not bring it back
    #[error("device disconnected")]
    Disconnected,
    /// Device discovery came back empty
    #[error("no device found")]
    NoDeviceFound,
    /// The device rejected or aborted pairing
    #[error("device pairing failed: {0}")]
    PairingFailed(String),
    /// The device firmware or app is too old for the requested operation
    #[error("device firmware requires at least version: {0}")]
    UnsupportedFirmwareVersion(String),
    /// Capability gap on this vendor
    #[error("Not supported on this device")]
    NotSupported,
    /// Device response was unexpectedly none
    #[error("Received unexpected response from device. Expected data in response, found none.")]
    UnexpectedNullResponse,
    /// Got a response, but it didn't contain as much data as expected
    #[error("cannot deserialize device response, insufficient bytes. Got {got} expected at least {at_least}")]
    ShortResponse { got: usize, at_least: usize },
    /// A reply decoded, but not into the shape the call expects
    #[error("unexpected response shape: {0}")]
    ResponseShape(String),
    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),
    #[error("Does not support ENS.")]
    NoEnsSupport,
    /// Reading or writing the cached pairing session failed
    #[error("unable to access cached device session: {0}")]
    SessionCache(String),
    #[error(transparent)]
    /// Error when converting from a hex string
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    /// Error when converting a semver requirement
    SemVer(#[from] semver::Error),
}

impl BridgeError {
    /// Whether a bounded automatic retry (re-init the handle, resend the
    /// same request) is worth attempting.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Transport(inner) => inner.is_transient(),
            BridgeError::Disconnected => true,
            _ => false,
        }
    }
}
