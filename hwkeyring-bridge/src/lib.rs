//! Device bridges for the hardware keyrings.
//!
//! A bridge owns all I/O with one vendor's device and exposes it behind a
//! small async trait (`init`, the vendor's `sign_*` operations, `clean_up`).
//! Two families implement every trait with identical behavior:
//!
//! - **direct bridges** talk to the vendor SDK in-process, through an
//!   injected transport handle;
//! - **proxy ("offscreen") bridges** serialize every call into a
//!   `{ target, action, params }` message, send it over an asynchronous
//!   extension channel to the long-lived context that owns the real device
//!   connection, and settle on the reply. An extra inbound event stream
//!   carries unsolicited device notifications (pairing codes, popup
//!   lifecycle, connects/disconnects).
//!
//! Keyrings receive a bridge at construction from [`BridgeFactory`] and
//! never learn which family they hold.

mod channel;
mod envelope;
mod error;
mod factory;
mod proxy;
mod types;

pub mod bitbox02;
pub mod imkey;
pub mod ledger;
pub mod onekey;

pub use channel::{DeviceEventListener, MessageChannel};
pub use envelope::{BridgeAction, BridgeEvent, BridgeRequest, BridgeResponse, ChannelTarget, DeviceEvent};
pub use error::{BridgeError, ChannelError, TransportError};
pub use factory::{
    BridgeFactory, ChannelProvider, DeviceEnvironment, RuntimeMode, TransportFactory, VendorBridge,
};
pub use proxy::ProxyClient;
pub use types::DeviceAccount;

pub use bitbox02::{
    BitBox02Bridge, BitBox02Transaction, BitBox02Transport, DirectBitBox02Bridge,
    PairingHandshake, PairingState, ProxyBitBox02Bridge,
};
pub use imkey::{
    DirectImKeyBridge, ImKeyBridge, ImKeyTransaction, ImKeyTransport, ImKeyTxType,
    ProxyImKeyBridge,
};
pub use ledger::{
    ApduAnswer, ApduCommand, DirectLedgerBridge, LedgerBridge, LedgerTransport, ProxyLedgerBridge,
};
pub use onekey::{
    DirectOneKeyBridge, OneKeyAccessListItem, OneKeyBridge, OneKeyDevice, OneKeyFeatures,
    OneKeyTransaction, OneKeyTransport, ProxyOneKeyBridge, SessionCachePolicy,
};
