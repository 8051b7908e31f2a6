use crate::types::TypedDataVersion;
use ethers_core::types::Address;
use thiserror::Error;

/// Errors produced while deriving addresses or assembling signatures.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Underlying BIP-32 derivation error
    #[error(transparent)]
    Bip32(#[from] coins_bip32::Bip32Error),
    /// Error when converting from a hex string
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// A device returned an RLP blob that does not decode
    #[error(transparent)]
    Rlp(#[from] ethers_core::utils::rlp::DecoderError),
    /// Error recovering the signer from an assembled signature
    #[error(transparent)]
    Signature(#[from] ethers_core::types::SignatureError),
    /// Error type from Eip712Error message
    #[error("error encoding eip712 struct: {0}")]
    Eip712(String),
    /// The requested `eth_signTypedData` revision cannot be produced
    #[error("typed data {0:?} is not supported on this device")]
    UnsupportedTypedDataVersion(TypedDataVersion),
    /// The recovered signer is not the account the caller asked to sign with.
    /// Never downgraded to a warning: a signature with the wrong signer must
    /// not leave the keyring.
    #[error("signature doesnt match the right address")]
    SignatureMismatch { expected: Address, recovered: Address },
    /// A device reported signature components that do not fit any known shape
    #[error("malformed device signature: {0}")]
    MalformedSignature(String),
}
