//! Local EIP-712 digest computation for typed-data signing.
//!
//! Most devices cannot parse an arbitrary typed-data AST; they accept the
//! domain separator and primary-type struct hash pre-computed by the host
//! and only display/sign the resulting digest. The hashing itself is done
//! by `ethers-core`; this module adds the version gating around it.

use crate::{error::CoreError, types::TypedDataVersion};
use ethers_core::{
    types::{
        transaction::eip712::{Eip712, TypedData},
        H256,
    },
    utils::keccak256,
};

/// The digests a signing device needs for a typed-data payload: the domain
/// separator, the primary-type struct hash (absent for domain-only
/// payloads), and the final signing digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypedDataDigest {
    pub domain_separator: H256,
    pub message_hash: Option<H256>,
    pub digest: H256,
}

/// Computes the digests for a typed-data payload.
///
/// V1 payloads predate the domain separator and cannot be expressed here.
/// V3 and V4 differ in the encoding rules for nested and array types;
/// arrays only exist in V4, so a V3 request over types containing arrays is
/// refused rather than silently hashed with V4 rules.
pub fn hash_typed_data(
    data: &TypedData,
    version: TypedDataVersion,
) -> Result<TypedDataDigest, CoreError> {
    match version {
        TypedDataVersion::V1 => return Err(CoreError::UnsupportedTypedDataVersion(version)),
        TypedDataVersion::V3 => {
            let has_arrays = data
                .types
                .values()
                .flatten()
                .any(|field| field.r#type.contains('['));
            if has_arrays {
                return Err(CoreError::Eip712(
                    "arrays in typed data require V4 encoding".to_owned(),
                ));
            }
        }
        TypedDataVersion::V4 => {}
    }

    let domain_separator = H256::from(
        data.domain_separator()
            .map_err(|e| CoreError::Eip712(e.to_string()))?,
    );
    let message_hash = if data.primary_type == "EIP712Domain" {
        None
    } else {
        Some(H256::from(
            data.struct_hash()
                .map_err(|e| CoreError::Eip712(e.to_string()))?,
        ))
    };

    let mut preimage = Vec::with_capacity(66);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(domain_separator.as_bytes());
    if let Some(hash) = &message_hash {
        preimage.extend_from_slice(hash.as_bytes());
    }
    let digest = H256::from(keccak256(&preimage));

    Ok(TypedDataDigest {
        domain_separator,
        message_hash,
        digest,
    })
}
