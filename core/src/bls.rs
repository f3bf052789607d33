// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{PublicKeyBytes, Root, SignatureBytes};
use alloc::string::{String, ToString};
use blst::BLST_ERROR;
use blst::min_pk as bls;
use ssz_merkle::{TreeHash, tree_hash_container};

// domain string, must match what is used in signing. This one should be good for beacon chain
pub(crate) const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Debug, Clone, PartialEq)]
pub enum BlsError {
    InvalidPublicKey,
    InvalidSignature,
    Other(String),
}

impl From<BLST_ERROR> for BlsError {
    fn from(value: BLST_ERROR) -> Self {
        Self::Other(format_args!("{:?}", value).to_string())
    }
}

impl core::fmt::Display for BlsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BlsError::InvalidPublicKey => write!(f, "Invalid public key"),
            BlsError::InvalidSignature => write!(f, "Invalid signature"),
            BlsError::Other(err) => write!(f, "BLS error: {}", err),
        }
    }
}

impl core::error::Error for BlsError {}

#[derive(Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct PublicKey(bls::PublicKey);

impl PublicKey {
    /// Decodes a compressed (48 byte) or serialized (96 byte) public key.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlsError> {
        bls::PublicKey::from_bytes(bytes)
            .map(PublicKey)
            .map_err(|_| BlsError::InvalidPublicKey)
    }

    #[inline]
    pub fn compress(&self) -> PublicKeyBytes {
        PublicKeyBytes::from(self.0.compress())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Signature(bls::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlsError> {
        Ok(Signature(bls::Signature::from_bytes(bytes)?))
    }

    pub fn to_bytes(&self) -> SignatureBytes {
        SignatureBytes::from(self.0.to_bytes())
    }
}

pub fn verify_signature(
    public_key: &PublicKey,
    msg: &[u8],
    signature: &Signature,
) -> Result<(), BlsError> {
    let res = signature.0.verify(true, msg, DST, &[], &public_key.0, true);
    if res == BLST_ERROR::BLST_SUCCESS {
        Ok(())
    } else {
        Err(BlsError::InvalidSignature)
    }
}

/// Signature domain: the fork version in the high 32 bits, the domain type in
/// the low bits.
/// Packs a fork version into the upper and the domain type into the lower 32
/// bits. Fork versions are bounded to 32 bits by `ChainSpec::validate`.
#[inline]
pub fn compute_domain(fork_version: u64, domain_type: u64) -> u64 {
    fork_version.wrapping_shl(32).wrapping_add(domain_type)
}

struct SigningData {
    object_root: Root,
    domain: u64,
}

tree_hash_container!(SigningData {
    object_root,
    domain
});

/// The message actually signed for an object with root `object_root`.
pub fn compute_signing_root(object_root: Root, domain: u64) -> Root {
    SigningData {
        object_root,
        domain,
    }
    .hash_tree_root()
}

/// Verifies `signature` by `pubkey` over `message_root` in `domain`.
pub fn bls_verify(
    pubkey: &PublicKeyBytes,
    message_root: Root,
    signature: &SignatureBytes,
    domain: u64,
) -> Result<(), BlsError> {
    let public_key = PublicKey::from_bytes(pubkey.as_slice())?;
    let signature = Signature::from_bytes(signature.as_slice())?;
    let signing_root = compute_signing_root(message_root, domain);
    verify_signature(&public_key, signing_root.as_slice(), &signature)
}
