// Copyright 2024 RISC Zero, Inc.
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

//! Tree hashing for beacon chain objects.
//!
//! Every hashed object in the protocol is reduced to a 32 byte commitment by
//! [`TreeHash::hash_tree_root`]. Lists and containers are merkleized with
//! [`merkle_hash`], which packs items into work chunks of [`SSZ_CHUNK_SIZE`]
//! bytes, reduces them pairwise with SHA-256 and finally mixes in the number of
//! items as a 32 byte big-endian integer.

mod branch;
mod merkle;
mod tree_hash;

pub use alloy_primitives::B256;
pub use branch::*;
pub use merkle::*;
pub use tree_hash::*;

use sha2::{Digest, Sha256};

/// Width of a tree node and of every `hash_tree_root` output.
pub const HASH_SIZE: usize = 32;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("List item {position} has length {found}, expected {expected}")]
    HeterogeneousItems {
        expected: usize,
        found: usize,
        position: usize,
    },
    #[error("Zero width items or chunks")]
    ZeroWidth,
    #[error("Merkle branch has {len} nodes, expected at least {depth}")]
    BranchTooShort { depth: usize, len: usize },
}

pub type Result<T> = core::result::Result<T, MerkleError>;

/// SHA-256 of `data`.
#[inline]
pub fn hash(data: &[u8]) -> B256 {
    B256::from(<[u8; 32]>::from(Sha256::digest(data)))
}

/// SHA-256 of `a ‖ b`.
#[inline]
pub fn hash_concat(a: &[u8], b: &[u8]) -> B256 {
    let digest = Sha256::new().chain_update(a).chain_update(b).finalize();
    B256::from(<[u8; 32]>::from(digest))
}
