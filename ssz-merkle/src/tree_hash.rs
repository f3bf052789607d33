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

use crate::{B256, HASH_SIZE, hash, merkle_hash_roots};
use alloy_primitives::{Bytes, FixedBytes};

/// Types with a canonical 32 byte tree hash commitment.
pub trait TreeHash {
    fn hash_tree_root(&self) -> B256;
}

/// Commitment of a fixed-width leaf.
///
/// Leaves of at most [`HASH_SIZE`] bytes are right-padded with zeros and
/// returned unhashed, so the commitment of an already 32 byte value is the
/// value itself. Wider leaves are hashed.
pub fn leaf_root(bytes: &[u8]) -> B256 {
    if bytes.len() <= HASH_SIZE {
        let mut out = B256::ZERO;
        out[..bytes.len()].copy_from_slice(bytes);
        out
    } else {
        hash(bytes)
    }
}

macro_rules! impl_for_uint {
    ($($type:ty),*) => {
        $(
            impl TreeHash for $type {
                #[inline]
                fn hash_tree_root(&self) -> B256 {
                    leaf_root(&self.to_be_bytes())
                }
            }
        )*
    };
}

impl_for_uint!(u8, u16, u32, u64);

impl TreeHash for usize {
    #[inline]
    fn hash_tree_root(&self) -> B256 {
        (*self as u64).hash_tree_root()
    }
}

impl TreeHash for bool {
    #[inline]
    fn hash_tree_root(&self) -> B256 {
        (*self as u8).hash_tree_root()
    }
}

impl<const N: usize> TreeHash for FixedBytes<N> {
    #[inline]
    fn hash_tree_root(&self) -> B256 {
        leaf_root(self.as_slice())
    }
}

impl TreeHash for Bytes {
    fn hash_tree_root(&self) -> B256 {
        hash(self)
    }
}

impl<T: TreeHash> TreeHash for [T] {
    fn hash_tree_root(&self) -> B256 {
        let roots: Vec<B256> = self.iter().map(TreeHash::hash_tree_root).collect();
        merkle_hash_roots(&roots)
    }
}

impl<T: TreeHash> TreeHash for Vec<T> {
    #[inline]
    fn hash_tree_root(&self) -> B256 {
        self.as_slice().hash_tree_root()
    }
}

impl<T: TreeHash + ?Sized> TreeHash for &T {
    #[inline]
    fn hash_tree_root(&self) -> B256 {
        (**self).hash_tree_root()
    }
}

/// Implements [`TreeHash`] for a struct by merkleizing the roots of the listed
/// fields, in the order given.
///
/// ```
/// use ssz_merkle::{B256, TreeHash, tree_hash_container};
///
/// struct Crosslink {
///     slot: u64,
///     shard_block_root: B256,
/// }
///
/// tree_hash_container!(Crosslink { slot, shard_block_root });
///
/// let link = Crosslink { slot: 0, shard_block_root: B256::ZERO };
/// let _root = link.hash_tree_root();
/// ```
#[macro_export]
macro_rules! tree_hash_container {
    ($type:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::TreeHash for $type {
            fn hash_tree_root(&self) -> $crate::B256 {
                $crate::merkle_hash_roots(&[
                    $($crate::TreeHash::hash_tree_root(&self.$field)),+
                ])
            }
        }
    };
}
