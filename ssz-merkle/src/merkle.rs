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

use crate::{B256, HASH_SIZE, MerkleError, Result, hash_concat};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Width in bytes of the work chunks that list items are packed into before
/// tree hashing.
pub const SSZ_CHUNK_SIZE: usize = 128;

/// Tree levels with fewer chunks than this are always hashed on the calling thread.
#[cfg(feature = "parallel")]
const PARALLEL_LEVEL_THRESHOLD: usize = 1024;

/// Merkle tree hash of a list of homogeneous items, using [`SSZ_CHUNK_SIZE`]
/// work chunks.
///
/// Returns an error if the items do not all have the same, non-zero length.
pub fn merkle_hash<T: AsRef<[u8]>>(items: &[T]) -> Result<B256> {
    merkle_hash_with_chunk_size(items, SSZ_CHUNK_SIZE)
}

/// Merkle tree hash of a list of homogeneous items with an explicit work chunk width.
///
/// 1. Items narrower than `chunk_size` are concatenated `chunk_size / len` at a
///    time and each group is zero-padded to `chunk_size`. Wider items are
///    their own chunk.
/// 2. An empty list is represented by a single all-zero chunk.
/// 3. Levels with an odd number of chunks are extended by one zero chunk and
///    adjacent pairs are hashed until a single chunk remains.
/// 4. The result is `hash(root ‖ len)`, where `len` is the number of items
///    (not chunks) as a 32 byte big-endian integer.
pub fn merkle_hash_with_chunk_size<T: AsRef<[u8]>>(items: &[T], chunk_size: usize) -> Result<B256> {
    if chunk_size == 0 {
        return Err(MerkleError::ZeroWidth);
    }

    let item_len = items.first().map(|item| item.as_ref().len()).unwrap_or(0);
    if !items.is_empty() && item_len == 0 {
        return Err(MerkleError::ZeroWidth);
    }
    if let Some((position, item)) = items
        .iter()
        .enumerate()
        .find(|(_, item)| item.as_ref().len() != item_len)
    {
        return Err(MerkleError::HeterogeneousItems {
            expected: item_len,
            found: item.as_ref().len(),
            position,
        });
    }

    Ok(merkle_hash_uniform(items, item_len, chunk_size))
}

/// Merkle tree hash of a list of 32 byte roots.
///
/// Roots are uniform by construction, so this cannot fail.
pub fn merkle_hash_roots(roots: &[B256]) -> B256 {
    merkle_hash_uniform(roots, HASH_SIZE, SSZ_CHUNK_SIZE)
}

/// Returns `hash(root ‖ len)` with `len` encoded as a 32 byte big-endian integer.
pub fn mix_in_length(root: &[u8], len: usize) -> B256 {
    let mut len_bytes = [0u8; HASH_SIZE];
    len_bytes[HASH_SIZE - 8..].copy_from_slice(&(len as u64).to_be_bytes());
    hash_concat(root, &len_bytes)
}

// Callers guarantee that every item is exactly `item_len` bytes long.
fn merkle_hash_uniform<T: AsRef<[u8]>>(items: &[T], item_len: usize, chunk_size: usize) -> B256 {
    let chunks = pack(items, item_len, chunk_size);
    tracing::trace!(
        items = items.len(),
        chunks = chunks.len(),
        "Merkleizing list"
    );
    let root = reduce(chunks);
    mix_in_length(&root, items.len())
}

fn pack<T: AsRef<[u8]>>(items: &[T], item_len: usize, chunk_size: usize) -> Vec<Vec<u8>> {
    if items.is_empty() {
        return vec![vec![0u8; chunk_size]];
    }

    // Leave large items alone
    if item_len >= chunk_size {
        return items.iter().map(|item| item.as_ref().to_vec()).collect();
    }

    let items_per_chunk = chunk_size / item_len;
    items
        .chunks(items_per_chunk)
        .map(|group| {
            let mut chunk = Vec::with_capacity(chunk_size);
            for item in group {
                chunk.extend_from_slice(item.as_ref());
            }
            debug_assert!(chunk.len() <= chunk_size);
            chunk.resize(chunk_size, 0);
            chunk
        })
        .collect()
}

fn reduce(mut chunks: Vec<Vec<u8>>) -> Vec<u8> {
    while chunks.len() > 1 {
        if chunks.len() % 2 == 1 {
            let width = chunks[0].len();
            chunks.push(vec![0u8; width]);
        }
        chunks = hash_level(&chunks);
    }
    chunks.into_iter().next().unwrap_or_default()
}

#[cfg(not(feature = "parallel"))]
fn hash_level(chunks: &[Vec<u8>]) -> Vec<Vec<u8>> {
    chunks
        .chunks_exact(2)
        .map(|pair| hash_concat(&pair[0], &pair[1]).to_vec())
        .collect()
}

#[cfg(feature = "parallel")]
fn hash_level(chunks: &[Vec<u8>]) -> Vec<Vec<u8>> {
    if chunks.len() < PARALLEL_LEVEL_THRESHOLD {
        return chunks
            .chunks_exact(2)
            .map(|pair| hash_concat(&pair[0], &pair[1]).to_vec())
            .collect();
    }
    chunks
        .par_chunks_exact(2)
        .map(|pair| hash_concat(&pair[0], &pair[1]).to_vec())
        .collect()
}
