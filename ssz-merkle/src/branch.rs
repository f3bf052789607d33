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

use crate::{B256, MerkleError, Result, hash_concat};

/// Compute the root reached by walking `depth` levels of `branch` up from
/// `leaf`, which sits at position `index` in the bottom layer.
pub fn merkle_root_from_branch(
    leaf: B256,
    branch: &[B256],
    depth: usize,
    index: u64,
) -> Result<B256> {
    if branch.len() < depth {
        return Err(MerkleError::BranchTooShort {
            depth,
            len: branch.len(),
        });
    }

    let mut value = leaf;
    for (level, sibling) in branch.iter().take(depth).enumerate() {
        let is_right = index.checked_shr(level as u32).unwrap_or(0) & 1 == 1;
        value = if is_right {
            hash_concat(sibling.as_slice(), value.as_slice())
        } else {
            hash_concat(value.as_slice(), sibling.as_slice())
        };
    }
    Ok(value)
}

/// Verify that `leaf` at `index` is included under `root` via `branch`.
pub fn verify_merkle_branch(
    leaf: B256,
    branch: &[B256],
    depth: usize,
    index: u64,
    root: B256,
) -> bool {
    match merkle_root_from_branch(leaf, branch, depth, index) {
        Ok(computed) => computed == root,
        Err(err) => {
            tracing::debug!("Rejecting merkle branch: {}", err);
            false
        }
    }
}
