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

use anyhow::Context;
use beacon_core::test_utils::{generate_deterministic_keypairs, signed_deposit};
use beacon_core::{ChainSpec, Deposit, DepositData, Root, TreeHash};
use serde::{Deserialize, Serialize};
use ssz_merkle::hash_concat;
use std::path::Path;
use tracing::{debug, info};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DepositTreeError {
    #[error("Deposit tree of depth {0} is full")]
    Full(usize),
    #[error("No deposit at index {0}")]
    UnknownIndex(u64),
}

/// Append-only Merkle tree over deposit data roots, padded on the right with
/// zero subtrees up to a fixed depth.
#[derive(Debug, Clone)]
pub struct DepositTree {
    depth: usize,
    leaves: Vec<Root>,
    /// `zero_hashes[i]` is the root of a subtree of 2^i zero leaves.
    zero_hashes: Vec<Root>,
}

impl DepositTree {
    pub fn new(depth: usize) -> Self {
        let mut zero_hashes = vec![Root::ZERO; depth + 1];
        for i in 0..depth {
            zero_hashes[i + 1] = hash_concat(zero_hashes[i].as_slice(), zero_hashes[i].as_slice());
        }
        Self {
            depth,
            leaves: vec![],
            zero_hashes,
        }
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Appends `data` and returns its index in the tree.
    pub fn push(&mut self, data: &DepositData) -> Result<u64, DepositTreeError> {
        let capacity = 1u64.checked_shl(self.depth as u32).unwrap_or(u64::MAX);
        let index = self.leaves.len() as u64;
        if index >= capacity {
            return Err(DepositTreeError::Full(self.depth));
        }
        self.leaves.push(data.hash_tree_root());
        Ok(index)
    }

    /// All populated nodes, level by level from the leaves up.
    fn levels(&self) -> Vec<Vec<Root>> {
        let mut levels = vec![self.leaves.clone()];
        for level in 0..self.depth {
            let parents = levels[level]
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&self.zero_hashes[level]);
                    hash_concat(pair[0].as_slice(), right.as_slice())
                })
                .collect();
            levels.push(parents);
        }
        levels
    }

    pub fn root(&self) -> Root {
        self.levels()[self.depth]
            .first()
            .copied()
            .unwrap_or(self.zero_hashes[self.depth])
    }

    /// Sibling hashes from the leaf at `index` up to the root.
    pub fn branch(&self, index: u64) -> Result<Vec<Root>, DepositTreeError> {
        if index >= self.leaves.len() as u64 {
            return Err(DepositTreeError::UnknownIndex(index));
        }
        let levels = self.levels();
        let mut position = index as usize;
        let branch = (0..self.depth)
            .map(|level| {
                let sibling = levels[level]
                    .get(position ^ 1)
                    .copied()
                    .unwrap_or(self.zero_hashes[level]);
                position >>= 1;
                sibling
            })
            .collect();
        Ok(branch)
    }
}

/// Deposits observed in the deposit contract, in contract order, together with
/// the receipt root they are proven against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositFile {
    pub genesis_time: u64,
    /// Number of leading deposits that make up the genesis state.
    pub genesis_count: usize,
    pub receipt_root: Root,
    pub deposits: Vec<Deposit>,
}

impl DepositFile {
    /// Deposits of deterministic test validators, each at the activation
    /// threshold. The first `genesis_count` are meant for genesis, the
    /// remaining `extra` for inclusion in blocks.
    pub fn generate(
        genesis_count: usize,
        extra: usize,
        genesis_time: u64,
        spec: &ChainSpec,
    ) -> Result<Self, DepositTreeError> {
        let keypairs = generate_deterministic_keypairs(genesis_count + extra);
        let mut deposits: Vec<Deposit> = keypairs
            .iter()
            .enumerate()
            .map(|(index, keypair)| {
                let mut deposit =
                    signed_deposit(keypair, index as u64, spec.max_deposit_gwei(), spec);
                deposit.deposit_data.timestamp = genesis_time;
                deposit
            })
            .collect();

        let mut tree = DepositTree::new(spec.deposit_contract_tree_depth as usize);
        for deposit in &mut deposits {
            deposit.merkle_tree_index = tree.push(&deposit.deposit_data)?;
        }
        for deposit in &mut deposits {
            deposit.merkle_branch = tree.branch(deposit.merkle_tree_index)?;
        }

        let receipt_root = tree.root();
        debug!(%receipt_root, deposits = deposits.len(), "Deposit tree built");
        Ok(Self {
            genesis_time,
            genesis_count,
            receipt_root,
            deposits,
        })
    }

    pub fn genesis_deposits(&self) -> &[Deposit] {
        &self.deposits[..self.genesis_count.min(self.deposits.len())]
    }

    pub fn pending_deposits(&self) -> &[Deposit] {
        &self.deposits[self.genesis_count.min(self.deposits.len())..]
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), deposits = self.deposits.len(), "Saved deposits");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_slice(&json).context("invalid deposit file")
    }
}
