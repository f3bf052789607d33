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

use crate::{Root, Shard, Slot, ensure};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("Parameter {0} must be non-zero")]
    ZeroParameter(&'static str),
    #[error("Minimum deposit {min} ETH exceeds maximum deposit {max} ETH")]
    DepositBounds { min: u64, max: u64 },
    #[error("Maximum deposit of {0} ETH overflows the Gwei range")]
    DepositOverflow(u64),
    #[error("Beacon chain shard number {0} collides with a regular shard")]
    BeaconChainShard(Shard),
    #[error("Block root ring of {length} slots cannot reach back over two epochs of {epoch_length} slots")]
    BlockRootsTooShort { length: u64, epoch_length: u64 },
    #[error("Fork version {0} does not fit in 32 bits")]
    ForkVersion(u64),
}

/// Protocol constants of a beacon chain instance.
///
/// Deposit bounds are denominated in ETH; balances are kept in Gwei. Missing
/// fields fall back to the foundation values when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSpec {
    // Misc
    pub shard_count: u64,
    pub max_balance_churn_quotient: u64,
    pub beacon_chain_shard_number: Shard,
    pub max_casper_votes: u64,
    pub latest_block_roots_length: u64,
    pub latest_penalized_exit_length: u64,

    // Deposit contract
    pub deposit_contract_tree_depth: u64,
    pub min_deposit: u64,
    pub max_deposit: u64,
    pub gwei_per_eth: u64,

    // Initial values
    pub initial_fork_version: u64,
    pub initial_slot_number: Slot,
    pub zero_hash: Root,
    pub min_genesis_time: u64,

    // Time parameters
    pub slot_duration: u64,
    pub min_attestation_inclusion_delay: u64,
    pub epoch_length: u64,
    pub pow_receipt_root_voting_period: u64,
    pub collective_penalty_calculation_period: u64,

    // Reward and penalty quotients
    pub whistleblower_reward_quotient: u64,

    // Max operations per block
    pub max_proposer_slashings: u64,
    pub max_casper_slashings: u64,
    pub max_attestations: u64,
    pub max_deposits: u64,
    pub max_exits: u64,

    // Signature domains
    pub domain_deposit: u64,
    pub domain_proposal: u64,
    pub domain_exit: u64,
}

impl ChainSpec {
    /// The Ethereum Foundation parameters.
    pub fn foundation() -> Self {
        Self {
            shard_count: 1024,
            max_balance_churn_quotient: 32,
            beacon_chain_shard_number: u64::MAX,
            max_casper_votes: 1024,
            latest_block_roots_length: 8192,
            latest_penalized_exit_length: 8192,

            deposit_contract_tree_depth: 32,
            min_deposit: 1,
            max_deposit: 32,
            gwei_per_eth: 1_000_000_000,

            initial_fork_version: 0,
            initial_slot_number: 0,
            zero_hash: Root::ZERO,
            min_genesis_time: 0,

            slot_duration: 6,
            min_attestation_inclusion_delay: 4,
            epoch_length: 64,
            pow_receipt_root_voting_period: 1024,
            collective_penalty_calculation_period: 1_048_576,

            whistleblower_reward_quotient: 512,

            max_proposer_slashings: 16,
            max_casper_slashings: 16,
            max_attestations: 128,
            max_deposits: 16,
            max_exits: 16,

            domain_deposit: 0,
            domain_proposal: 2,
            domain_exit: 3,
        }
    }

    /// Small parameters for tests and local networks.
    pub fn minimal() -> Self {
        Self {
            shard_count: 8,
            max_casper_votes: 64,
            latest_block_roots_length: 64,
            latest_penalized_exit_length: 64,
            slot_duration: 1,
            min_attestation_inclusion_delay: 1,
            epoch_length: 8,
            pow_receipt_root_voting_period: 16,
            collective_penalty_calculation_period: 64,
            ..Self::foundation()
        }
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        let non_zero = [
            ("shard_count", self.shard_count),
            ("epoch_length", self.epoch_length),
            ("max_balance_churn_quotient", self.max_balance_churn_quotient),
            ("latest_block_roots_length", self.latest_block_roots_length),
            (
                "latest_penalized_exit_length",
                self.latest_penalized_exit_length,
            ),
            ("gwei_per_eth", self.gwei_per_eth),
            ("max_deposit", self.max_deposit),
            (
                "pow_receipt_root_voting_period",
                self.pow_receipt_root_voting_period,
            ),
            (
                "collective_penalty_calculation_period",
                self.collective_penalty_calculation_period,
            ),
            (
                "whistleblower_reward_quotient",
                self.whistleblower_reward_quotient,
            ),
        ];
        for (name, value) in non_zero {
            ensure!(value != 0, SpecError::ZeroParameter(name));
        }
        ensure!(
            self.min_deposit <= self.max_deposit,
            SpecError::DepositBounds {
                min: self.min_deposit,
                max: self.max_deposit,
            }
        );
        ensure!(
            self.max_deposit.checked_mul(self.gwei_per_eth).is_some(),
            SpecError::DepositOverflow(self.max_deposit)
        );
        ensure!(
            self.beacon_chain_shard_number >= self.shard_count,
            SpecError::BeaconChainShard(self.beacon_chain_shard_number)
        );
        // epoch processing reads the boundary root of the previous epoch
        ensure!(
            self.latest_block_roots_length >= self.epoch_length.saturating_mul(2),
            SpecError::BlockRootsTooShort {
                length: self.latest_block_roots_length,
                epoch_length: self.epoch_length,
            }
        );
        ensure!(
            self.initial_fork_version <= u64::from(u32::MAX),
            SpecError::ForkVersion(self.initial_fork_version)
        );
        Ok(())
    }

    /// Smallest accepted deposit, in Gwei.
    #[inline]
    pub fn min_deposit_gwei(&self) -> u64 {
        self.min_deposit.saturating_mul(self.gwei_per_eth)
    }

    /// Activation threshold and balance ceiling, in Gwei.
    #[inline]
    pub fn max_deposit_gwei(&self) -> u64 {
        self.max_deposit.saturating_mul(self.gwei_per_eth)
    }

    /// Slot number of the first slot of the epoch containing `slot`.
    #[inline]
    pub fn epoch_start_slot(&self, slot: Slot) -> Slot {
        slot - slot % self.epoch_length
    }
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self::foundation()
    }
}
