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

use crate::{ChainSpec, DepositInput, Gwei, PublicKeyBytes, Root, Slot, ValidatorIndex};
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use ssz_merkle::{TreeHash, tree_hash_container};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidatorStatus {
    PendingActivation,
    Active,
    PendingExit,
    Exited,
    Penalized,
}

impl ValidatorStatus {
    /// Wire code of the status.
    pub const fn code(self) -> u64 {
        match self {
            ValidatorStatus::PendingActivation => 0,
            ValidatorStatus::Active => 1,
            ValidatorStatus::PendingExit => 2,
            ValidatorStatus::Exited => 3,
            ValidatorStatus::Penalized => 127,
        }
    }

    /// Active validators are assigned to committees and may propose.
    #[inline]
    pub const fn is_active(self) -> bool {
        matches!(self, ValidatorStatus::Active | ValidatorStatus::PendingExit)
    }
}

impl TreeHash for ValidatorStatus {
    fn hash_tree_root(&self) -> B256 {
        self.code().hash_tree_root()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: Root,
    pub randao_commitment: Root,
    /// Slots proposed since the last randao reveal.
    pub randao_layers: u64,
    pub status: ValidatorStatus,
    /// Balance in Gwei.
    pub balance: Gwei,
    pub latest_status_change_slot: Slot,
    pub exit_count: u64,
}

tree_hash_container!(ValidatorRecord {
    pubkey,
    withdrawal_credentials,
    randao_commitment,
    randao_layers,
    status,
    balance,
    latest_status_change_slot,
    exit_count
});

impl ValidatorRecord {
    /// A fresh record for a first deposit. The balance is credited separately.
    pub fn pending(deposit_input: &DepositInput, slot: Slot) -> Self {
        Self {
            pubkey: deposit_input.pubkey,
            withdrawal_credentials: deposit_input.withdrawal_credentials,
            randao_commitment: deposit_input.randao_commitment,
            randao_layers: 0,
            status: ValidatorStatus::PendingActivation,
            balance: 0,
            latest_status_change_slot: slot,
            exit_count: 0,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// The balance counted towards committee and churn weights.
    #[inline]
    pub fn effective_balance(&self, spec: &ChainSpec) -> Gwei {
        self.balance.min(spec.max_deposit_gwei())
    }
}

/// Indices of the active validators, in registry order.
pub fn active_validator_indices(validators: &[ValidatorRecord]) -> Vec<ValidatorIndex> {
    validators
        .iter()
        .enumerate()
        .filter_map(|(index, validator)| validator.is_active().then_some(index))
        .collect()
}

/// Sum of the effective balances of `indices`. Unknown indices count as zero.
pub fn total_effective_balance(
    validators: &[ValidatorRecord],
    indices: impl IntoIterator<Item = ValidatorIndex>,
    spec: &ChainSpec,
) -> Gwei {
    indices
        .into_iter()
        .filter_map(|index| validators.get(index))
        .fold(0u64, |total, validator| {
            total.saturating_add(validator.effective_balance(spec))
        })
}
