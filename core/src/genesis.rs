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

use crate::{
    BeaconBlock, BeaconState, ChainSpec, CrosslinkRecord, Deposit, DepositError, ForkData,
    ProcessingConfig, Root, ShuffleError, SpecError, StatusError, activate_validator,
    compute_committees, process_deposit, shuffle, split,
};
use ssz_merkle::TreeHash;
use tracing::{debug, info};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GenesisError {
    #[error("Invalid chain spec: {0}")]
    InvalidSpec(#[from] SpecError),
    #[error("Genesis deposit {index} rejected: {source}")]
    Deposit { index: usize, source: DepositError },
    #[error("Activation failed: {0}")]
    Status(#[from] StatusError),
    #[error("Shuffling failed: {0}")]
    Shuffle(#[from] ShuffleError),
}

/// Builds the genesis state from the deposits observed in the deposit
/// contract before chain start.
///
/// Deposits are applied in order; every validator whose balance reaches the
/// maximum deposit is activated immediately. Committees for both epoch halves
/// and the persistent committees are derived from the zero seed.
#[tracing::instrument(skip(initial_deposits, spec, config), fields(deposits = initial_deposits.len()))]
pub fn build_genesis_state(
    initial_deposits: &[Deposit],
    genesis_time: u64,
    processed_pow_receipt_root: Root,
    spec: &ChainSpec,
    config: &ProcessingConfig,
) -> Result<BeaconState, GenesisError> {
    spec.validate()?;

    let mut state = BeaconState {
        slot: spec.initial_slot_number,
        genesis_time,
        fork_data: ForkData {
            pre_fork_version: spec.initial_fork_version,
            post_fork_version: spec.initial_fork_version,
            fork_slot: spec.initial_slot_number,
        },

        validator_registry: vec![],
        validator_registry_latest_change_slot: spec.initial_slot_number,
        validator_registry_exit_count: 0,
        validator_registry_delta_chain_tip: spec.zero_hash,

        latest_randao_mix: spec.zero_hash,
        previous_randao_mix: spec.zero_hash,
        shard_committees_at_slots: vec![],
        current_epoch_start_shard: 0,
        persistent_committees: vec![],
        persistent_committee_reassignments: vec![],

        previous_justified_slot: spec.initial_slot_number,
        justified_slot: spec.initial_slot_number,
        justification_bitfield: 0,
        finalized_slot: spec.initial_slot_number,

        latest_crosslinks: vec![
            CrosslinkRecord {
                slot: spec.initial_slot_number,
                shard_block_root: spec.zero_hash,
            };
            spec.shard_count as usize
        ],
        latest_block_roots: vec![spec.zero_hash; spec.latest_block_roots_length as usize],
        latest_penalized_exit_balances: vec![0; spec.latest_penalized_exit_length as usize],
        latest_attestations: vec![],

        processed_pow_receipt_root,
        candidate_pow_receipt_roots: vec![],
    };

    let max_deposit = spec.max_deposit_gwei();
    for (position, deposit) in initial_deposits.iter().enumerate() {
        let data = &deposit.deposit_data;
        let index = process_deposit(&mut state, &data.deposit_input, data.value, spec, config)
            .map_err(|source| GenesisError::Deposit {
                index: position,
                source,
            })?;

        let validator = &state.validator_registry[index];
        if validator.balance >= max_deposit && !validator.is_active() {
            activate_validator(&mut state, index)?;
        }
    }

    let active_indices = state.active_validator_indices();
    debug!(
        validators = state.validator_registry.len(),
        active = active_indices.len(),
        "Processed genesis deposits"
    );

    let committees = compute_committees(&active_indices, spec.zero_hash, 0, spec)?;
    state.shard_committees_at_slots = [committees.clone(), committees].concat();

    let shuffled = shuffle(&active_indices, spec.zero_hash)?;
    state.persistent_committees = split(&shuffled, spec.shard_count as usize)?;

    info!(
        active = active_indices.len(),
        genesis_time, "Genesis state built"
    );
    Ok(state)
}

/// The chain can start once the genesis time has been reached and there is at
/// least one active validator.
pub fn is_valid_genesis_state(state: &BeaconState, spec: &ChainSpec) -> bool {
    state.genesis_time >= spec.min_genesis_time
        && state
            .validator_registry
            .iter()
            .any(|validator| validator.is_active())
}

/// The block at the initial slot committing to `genesis_state`.
pub fn genesis_block(genesis_state: &BeaconState, spec: &ChainSpec) -> BeaconBlock {
    BeaconBlock {
        state_root: genesis_state.hash_tree_root(),
        ..BeaconBlock::empty(spec.initial_slot_number, spec.zero_hash)
    }
}
