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

use crate::bls::compute_domain;
use crate::{
    AttestationData, ChainSpec, PublicKeyBytes, Root, Shard, Slot, ValidatorIndex,
    ValidatorRecord, active_validator_indices, ensure,
};
use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};
use ssz_merkle::tree_hash_container;

/// Delta chain flag of an activation.
pub const REGISTRY_DELTA_ACTIVATION: u64 = 0;
/// Delta chain flag of an exit.
pub const REGISTRY_DELTA_EXIT: u64 = 1;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconStateError {
    #[error("Slot {slot} is outside the window of state slot {state_slot}")]
    SlotOutOfRange { slot: Slot, state_slot: Slot },
    #[error("Unknown validator {0}")]
    UnknownValidator(ValidatorIndex),
    #[error("No committee for shard {shard} at slot {slot}")]
    UnknownShard { slot: Slot, shard: Shard },
    #[error("Ring {ring} has {len} entries")]
    RingLength { ring: &'static str, len: usize },
    #[error("Participation bitfield has {found} bytes, committee needs {expected}")]
    BitfieldLength { expected: usize, found: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkData {
    pub pre_fork_version: u64,
    pub post_fork_version: u64,
    pub fork_slot: Slot,
}

tree_hash_container!(ForkData {
    pre_fork_version,
    post_fork_version,
    fork_slot
});

impl ForkData {
    pub fn fork_version(&self, slot: Slot) -> u64 {
        if slot < self.fork_slot {
            self.pre_fork_version
        } else {
            self.post_fork_version
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosslinkRecord {
    pub slot: Slot,
    pub shard_block_root: Root,
}

tree_hash_container!(CrosslinkRecord {
    slot,
    shard_block_root
});

/// Validators assigned to a shard at one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardCommittee {
    pub shard: Shard,
    pub committee: Vec<ValidatorIndex>,
    /// Size of the active set the committee was drawn from.
    pub total_validator_count: u64,
}

tree_hash_container!(ShardCommittee {
    shard,
    committee,
    total_validator_count
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePoWReceiptRootRecord {
    pub candidate_pow_receipt_root: Root,
    pub vote_count: u64,
}

tree_hash_container!(CandidatePoWReceiptRootRecord {
    candidate_pow_receipt_root,
    vote_count
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReassignmentRecord {
    pub validator_index: u64,
    pub shard: Shard,
    pub slot: Slot,
}

tree_hash_container!(ShardReassignmentRecord {
    validator_index,
    shard,
    slot
});

/// An attestation accepted into the state, awaiting epoch processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAttestationRecord {
    pub data: AttestationData,
    pub participation_bitfield: Bytes,
    pub custody_bitfield: Bytes,
    pub slot_included: Slot,
}

tree_hash_container!(PendingAttestationRecord {
    data,
    participation_bitfield,
    custody_bitfield,
    slot_included
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRegistryDeltaBlock {
    pub latest_registry_delta_root: Root,
    pub validator_index: u64,
    pub pubkey: PublicKeyBytes,
    pub slot: Slot,
    pub flag: u64,
}

tree_hash_container!(ValidatorRegistryDeltaBlock {
    latest_registry_delta_root,
    validator_index,
    pubkey,
    slot,
    flag
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconState {
    // Misc
    pub slot: Slot,
    pub genesis_time: u64,
    pub fork_data: ForkData,

    // Validator registry
    pub validator_registry: Vec<ValidatorRecord>,
    pub validator_registry_latest_change_slot: Slot,
    pub validator_registry_exit_count: u64,
    pub validator_registry_delta_chain_tip: Root,

    // Randomness and committees
    pub latest_randao_mix: Root,
    pub previous_randao_mix: Root,
    /// Previous epoch rows followed by current epoch rows, one row per slot.
    pub shard_committees_at_slots: Vec<Vec<ShardCommittee>>,
    pub current_epoch_start_shard: Shard,
    pub persistent_committees: Vec<Vec<ValidatorIndex>>,
    pub persistent_committee_reassignments: Vec<ShardReassignmentRecord>,

    // Finality
    pub previous_justified_slot: Slot,
    pub justified_slot: Slot,
    pub justification_bitfield: u64,
    pub finalized_slot: Slot,

    // Recent state
    pub latest_crosslinks: Vec<CrosslinkRecord>,
    pub latest_block_roots: Vec<Root>,
    pub latest_penalized_exit_balances: Vec<u64>,
    pub latest_attestations: Vec<PendingAttestationRecord>,

    // PoW receipt root
    pub processed_pow_receipt_root: Root,
    pub candidate_pow_receipt_roots: Vec<CandidatePoWReceiptRootRecord>,
}

tree_hash_container!(BeaconState {
    slot,
    genesis_time,
    fork_data,
    validator_registry,
    validator_registry_latest_change_slot,
    validator_registry_exit_count,
    validator_registry_delta_chain_tip,
    latest_randao_mix,
    previous_randao_mix,
    shard_committees_at_slots,
    current_epoch_start_shard,
    persistent_committees,
    persistent_committee_reassignments,
    previous_justified_slot,
    justified_slot,
    justification_bitfield,
    finalized_slot,
    latest_crosslinks,
    latest_block_roots,
    latest_penalized_exit_balances,
    latest_attestations,
    processed_pow_receipt_root,
    candidate_pow_receipt_roots
});

impl BeaconState {
    /// Signature domain of `domain_type` at `slot`.
    pub fn domain(&self, slot: Slot, domain_type: u64) -> u64 {
        compute_domain(self.fork_data.fork_version(slot), domain_type)
    }

    pub fn active_validator_indices(&self) -> Vec<ValidatorIndex> {
        active_validator_indices(&self.validator_registry)
    }

    pub fn validator_index_by_pubkey(&self, pubkey: &PublicKeyBytes) -> Option<ValidatorIndex> {
        self.validator_registry
            .iter()
            .position(|validator| &validator.pubkey == pubkey)
    }

    pub fn validator(&self, index: ValidatorIndex) -> Result<&ValidatorRecord, BeaconStateError> {
        self.validator_registry
            .get(index)
            .ok_or(BeaconStateError::UnknownValidator(index))
    }

    pub fn validator_mut(
        &mut self,
        index: ValidatorIndex,
    ) -> Result<&mut ValidatorRecord, BeaconStateError> {
        self.validator_registry
            .get_mut(index)
            .ok_or(BeaconStateError::UnknownValidator(index))
    }

    /// Root of the block at `slot`, which must lie within the block root ring
    /// and not after the state slot.
    ///
    /// The root at `self.slot` is only meaningful once slot processing has
    /// recorded it.
    pub fn get_block_root(&self, slot: Slot, spec: &ChainSpec) -> Result<Root, BeaconStateError> {
        let out_of_range = BeaconStateError::SlotOutOfRange {
            slot,
            state_slot: self.slot,
        };
        ensure!(slot <= self.slot, out_of_range);
        ensure!(
            self.slot - slot < spec.latest_block_roots_length,
            out_of_range
        );
        let position = (slot % spec.latest_block_roots_length) as usize;
        self.latest_block_roots
            .get(position)
            .copied()
            .ok_or(out_of_range)
    }

    /// Committees of `slot`, which must lie in the previous or the current
    /// epoch of the state.
    pub fn get_shard_committees_at_slot(
        &self,
        slot: Slot,
        spec: &ChainSpec,
    ) -> Result<&[ShardCommittee], BeaconStateError> {
        let out_of_range = BeaconStateError::SlotOutOfRange {
            slot,
            state_slot: self.slot,
        };
        let epoch_start = spec.epoch_start_slot(self.slot);
        let position = if slot >= epoch_start {
            let offset = slot - epoch_start;
            ensure!(offset < spec.epoch_length, out_of_range);
            spec.epoch_length + offset
        } else {
            let offset = epoch_start - slot;
            ensure!(offset <= spec.epoch_length, out_of_range);
            spec.epoch_length - offset
        };
        self.shard_committees_at_slots
            .get(position as usize)
            .map(Vec::as_slice)
            .ok_or(out_of_range)
    }

    /// The committee attesting to `shard` at `slot`.
    pub fn get_shard_committee(
        &self,
        slot: Slot,
        shard: Shard,
        spec: &ChainSpec,
    ) -> Result<&ShardCommittee, BeaconStateError> {
        self.get_shard_committees_at_slot(slot, spec)?
            .iter()
            .find(|committee| committee.shard == shard)
            .ok_or(BeaconStateError::UnknownShard { slot, shard })
    }

    /// Committee members of the attestation's slot and shard whose bit is set
    /// in `participation_bitfield`, most significant bit first.
    pub fn attestation_participants(
        &self,
        data: &AttestationData,
        participation_bitfield: &[u8],
        spec: &ChainSpec,
    ) -> Result<Vec<ValidatorIndex>, BeaconStateError> {
        let committee = &self.get_shard_committee(data.slot, data.shard, spec)?.committee;
        let expected = committee.len().div_ceil(8);
        ensure!(
            participation_bitfield.len() == expected,
            BeaconStateError::BitfieldLength {
                expected,
                found: participation_bitfield.len(),
            }
        );
        Ok(committee
            .iter()
            .enumerate()
            .filter(|(position, _)| {
                participation_bitfield[position / 8] >> (7 - position % 8) & 1 == 1
            })
            .map(|(_, index)| *index)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::genesis_deposits;
    use crate::{DEFAULT_CONFIG, TreeHash, build_genesis_state};

    fn genesis(spec: &ChainSpec) -> BeaconState {
        build_genesis_state(&genesis_deposits(16, spec), 0, Root::ZERO, spec, &DEFAULT_CONFIG)
            .unwrap()
    }

    #[test]
    fn fork_version_switches_at_fork_slot() {
        let fork = ForkData {
            pre_fork_version: 1,
            post_fork_version: 2,
            fork_slot: 10,
        };
        assert_eq!(fork.fork_version(9), 1);
        assert_eq!(fork.fork_version(10), 2);
    }

    #[test]
    fn committee_window_covers_two_epochs() {
        let spec = ChainSpec::minimal();
        let mut state = genesis(&spec);
        state.slot = 2 * spec.epoch_length + 3;

        // previous epoch starts one epoch before the current one
        let first = state.get_shard_committees_at_slot(spec.epoch_length, &spec);
        assert_eq!(first.unwrap(), state.shard_committees_at_slots[0].as_slice());
        let last = state.get_shard_committees_at_slot(3 * spec.epoch_length - 1, &spec);
        assert_eq!(
            last.unwrap(),
            state.shard_committees_at_slots[2 * spec.epoch_length as usize - 1].as_slice()
        );

        for slot in [spec.epoch_length - 1, 3 * spec.epoch_length] {
            assert_eq!(
                state.get_shard_committees_at_slot(slot, &spec),
                Err(BeaconStateError::SlotOutOfRange {
                    slot,
                    state_slot: state.slot
                })
            );
        }
    }

    #[test]
    fn block_roots_are_bounded_by_the_ring() {
        let spec = ChainSpec::minimal();
        let mut state = genesis(&spec);
        state.latest_block_roots[5] = Root::repeat_byte(5);
        state.slot = 10;

        assert_eq!(state.get_block_root(5, &spec), Ok(Root::repeat_byte(5)));
        assert!(state.get_block_root(11, &spec).is_err());

        state.slot = 5 + spec.latest_block_roots_length;
        assert!(state.get_block_root(5, &spec).is_err());
    }

    #[test]
    fn state_root_changes_with_state() {
        let spec = ChainSpec::minimal();
        let state = genesis(&spec);
        let mut other = state.clone();
        assert_eq!(state.hash_tree_root(), other.hash_tree_root());
        other.justification_bitfield = 1;
        assert_ne!(state.hash_tree_root(), other.hash_tree_root());
    }

    #[test]
    fn participants_follow_the_bitfield() {
        let spec = ChainSpec::minimal();
        let mut state = genesis(&spec);
        let committee = vec![4, 7, 9];
        state.shard_committees_at_slots[spec.epoch_length as usize] = vec![ShardCommittee {
            shard: 3,
            committee: committee.clone(),
            total_validator_count: 16,
        }];
        let data = AttestationData {
            slot: 0,
            shard: 3,
            beacon_block_root: Root::ZERO,
            epoch_boundary_root: Root::ZERO,
            shard_block_root: Root::ZERO,
            latest_crosslink_root: Root::ZERO,
            justified_slot: 0,
            justified_block_root: Root::ZERO,
        };

        let mut bitfield = vec![0u8; committee.len().div_ceil(8)];
        bitfield[0] = 0b0100_0000;
        assert_eq!(
            state.attestation_participants(&data, &bitfield, &spec),
            Ok(vec![committee[1]])
        );

        bitfield.push(0);
        assert!(matches!(
            state.attestation_participants(&data, &bitfield, &spec),
            Err(BeaconStateError::BitfieldLength { .. })
        ));

        let data = AttestationData { shard: 5, ..data };
        assert!(matches!(
            state.attestation_participants(&data, &[0], &spec),
            Err(BeaconStateError::UnknownShard { .. })
        ));
    }

    #[test]
    fn pubkey_lookup() {
        let spec = ChainSpec::minimal();
        let state = genesis(&spec);
        let pubkey = state.validator_registry[3].pubkey;
        assert_eq!(state.validator_index_by_pubkey(&pubkey), Some(3));
        assert_eq!(state.validator_index_by_pubkey(&PublicKeyBytes::ZERO), None);
        assert_eq!(
            state.validator(99),
            Err(BeaconStateError::UnknownValidator(99))
        );
    }
}
