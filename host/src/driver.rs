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

//! A single-node slot loop that owns the beacon state and proposes a block
//! with the attestations of the previous slot whenever asked to.

use std::collections::VecDeque;

use alloy_primitives::Bytes;
use beacon_core::test_utils::{Keypair, build_block, randao_reveal};
use beacon_core::{
    Attestation, AttestationData, BeaconBlock, BeaconBlockBody, BeaconState, BeaconStateError,
    BlockProcessingError, ChainSpec, Deposit, Exit, ProcessingConfig, Root, ShuffleError,
    SignatureBytes, Slot, SlotProcessingError, TreeHash, ValidatorIndex, advance_slot,
    do_transition, genesis_block, get_beacon_proposer_index,
};
use tracing::{debug, info};

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("Block production failed: {0}")]
    Block(#[from] BlockProcessingError),
    #[error("Slot processing failed: {0}")]
    Slot(#[from] SlotProcessingError),
    #[error("Beacon state error: {0}")]
    State(#[from] BeaconStateError),
    #[error("Proposer lookup failed: {0}")]
    Shuffle(#[from] ShuffleError),
    #[error("No key for validator {0}")]
    UnknownKey(ValidatorIndex),
    #[error("Randao chain of validator {0} is exhausted")]
    RandaoExhausted(ValidatorIndex),
}

/// Summary of one driven slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub slot: Slot,
    pub block_root: Option<Root>,
    pub attestations: usize,
    pub deposits: usize,
    pub exits: usize,
    pub justified_slot: Slot,
    pub finalized_slot: Slot,
}

pub struct SlotDriver {
    spec: ChainSpec,
    config: ProcessingConfig,
    keypairs: Vec<Keypair>,
    state: BeaconState,
    head_root: Root,
    pending_deposits: VecDeque<Deposit>,
    pending_exits: VecDeque<Exit>,
}

impl SlotDriver {
    /// Starts from `genesis_state`. `keypairs` is indexed by validator index and
    /// must cover every validator that may be asked to propose.
    pub fn new(
        genesis_state: BeaconState,
        keypairs: Vec<Keypair>,
        spec: ChainSpec,
        config: ProcessingConfig,
    ) -> Self {
        let head_root = genesis_block(&genesis_state, &spec).hash_tree_root();
        info!(%head_root, slot = genesis_state.slot, "Driver started from genesis");
        Self {
            spec,
            config,
            keypairs,
            state: genesis_state,
            head_root,
            pending_deposits: VecDeque::new(),
            pending_exits: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &BeaconState {
        &self.state
    }

    pub fn head_root(&self) -> Root {
        self.head_root
    }

    pub fn queue_deposits(&mut self, deposits: impl IntoIterator<Item = Deposit>) {
        self.pending_deposits.extend(deposits);
    }

    /// Signs and queues a voluntary exit of validator `index`.
    pub fn request_exit(&mut self, index: ValidatorIndex) -> Result<(), DriverError> {
        let keypair = self
            .keypairs
            .get(index)
            .ok_or(DriverError::UnknownKey(index))?;
        let mut exit = Exit {
            slot: self.state.slot,
            validator_index: index as u64,
            signature: SignatureBytes::ZERO,
        };
        exit.signature = keypair.sign(
            exit.signing_message_root(),
            self.state.domain(exit.slot, self.spec.domain_exit),
        );
        self.pending_exits.push_back(exit);
        Ok(())
    }

    /// Root of the block at `slot`, including the head at the current slot.
    fn block_root(&self, slot: Slot) -> Result<Root, BeaconStateError> {
        if slot == self.state.slot {
            Ok(self.head_root)
        } else {
            self.state.get_block_root(slot, &self.spec)
        }
    }

    /// Full participation attestations of every committee at the current slot.
    fn attestations(&self) -> Result<Vec<Attestation>, BeaconStateError> {
        let slot = self.state.slot;
        let epoch_boundary_root = self.block_root(self.spec.epoch_start_slot(slot))?;
        let justified_block_root = self.block_root(self.state.justified_slot)?;

        let mut attestations = vec![];
        for shard_committee in self.state.get_shard_committees_at_slot(slot, &self.spec)? {
            let size = shard_committee.committee.len();
            if size == 0 {
                continue;
            }
            let mut bitfield = vec![0u8; size.div_ceil(8)];
            for position in 0..size {
                bitfield[position / 8] |= 0x80 >> (position % 8);
            }
            let shard = shard_committee.shard;
            let latest_crosslink_root = self
                .state
                .latest_crosslinks
                .get(shard as usize)
                .ok_or(BeaconStateError::UnknownShard { slot, shard })?
                .shard_block_root;
            attestations.push(Attestation {
                data: AttestationData {
                    slot,
                    shard,
                    beacon_block_root: self.head_root,
                    epoch_boundary_root,
                    shard_block_root: self.spec.zero_hash,
                    latest_crosslink_root,
                    justified_slot: self.state.justified_slot,
                    justified_block_root,
                },
                custody_bitfield: Bytes::from(vec![0u8; bitfield.len()]),
                participation_bitfield: Bytes::from(bitfield),
                aggregate_signature: SignatureBytes::ZERO,
            });
        }
        Ok(attestations)
    }

    fn drain<T>(queue: &mut VecDeque<T>, max: u64) -> Vec<T> {
        let count = queue.len().min(max as usize);
        queue.drain(..count).collect()
    }

    /// Proposes and applies a block for the next slot. Slots without a
    /// scheduled proposer are left empty and yield `None`.
    pub fn propose(&mut self) -> Result<Option<BeaconBlock>, DriverError> {
        let slot = self.state.slot + 1;
        let next = advance_slot(&self.state, self.head_root, &self.spec)?;
        let proposer = match get_beacon_proposer_index(&next, slot, &self.spec) {
            Ok(proposer) => proposer,
            Err(ShuffleError::InsufficientValidators) => {
                debug!(slot, "No proposer scheduled, slot left empty");
                self.state = next;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        if randao_reveal(next.validator(proposer)?, proposer as u64).is_none() {
            return Err(DriverError::RandaoExhausted(proposer));
        }

        let body = BeaconBlockBody {
            attestations: self.attestations()?,
            deposits: Self::drain(&mut self.pending_deposits, self.spec.max_deposits),
            exits: Self::drain(&mut self.pending_exits, self.spec.max_exits),
            ..Default::default()
        };

        let block = build_block(
            &next,
            self.head_root,
            slot,
            body,
            &self.keypairs,
            &self.spec,
            &self.config,
        )?;
        self.state = do_transition(
            &self.state,
            self.head_root,
            &block,
            &self.spec,
            &self.config,
        )?;
        self.head_root = block.hash_tree_root();
        debug!(slot, %proposer, head_root = %self.head_root, "Block applied");
        Ok(Some(block))
    }

    /// Advances to the next slot without a block.
    pub fn skip(&mut self) -> Result<(), DriverError> {
        self.state = advance_slot(&self.state, self.head_root, &self.spec)?;
        debug!(slot = self.state.slot, "Slot skipped");
        Ok(())
    }

    /// Drives one slot, proposing a block unless `skip` is set.
    pub fn on_slot(&mut self, skip: bool) -> Result<SlotReport, DriverError> {
        let block = if skip {
            self.skip()?;
            None
        } else {
            self.propose()?
        };
        let (block_root, attestations, deposits, exits) = match &block {
            Some(block) => (
                Some(self.head_root),
                block.body.attestations.len(),
                block.body.deposits.len(),
                block.body.exits.len(),
            ),
            None => (None, 0, 0, 0),
        };
        Ok(SlotReport {
            slot: self.state.slot,
            block_root,
            attestations,
            deposits,
            exits,
            justified_slot: self.state.justified_slot,
            finalized_slot: self.state.finalized_slot,
        })
    }
}
