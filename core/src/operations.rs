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

use crate::{ChainSpec, Deposit, Root, Shard, SignatureBytes, Slot};
use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};
use ssz_merkle::{TreeHash, tree_hash_container};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSignedData {
    pub slot: Slot,
    pub shard: Shard,
    pub block_root: Root,
}

tree_hash_container!(ProposalSignedData {
    slot,
    shard,
    block_root
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposerSlashing {
    pub proposer_index: u64,
    pub proposal_data_1: ProposalSignedData,
    pub proposal_signature_1: SignatureBytes,
    pub proposal_data_2: ProposalSignedData,
    pub proposal_signature_2: SignatureBytes,
}

tree_hash_container!(ProposerSlashing {
    proposer_index,
    proposal_data_1,
    proposal_signature_1,
    proposal_data_2,
    proposal_signature_2
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttestationData {
    pub slot: Slot,
    pub shard: Shard,
    pub beacon_block_root: Root,
    pub epoch_boundary_root: Root,
    pub shard_block_root: Root,
    pub latest_crosslink_root: Root,
    pub justified_slot: Slot,
    pub justified_block_root: Root,
}

tree_hash_container!(AttestationData {
    slot,
    shard,
    beacon_block_root,
    epoch_boundary_root,
    shard_block_root,
    latest_crosslink_root,
    justified_slot,
    justified_block_root
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub data: AttestationData,
    /// One bit per committee member, most significant bit first.
    pub participation_bitfield: Bytes,
    pub custody_bitfield: Bytes,
    pub aggregate_signature: SignatureBytes,
}

tree_hash_container!(Attestation {
    data,
    participation_bitfield,
    custody_bitfield,
    aggregate_signature
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashableVoteData {
    pub aggregate_signature_poc_0_indices: Vec<u64>,
    pub aggregate_signature_poc_1_indices: Vec<u64>,
    pub data: AttestationData,
    pub aggregate_signature: SignatureBytes,
}

tree_hash_container!(SlashableVoteData {
    aggregate_signature_poc_0_indices,
    aggregate_signature_poc_1_indices,
    data,
    aggregate_signature
});

impl SlashableVoteData {
    /// All validator indices that signed the vote.
    pub fn voters(&self) -> impl Iterator<Item = u64> + '_ {
        self.aggregate_signature_poc_0_indices
            .iter()
            .chain(&self.aggregate_signature_poc_1_indices)
            .copied()
    }

    pub fn vote_count(&self) -> usize {
        self.aggregate_signature_poc_0_indices.len() + self.aggregate_signature_poc_1_indices.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasperSlashing {
    pub slashable_vote_data_1: SlashableVoteData,
    pub slashable_vote_data_2: SlashableVoteData,
}

tree_hash_container!(CasperSlashing {
    slashable_vote_data_1,
    slashable_vote_data_2
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    pub slot: Slot,
    pub validator_index: u64,
    pub signature: SignatureBytes,
}

tree_hash_container!(Exit {
    slot,
    validator_index,
    signature
});

impl Exit {
    /// Root of the exit with the signature emptied; the message the validator signs.
    pub fn signing_message_root(&self) -> Root {
        Exit {
            signature: SignatureBytes::ZERO,
            ..self.clone()
        }
        .hash_tree_root()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlockBody {
    pub proposer_slashings: Vec<ProposerSlashing>,
    pub casper_slashings: Vec<CasperSlashing>,
    pub attestations: Vec<Attestation>,
    pub deposits: Vec<Deposit>,
    pub exits: Vec<Exit>,
}

tree_hash_container!(BeaconBlockBody {
    proposer_slashings,
    casper_slashings,
    attestations,
    deposits,
    exits
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlock {
    pub slot: Slot,
    pub parent_root: Root,
    pub state_root: Root,
    pub randao_reveal: Root,
    pub candidate_pow_receipt_root: Root,
    pub signature: SignatureBytes,
    pub body: BeaconBlockBody,
}

tree_hash_container!(BeaconBlock {
    slot,
    parent_root,
    state_root,
    randao_reveal,
    candidate_pow_receipt_root,
    signature,
    body
});

impl BeaconBlock {
    /// An unsigned block with an empty body.
    pub fn empty(slot: Slot, parent_root: Root) -> Self {
        Self {
            slot,
            parent_root,
            state_root: Root::ZERO,
            randao_reveal: Root::ZERO,
            candidate_pow_receipt_root: Root::ZERO,
            signature: SignatureBytes::ZERO,
            body: BeaconBlockBody::default(),
        }
    }

    /// The proposal the block proposer signs: the block root with the
    /// signature emptied, on the beacon chain shard.
    pub fn proposal_data(&self, spec: &ChainSpec) -> ProposalSignedData {
        let unsigned = BeaconBlock {
            signature: SignatureBytes::ZERO,
            ..self.clone()
        };
        ProposalSignedData {
            slot: self.slot,
            shard: spec.beacon_chain_shard_number,
            block_root: unsigned.hash_tree_root(),
        }
    }
}
