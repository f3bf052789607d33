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

use crate::bls::{BlsError, bls_verify};
use crate::{
    Attestation, BeaconBlock, BeaconState, BeaconStateError, CandidatePoWReceiptRootRecord,
    CasperSlashing, ChainSpec, DepositError, EpochProcessingError, Exit, PendingAttestationRecord,
    ProcessingConfig, ProposerSlashing, Root, ShuffleError, Slot, StatusError, ValidatorIndex,
    ValidatorStatus, ensure, get_beacon_proposer_index, hash, initiate_validator_exit,
    penalize_validator, process_deposit, process_epoch, verify_deposit_merkle_proof,
};
use alloc::collections::BTreeSet;
use itertools::Itertools;
use safe_arith::{ArithError, SafeArith};
use ssz_merkle::TreeHash;
use tracing::{debug, info, trace};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotProcessingError {
    #[error("Beacon state error: {0}")]
    State(#[from] BeaconStateError),
    #[error("Proposer lookup failed: {0}")]
    Shuffle(#[from] ShuffleError),
    #[error("Epoch processing failed: {0}")]
    Epoch(#[from] EpochProcessingError),
    #[error("Arithmetic error: {0:?}")]
    Arith(ArithError),
}

impl From<ArithError> for SlotProcessingError {
    fn from(e: ArithError) -> Self {
        SlotProcessingError::Arith(e)
    }
}

/// Why a single block operation was rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("Proposals are for different slots")]
    ProposalSlotMismatch,
    #[error("Proposals are for different shards")]
    ProposalShardMismatch,
    #[error("Proposals are identical")]
    IdenticalProposals,
    #[error("Validator {0} is already penalized")]
    AlreadyPenalized(ValidatorIndex),
    #[error("Invalid signature: {0}")]
    Signature(BlsError),
    #[error("Vote carries {0} signers")]
    TooManyVotes(usize),
    #[error("Votes are identical")]
    IdenticalVotes,
    #[error("No validator signed both votes")]
    NoIntersection,
    #[error("Votes are neither a double vote nor a surround vote")]
    NotSlashable,
    #[error("Attestation for slot {slot} cannot be included at slot {state_slot}")]
    InclusionWindow { slot: Slot, state_slot: Slot },
    #[error("Justified slot {found} does not match {expected}")]
    JustifiedSlotMismatch { expected: Slot, found: Slot },
    #[error("Justified block root does not match the block at the justified slot")]
    JustifiedBlockRootMismatch,
    #[error("Latest crosslink root does not match")]
    CrosslinkRootMismatch,
    #[error("Shard block root must be zero")]
    NonZeroShardBlockRoot,
    #[error("No committee member participated")]
    NoParticipants,
    #[error("Validator {index} is {status:?}, expected Active")]
    NotActive {
        index: ValidatorIndex,
        status: ValidatorStatus,
    },
    #[error("Exit slot {exit_slot} is after state slot {state_slot}")]
    FutureExit { exit_slot: Slot, state_slot: Slot },
    #[error("Beacon state error: {0}")]
    State(#[from] BeaconStateError),
    #[error("Status transition failed: {0}")]
    Status(#[from] StatusError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BlockProcessingError {
    #[error("Block slot {block} does not match state slot {state}")]
    SlotMismatch { state: Slot, block: Slot },
    #[error("Parent root {found} does not match the latest block root {expected}")]
    ParentRootMismatch { expected: Root, found: Root },
    #[error("Invalid proposer signature: {0}")]
    InvalidProposerSignature(BlsError),
    #[error("Randao reveal does not open the commitment of proposer {0}")]
    InvalidRandaoReveal(ValidatorIndex),
    #[error("Block carries {count} {kind}, at most {max} allowed")]
    TooManyOperations {
        kind: &'static str,
        count: usize,
        max: u64,
    },
    #[error("Proposer slashing {index} invalid: {reason}")]
    ProposerSlashingInvalid { index: usize, reason: OperationError },
    #[error("Casper slashing {index} invalid: {reason}")]
    CasperSlashingInvalid { index: usize, reason: OperationError },
    #[error("Attestation {index} invalid: {reason}")]
    AttestationInvalid { index: usize, reason: OperationError },
    #[error("Deposit {index} invalid: {reason}")]
    DepositInvalid { index: usize, reason: DepositError },
    #[error("Exit {index} invalid: {reason}")]
    ExitInvalid { index: usize, reason: OperationError },
    #[error("State root mismatch! Expected {expected}, computed {computed}")]
    StateRootMismatch { expected: Root, computed: Root },
    #[error("Slot processing failed: {0}")]
    SlotProcessing(#[from] SlotProcessingError),
    #[error("Beacon state error: {0}")]
    State(#[from] BeaconStateError),
    #[error("Proposer lookup failed: {0}")]
    Shuffle(#[from] ShuffleError),
    #[error("Arithmetic error: {0:?}")]
    Arith(ArithError),
}

impl From<ArithError> for BlockProcessingError {
    fn from(e: ArithError) -> Self {
        BlockProcessingError::Arith(e)
    }
}

/// `hash` applied `layers` times to `value`.
pub fn repeat_hash(value: Root, layers: u64) -> Root {
    (0..layers).fold(value, |acc, _| hash(acc.as_slice()))
}

/// Advances `state` by one slot.
///
/// `previous_block_root` is the root of the latest block at or before the
/// current slot. It is recorded in the block root ring before the slot number
/// moves on. Epoch processing runs at the last slot of every epoch.
#[tracing::instrument(skip_all, fields(slot = state.slot))]
pub fn process_slot(
    state: &mut BeaconState,
    previous_block_root: Root,
    spec: &ChainSpec,
) -> Result<(), SlotProcessingError> {
    let ring_len = state.latest_block_roots.len();
    let position = state.slot.safe_rem(spec.latest_block_roots_length)? as usize;
    *state
        .latest_block_roots
        .get_mut(position)
        .ok_or(BeaconStateError::RingLength {
            ring: "latest_block_roots",
            len: ring_len,
        })? = previous_block_root;

    if state.slot.safe_add(1)?.safe_rem(spec.epoch_length)? == 0 {
        process_epoch(state, spec)?;
    }

    state.slot.safe_add_assign(1)?;

    if state.slot.safe_rem(spec.pow_receipt_root_voting_period)? == 0 {
        process_pow_receipt_root_votes(state, spec);
    }

    match get_beacon_proposer_index(state, state.slot, spec) {
        Ok(proposer) => {
            state
                .validator_mut(proposer)?
                .randao_layers
                .safe_add_assign(1)?;
        }
        Err(ShuffleError::InsufficientValidators) => {
            trace!(slot = state.slot, "No proposer scheduled");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Adopts a candidate receipt root voted for by a majority of the closing
/// voting period and resets the tally.
fn process_pow_receipt_root_votes(state: &mut BeaconState, spec: &ChainSpec) {
    if let Some(winner) = state.candidate_pow_receipt_roots.iter().find(|candidate| {
        candidate.vote_count.saturating_mul(2) > spec.pow_receipt_root_voting_period
    }) {
        state.processed_pow_receipt_root = winner.candidate_pow_receipt_root;
        info!(root = %state.processed_pow_receipt_root, "PoW receipt root processed");
    }
    state.candidate_pow_receipt_roots.clear();
}

/// Applies `block` to a state already advanced to the block's slot.
///
/// On error `state` may be partially updated; [`do_transition`] works on a
/// copy for that reason.
#[tracing::instrument(skip_all, fields(slot = block.slot))]
pub fn process_block(
    state: &mut BeaconState,
    block: &BeaconBlock,
    spec: &ChainSpec,
    config: &ProcessingConfig,
) -> Result<(), BlockProcessingError> {
    ensure!(
        block.slot == state.slot,
        BlockProcessingError::SlotMismatch {
            state: state.slot,
            block: block.slot,
        }
    );
    let expected_parent = state.get_block_root(state.slot.safe_sub(1)?, spec)?;
    ensure!(
        block.parent_root == expected_parent,
        BlockProcessingError::ParentRootMismatch {
            expected: expected_parent,
            found: block.parent_root,
        }
    );

    let proposer_index = get_beacon_proposer_index(state, state.slot, spec)?;
    let proposer = state.validator(proposer_index)?;
    if !config.no_signature_verification {
        bls_verify(
            &proposer.pubkey,
            block.proposal_data(spec).hash_tree_root(),
            &block.signature,
            state.domain(state.slot, spec.domain_proposal),
        )
        .map_err(BlockProcessingError::InvalidProposerSignature)?;
    }
    ensure!(
        repeat_hash(block.randao_reveal, proposer.randao_layers) == proposer.randao_commitment,
        BlockProcessingError::InvalidRandaoReveal(proposer_index)
    );

    let body = &block.body;
    for (kind, count, max) in [
        (
            "proposer slashings",
            body.proposer_slashings.len(),
            spec.max_proposer_slashings,
        ),
        (
            "casper slashings",
            body.casper_slashings.len(),
            spec.max_casper_slashings,
        ),
        ("attestations", body.attestations.len(), spec.max_attestations),
        ("deposits", body.deposits.len(), spec.max_deposits),
        ("exits", body.exits.len(), spec.max_exits),
    ] {
        ensure!(
            count as u64 <= max,
            BlockProcessingError::TooManyOperations { kind, count, max }
        );
    }

    // Randao
    state.latest_randao_mix ^= block.randao_reveal;
    let proposer = state.validator_mut(proposer_index)?;
    proposer.randao_commitment = block.randao_reveal;
    proposer.randao_layers = 0;

    // PoW receipt root vote
    match state
        .candidate_pow_receipt_roots
        .iter_mut()
        .find(|candidate| candidate.candidate_pow_receipt_root == block.candidate_pow_receipt_root)
    {
        Some(candidate) => candidate.vote_count.safe_add_assign(1)?,
        None => state
            .candidate_pow_receipt_roots
            .push(CandidatePoWReceiptRootRecord {
                candidate_pow_receipt_root: block.candidate_pow_receipt_root,
                vote_count: 1,
            }),
    }

    for (index, slashing) in body.proposer_slashings.iter().enumerate() {
        process_proposer_slashing(state, slashing, spec, config)
            .map_err(|reason| BlockProcessingError::ProposerSlashingInvalid { index, reason })?;
    }
    for (index, slashing) in body.casper_slashings.iter().enumerate() {
        process_casper_slashing(state, slashing, spec)
            .map_err(|reason| BlockProcessingError::CasperSlashingInvalid { index, reason })?;
    }
    for (index, attestation) in body.attestations.iter().enumerate() {
        process_attestation(state, attestation, spec)
            .map_err(|reason| BlockProcessingError::AttestationInvalid { index, reason })?;
    }
    for (index, deposit) in body.deposits.iter().enumerate() {
        if config.verify_deposit_proofs {
            verify_deposit_merkle_proof(state, deposit, spec)
                .map_err(|reason| BlockProcessingError::DepositInvalid { index, reason })?;
        }
        let data = &deposit.deposit_data;
        process_deposit(state, &data.deposit_input, data.value, spec, config)
            .map_err(|reason| BlockProcessingError::DepositInvalid { index, reason })?;
    }
    for (index, exit) in body.exits.iter().enumerate() {
        process_exit(state, exit, spec, config)
            .map_err(|reason| BlockProcessingError::ExitInvalid { index, reason })?;
    }

    debug!(
        proposer_index,
        attestations = body.attestations.len(),
        deposits = body.deposits.len(),
        "Block processed"
    );
    Ok(())
}

fn process_proposer_slashing(
    state: &mut BeaconState,
    slashing: &ProposerSlashing,
    spec: &ChainSpec,
    config: &ProcessingConfig,
) -> Result<(), OperationError> {
    let index = slashing.proposer_index as ValidatorIndex;
    let proposer = state.validator(index)?;
    let (data_1, data_2) = (&slashing.proposal_data_1, &slashing.proposal_data_2);

    ensure!(data_1.slot == data_2.slot, OperationError::ProposalSlotMismatch);
    ensure!(data_1.shard == data_2.shard, OperationError::ProposalShardMismatch);
    ensure!(
        data_1.block_root != data_2.block_root,
        OperationError::IdenticalProposals
    );
    ensure!(
        proposer.status != ValidatorStatus::Penalized,
        OperationError::AlreadyPenalized(index)
    );

    if !config.no_signature_verification {
        for (data, signature) in [
            (data_1, &slashing.proposal_signature_1),
            (data_2, &slashing.proposal_signature_2),
        ] {
            bls_verify(
                &proposer.pubkey,
                data.hash_tree_root(),
                signature,
                state.domain(data.slot, spec.domain_proposal),
            )
            .map_err(OperationError::Signature)?;
        }
    }

    penalize_validator(state, index, spec)?;
    Ok(())
}

/// Penalizes every validator that signed two conflicting votes.
///
/// Aggregate signatures over the votes are not verified.
fn process_casper_slashing(
    state: &mut BeaconState,
    slashing: &CasperSlashing,
    spec: &ChainSpec,
) -> Result<(), OperationError> {
    let (vote_1, vote_2) = (&slashing.slashable_vote_data_1, &slashing.slashable_vote_data_2);
    for vote in [vote_1, vote_2] {
        ensure!(
            vote.vote_count() as u64 <= spec.max_casper_votes,
            OperationError::TooManyVotes(vote.vote_count())
        );
    }
    ensure!(vote_1.data != vote_2.data, OperationError::IdenticalVotes);

    let second: BTreeSet<u64> = vote_2.voters().collect();
    let intersection: Vec<ValidatorIndex> = vote_1
        .voters()
        .filter(|index| second.contains(index))
        .unique()
        .map(|index| index as ValidatorIndex)
        .collect();
    ensure!(!intersection.is_empty(), OperationError::NoIntersection);

    let (data_1, data_2) = (&vote_1.data, &vote_2.data);
    let double_vote = data_1.slot == data_2.slot;
    let surround_vote =
        data_1.justified_slot < data_2.justified_slot && data_2.slot < data_1.slot;
    ensure!(double_vote || surround_vote, OperationError::NotSlashable);

    for index in intersection {
        if state.validator(index)?.status != ValidatorStatus::Penalized {
            penalize_validator(state, index, spec)?;
        }
    }
    Ok(())
}

fn process_attestation(
    state: &mut BeaconState,
    attestation: &Attestation,
    spec: &ChainSpec,
) -> Result<(), OperationError> {
    let data = &attestation.data;
    ensure!(
        data.slot.saturating_add(spec.min_attestation_inclusion_delay) <= state.slot
            && data.slot.saturating_add(spec.epoch_length) >= state.slot,
        OperationError::InclusionWindow {
            slot: data.slot,
            state_slot: state.slot,
        }
    );

    let expected = if data.slot >= spec.epoch_start_slot(state.slot) {
        state.justified_slot
    } else {
        state.previous_justified_slot
    };
    ensure!(
        data.justified_slot == expected,
        OperationError::JustifiedSlotMismatch {
            expected,
            found: data.justified_slot,
        }
    );
    ensure!(
        data.justified_block_root == state.get_block_root(data.justified_slot, spec)?,
        OperationError::JustifiedBlockRootMismatch
    );

    let crosslink = state
        .latest_crosslinks
        .get(data.shard as usize)
        .ok_or(BeaconStateError::UnknownShard {
            slot: data.slot,
            shard: data.shard,
        })?;
    ensure!(
        data.latest_crosslink_root == crosslink.shard_block_root
            || data.latest_crosslink_root == data.shard_block_root,
        OperationError::CrosslinkRootMismatch
    );
    ensure!(
        data.shard_block_root == spec.zero_hash,
        OperationError::NonZeroShardBlockRoot
    );

    let participants =
        state.attestation_participants(data, &attestation.participation_bitfield, spec)?;
    ensure!(!participants.is_empty(), OperationError::NoParticipants);

    state.latest_attestations.push(PendingAttestationRecord {
        data: data.clone(),
        participation_bitfield: attestation.participation_bitfield.clone(),
        custody_bitfield: attestation.custody_bitfield.clone(),
        slot_included: state.slot,
    });
    Ok(())
}

fn process_exit(
    state: &mut BeaconState,
    exit: &Exit,
    spec: &ChainSpec,
    config: &ProcessingConfig,
) -> Result<(), OperationError> {
    let index = exit.validator_index as ValidatorIndex;
    let validator = state.validator(index)?;
    ensure!(
        validator.status == ValidatorStatus::Active,
        OperationError::NotActive {
            index,
            status: validator.status,
        }
    );
    ensure!(
        state.slot >= exit.slot,
        OperationError::FutureExit {
            exit_slot: exit.slot,
            state_slot: state.slot,
        }
    );

    if !config.no_signature_verification {
        bls_verify(
            &validator.pubkey,
            exit.signing_message_root(),
            &exit.signature,
            state.domain(exit.slot, spec.domain_exit),
        )
        .map_err(OperationError::Signature)?;
    }

    initiate_validator_exit(state, index)?;
    Ok(())
}

/// Advances a copy of `pre_state` by one empty slot.
pub fn advance_slot(
    pre_state: &BeaconState,
    previous_block_root: Root,
    spec: &ChainSpec,
) -> Result<BeaconState, SlotProcessingError> {
    let mut state = pre_state.clone();
    process_slot(&mut state, previous_block_root, spec)?;
    Ok(state)
}

/// Runs slot processing up to `block.slot` and applies `block`, returning the
/// post-state. `pre_state` is left untouched, also on failure.
///
/// `previous_block_root` is the root of the block `pre_state` was produced by.
#[tracing::instrument(skip_all, fields(pre_slot = pre_state.slot, slot = block.slot))]
pub fn do_transition(
    pre_state: &BeaconState,
    previous_block_root: Root,
    block: &BeaconBlock,
    spec: &ChainSpec,
    config: &ProcessingConfig,
) -> Result<BeaconState, BlockProcessingError> {
    ensure!(
        block.slot > pre_state.slot,
        BlockProcessingError::SlotMismatch {
            state: pre_state.slot,
            block: block.slot,
        }
    );
    let mut state = pre_state.clone();

    // Transition the parent state to the block slot.
    let t = std::time::Instant::now();
    while state.slot < block.slot {
        process_slot(&mut state, previous_block_root, spec)?;
    }
    debug!("Slot processing: {:?}", t.elapsed());

    let t = std::time::Instant::now();
    process_block(&mut state, block, spec, config)?;
    debug!("Process block: {:?}", t.elapsed());

    if config.verify_state_root {
        let t = std::time::Instant::now();
        let computed = state.hash_tree_root();
        debug!("Post-block tree hash: {:?}", t.elapsed());
        ensure!(
            computed == block.state_root,
            BlockProcessingError::StateRootMismatch {
                expected: block.state_root,
                computed,
            }
        );
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        Keypair, build_block, generate_deterministic_keypairs, genesis_deposits, signed_deposit,
    };
    use crate::{
        AttestationData, BeaconBlockBody, DEFAULT_CONFIG, ProposalSignedData, SignatureBytes,
        SlashableVoteData, build_genesis_state, genesis_block,
    };
    use alloy_primitives::Bytes;
    use test_log::test;

    const VALIDATORS: usize = 64;

    struct Chain {
        spec: ChainSpec,
        keypairs: Vec<Keypair>,
        genesis: BeaconState,
        genesis_root: Root,
    }

    fn chain() -> Chain {
        let spec = ChainSpec::minimal();
        let genesis = build_genesis_state(
            &genesis_deposits(VALIDATORS, &spec),
            0,
            Root::ZERO,
            &spec,
            &DEFAULT_CONFIG,
        )
        .unwrap();
        let genesis_root = genesis_block(&genesis, &spec).hash_tree_root();
        Chain {
            spec,
            keypairs: generate_deterministic_keypairs(VALIDATORS),
            genesis,
            genesis_root,
        }
    }

    impl Chain {
        fn block_on_genesis(
            &self,
            slot: Slot,
            body: BeaconBlockBody,
        ) -> Result<BeaconBlock, BlockProcessingError> {
            build_block(
                &self.genesis,
                self.genesis_root,
                slot,
                body,
                &self.keypairs,
                &self.spec,
                &DEFAULT_CONFIG,
            )
        }

        fn unchecked() -> ProcessingConfig {
            ProcessingConfig {
                no_signature_verification: true,
                ..DEFAULT_CONFIG.clone()
            }
        }
    }

    /// Attestation of the first non-empty committee at `slot` with every member
    /// participating.
    fn full_attestation(state: &BeaconState, slot: Slot, spec: &ChainSpec) -> Attestation {
        let committee = state
            .get_shard_committees_at_slot(slot, spec)
            .unwrap()
            .iter()
            .find(|c| !c.committee.is_empty())
            .unwrap()
            .clone();
        let mut bitfield = vec![0u8; committee.committee.len().div_ceil(8)];
        for position in 0..committee.committee.len() {
            bitfield[position / 8] |= 0x80 >> (position % 8);
        }
        Attestation {
            data: AttestationData {
                slot,
                shard: committee.shard,
                beacon_block_root: Root::ZERO,
                epoch_boundary_root: Root::ZERO,
                shard_block_root: Root::ZERO,
                latest_crosslink_root: state.latest_crosslinks[committee.shard as usize]
                    .shard_block_root,
                justified_slot: state.justified_slot,
                justified_block_root: state.get_block_root(state.justified_slot, spec).unwrap(),
            },
            participation_bitfield: Bytes::from(bitfield.clone()),
            custody_bitfield: Bytes::from(vec![0u8; bitfield.len()]),
            aggregate_signature: SignatureBytes::ZERO,
        }
    }

    fn vote(voters: Vec<u64>, slot: Slot, justified_slot: Slot, marker: u8) -> SlashableVoteData {
        SlashableVoteData {
            aggregate_signature_poc_0_indices: voters,
            aggregate_signature_poc_1_indices: vec![],
            data: AttestationData {
                slot,
                shard: 0,
                beacon_block_root: Root::repeat_byte(marker),
                epoch_boundary_root: Root::ZERO,
                shard_block_root: Root::ZERO,
                latest_crosslink_root: Root::ZERO,
                justified_slot,
                justified_block_root: Root::ZERO,
            },
            aggregate_signature: SignatureBytes::ZERO,
        }
    }

    #[test]
    fn repeat_hash_layers() {
        let value = Root::repeat_byte(3);
        assert_eq!(repeat_hash(value, 0), value);
        assert_eq!(
            repeat_hash(value, 2),
            hash(hash(value.as_slice()).as_slice())
        );
    }

    #[test]
    fn slot_records_parent_root_and_bumps_proposer_layers() {
        let chain = chain();
        let state = advance_slot(&chain.genesis, chain.genesis_root, &chain.spec).unwrap();

        assert_eq!(state.slot, 1);
        assert_eq!(state.latest_block_roots[0], chain.genesis_root);
        let proposer = get_beacon_proposer_index(&state, 1, &chain.spec).unwrap();
        assert_eq!(state.validator_registry[proposer].randao_layers, 1);
        assert_eq!(
            state
                .validator_registry
                .iter()
                .map(|v| v.randao_layers)
                .sum::<u64>(),
            1
        );
    }

    #[test]
    fn empty_slots_cross_the_epoch_boundary() {
        let chain = chain();
        let spec = &chain.spec;
        let mut state = chain.genesis.clone();
        for _ in 0..spec.epoch_length {
            state = advance_slot(&state, chain.genesis_root, spec).unwrap();
        }

        assert_eq!(state.slot, spec.epoch_length);
        assert_eq!(state.current_epoch_start_shard, 1);
        assert_eq!(
            state.get_shard_committees_at_slot(spec.epoch_length, spec).unwrap(),
            state.shard_committees_at_slots[spec.epoch_length as usize].as_slice()
        );
    }

    #[test]
    fn receipt_root_needs_a_majority_of_the_period() {
        let chain = chain();
        let spec = &chain.spec;
        let period = spec.pow_receipt_root_voting_period;

        for (votes, adopted) in [(period / 2, false), (period / 2 + 1, true)] {
            let mut state = chain.genesis.clone();
            state.candidate_pow_receipt_roots = vec![CandidatePoWReceiptRootRecord {
                candidate_pow_receipt_root: Root::repeat_byte(0xaa),
                vote_count: votes,
            }];
            for _ in 0..period {
                state = advance_slot(&state, chain.genesis_root, spec).unwrap();
            }
            assert!(state.candidate_pow_receipt_roots.is_empty());
            assert_eq!(
                state.processed_pow_receipt_root == Root::repeat_byte(0xaa),
                adopted
            );
        }
    }

    #[test]
    fn signed_block_is_applied() {
        let chain = chain();
        let block = chain.block_on_genesis(1, BeaconBlockBody::default()).unwrap();
        let post = do_transition(
            &chain.genesis,
            chain.genesis_root,
            &block,
            &chain.spec,
            &DEFAULT_CONFIG,
        )
        .unwrap();

        assert_eq!(post.slot, 1);
        assert_eq!(post.hash_tree_root(), block.state_root);
        assert_eq!(post.latest_randao_mix, block.randao_reveal);

        let proposer = get_beacon_proposer_index(&post, 1, &chain.spec).unwrap();
        let record = &post.validator_registry[proposer];
        assert_eq!(record.randao_commitment, block.randao_reveal);
        assert_eq!(record.randao_layers, 0);
        assert_eq!(
            post.candidate_pow_receipt_roots,
            vec![CandidatePoWReceiptRootRecord {
                candidate_pow_receipt_root: block.candidate_pow_receipt_root,
                vote_count: 1,
            }]
        );
    }

    #[test]
    fn skipped_slots_repeat_the_parent_root() {
        let chain = chain();
        let block = chain.block_on_genesis(3, BeaconBlockBody::default()).unwrap();
        let post = do_transition(
            &chain.genesis,
            chain.genesis_root,
            &block,
            &chain.spec,
            &DEFAULT_CONFIG,
        )
        .unwrap();

        assert_eq!(post.slot, 3);
        assert_eq!(post.latest_block_roots[..3], [chain.genesis_root; 3]);
    }

    #[test]
    fn block_must_be_after_the_pre_state() {
        let chain = chain();
        let block = BeaconBlock::empty(0, chain.genesis_root);
        assert_eq!(
            do_transition(
                &chain.genesis,
                chain.genesis_root,
                &block,
                &chain.spec,
                &DEFAULT_CONFIG
            ),
            Err(BlockProcessingError::SlotMismatch { state: 0, block: 0 })
        );
    }

    #[test]
    fn header_checks() {
        let chain = chain();
        let spec = &chain.spec;
        let valid = chain.block_on_genesis(1, BeaconBlockBody::default()).unwrap();
        let pre_state = chain.genesis.clone();
        let transition = |block: &BeaconBlock, config: &ProcessingConfig| {
            do_transition(&chain.genesis, chain.genesis_root, block, spec, config)
        };

        let unsigned = BeaconBlock {
            signature: SignatureBytes::ZERO,
            ..valid.clone()
        };
        assert!(matches!(
            transition(&unsigned, &DEFAULT_CONFIG),
            Err(BlockProcessingError::InvalidProposerSignature(_))
        ));

        let wrong_parent = BeaconBlock {
            parent_root: Root::repeat_byte(1),
            ..valid.clone()
        };
        assert_eq!(
            transition(&wrong_parent, &Chain::unchecked()),
            Err(BlockProcessingError::ParentRootMismatch {
                expected: chain.genesis_root,
                found: Root::repeat_byte(1),
            })
        );

        let wrong_reveal = BeaconBlock {
            randao_reveal: Root::repeat_byte(1),
            ..valid.clone()
        };
        assert!(matches!(
            transition(&wrong_reveal, &Chain::unchecked()),
            Err(BlockProcessingError::InvalidRandaoReveal(_))
        ));

        let wrong_state_root = BeaconBlock {
            state_root: Root::repeat_byte(1),
            ..valid.clone()
        };
        assert_eq!(
            transition(&wrong_state_root, &Chain::unchecked()),
            Err(BlockProcessingError::StateRootMismatch {
                expected: Root::repeat_byte(1),
                computed: valid.state_root,
            })
        );
        let lenient = ProcessingConfig {
            verify_state_root: false,
            ..Chain::unchecked()
        };
        transition(&wrong_state_root, &lenient).unwrap();

        assert_eq!(chain.genesis, pre_state);
    }

    #[test]
    fn operation_counts_are_bounded() {
        let chain = chain();
        let exits = vec![
            Exit {
                slot: 0,
                validator_index: 0,
                signature: SignatureBytes::ZERO,
            };
            chain.spec.max_exits as usize + 1
        ];
        let body = BeaconBlockBody {
            exits,
            ..Default::default()
        };
        assert_eq!(
            chain.block_on_genesis(1, body),
            Err(BlockProcessingError::TooManyOperations {
                kind: "exits",
                count: chain.spec.max_exits as usize + 1,
                max: chain.spec.max_exits,
            })
        );
    }

    #[test]
    fn exit_moves_validator_to_pending_exit() {
        let chain = chain();
        let spec = &chain.spec;
        let mut exit = Exit {
            slot: 1,
            validator_index: 5,
            signature: SignatureBytes::ZERO,
        };
        exit.signature = chain.keypairs[5].sign(
            exit.signing_message_root(),
            chain.genesis.domain(1, spec.domain_exit),
        );
        let body = BeaconBlockBody {
            exits: vec![exit.clone()],
            ..Default::default()
        };

        let block = chain.block_on_genesis(1, body.clone()).unwrap();
        let post =
            do_transition(&chain.genesis, chain.genesis_root, &block, spec, &DEFAULT_CONFIG)
                .unwrap();
        assert_eq!(post.validator_registry[5].status, ValidatorStatus::PendingExit);

        let again = build_block(
            &post,
            block.hash_tree_root(),
            2,
            body,
            &chain.keypairs,
            spec,
            &DEFAULT_CONFIG,
        );
        assert_eq!(
            again,
            Err(BlockProcessingError::ExitInvalid {
                index: 0,
                reason: OperationError::NotActive {
                    index: 5,
                    status: ValidatorStatus::PendingExit,
                },
            })
        );
    }

    #[test]
    fn exit_checks() {
        let chain = chain();
        let future = Exit {
            slot: 5,
            validator_index: 5,
            signature: SignatureBytes::ZERO,
        };
        assert_eq!(
            chain.block_on_genesis(
                1,
                BeaconBlockBody {
                    exits: vec![future.clone()],
                    ..Default::default()
                }
            ),
            Err(BlockProcessingError::ExitInvalid {
                index: 0,
                reason: OperationError::FutureExit {
                    exit_slot: 5,
                    state_slot: 1,
                },
            })
        );

        // block production skips signatures, applying the block checks them
        let unsigned = Exit { slot: 1, ..future };
        let block = chain
            .block_on_genesis(
                1,
                BeaconBlockBody {
                    exits: vec![unsigned],
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(
            do_transition(
                &chain.genesis,
                chain.genesis_root,
                &block,
                &chain.spec,
                &DEFAULT_CONFIG
            ),
            Err(BlockProcessingError::ExitInvalid {
                index: 0,
                reason: OperationError::Signature(_),
            })
        ));
    }

    #[test]
    fn proposer_slashing_penalizes_the_proposer() {
        let chain = chain();
        let spec = &chain.spec;
        let domain = chain.genesis.domain(1, spec.domain_proposal);
        let proposal = |marker: u8| ProposalSignedData {
            slot: 1,
            shard: spec.beacon_chain_shard_number,
            block_root: Root::repeat_byte(marker),
        };
        let (data_1, data_2) = (proposal(1), proposal(2));
        let slashing = ProposerSlashing {
            proposer_index: 3,
            proposal_signature_1: chain.keypairs[3].sign(data_1.hash_tree_root(), domain),
            proposal_data_1: data_1.clone(),
            proposal_signature_2: chain.keypairs[3].sign(data_2.hash_tree_root(), domain),
            proposal_data_2: data_2,
        };
        let body = BeaconBlockBody {
            proposer_slashings: vec![slashing.clone()],
            ..Default::default()
        };

        let block = chain.block_on_genesis(1, body.clone()).unwrap();
        let post =
            do_transition(&chain.genesis, chain.genesis_root, &block, spec, &DEFAULT_CONFIG)
                .unwrap();
        assert_eq!(post.validator_registry[3].status, ValidatorStatus::Penalized);

        assert_eq!(
            build_block(
                &post,
                block.hash_tree_root(),
                2,
                body,
                &chain.keypairs,
                spec,
                &DEFAULT_CONFIG
            ),
            Err(BlockProcessingError::ProposerSlashingInvalid {
                index: 0,
                reason: OperationError::AlreadyPenalized(3),
            })
        );

        let identical = ProposerSlashing {
            proposal_data_2: data_1,
            ..slashing
        };
        assert_eq!(
            chain.block_on_genesis(
                1,
                BeaconBlockBody {
                    proposer_slashings: vec![identical],
                    ..Default::default()
                }
            ),
            Err(BlockProcessingError::ProposerSlashingInvalid {
                index: 0,
                reason: OperationError::IdenticalProposals,
            })
        );
    }

    #[test]
    fn casper_slashing_penalizes_the_intersection() {
        let chain = chain();
        let double_vote = CasperSlashing {
            slashable_vote_data_1: vote(vec![1, 2], 4, 0, 1),
            slashable_vote_data_2: vote(vec![2, 3], 4, 0, 2),
        };
        let block = chain
            .block_on_genesis(
                1,
                BeaconBlockBody {
                    casper_slashings: vec![double_vote],
                    ..Default::default()
                },
            )
            .unwrap();
        let post = do_transition(
            &chain.genesis,
            chain.genesis_root,
            &block,
            &chain.spec,
            &DEFAULT_CONFIG,
        )
        .unwrap();

        let statuses: Vec<_> = (1..=3).map(|i| post.validator_registry[i].status).collect();
        assert_eq!(
            statuses,
            vec![
                ValidatorStatus::Active,
                ValidatorStatus::Penalized,
                ValidatorStatus::Active
            ]
        );
    }

    #[test]
    fn casper_slashing_conditions() {
        let chain = chain();
        let slash = |slashing: CasperSlashing| {
            chain.block_on_genesis(
                1,
                BeaconBlockBody {
                    casper_slashings: vec![slashing],
                    ..Default::default()
                },
            )
        };

        // the first vote surrounds the second
        slash(CasperSlashing {
            slashable_vote_data_1: vote(vec![7], 10, 0, 1),
            slashable_vote_data_2: vote(vec![7], 5, 2, 2),
        })
        .unwrap();

        let cases = [
            (vote(vec![7], 5, 0, 1), vote(vec![7], 6, 0, 2), OperationError::NotSlashable),
            (vote(vec![7], 5, 0, 1), vote(vec![8], 5, 0, 2), OperationError::NoIntersection),
            (vote(vec![7], 5, 0, 1), vote(vec![7], 5, 0, 1), OperationError::IdenticalVotes),
        ];
        for (first, second, reason) in cases {
            assert_eq!(
                slash(CasperSlashing {
                    slashable_vote_data_1: first,
                    slashable_vote_data_2: second,
                }),
                Err(BlockProcessingError::CasperSlashingInvalid { index: 0, reason })
            );
        }
    }

    #[test]
    fn attestation_is_recorded() {
        let chain = chain();
        let spec = &chain.spec;
        let block_1 = chain.block_on_genesis(1, BeaconBlockBody::default()).unwrap();
        let state_1 =
            do_transition(&chain.genesis, chain.genesis_root, &block_1, spec, &DEFAULT_CONFIG)
                .unwrap();
        let root_1 = block_1.hash_tree_root();

        let attestation = full_attestation(&state_1, 1, spec);
        let block_2 = build_block(
            &state_1,
            root_1,
            2,
            BeaconBlockBody {
                attestations: vec![attestation.clone()],
                ..Default::default()
            },
            &chain.keypairs,
            spec,
            &DEFAULT_CONFIG,
        )
        .unwrap();
        let state_2 = do_transition(&state_1, root_1, &block_2, spec, &DEFAULT_CONFIG).unwrap();

        assert_eq!(state_2.latest_attestations.len(), 1);
        let pending = &state_2.latest_attestations[0];
        assert_eq!(pending.data, attestation.data);
        assert_eq!(pending.participation_bitfield, attestation.participation_bitfield);
        assert_eq!(pending.slot_included, 2);
    }

    #[test]
    fn attestation_checks() {
        let chain = chain();
        let spec = &chain.spec;
        let block_1 = chain.block_on_genesis(1, BeaconBlockBody::default()).unwrap();
        let state_1 =
            do_transition(&chain.genesis, chain.genesis_root, &block_1, spec, &DEFAULT_CONFIG)
                .unwrap();
        let attest = |attestation: Attestation| {
            build_block(
                &state_1,
                block_1.hash_tree_root(),
                2,
                BeaconBlockBody {
                    attestations: vec![attestation],
                    ..Default::default()
                },
                &chain.keypairs,
                spec,
                &DEFAULT_CONFIG,
            )
            .map(|_| ())
            .map_err(|e| match e {
                BlockProcessingError::AttestationInvalid { reason, .. } => reason,
                other => panic!("unexpected error {other}"),
            })
        };

        assert_eq!(
            attest(full_attestation(&state_1, 2, spec)),
            Err(OperationError::InclusionWindow {
                slot: 2,
                state_slot: 2
            })
        );

        let mut wrong_justified = full_attestation(&state_1, 1, spec);
        wrong_justified.data.justified_slot = 1;
        assert_eq!(
            attest(wrong_justified),
            Err(OperationError::JustifiedSlotMismatch {
                expected: 0,
                found: 1
            })
        );

        let mut wrong_root = full_attestation(&state_1, 1, spec);
        wrong_root.data.justified_block_root = Root::repeat_byte(1);
        assert_eq!(
            attest(wrong_root),
            Err(OperationError::JustifiedBlockRootMismatch)
        );

        let mut shard_block = full_attestation(&state_1, 1, spec);
        shard_block.data.shard_block_root = Root::repeat_byte(1);
        assert_eq!(
            attest(shard_block),
            Err(OperationError::NonZeroShardBlockRoot)
        );

        let mut silent = full_attestation(&state_1, 1, spec);
        silent.participation_bitfield = Bytes::from(vec![0u8; silent.participation_bitfield.len()]);
        assert_eq!(attest(silent), Err(OperationError::NoParticipants));
    }

    #[test]
    fn block_deposits_register_validators() {
        let chain = chain();
        let spec = &chain.spec;
        let deposit = signed_deposit(
            &Keypair::deterministic(VALIDATORS as u64),
            VALIDATORS as u64,
            spec.max_deposit_gwei(),
            spec,
        );
        let body = BeaconBlockBody {
            deposits: vec![deposit],
            ..Default::default()
        };

        assert_eq!(
            chain.block_on_genesis(1, body.clone()),
            Err(BlockProcessingError::DepositInvalid {
                index: 0,
                reason: DepositError::InvalidMerkleProof(VALIDATORS as u64),
            })
        );

        let config = ProcessingConfig {
            verify_deposit_proofs: false,
            ..DEFAULT_CONFIG.clone()
        };
        let block = build_block(
            &chain.genesis,
            chain.genesis_root,
            1,
            body,
            &chain.keypairs,
            spec,
            &config,
        )
        .unwrap();
        let post = do_transition(&chain.genesis, chain.genesis_root, &block, spec, &config).unwrap();
        assert_eq!(post.validator_registry.len(), VALIDATORS + 1);
        assert_eq!(
            post.validator_registry[VALIDATORS].status,
            ValidatorStatus::PendingActivation
        );
    }
}
