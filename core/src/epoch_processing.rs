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

//! Epoch processing runs at the last slot of every epoch, after the root of
//! that slot has been recorded and before the slot number advances.

use crate::{
    BeaconState, BeaconStateError, ChainSpec, CrosslinkRecord, Gwei, Root, ShuffleError, Slot,
    StatusError, ValidatorIndex, ValidatorStatus, activate_validator, compute_committees,
    exit_validator, total_effective_balance,
};
use alloc::collections::BTreeMap;
use itertools::Itertools;
use safe_arith::{ArithError, SafeArith};
use tracing::{debug, info};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EpochProcessingError {
    #[error("Beacon state error: {0}")]
    State(#[from] BeaconStateError),
    #[error("Shuffling failed: {0}")]
    Shuffle(#[from] ShuffleError),
    #[error("Status transition failed: {0}")]
    Status(#[from] StatusError),
    #[error("Arithmetic error: {0:?}")]
    Arith(ArithError),
}

impl From<ArithError> for EpochProcessingError {
    fn from(e: ArithError) -> Self {
        EpochProcessingError::Arith(e)
    }
}

/// Justification, finalization, crosslinks, registry update, attestation
/// pruning and committee rotation, in that order.
#[tracing::instrument(skip_all, fields(slot = state.slot))]
pub fn process_epoch(state: &mut BeaconState, spec: &ChainSpec) -> Result<(), EpochProcessingError> {
    let active = state.active_validator_indices();
    let total_balance = total_effective_balance(&state.validator_registry, active, spec);
    let current_epoch_start = spec.epoch_start_slot(state.slot);

    process_justification(state, current_epoch_start, total_balance, spec)?;
    process_crosslinks(state, current_epoch_start, spec)?;

    if state.finalized_slot > state.validator_registry_latest_change_slot {
        update_validator_registry(state, total_balance, spec)?;
    }

    // Attestations of the closing epoch are still needed next epoch.
    state
        .latest_attestations
        .retain(|attestation| attestation.data.slot >= current_epoch_start);

    rotate_committees(state, spec)
}

/// `3 * part >= 2 * total`, false for an empty total.
fn is_supermajority(part: Gwei, total: Gwei) -> Result<bool, ArithError> {
    Ok(total > 0 && part.safe_mul(3)? >= total.safe_mul(2)?)
}

/// Balance of the validators that attested to the boundary block of the epoch
/// starting at `epoch_start` with `justified_slot` as their source.
fn boundary_attesting_balance(
    state: &BeaconState,
    epoch_start: Slot,
    justified_slot: Slot,
    spec: &ChainSpec,
) -> Result<Gwei, EpochProcessingError> {
    let boundary_root = state.get_block_root(epoch_start, spec)?;
    let epoch_end = epoch_start.safe_add(spec.epoch_length)?;

    let mut attesters = vec![];
    for attestation in state.latest_attestations.iter().filter(|attestation| {
        let data = &attestation.data;
        data.slot >= epoch_start
            && data.slot < epoch_end
            && data.epoch_boundary_root == boundary_root
            && data.justified_slot == justified_slot
    }) {
        attesters.extend(state.attestation_participants(
            &attestation.data,
            &attestation.participation_bitfield,
            spec,
        )?);
    }
    Ok(total_effective_balance(
        &state.validator_registry,
        attesters.into_iter().unique(),
        spec,
    ))
}

fn process_justification(
    state: &mut BeaconState,
    current_epoch_start: Slot,
    total_balance: Gwei,
    spec: &ChainSpec,
) -> Result<(), EpochProcessingError> {
    let previous_epoch_start = current_epoch_start.checked_sub(spec.epoch_length);

    let previous_epoch_balance = match previous_epoch_start {
        Some(start) => boundary_attesting_balance(state, start, state.previous_justified_slot, spec)?,
        None => 0,
    };
    let current_epoch_balance =
        boundary_attesting_balance(state, current_epoch_start, state.justified_slot, spec)?;

    state.previous_justified_slot = state.justified_slot;
    state.justification_bitfield <<= 1;
    if let Some(start) = previous_epoch_start {
        if is_supermajority(previous_epoch_balance, total_balance)? {
            state.justification_bitfield |= 2;
            state.justified_slot = start;
        }
    }
    if is_supermajority(current_epoch_balance, total_balance)? {
        state.justification_bitfield |= 1;
        state.justified_slot = current_epoch_start;
    }
    debug!(
        justified_slot = state.justified_slot,
        bitfield = state.justification_bitfield,
        current_epoch_balance,
        total_balance,
        "Justification processed"
    );

    // (epochs back, accepted bitfield residues, modulus)
    let rules: [(u64, &[u64], u64); 3] = [(1, &[3], 4), (2, &[7], 8), (3, &[15, 14], 16)];
    for (epochs_back, residues, modulus) in rules {
        let Some(slot) = epochs_back
            .checked_mul(spec.epoch_length)
            .and_then(|distance| current_epoch_start.checked_sub(distance))
        else {
            continue;
        };
        if state.previous_justified_slot == slot
            && residues.contains(&(state.justification_bitfield % modulus))
        {
            state.finalized_slot = state.previous_justified_slot;
            info!(finalized_slot = state.finalized_slot, "Finalized");
            break;
        }
    }
    Ok(())
}

fn process_crosslinks(
    state: &mut BeaconState,
    current_epoch_start: Slot,
    spec: &ChainSpec,
) -> Result<(), EpochProcessingError> {
    let window_start = current_epoch_start.saturating_sub(spec.epoch_length);
    let window_end = current_epoch_start.safe_add(spec.epoch_length)?;

    for slot in window_start..window_end {
        let committees = state.get_shard_committees_at_slot(slot, spec)?.to_vec();
        for shard_committee in committees.iter().filter(|sc| !sc.committee.is_empty()) {
            let committee_balance = total_effective_balance(
                &state.validator_registry,
                shard_committee.committee.iter().copied(),
                spec,
            );

            let mut votes: BTreeMap<Root, Vec<ValidatorIndex>> = BTreeMap::new();
            for attestation in state.latest_attestations.iter().filter(|attestation| {
                attestation.data.slot == slot && attestation.data.shard == shard_committee.shard
            }) {
                votes
                    .entry(attestation.data.shard_block_root)
                    .or_default()
                    .extend(state.attestation_participants(
                        &attestation.data,
                        &attestation.participation_bitfield,
                        spec,
                    )?);
            }

            // highest balance wins, ties go to the smallest root
            let winner = votes
                .into_iter()
                .map(|(root, voters)| {
                    let balance = total_effective_balance(
                        &state.validator_registry,
                        voters.into_iter().unique(),
                        spec,
                    );
                    (root, balance)
                })
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));

            let Some((shard_block_root, balance)) = winner else {
                continue;
            };
            if is_supermajority(balance, committee_balance)? {
                let crosslinks_len = state.latest_crosslinks.len();
                *state
                    .latest_crosslinks
                    .get_mut(shard_committee.shard as usize)
                    .ok_or(BeaconStateError::RingLength {
                        ring: "latest_crosslinks",
                        len: crosslinks_len,
                    })? = CrosslinkRecord {
                    slot: state.slot,
                    shard_block_root,
                };
                debug!(shard = shard_committee.shard, %shard_block_root, "Crosslink updated");
            }
        }
    }
    Ok(())
}

/// Activates pending validators with a full balance and completes pending
/// exits, each bounded by the balance churn limit.
fn update_validator_registry(
    state: &mut BeaconState,
    total_balance: Gwei,
    spec: &ChainSpec,
) -> Result<(), EpochProcessingError> {
    let max_deposit = spec.max_deposit_gwei();
    let max_balance_churn = max_deposit.max(
        total_balance.safe_div(spec.max_balance_churn_quotient.safe_mul(2)?)?,
    );

    let mut balance_churn: Gwei = 0;
    let mut activated = 0usize;
    for index in 0..state.validator_registry.len() {
        let validator = &state.validator_registry[index];
        if validator.status == ValidatorStatus::PendingActivation && validator.balance >= max_deposit
        {
            balance_churn.safe_add_assign(validator.effective_balance(spec))?;
            if balance_churn > max_balance_churn {
                break;
            }
            activate_validator(state, index)?;
            activated += 1;
        }
    }

    let mut balance_churn: Gwei = 0;
    let mut exited = 0usize;
    for index in 0..state.validator_registry.len() {
        let validator = &state.validator_registry[index];
        if validator.status == ValidatorStatus::PendingExit {
            balance_churn.safe_add_assign(validator.effective_balance(spec))?;
            if balance_churn > max_balance_churn {
                break;
            }
            exit_validator(state, index)?;
            exited += 1;
        }
    }

    state.validator_registry_latest_change_slot = state.slot;
    info!(activated, exited, max_balance_churn, "Validator registry updated");
    Ok(())
}

/// Moves the current epoch committees into the previous epoch half and
/// computes the next epoch's committees from the latest randao mix.
fn rotate_committees(state: &mut BeaconState, spec: &ChainSpec) -> Result<(), EpochProcessingError> {
    let epoch_length = spec.epoch_length as usize;
    let rows = state.shard_committees_at_slots.len();
    if rows != 2 * epoch_length {
        return Err(BeaconStateError::RingLength {
            ring: "shard_committees_at_slots",
            len: rows,
        }
        .into());
    }

    let start_shard = state
        .current_epoch_start_shard
        .safe_add(1)?
        .safe_rem(spec.shard_count)?;
    let active = state.active_validator_indices();
    let next = compute_committees(&active, state.latest_randao_mix, start_shard, spec)?;

    state.shard_committees_at_slots.drain(..epoch_length);
    state.shard_committees_at_slots.extend(next);
    state.current_epoch_start_shard = start_shard;
    state.previous_randao_mix = state.latest_randao_mix;
    debug!(start_shard, validators = active.len(), "Committees rotated");
    Ok(())
}
