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
    BeaconState, BeaconStateError, ChainSpec, REGISTRY_DELTA_ACTIVATION, REGISTRY_DELTA_EXIT,
    ShuffleError, ValidatorIndex, ValidatorRegistryDeltaBlock, ValidatorStatus, ensure,
    get_beacon_proposer_index,
};
use safe_arith::{ArithError, SafeArith};
use ssz_merkle::TreeHash;
use tracing::{debug, info};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("Validator {index} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        index: ValidatorIndex,
        from: ValidatorStatus,
        to: ValidatorStatus,
    },
    #[error("Beacon state error: {0}")]
    State(#[from] BeaconStateError),
    #[error("Proposer lookup failed: {0}")]
    Shuffle(#[from] ShuffleError),
    #[error("Arithmetic error: {0:?}")]
    Arith(ArithError),
}

impl From<ArithError> for StatusError {
    fn from(e: ArithError) -> Self {
        StatusError::Arith(e)
    }
}

/// Moves validator `index` to `new_status` through the matching transition.
pub fn update_validator_status(
    state: &mut BeaconState,
    index: ValidatorIndex,
    new_status: ValidatorStatus,
    spec: &ChainSpec,
) -> Result<(), StatusError> {
    match new_status {
        ValidatorStatus::Active => activate_validator(state, index),
        ValidatorStatus::PendingExit => initiate_validator_exit(state, index),
        ValidatorStatus::Exited => exit_validator(state, index),
        ValidatorStatus::Penalized => penalize_validator(state, index, spec),
        ValidatorStatus::PendingActivation => Err(StatusError::InvalidTransition {
            index,
            from: state.validator(index)?.status,
            to: new_status,
        }),
    }
}

/// `PendingActivation -> Active`.
pub fn activate_validator(state: &mut BeaconState, index: ValidatorIndex) -> Result<(), StatusError> {
    check_transition(state, index, ValidatorStatus::Active, |from| {
        from == ValidatorStatus::PendingActivation
    })?;

    let slot = state.slot;
    let validator = state.validator_mut(index)?;
    validator.status = ValidatorStatus::Active;
    validator.latest_status_change_slot = slot;
    extend_delta_chain(state, index, REGISTRY_DELTA_ACTIVATION)?;

    debug!(index, slot, "Validator activated");
    Ok(())
}

/// `Active -> PendingExit`.
pub fn initiate_validator_exit(
    state: &mut BeaconState,
    index: ValidatorIndex,
) -> Result<(), StatusError> {
    check_transition(state, index, ValidatorStatus::PendingExit, |from| {
        from == ValidatorStatus::Active
    })?;

    let slot = state.slot;
    let validator = state.validator_mut(index)?;
    validator.status = ValidatorStatus::PendingExit;
    validator.latest_status_change_slot = slot;

    debug!(index, slot, "Validator exit initiated");
    Ok(())
}

/// `Active | PendingExit -> Exited`.
pub fn exit_validator(state: &mut BeaconState, index: ValidatorIndex) -> Result<(), StatusError> {
    check_transition(state, index, ValidatorStatus::Exited, |from| from.is_active())?;

    record_exit(state, index)?;
    let slot = state.slot;
    let validator = state.validator_mut(index)?;
    validator.status = ValidatorStatus::Exited;
    validator.latest_status_change_slot = slot;

    debug!(index, slot, "Validator exited");
    Ok(())
}

/// `Active | PendingExit | Exited -> Penalized`.
///
/// The current proposer receives `balance / WHISTLEBLOWER_REWARD_QUOTIENT`
/// out of the penalized balance, and the effective balance is added to the
/// penalized exit ring of the current collective penalty period.
pub fn penalize_validator(
    state: &mut BeaconState,
    index: ValidatorIndex,
    spec: &ChainSpec,
) -> Result<(), StatusError> {
    check_transition(state, index, ValidatorStatus::Penalized, |from| {
        from.is_active() || from == ValidatorStatus::Exited
    })?;

    let whistleblower = get_beacon_proposer_index(state, state.slot, spec)?;
    let validator = state.validator(index)?;
    let was_exited = validator.status == ValidatorStatus::Exited;
    let effective_balance = validator.effective_balance(spec);
    let reward = effective_balance.safe_div(spec.whistleblower_reward_quotient)?;

    let period = state
        .slot
        .safe_div(spec.collective_penalty_calculation_period)?
        .safe_rem(spec.latest_penalized_exit_length)? as usize;
    let ring_len = state.latest_penalized_exit_balances.len();
    state
        .latest_penalized_exit_balances
        .get_mut(period)
        .ok_or(BeaconStateError::RingLength {
            ring: "latest_penalized_exit_balances",
            len: ring_len,
        })?
        .safe_add_assign(effective_balance)?;

    let slot = state.slot;
    let validator = state.validator_mut(index)?;
    validator.balance.safe_sub_assign(reward)?;
    validator.status = ValidatorStatus::Penalized;
    validator.latest_status_change_slot = slot;
    state
        .validator_mut(whistleblower)?
        .balance
        .safe_add_assign(reward)?;

    if !was_exited {
        record_exit(state, index)?;
    }

    info!(index, whistleblower, reward, "Validator penalized");
    Ok(())
}

fn check_transition(
    state: &BeaconState,
    index: ValidatorIndex,
    to: ValidatorStatus,
    allowed: impl Fn(ValidatorStatus) -> bool,
) -> Result<(), StatusError> {
    let from = state.validator(index)?.status;
    ensure!(
        allowed(from),
        StatusError::InvalidTransition { index, from, to }
    );
    Ok(())
}

/// Bumps the registry exit counter, stamps it on the validator and records the
/// exit in the delta chain.
fn record_exit(state: &mut BeaconState, index: ValidatorIndex) -> Result<(), StatusError> {
    state.validator_registry_exit_count.safe_add_assign(1)?;
    let exit_count = state.validator_registry_exit_count;
    state.validator_mut(index)?.exit_count = exit_count;
    extend_delta_chain(state, index, REGISTRY_DELTA_EXIT)
}

fn extend_delta_chain(
    state: &mut BeaconState,
    index: ValidatorIndex,
    flag: u64,
) -> Result<(), StatusError> {
    let delta = ValidatorRegistryDeltaBlock {
        latest_registry_delta_root: state.validator_registry_delta_chain_tip,
        validator_index: index as u64,
        pubkey: state.validator(index)?.pubkey,
        slot: state.slot,
        flag,
    };
    state.validator_registry_delta_chain_tip = delta.hash_tree_root();
    Ok(())
}
