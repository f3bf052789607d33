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

use crate::bls::BlsError;
use crate::{
    BeaconState, ChainSpec, Deposit, DepositInput, Gwei, ProcessingConfig, ValidatorIndex,
    ValidatorRecord, ensure,
};
use safe_arith::SafeArith;
use ssz_merkle::{TreeHash, verify_merkle_branch};
use tracing::{debug, trace};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DepositError {
    #[error("Invalid proof of possession: {0}")]
    InvalidProofOfPossession(BlsError),
    #[error("Deposit of {value} Gwei is below the minimum of {minimum} Gwei")]
    BelowMinimumDeposit { value: Gwei, minimum: Gwei },
    #[error("Withdrawal credentials do not match validator {0}")]
    WithdrawalCredentialsMismatch(ValidatorIndex),
    #[error("Randao commitment does not match validator {0}")]
    RandaoCommitmentMismatch(ValidatorIndex),
    #[error("Balance would exceed the maximum of {maximum} Gwei")]
    ExcessiveBalance { maximum: Gwei },
    #[error("Deposit {0} is not included under the processed PoW receipt root")]
    InvalidMerkleProof(u64),
}

/// Credits `value` Gwei to the validator identified by `deposit_input.pubkey`,
/// appending a `PendingActivation` record for an unknown key.
///
/// All checks happen before the state is touched, so a rejected deposit leaves
/// `state` unchanged. Returns the index of the credited validator.
pub fn process_deposit(
    state: &mut BeaconState,
    deposit_input: &DepositInput,
    value: Gwei,
    spec: &ChainSpec,
    config: &ProcessingConfig,
) -> Result<ValidatorIndex, DepositError> {
    if !config.no_signature_verification {
        deposit_input
            .verify_proof_of_possession(spec)
            .map_err(DepositError::InvalidProofOfPossession)?;
    }

    let minimum = spec.min_deposit_gwei();
    ensure!(
        value >= minimum,
        DepositError::BelowMinimumDeposit { value, minimum }
    );

    let maximum = spec.max_deposit_gwei();
    let credit = |balance: Gwei| {
        balance
            .safe_add(value)
            .ok()
            .filter(|total| *total <= maximum)
            .ok_or(DepositError::ExcessiveBalance { maximum })
    };

    match state.validator_index_by_pubkey(&deposit_input.pubkey) {
        Some(index) => {
            let validator = &state.validator_registry[index];
            ensure!(
                validator.withdrawal_credentials == deposit_input.withdrawal_credentials,
                DepositError::WithdrawalCredentialsMismatch(index)
            );
            ensure!(
                validator.randao_commitment == deposit_input.randao_commitment,
                DepositError::RandaoCommitmentMismatch(index)
            );
            let balance = credit(validator.balance)?;

            state.validator_registry[index].balance = balance;
            debug!(index, value, balance, "Topped up validator");
            Ok(index)
        }
        None => {
            let balance = credit(0)?;

            let index = state.validator_registry.len();
            let mut validator = ValidatorRecord::pending(deposit_input, state.slot);
            validator.balance = balance;
            state.validator_registry.push(validator);
            debug!(index, balance, "Added validator");
            Ok(index)
        }
    }
}

/// Checks that `deposit` is included in the deposit contract tree under the
/// state's processed PoW receipt root.
pub fn verify_deposit_merkle_proof(
    state: &BeaconState,
    deposit: &Deposit,
    spec: &ChainSpec,
) -> Result<(), DepositError> {
    let leaf = deposit.deposit_data.hash_tree_root();
    trace!(index = deposit.merkle_tree_index, %leaf, "Verifying deposit branch");
    ensure!(
        verify_merkle_branch(
            leaf,
            &deposit.merkle_branch,
            spec.deposit_contract_tree_depth as usize,
            deposit.merkle_tree_index,
            state.processed_pow_receipt_root,
        ),
        DepositError::InvalidMerkleProof(deposit.merkle_tree_index)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Keypair, deposit_input, genesis_deposits};
    use crate::{DEFAULT_CONFIG, Root, SignatureBytes, ValidatorStatus, build_genesis_state};
    use ssz_merkle::hash_concat;
    use test_log::test;

    fn empty_state(spec: &ChainSpec) -> BeaconState {
        build_genesis_state(&[], 0, Root::ZERO, spec, &DEFAULT_CONFIG).unwrap()
    }

    #[test]
    fn new_validator_is_pending() {
        let spec = ChainSpec::minimal();
        let mut state = empty_state(&spec);
        let input = deposit_input(&Keypair::deterministic(0), 0, &spec);
        let value = spec.min_deposit_gwei();

        let index = process_deposit(&mut state, &input, value, &spec, &DEFAULT_CONFIG).unwrap();
        assert_eq!(index, 0);
        let validator = &state.validator_registry[0];
        assert_eq!(validator.status, ValidatorStatus::PendingActivation);
        assert_eq!(validator.balance, value);
        assert_eq!(validator.pubkey, input.pubkey);
        assert_eq!(validator.randao_layers, 0);
    }

    #[test]
    fn top_up_existing_validator() {
        let spec = ChainSpec::minimal();
        let mut state = empty_state(&spec);
        let input = deposit_input(&Keypair::deterministic(0), 0, &spec);
        let half = spec.max_deposit_gwei() / 2;

        process_deposit(&mut state, &input, half, &spec, &DEFAULT_CONFIG).unwrap();
        let index = process_deposit(&mut state, &input, half, &spec, &DEFAULT_CONFIG).unwrap();
        assert_eq!(index, 0);
        assert_eq!(state.validator_registry.len(), 1);
        assert_eq!(state.validator_registry[0].balance, 2 * half);
    }

    #[test]
    fn excessive_balance_is_rejected_without_mutation() {
        let spec = ChainSpec::minimal();
        let mut state = empty_state(&spec);
        let input = deposit_input(&Keypair::deterministic(0), 0, &spec);
        process_deposit(&mut state, &input, spec.max_deposit_gwei(), &spec, &DEFAULT_CONFIG)
            .unwrap();

        let before = state.clone();
        assert_eq!(
            process_deposit(&mut state, &input, spec.min_deposit_gwei(), &spec, &DEFAULT_CONFIG),
            Err(DepositError::ExcessiveBalance {
                maximum: spec.max_deposit_gwei()
            })
        );
        assert_eq!(
            process_deposit(&mut state, &input, u64::MAX, &spec, &DEFAULT_CONFIG),
            Err(DepositError::ExcessiveBalance {
                maximum: spec.max_deposit_gwei()
            })
        );
        assert_eq!(state, before);
    }

    #[test]
    fn small_deposits_are_rejected() {
        let spec = ChainSpec::minimal();
        let mut state = empty_state(&spec);
        let input = deposit_input(&Keypair::deterministic(0), 0, &spec);
        let value = spec.min_deposit_gwei() - 1;
        assert_eq!(
            process_deposit(&mut state, &input, value, &spec, &DEFAULT_CONFIG),
            Err(DepositError::BelowMinimumDeposit {
                value,
                minimum: spec.min_deposit_gwei()
            })
        );
        assert!(state.validator_registry.is_empty());
    }

    #[test]
    fn invalid_proof_of_possession() {
        let spec = ChainSpec::minimal();
        let mut state = empty_state(&spec);
        let mut input = deposit_input(&Keypair::deterministic(0), 0, &spec);
        // signed by a different key
        input.proof_of_possession = deposit_input(&Keypair::deterministic(1), 0, &spec)
            .proof_of_possession;

        let result = process_deposit(
            &mut state,
            &input,
            spec.max_deposit_gwei(),
            &spec,
            &DEFAULT_CONFIG,
        );
        assert!(matches!(
            result,
            Err(DepositError::InvalidProofOfPossession(_))
        ));
        assert!(state.validator_registry.is_empty());

        let unchecked = ProcessingConfig {
            no_signature_verification: true,
            ..DEFAULT_CONFIG.clone()
        };
        input.proof_of_possession = SignatureBytes::ZERO;
        process_deposit(&mut state, &input, spec.max_deposit_gwei(), &spec, &unchecked).unwrap();
    }

    #[test]
    fn mismatched_credentials_are_rejected() {
        let spec = ChainSpec::minimal();
        let keypair = Keypair::deterministic(0);
        let mut state = empty_state(&spec);
        let input = deposit_input(&keypair, 0, &spec);
        process_deposit(&mut state, &input, spec.min_deposit_gwei(), &spec, &DEFAULT_CONFIG)
            .unwrap();

        let unchecked = ProcessingConfig {
            no_signature_verification: true,
            ..DEFAULT_CONFIG.clone()
        };
        let other_credentials = DepositInput {
            withdrawal_credentials: Root::repeat_byte(1),
            ..input.clone()
        };
        assert_eq!(
            process_deposit(
                &mut state,
                &other_credentials,
                spec.min_deposit_gwei(),
                &spec,
                &unchecked
            ),
            Err(DepositError::WithdrawalCredentialsMismatch(0))
        );

        let other_commitment = DepositInput {
            randao_commitment: Root::repeat_byte(2),
            ..input
        };
        assert_eq!(
            process_deposit(
                &mut state,
                &other_commitment,
                spec.min_deposit_gwei(),
                &spec,
                &unchecked
            ),
            Err(DepositError::RandaoCommitmentMismatch(0))
        );
        assert_eq!(state.validator_registry[0].balance, spec.min_deposit_gwei());
    }

    #[test]
    fn deposit_branch_against_receipt_root() {
        let spec = ChainSpec {
            deposit_contract_tree_depth: 2,
            ..ChainSpec::minimal()
        };
        let mut deposits = genesis_deposits(4, &spec);
        let leaves: Vec<Root> = deposits
            .iter()
            .map(|deposit| deposit.deposit_data.hash_tree_root())
            .collect();
        let left = hash_concat(leaves[0].as_slice(), leaves[1].as_slice());
        let right = hash_concat(leaves[2].as_slice(), leaves[3].as_slice());
        let root = hash_concat(left.as_slice(), right.as_slice());

        let mut state = empty_state(&spec);
        state.processed_pow_receipt_root = root;

        let deposit = &mut deposits[2];
        deposit.merkle_branch = vec![leaves[3], left];
        verify_deposit_merkle_proof(&state, deposit, &spec).unwrap();

        deposit.merkle_tree_index = 3;
        assert_eq!(
            verify_deposit_merkle_proof(&state, deposit, &spec),
            Err(DepositError::InvalidMerkleProof(3))
        );
    }
}
