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

use crate::bls::{BlsError, bls_verify, compute_domain};
use crate::{ChainSpec, Gwei, PublicKeyBytes, Root, SignatureBytes};
use serde::{Deserialize, Serialize};
use ssz_merkle::{TreeHash, tree_hash_container};

/// What a depositor commits to in the deposit contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositInput {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: Root,
    pub randao_commitment: Root,
    pub proof_of_possession: SignatureBytes,
}

tree_hash_container!(DepositInput {
    pubkey,
    withdrawal_credentials,
    randao_commitment,
    proof_of_possession
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositData {
    pub deposit_input: DepositInput,
    /// Deposited value in Gwei.
    pub value: Gwei,
    pub timestamp: u64,
}

tree_hash_container!(DepositData {
    deposit_input,
    value,
    timestamp
});

/// A deposit together with its inclusion proof in the deposit contract tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub merkle_branch: Vec<Root>,
    pub merkle_tree_index: u64,
    pub deposit_data: DepositData,
}

tree_hash_container!(Deposit {
    merkle_branch,
    merkle_tree_index,
    deposit_data
});

impl DepositInput {
    /// Root of this input with the proof of possession emptied; the message
    /// signed by the proof of possession.
    pub fn proof_of_possession_root(&self) -> Root {
        DepositInput {
            proof_of_possession: SignatureBytes::ZERO,
            ..self.clone()
        }
        .hash_tree_root()
    }

    /// Verify `pubkey` signed the deposit input.
    ///
    /// Deposits are valid across forks, thus the deposit domain is computed
    /// with the initial fork version.
    pub fn verify_proof_of_possession(&self, spec: &ChainSpec) -> Result<(), BlsError> {
        let domain = compute_domain(spec.initial_fork_version, spec.domain_deposit);
        bls_verify(
            &self.pubkey,
            self.proof_of_possession_root(),
            &self.proof_of_possession,
            domain,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Keypair, deposit_input};

    #[test]
    fn proof_of_possession_root_ignores_signature() {
        let spec = ChainSpec::minimal();
        let input = deposit_input(&Keypair::deterministic(0), 0, &spec);
        let unsigned = DepositInput {
            proof_of_possession: SignatureBytes::ZERO,
            ..input.clone()
        };
        assert_eq!(
            input.proof_of_possession_root(),
            unsigned.proof_of_possession_root()
        );
        assert_ne!(input.hash_tree_root(), unsigned.hash_tree_root());
    }

    #[test]
    fn proof_of_possession_verifies() {
        let spec = ChainSpec::minimal();
        let input = deposit_input(&Keypair::deterministic(1), 1, &spec);
        input.verify_proof_of_possession(&spec).unwrap();

        let tampered = DepositInput {
            withdrawal_credentials: Root::repeat_byte(0xff),
            ..input
        };
        assert_eq!(
            tampered.verify_proof_of_possession(&spec),
            Err(BlsError::InvalidSignature)
        );
    }

    #[test]
    fn serde_round_trip() {
        let spec = ChainSpec::minimal();
        let deposit = crate::test_utils::signed_deposit(
            &Keypair::deterministic(2),
            2,
            spec.max_deposit_gwei(),
            &spec,
        );
        let json = serde_json::to_string(&deposit).unwrap();
        let decoded: Deposit = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, deposit);
        assert_eq!(decoded.hash_tree_root(), deposit.hash_tree_root());
    }
}
