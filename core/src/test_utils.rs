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

//! Deterministic keys and signed objects for tests and local networks.

use crate::bls::{DST, compute_domain, compute_signing_root};
use crate::{
    BeaconBlock, BeaconBlockBody, BeaconState, BeaconStateError, BlockProcessingError, ChainSpec,
    Deposit, DepositData, DepositInput, Gwei, ProcessingConfig, PublicKeyBytes, Root,
    SignatureBytes, Slot, TreeHash, ValidatorRecord, get_beacon_proposer_index, hash,
    process_block, process_slot, repeat_hash,
};
use blst::min_pk as bls;

/// Depth of each deterministic randao chain. Every slot a validator is
/// scheduled to propose consumes one layer.
pub const RANDAO_CHAIN_LENGTH: u64 = 1 << 12;

pub struct Keypair {
    secret: bls::SecretKey,
    pub pubkey: PublicKeyBytes,
}

impl Keypair {
    /// The keypair with index `index`. Same index, same key.
    pub fn deterministic(index: u64) -> Self {
        let mut ikm = [0x5au8; 32];
        ikm[..8].copy_from_slice(&index.to_le_bytes());
        let secret = bls::SecretKey::key_gen(&ikm, &[]).expect("32 bytes of key material");
        let pubkey = PublicKeyBytes::from(secret.sk_to_pk().compress());
        Self { secret, pubkey }
    }

    /// Signs the signing root of `message_root` in `domain`.
    pub fn sign(&self, message_root: Root, domain: u64) -> SignatureBytes {
        let signing_root = compute_signing_root(message_root, domain);
        SignatureBytes::from(
            self.secret
                .sign(signing_root.as_slice(), DST, &[])
                .compress(),
        )
    }
}

pub fn generate_deterministic_keypairs(count: usize) -> Vec<Keypair> {
    (0..count as u64).map(Keypair::deterministic).collect()
}

/// Bottom of the randao hash chain of validator `index`.
pub fn randao_secret(index: u64) -> Root {
    let mut preimage = b"randao".to_vec();
    preimage.extend_from_slice(&index.to_be_bytes());
    hash(&preimage)
}

/// The value validator `index` reveals to open its current commitment, given
/// the layers accumulated since its last proposal. `None` once the chain is
/// exhausted.
pub fn randao_reveal(validator: &ValidatorRecord, index: u64) -> Option<Root> {
    let mut chain = vec![randao_secret(index)];
    while *chain.last()? != validator.randao_commitment {
        if chain.len() as u64 > RANDAO_CHAIN_LENGTH {
            return None;
        }
        let next = hash(chain.last()?.as_slice());
        chain.push(next);
    }
    let depth = chain.len() - 1;
    chain
        .get(depth.checked_sub(validator.randao_layers as usize)?)
        .copied()
}

/// A deposit input for `keypair` committing to the top of its randao chain.
pub fn deposit_input(keypair: &Keypair, index: u64, spec: &ChainSpec) -> DepositInput {
    let mut input = DepositInput {
        pubkey: keypair.pubkey,
        withdrawal_credentials: hash(&index.to_be_bytes()),
        randao_commitment: repeat_hash(randao_secret(index), RANDAO_CHAIN_LENGTH),
        proof_of_possession: SignatureBytes::ZERO,
    };
    let domain = compute_domain(spec.initial_fork_version, spec.domain_deposit);
    input.proof_of_possession = keypair.sign(input.proof_of_possession_root(), domain);
    input
}

/// A signed deposit of `value` Gwei with an empty Merkle branch.
pub fn signed_deposit(keypair: &Keypair, index: u64, value: Gwei, spec: &ChainSpec) -> Deposit {
    Deposit {
        merkle_branch: vec![],
        merkle_tree_index: index,
        deposit_data: DepositData {
            deposit_input: deposit_input(keypair, index, spec),
            value,
            timestamp: 0,
        },
    }
}

/// `count` deposits, each exactly at the activation threshold.
pub fn genesis_deposits(count: usize, spec: &ChainSpec) -> Vec<Deposit> {
    generate_deterministic_keypairs(count)
        .iter()
        .enumerate()
        .map(|(index, keypair)| {
            signed_deposit(keypair, index as u64, spec.max_deposit_gwei(), spec)
        })
        .collect()
}

/// A block at `slot` on top of `pre_state`, proposed and signed by the
/// scheduled proposer with a valid randao reveal and state root.
///
/// `keypairs` is indexed by validator index.
pub fn build_block(
    pre_state: &BeaconState,
    parent_root: Root,
    slot: Slot,
    body: BeaconBlockBody,
    keypairs: &[Keypair],
    spec: &ChainSpec,
    config: &ProcessingConfig,
) -> Result<BeaconBlock, BlockProcessingError> {
    let mut state = pre_state.clone();
    while state.slot < slot {
        process_slot(&mut state, parent_root, spec)?;
    }

    let proposer = get_beacon_proposer_index(&state, slot, spec)?;
    let randao_reveal = randao_reveal(state.validator(proposer)?, proposer as u64)
        .ok_or(BlockProcessingError::InvalidRandaoReveal(proposer))?;
    let mut block = BeaconBlock {
        randao_reveal,
        candidate_pow_receipt_root: state.processed_pow_receipt_root,
        body,
        ..BeaconBlock::empty(slot, parent_root)
    };

    let unchecked = ProcessingConfig {
        no_signature_verification: true,
        verify_state_root: false,
        ..config.clone()
    };
    let mut post_state = state.clone();
    process_block(&mut post_state, &block, spec, &unchecked)?;
    block.state_root = post_state.hash_tree_root();

    let keypair = keypairs
        .get(proposer)
        .ok_or(BeaconStateError::UnknownValidator(proposer))?;
    block.signature = keypair.sign(
        block.proposal_data(spec).hash_tree_root(),
        state.domain(slot, spec.domain_proposal),
    );
    Ok(block)
}
