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
    BeaconState, BeaconStateError, ChainSpec, Root, Shard, ShardCommittee, Slot, ValidatorIndex,
    ensure, hash,
};
use alloc::vec::Vec;
use safe_arith::{ArithError, SafeArith};
use ssz_merkle::HASH_SIZE;
use tracing::{debug, trace};

/// Bytes of hash output consumed per random sample.
const RAND_BYTES: usize = 3;
/// Upper bound of a sample; lists of this length or longer cannot be shuffled.
pub const RAND_MAX: u64 = (1 << (RAND_BYTES * 8)) - 1;

/// Committees of one epoch, indexed by slot and then by shard position.
pub type CommitteeTable = Vec<Vec<ShardCommittee>>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShuffleError {
    #[error("Too many validators: {0} values cannot be shuffled")]
    TooManyValidators(usize),
    #[error("Cannot split a list into zero partitions")]
    ZeroPartitions,
    #[error("Insufficient validators")]
    InsufficientValidators,
    #[error("Beacon state error: {0}")]
    State(#[from] BeaconStateError),
    #[error("Arithmetic error: {0:?}")]
    Arith(ArithError),
}

impl From<ArithError> for ShuffleError {
    fn from(e: ArithError) -> Self {
        ShuffleError::Arith(e)
    }
}

/// Deterministic Fisher-Yates shuffle of `values` driven by successive hashes
/// of `seed`.
///
/// Each hash output yields ten 3 byte big-endian samples. Samples at or above
/// the largest multiple of the remaining length below [`RAND_MAX`] are
/// rejected so that every permutation is equally likely.
pub fn shuffle<T: Clone>(values: &[T], seed: Root) -> Result<Vec<T>, ShuffleError> {
    let values_count = values.len();
    ensure!(
        (values_count as u64) < RAND_MAX,
        ShuffleError::TooManyValidators(values_count)
    );

    let mut output = values.to_vec();
    let mut source = seed;
    let mut index = 0;
    while index + 1 < values_count {
        source = hash(source.as_slice());
        for sample_bytes in source[..HASH_SIZE - HASH_SIZE % RAND_BYTES].chunks_exact(RAND_BYTES) {
            let remaining = (values_count - index) as u64;
            if remaining == 1 {
                break;
            }

            let sample = sample_bytes
                .iter()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
            let sample_max = RAND_MAX - RAND_MAX % remaining;
            if sample < sample_max {
                let replacement = (sample % remaining) as usize + index;
                output.swap(index, replacement);
                index += 1;
            }
        }
    }
    Ok(output)
}

/// Splits `list` into `n` contiguous pieces whose lengths differ by at most one.
///
/// Piece `i` is `list[len * i / n .. len * (i + 1) / n]`.
pub fn split<T: Clone>(list: &[T], n: usize) -> Result<Vec<Vec<T>>, ShuffleError> {
    ensure!(n > 0, ShuffleError::ZeroPartitions);
    let len = list.len();
    (0..n)
        .map(|i| {
            let start = len.safe_mul(i)?.safe_div(n)?;
            let end = len.safe_mul(i.safe_add(1)?)?.safe_div(n)?;
            Ok(list[start..end].to_vec())
        })
        .collect()
}

/// Assigns the `active_indices` to shards for every slot of one epoch.
///
/// The shuffled indices are split into one bucket per shard and every bucket
/// is then spread over the slots of the epoch. `table[slot][k]` attests to
/// shard `(start_shard + k) % SHARD_COUNT`.
#[tracing::instrument(skip(active_indices, spec), fields(validators = active_indices.len()))]
pub fn compute_committees(
    active_indices: &[ValidatorIndex],
    seed: Root,
    start_shard: Shard,
    spec: &ChainSpec,
) -> Result<CommitteeTable, ShuffleError> {
    let shard_count = spec.shard_count as usize;
    let epoch_length = spec.epoch_length as usize;

    debug!(
        "Shuffling {} active validators for seed: {}",
        active_indices.len(),
        seed
    );
    let shuffled = shuffle(active_indices, seed)?;
    let total_validator_count = active_indices.len() as u64;

    let mut table: CommitteeTable = (0..epoch_length)
        .map(|_| Vec::with_capacity(shard_count))
        .collect();
    for (position, bucket) in split(&shuffled, shard_count)?.iter().enumerate() {
        let shard = start_shard
            .safe_add(position as u64)?
            .safe_rem(spec.shard_count)?;
        for (row, committee) in table.iter_mut().zip(split(bucket, epoch_length)?) {
            row.push(ShardCommittee {
                shard,
                committee,
                total_validator_count,
            });
        }
    }
    trace!(slots = table.len(), "Committees computed");
    Ok(table)
}

/// Index of the validator proposing at `slot`: the member at position
/// `slot % len` of the first non-empty committee of the slot.
pub fn get_beacon_proposer_index(
    state: &BeaconState,
    slot: Slot,
    spec: &ChainSpec,
) -> Result<ValidatorIndex, ShuffleError> {
    let committee = state
        .get_shard_committees_at_slot(slot, spec)?
        .iter()
        .map(|shard_committee| &shard_committee.committee)
        .find(|committee| !committee.is_empty())
        .ok_or(ShuffleError::InsufficientValidators)?;
    let position = slot.safe_rem(committee.len() as u64)? as usize;
    Ok(committee[position])
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use rand::Rng;
    use test_log::test;

    #[test]
    fn shuffle_is_a_deterministic_permutation() {
        let values: Vec<usize> = (0..1000).collect();
        let seed = hash(b"seed");

        let first = shuffle(&values, seed).unwrap();
        assert_eq!(first, shuffle(&values, seed).unwrap());
        assert_ne!(first, values);
        assert_eq!(first.iter().copied().sorted().collect::<Vec<_>>(), values);

        let other = shuffle(&values, hash(b"other seed")).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn short_lists_are_unchanged() {
        let empty: Vec<u64> = vec![];
        assert_eq!(shuffle(&empty, Root::ZERO).unwrap(), empty);
        assert_eq!(shuffle(&[42u64], Root::ZERO).unwrap(), vec![42]);
    }

    #[test]
    fn random_seeds_permute() {
        let mut rng = rand::rng();
        for len in [2usize, 3, 10, 11, 257] {
            let values: Vec<usize> = (0..len).collect();
            let seed = Root::from(rng.random::<[u8; 32]>());
            let shuffled = shuffle(&values, seed).unwrap();
            assert_eq!(shuffled.into_iter().sorted().collect::<Vec<_>>(), values);
        }
    }

    #[test]
    fn oversized_lists_are_rejected() {
        let values = vec![0u8; RAND_MAX as usize];
        assert_eq!(
            shuffle(&values, Root::ZERO),
            Err(ShuffleError::TooManyValidators(RAND_MAX as usize))
        );
    }

    #[test]
    fn split_partitions_evenly() {
        let list: Vec<u32> = (0..10).collect();
        let parts = split(&list, 3).unwrap();
        assert_eq!(parts, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8, 9]]);

        for n in 1..=12 {
            let parts = split(&list, n).unwrap();
            assert_eq!(parts.len(), n);
            assert_eq!(parts.concat(), list);
            let (min, max) = parts
                .iter()
                .map(Vec::len)
                .minmax()
                .into_option()
                .unwrap();
            assert!(max - min <= 1);
        }
    }

    #[test]
    fn split_edge_cases() {
        let empty: Vec<u32> = vec![];
        assert_eq!(split(&empty, 4).unwrap(), vec![Vec::<u32>::new(); 4]);
        assert_eq!(split(&[1u32, 2], 0), Err(ShuffleError::ZeroPartitions));
    }

    #[test]
    fn committees_cover_the_active_set() {
        let spec = ChainSpec::minimal();
        let active: Vec<ValidatorIndex> = (0..100).map(|i| i * 2).collect();
        let table = compute_committees(&active, hash(b"seed"), 3, &spec).unwrap();

        assert_eq!(table.len(), spec.epoch_length as usize);
        let mut members = vec![];
        for row in &table {
            assert_eq!(row.len(), spec.shard_count as usize);
            for (k, committee) in row.iter().enumerate() {
                assert_eq!(committee.shard, (3 + k as u64) % spec.shard_count);
                assert_eq!(committee.total_validator_count, 100);
                members.extend_from_slice(&committee.committee);
            }
        }
        members.sort_unstable();
        assert_eq!(members, active);
    }

    #[test]
    fn committees_wrap_shards() {
        let spec = ChainSpec::minimal();
        let table = compute_committees(&[0, 1, 2], Root::ZERO, 7, &spec).unwrap();
        let shards: Vec<Shard> = table[0].iter().map(|c| c.shard).collect();
        assert_eq!(shards, vec![7, 0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn empty_active_set_gives_empty_committees() {
        let spec = ChainSpec::minimal();
        let table = compute_committees(&[], Root::ZERO, 0, &spec).unwrap();
        assert_eq!(table.len(), spec.epoch_length as usize);
        assert!(
            table
                .iter()
                .flatten()
                .all(|committee| committee.committee.is_empty())
        );
    }
}
