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

//! Beacon chain state, genesis construction and the slot/block state
//! transition.

extern crate alloc;

use alloy_primitives::{B256, FixedBytes};

mod apply_block;
mod beacon_state;
mod bls;
mod committee_cache;
mod config;
mod deposit;
mod deposit_data;
mod epoch_processing;
mod genesis;
mod operations;
mod spec;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
mod validator;
mod validator_status;

pub use apply_block::*;
pub use beacon_state::*;
pub use bls::*;
pub use committee_cache::*;
pub use config::*;
pub use deposit::*;
pub use deposit_data::*;
pub use epoch_processing::*;
pub use genesis::*;
pub use operations::*;
pub use spec::*;
pub use validator::*;
pub use validator_status::*;

pub use ssz_merkle::{TreeHash, hash};

pub type Slot = u64;
pub type Shard = u64;
pub type Gwei = u64;
pub type ValidatorIndex = usize;
pub type Root = B256;
pub type PublicKeyBytes = FixedBytes<48>;
pub type SignatureBytes = FixedBytes<96>;

#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
