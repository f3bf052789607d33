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

/// Switches for the checks performed while processing deposits and blocks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProcessingConfig {
    /// Skip BLS verification of proofs of possession, proposals and exits.
    pub no_signature_verification: bool,
    /// Check block deposits against the processed PoW receipt root.
    pub verify_deposit_proofs: bool,
    /// Compare the post-state root against `block.state_root`.
    pub verify_state_root: bool,
}

/// The default configuration.
pub static DEFAULT_CONFIG: ProcessingConfig = ProcessingConfig {
    no_signature_verification: false,
    verify_deposit_proofs: true,
    verify_state_root: true,
};

impl Default for ProcessingConfig {
    fn default() -> Self {
        DEFAULT_CONFIG.clone()
    }
}
