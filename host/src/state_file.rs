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

use anyhow::{Context, ensure};
use beacon_core::{BeaconState, Slot};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Beacon state snapshots stored as JSON files named by slot.
#[derive(Clone)]
pub struct StateStore {
    directory: PathBuf,
}

impl StateStore {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        let store = Self {
            directory: directory.into(),
        };
        ensure!(store.directory.is_dir(), "not a directory");

        Ok(store)
    }

    fn path(&self, slot: Slot) -> PathBuf {
        self.directory.join(format!("{}_beacon_state.json", slot))
    }

    pub fn save_state(&self, state: &BeaconState) -> Result<PathBuf, anyhow::Error> {
        let file = self.path(state.slot);
        ensure!(
            !file.exists(),
            "State file already exists: {}",
            file.display()
        );
        debug!("Saving beacon state at slot {}", state.slot);
        write_state(&file, state)?;
        Ok(file)
    }

    pub fn state_at_slot(&self, slot: Slot) -> Result<Option<BeaconState>, anyhow::Error> {
        let file = self.path(slot);
        if !file.exists() {
            return Ok(None);
        }
        read_state(&file).map(Some)
    }

    /// Slots of all stored states, ascending.
    pub fn slots(&self) -> Result<Vec<Slot>, anyhow::Error> {
        let mut slots = vec![];
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            if let Some(slot) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix("_beacon_state.json"))
                .and_then(|slot| slot.parse::<Slot>().ok())
            {
                slots.push(slot);
            }
        }
        slots.sort_unstable();
        Ok(slots)
    }

    pub fn clear_states_before(&self, slot: Slot) -> Result<(), anyhow::Error> {
        tracing::info!("Clearing all beacon states before slot {}", slot);
        for file_slot in self.slots()? {
            if file_slot < slot {
                fs::remove_file(self.path(file_slot))?;
            }
        }
        Ok(())
    }
}

pub fn write_state(path: impl AsRef<Path>, state: &BeaconState) -> Result<(), anyhow::Error> {
    let path = path.as_ref();
    let json = serde_json::to_vec(state).context("failed to serialize beacon state")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write beacon state file {}", path.display()))
}

pub fn read_state(path: impl AsRef<Path>) -> Result<BeaconState, anyhow::Error> {
    let path = path.as_ref();
    let json = fs::read(path)
        .with_context(|| format!("failed to read beacon state file {}", path.display()))?;
    serde_json::from_slice(&json).context("failed to deserialize beacon state")
}
