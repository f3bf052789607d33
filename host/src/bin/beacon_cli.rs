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
use beacon_core::test_utils::generate_deterministic_keypairs;
use beacon_core::{
    BeaconState, ChainSpec, ProcessingConfig, TreeHash, build_genesis_state,
    is_valid_genesis_state,
};
use chainspec::{CHAINSPEC, load_chainspec};
use clap::Parser;
use host::{DepositFile, DriverError, SlotDriver, StateStore, read_state, write_state};
use itertools::Itertools;
use std::{fs, path::PathBuf, time::Duration};
use tracing::{error, info, warn};

/// CLI for building and running a local beacon chain
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// YAML file overriding chain spec parameters
    #[clap(long, env = "CHAINSPEC_PATH")]
    spec: Option<PathBuf>,

    /// Skip BLS signature verification
    #[clap(long)]
    no_signature_verification: bool,

    #[clap(subcommand)]
    command: Command,
}

/// Subcommands of the beacon CLI.
#[derive(Parser, Debug)]
enum Command {
    /// Generates deterministic validator deposits and their receipt root
    #[clap(name = "gen-deposits")]
    GenDeposits {
        /// Number of deposits included at genesis
        #[clap(long, short)]
        count: usize,
        /// Number of additional deposits left for inclusion in blocks
        #[clap(long, default_value_t = 0)]
        extra: usize,
        /// Genesis time in seconds since the epoch
        #[clap(long, default_value_t = 0)]
        genesis_time: u64,
        /// Output file
        #[clap(long, short, default_value = "./deposits.json")]
        out: PathBuf,
    },
    /// Builds the genesis state from a deposit file
    #[clap(name = "genesis")]
    Genesis {
        #[clap(long, short, default_value = "./deposits.json")]
        deposits: PathBuf,
        /// Output file
        #[clap(long, short, default_value = "./genesis_state.json")]
        out: PathBuf,
    },
    /// Prints the committee assignments of a state
    #[clap(name = "committees")]
    Committees {
        #[clap(long, default_value = "./genesis_state.json")]
        state: PathBuf,
    },
    /// Runs a local chain from genesis, proposing a block every slot
    #[clap(name = "run")]
    Run {
        #[clap(long, short, default_value = "./deposits.json")]
        deposits: PathBuf,
        /// Stop after this many slots
        #[clap(long)]
        slots: Option<u64>,
        /// Leave every n-th slot empty
        #[clap(long)]
        skip_every: Option<u64>,
        /// Do not wait for the slot duration between slots
        #[clap(long)]
        fast: bool,
        /// Directory to store epoch snapshots of the state
        #[clap(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. In order to view logs, run `RUST_LOG=info cargo run`
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();
    let args = Args::try_parse()?;

    let spec = match &args.spec {
        Some(path) => load_chainspec(path)?,
        None => CHAINSPEC.clone(),
    };
    spec.validate()?;
    let config = ProcessingConfig {
        no_signature_verification: args.no_signature_verification,
        ..Default::default()
    };

    match args.command {
        Command::GenDeposits {
            count,
            extra,
            genesis_time,
            out,
        } => {
            let file = DepositFile::generate(count, extra, genesis_time, &spec)?;
            info!("Receipt root: {}", file.receipt_root);
            file.save(&out)?;
        }
        Command::Genesis { deposits, out } => {
            let file = DepositFile::load(&deposits)?;
            let state = genesis(&file, &spec, &config)?;
            write_state(&out, &state)?;
            info!("Genesis state written to {}", out.display());
        }
        Command::Committees { state } => {
            let state = read_state(&state)?;
            print_committees(&state, &spec);
        }
        Command::Run {
            deposits,
            slots,
            skip_every,
            fast,
            data_dir,
        } => {
            let file = DepositFile::load(&deposits)?;
            let store = match data_dir {
                Some(dir) => {
                    fs::create_dir_all(&dir).context("Failed to create data directory")?;
                    Some(StateStore::new(dir)?)
                }
                None => None,
            };
            run(&file, &spec, config, slots, skip_every, fast, store).await?;
        }
    }

    Ok(())
}

fn genesis(
    file: &DepositFile,
    spec: &ChainSpec,
    config: &ProcessingConfig,
) -> anyhow::Result<BeaconState> {
    let state = build_genesis_state(
        file.genesis_deposits(),
        file.genesis_time,
        file.receipt_root,
        spec,
        config,
    )?;
    ensure!(
        is_valid_genesis_state(&state, spec),
        "no active validator at genesis"
    );
    info!(
        validators = state.validator_registry.len(),
        active = state.active_validator_indices().len(),
        "Genesis state root: {}",
        state.hash_tree_root()
    );
    Ok(state)
}

fn print_committees(state: &BeaconState, spec: &ChainSpec) {
    let epoch_start = spec.epoch_start_slot(state.slot);
    for (row, committees) in state.shard_committees_at_slots.iter().enumerate() {
        let slot = (epoch_start + row as u64).checked_sub(spec.epoch_length);
        let slot = slot.map_or_else(|| "-".to_string(), |slot| slot.to_string());
        for shard_committee in committees {
            println!(
                "slot {slot}\tshard {}\t[{}]",
                shard_committee.shard,
                shard_committee.committee.iter().join(", ")
            );
        }
    }
    for (shard, committee) in state.persistent_committees.iter().enumerate() {
        println!("persistent shard {shard}\t[{}]", committee.iter().join(", "));
    }
}

async fn run(
    file: &DepositFile,
    spec: &ChainSpec,
    config: ProcessingConfig,
    slots: Option<u64>,
    skip_every: Option<u64>,
    fast: bool,
    store: Option<StateStore>,
) -> anyhow::Result<()> {
    let state = genesis(file, spec, &config)?;
    let keypairs = generate_deterministic_keypairs(file.deposits.len());
    let mut driver = SlotDriver::new(state, keypairs, spec.clone(), config);
    driver.queue_deposits(file.pending_deposits().iter().cloned());

    let period = if fast {
        Duration::from_millis(1)
    } else {
        Duration::from_secs(spec.slot_duration)
    };
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    let mut driven = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                break;
            }
        }

        let next_slot = driver.state().slot + 1;
        let skip = skip_every.is_some_and(|n| n > 0 && next_slot % n == 0);
        let report = match driver.on_slot(skip) {
            Ok(report) => report,
            Err(DriverError::RandaoExhausted(index)) => {
                error!(
                    slot = next_slot,
                    validator = index,
                    "Randao chain exhausted, regenerate the deposits to continue"
                );
                break;
            }
            Err(err) => return Err(err.into()),
        };
        info!(
            slot = report.slot,
            block = ?report.block_root,
            attestations = report.attestations,
            deposits = report.deposits,
            justified = report.justified_slot,
            finalized = report.finalized_slot,
            "Slot processed"
        );

        if let Some(store) = &store {
            if report.slot % spec.epoch_length == 0 {
                let path = store.save_state(driver.state())?;
                info!("State snapshot written to {}", path.display());
            }
        }

        driven += 1;
        if slots.is_some_and(|slots| driven >= slots) {
            break;
        }
    }

    info!(
        slot = driver.state().slot,
        head = %driver.head_root(),
        finalized = driver.state().finalized_slot,
        "Stopped"
    );
    Ok(())
}
