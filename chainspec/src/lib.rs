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

//! Select the chainspec to use based on feature flags, optionally overridden
//! by a YAML file.

use std::path::Path;
use std::sync::LazyLock;

use beacon_core::{ChainSpec, SpecError};
use serde_yaml::{Mapping, Value};

pub static CHAINSPEC: LazyLock<ChainSpec> = LazyLock::new(|| {
    if cfg!(feature = "minimal") {
        ChainSpec::minimal()
    } else if cfg!(feature = "foundation") {
        ChainSpec::foundation()
    } else {
        unreachable!("No valid feature flag set for chainspec");
    }
});

#[derive(thiserror::Error, Debug)]
pub enum ChainSpecError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Expected a mapping of parameter names to values")]
    NotAMapping,
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Invalid chain spec: {0}")]
    Invalid(#[from] SpecError),
}

/// Applies the parameters set in `yaml` on top of `base`. Parameters missing
/// from `yaml` keep their `base` value.
pub fn apply_overrides(base: &ChainSpec, yaml: &str) -> Result<ChainSpec, ChainSpecError> {
    let overrides = match serde_yaml::from_str::<Value>(yaml)? {
        Value::Null => Mapping::new(),
        Value::Mapping(mapping) => mapping,
        _ => return Err(ChainSpecError::NotAMapping),
    };

    let Value::Mapping(mut merged) = serde_yaml::to_value(base)? else {
        return Err(ChainSpecError::NotAMapping);
    };
    for (key, value) in overrides {
        if !merged.contains_key(&key) {
            let name = key.as_str().map_or_else(|| format!("{key:?}"), str::to_owned);
            return Err(ChainSpecError::UnknownParameter(name));
        }
        tracing::debug!(?key, ?value, "Overriding chain spec parameter");
        merged.insert(key, value);
    }

    let spec: ChainSpec = serde_yaml::from_value(Value::Mapping(merged))?;
    spec.validate()?;
    Ok(spec)
}

/// Loads the preset selected by feature flag with the overrides in the YAML
/// file at `path`.
pub fn load_chainspec(path: impl AsRef<Path>) -> Result<ChainSpec, ChainSpecError> {
    let path = path.as_ref();
    let yaml = std::fs::read_to_string(path).map_err(|source| ChainSpecError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let spec = apply_overrides(&CHAINSPEC, &yaml)?;
    tracing::info!(path = %path.display(), "Loaded chain spec");
    Ok(spec)
}
