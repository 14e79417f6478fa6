// Copyright 2026 The Storage Diff Watcher Authors
// For licensing, see ../LICENSE-MIT or ../LICENSE-APACHE

//! `toml`-deserialized configuration: database connection parameters, the
//! node IPC path or tail-file path, and a per-contract section. The core
//! crates define no config types of their own; configuration is consumed,
//! not defined, by the pipeline — this is ambient CLI glue.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use alloy_primitives::Address;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("contract \"{0}\" has an invalid address: {1}")]
    InvalidAddress(String, String),
}

#[derive(Debug, Deserialize)]
pub struct WatcherConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub contract: BTreeMap<String, ContractConfig>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct NodeConfig {
    /// IPC path for the node-subscription diff source. Out of scope here:
    /// the concrete JSON-RPC client is an external collaborator this crate
    /// only consumes through a trait.
    pub ipc_path: Option<String>,
    /// Path to a tail-file diff source, as an alternative to `ipc_path`.
    pub diff_file: Option<String>,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

fn default_retry_interval_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct ContractConfig {
    pub address: String,
    pub starting_block: u64,
    /// `header | full`; governs the out-of-scope event-watcher peer only.
    /// Parsed so config files shared with that peer still validate, but
    /// otherwise ignored by the storage core.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
}

impl ContractConfig {
    /// Parses this contract's configured address, naming `contract_name` in
    /// the error so a bad entry in `[contract.<name>]` is easy to find.
    pub fn parsed_address(&self, contract_name: &str) -> Result<Address, ConfigError> {
        self.address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(contract_name.to_string(), self.address.clone()))
    }
}

pub fn load(path: impl AsRef<Path>) -> Result<WatcherConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config = toml::from_str(&contents)?;
    Ok(config)
}
