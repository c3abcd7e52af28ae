// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default interval between reconciliation passes
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

/// Load/save helpers shared by every on-disk config
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        // Support both YAML and JSON formats
        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("yaml")
            || path.extension().and_then(|s| s.to_str()) == Some("yml")
        {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PongBotConfig {
    // Rpc url for the Eth fullnode, used for queries and transaction submission.
    pub eth_rpc_url: String,
    // Address of the watched PingPong contract.
    pub contract_address: String,
    // Path of the file where the signing key (hex-encoded secp256k1) is stored.
    pub ping_signer_key_path: PathBuf,
    // Path of the on-disk checkpoint file.
    pub checkpoint_path: PathBuf,
    // Interval between reconciliation passes, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    // The expected chain id. When set, startup fails on a mismatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_chain_id: Option<u64>,
    // Port for the prometheus /metrics endpoint. Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Config for PongBotConfig {}

impl PongBotConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// Generate a config template and write it to a file.
pub fn generate_config_template_and_write_to_file(path: &Path) -> Result<()> {
    let config = PongBotConfig {
        eth_rpc_url: "your_eth_rpc_url".to_string(),
        contract_address: "0x0000000000000000000000000000000000000000".to_string(),
        ping_signer_key_path: PathBuf::from("/path/to/your/ping_signer_key"),
        checkpoint_path: PathBuf::from("/path/to/your/checkpoint.json"),
        poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        expected_chain_id: None,
        metrics_port: Some(9184),
    };
    config.save(path)
}
