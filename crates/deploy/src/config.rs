//! Network presets and the operator configuration file.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{DEFAULT_NATIVE_SYMBOL, DEFAULT_RECORD_FILENAME};

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "Nerodex.toml";

/// Default network when none is configured.
pub const DEFAULT_NETWORK: &str = "localhost";

/// Block explorer endpoints of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Etherscan-compatible API endpoint.
    pub api_url: String,
    /// Human-facing explorer, used to print address links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Networks known without any configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum NetworkPreset {
    Localhost,
    NeroTestnet,
    NeroMainnet,
}

impl From<NetworkPreset> for NetworkConfig {
    fn from(preset: NetworkPreset) -> Self {
        match preset {
            NetworkPreset::Localhost => Self::localhost(),
            NetworkPreset::NeroTestnet => Self::nero_testnet(),
            NetworkPreset::NeroMainnet => Self::nero_mainnet(),
        }
    }
}

/// How to reach a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    /// Fixed gas price in wei. Queried from the node when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u64>,
    /// Maximum wait for a deployment receipt.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer: Option<ExplorerConfig>,
}

fn default_confirmation_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl NetworkConfig {
    /// Local Hardhat or Anvil node.
    pub fn localhost() -> Self {
        Self {
            name: "localhost".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 31337,
            gas_price: None,
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            poll_interval_ms: 250,
            explorer: None,
        }
    }

    pub fn nero_testnet() -> Self {
        Self {
            name: "nero-testnet".to_string(),
            rpc_url: "https://rpc-testnet.nero.network".to_string(),
            chain_id: 1002,
            gas_price: Some(20_000_000_000),
            confirmation_timeout_secs: 60,
            poll_interval_ms: default_poll_interval_ms(),
            explorer: Some(ExplorerConfig {
                api_url: "https://explorer-api-testnet.nero.network/api".to_string(),
                browser_url: Some("https://explorer-testnet.nero.network".to_string()),
                api_key: None,
            }),
        }
    }

    pub fn nero_mainnet() -> Self {
        Self {
            name: "nero-mainnet".to_string(),
            rpc_url: "https://rpc.nero.network".to_string(),
            chain_id: 1001,
            gas_price: Some(20_000_000_000),
            confirmation_timeout_secs: 60,
            poll_interval_ms: default_poll_interval_ms(),
            explorer: Some(ExplorerConfig {
                api_url: "https://explorer-api.nero.network/api".to_string(),
                browser_url: Some("https://explorer.nero.network".to_string()),
                api_key: None,
            }),
        }
    }

    /// Built-in network by name.
    pub fn preset(name: &str) -> Option<Self> {
        name.parse::<NetworkPreset>().ok().map(Self::from)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Explorer page of an address, when a browser URL is configured.
    pub fn address_url(&self, address: &Address) -> Option<String> {
        let browser = self.explorer.as_ref()?.browser_url.as_ref()?;
        Some(format!("{}/address/{}", browser.trim_end_matches('/'), address))
    }
}

/// Operator configuration, stored as TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Network to deploy to: a key of `networks` or a built-in preset.
    pub network: String,
    /// Hardhat artifacts directory.
    pub artifacts: PathBuf,
    /// Deployment record file.
    pub record: PathBuf,
    /// Native asset symbol passed to the token descriptor.
    pub descriptor_symbol: String,
    /// Maximum concurrent verification requests.
    pub verify_concurrency: usize,
    /// Maximum duration of one unit's verification.
    pub verify_timeout_secs: u64,
    /// Custom networks, taking precedence over presets of the same name.
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Addresses to use instead of deploying, by unit name.
    pub overrides: BTreeMap<String, Address>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            artifacts: PathBuf::from("artifacts"),
            record: PathBuf::from(DEFAULT_RECORD_FILENAME),
            descriptor_symbol: DEFAULT_NATIVE_SYMBOL.to_string(),
            verify_concurrency: 4,
            verify_timeout_secs: 120,
            networks: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }
}

impl DeployConfig {
    /// Resolve the selected network from the custom table or the presets.
    pub fn resolve_network(&self) -> Result<NetworkConfig> {
        if let Some(network) = self.networks.get(&self.network) {
            return Ok(network.clone());
        }

        NetworkConfig::preset(&self.network).with_context(|| {
            let presets: Vec<_> = NetworkPreset::iter().map(|p| p.to_string()).collect();
            format!(
                "Unknown network `{}`: use one of {} or define it under [networks.{}] in {}",
                self.network,
                presets.join(", "),
                self.network,
                CONFIG_FILENAME
            )
        })
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_presets() {
        let testnet = NetworkConfig::preset("nero-testnet").unwrap();
        assert_eq!(testnet.chain_id, 1002);
        assert_eq!(testnet.gas_price, Some(20_000_000_000));
        assert_eq!(testnet.confirmation_timeout(), Duration::from_secs(60));

        assert_eq!(NetworkConfig::preset("nero-mainnet").unwrap().chain_id, 1001);
        assert_eq!(NetworkConfig::preset("localhost").unwrap().chain_id, 31337);
        assert!(NetworkConfig::preset("polygon").is_none());
    }

    #[test]
    fn test_preset_names_match_network_names() {
        for preset in NetworkPreset::iter() {
            assert_eq!(NetworkConfig::from(preset).name, preset.to_string());
        }
    }

    #[test]
    fn test_custom_network_shadows_preset() {
        let mut config = DeployConfig {
            network: "nero-testnet".to_string(),
            ..Default::default()
        };
        let mut custom = NetworkConfig::nero_testnet();
        custom.rpc_url = "http://10.0.0.1:8545".to_string();
        config.networks.insert("nero-testnet".to_string(), custom);

        assert_eq!(config.resolve_network().unwrap().rpc_url, "http://10.0.0.1:8545");
    }

    #[test]
    fn test_unknown_network_is_an_error() {
        let config = DeployConfig {
            network: "nowhere".to_string(),
            ..Default::default()
        };
        assert!(config.resolve_network().is_err());
    }

    #[test]
    fn test_address_url() {
        let testnet = NetworkConfig::nero_testnet();
        let address = Address::with_last_byte(1);

        let url = testnet.address_url(&address).unwrap();
        assert!(url.starts_with("https://explorer-testnet.nero.network/address/0x"));
        assert!(NetworkConfig::localhost().address_url(&address).is_none());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new("nerodex-config").expect("Failed to create temp dir");
        let path = temp_dir.path().join(CONFIG_FILENAME);

        let mut config = DeployConfig {
            network: "staging".to_string(),
            ..Default::default()
        };
        config.networks.insert(
            "staging".to_string(),
            NetworkConfig {
                name: "staging".to_string(),
                ..NetworkConfig::localhost()
            },
        );
        config
            .overrides
            .insert("WETH9".to_string(), Address::with_last_byte(9));

        config.save_to_file(&path).unwrap();
        let loaded: DeployConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: DeployConfig = toml::from_str(r#"network = "nero-testnet""#).unwrap();
        assert_eq!(config.descriptor_symbol, "NERO");
        assert_eq!(config.verify_concurrency, 4);
        assert_eq!(config.record, PathBuf::from("deployments.json"));
    }
}
