use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::ethereum::iterator::DEFAULT_BUFFER;

pub const ENV_RPC_URL: &str = "CONTRACT_BIND_RPC_URL";
pub const ENV_NETWORK: &str = "CONTRACT_BIND_NETWORK";
pub const ENV_EXPLORER_API_KEY: &str = "ETHERSCAN_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub networks: HashMap<String, NetworkConfig>,
    pub default_network: String,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    /// Block explorer API key, normally supplied through the environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer_api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Etherscan-compatible API endpoint used to fetch verified ABIs
    pub explorer_api_url: Option<String>,
    #[serde(default)]
    pub gas: GasConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasConfig {
    pub default_gas_limit: u64,
    pub max_gas_price: Option<u64>,
    pub priority_fee: Option<u64>,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            default_gas_limit: 100_000,
            max_gas_price: None,
            priority_fee: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Logs buffered between the subscription task and the iterator
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Environment variable holding the hex private key used by `send`
    pub private_key_env: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            private_key_env: "PRIVATE_KEY".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut networks = HashMap::new();

        networks.insert(
            "ethereum".to_string(),
            NetworkConfig {
                rpc_url: "https://eth.llamarpc.com".to_string(),
                chain_id: 1,
                explorer_api_url: Some("https://api.etherscan.io/api".to_string()),
                gas: GasConfig {
                    default_gas_limit: 100000,
                    max_gas_price: Some(50_000_000_000), // 50 Gwei
                    priority_fee: Some(2_000_000_000),   // 2 Gwei
                },
            },
        );

        networks.insert(
            "sepolia".to_string(),
            NetworkConfig {
                rpc_url: "https://rpc.sepolia.org".to_string(),
                chain_id: 11155111,
                explorer_api_url: Some("https://api-sepolia.etherscan.io/api".to_string()),
                gas: GasConfig {
                    default_gas_limit: 100000,
                    max_gas_price: Some(20_000_000_000), // 20 Gwei
                    priority_fee: Some(1_000_000_000),   // 1 Gwei
                },
            },
        );

        networks.insert(
            "local".to_string(),
            NetworkConfig {
                rpc_url: "ws://127.0.0.1:8545".to_string(),
                chain_id: 31337,
                explorer_api_url: None,
                gas: GasConfig::default(),
            },
        );

        Self {
            networks,
            default_network: "ethereum".to_string(),
            subscription: SubscriptionConfig::default(),
            signer: SignerConfig::default(),
            explorer_api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        Self::from_toml(&content).map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if !config.networks.contains_key(&config.default_network) {
            return Err(anyhow!(
                "default network '{}' is not configured",
                config.default_network
            ));
        }
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default, then apply environment
    /// overrides.
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `CONTRACT_BIND_NETWORK`, `CONTRACT_BIND_RPC_URL` and
    /// `ETHERSCAN_API_KEY`. The RPC URL applies to the (possibly overridden)
    /// default network.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(network) = lookup(ENV_NETWORK) {
            tracing::debug!("Default network overridden by {}: {}", ENV_NETWORK, network);
            self.default_network = network;
        }

        if let Some(rpc_url) = lookup(ENV_RPC_URL) {
            tracing::debug!("RPC URL for {} overridden by {}", self.default_network, ENV_RPC_URL);
            self.networks
                .entry(self.default_network.clone())
                .and_modify(|network| network.rpc_url = rpc_url.clone())
                .or_insert_with(|| NetworkConfig {
                    rpc_url,
                    chain_id: 0,
                    explorer_api_url: None,
                    gas: GasConfig::default(),
                });
        }

        if let Some(api_key) = lookup(ENV_EXPLORER_API_KEY) {
            tracing::debug!("{} found, will be used for ABI resolution", ENV_EXPLORER_API_KEY);
            self.explorer_api_key = Some(api_key);
        }
    }

    /// Settings of `name`, or of the default network.
    pub fn network(&self, name: Option<&str>) -> Result<&NetworkConfig> {
        let name = name.unwrap_or(&self.default_network);
        self.networks.get(name).ok_or_else(|| {
            let mut available: Vec<&str> = self.networks.keys().map(String::as_str).collect();
            available.sort_unstable();
            anyhow!(
                "Network '{}' not configured. Available networks: {}",
                name,
                available.join(", ")
            )
        })
    }

    /// Add a new network configuration
    pub fn add_network(&mut self, name: String, config: NetworkConfig) {
        self.networks.insert(name, config);
    }

    /// Private key named by `signer.private_key_env`, if set.
    pub fn private_key(&self) -> Option<String> {
        std::env::var(&self.signer.private_key_env).ok()
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("contract-bind").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# contract-bind configuration file

# Network used when --network is not given
default_network = "ethereum"

[networks.ethereum]
rpc_url = "https://eth.llamarpc.com"
chain_id = 1
explorer_api_url = "https://api.etherscan.io/api"

[networks.ethereum.gas]
default_gas_limit = 100000
max_gas_price = 50_000_000_000  # 50 Gwei
priority_fee = 2_000_000_000    # 2 Gwei

[networks.sepolia]
rpc_url = "https://rpc.sepolia.org"
chain_id = 11155111
explorer_api_url = "https://api-sepolia.etherscan.io/api"

[networks.sepolia.gas]
default_gas_limit = 100000
max_gas_price = 20_000_000_000  # 20 Gwei
priority_fee = 1_000_000_000    # 1 Gwei

# Subscriptions need a WebSocket or IPC endpoint
[networks.local]
rpc_url = "ws://127.0.0.1:8545"
chain_id = 31337

[subscription]
buffer_size = 128

[signer]
private_key_env = "PRIVATE_KEY"

# Environment variables that can be used:
# CONTRACT_BIND_NETWORK - overrides default_network
# CONTRACT_BIND_RPC_URL - overrides the RPC URL of the default network
# ETHERSCAN_API_KEY - API key for ABI resolution
"#;
        sample_config.to_string()
    }
}
