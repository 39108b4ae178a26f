use alloy::{json_abi::JsonAbi, primitives::Address};
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Parse ABI JSON: either a plain ABI array or a compiler artifact carrying
/// the ABI under `abi` (as an array or as an embedded JSON string).
pub fn parse_abi_json(content: &str) -> Result<JsonAbi> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| anyhow!("Failed to parse ABI JSON: {}", e))?;

    let abi_value = match value {
        Value::Array(_) => value,
        Value::Object(mut artifact) => match artifact.remove("abi") {
            Some(Value::String(embedded)) => serde_json::from_str(&embedded)
                .map_err(|e| anyhow!("Failed to parse embedded ABI string: {}", e))?,
            Some(abi @ Value::Array(_)) => abi,
            Some(_) => return Err(anyhow!("Artifact 'abi' field must be an array")),
            None => return Err(anyhow!("JSON object has no 'abi' field")),
        },
        _ => return Err(anyhow!("ABI must be a JSON array or an artifact object")),
    };

    let abi: JsonAbi = serde_json::from_value(abi_value)
        .map_err(|e| anyhow!("Invalid ABI definition: {}", e))?;
    if abi.functions().next().is_none() && abi.events().next().is_none() {
        warn!("ABI declares no functions or events");
    }
    Ok(abi)
}

/// Load an ABI or compiler artifact from disk
pub async fn load_abi_file<P: AsRef<Path>>(path: P) -> Result<JsonAbi> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("Failed to read ABI file {:?}: {}", path, e))?;
    parse_abi_json(&content).map_err(|e| anyhow!("{:?}: {}", path, e))
}

/// Build an ABI from human-readable signatures such as
/// `function balanceOf(address) view returns (uint256)`
pub fn parse_signatures<S: AsRef<str>>(signatures: &[S]) -> Result<JsonAbi> {
    JsonAbi::parse(signatures.iter().map(AsRef::as_ref))
        .map_err(|e| anyhow!("Invalid signature: {}", e))
}

/// ABI source configuration
#[derive(Debug, Clone)]
pub struct AbiSource {
    pub explorer_api_key: Option<String>,
    pub cache_dir: PathBuf,
}

impl Default for AbiSource {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("contract-bind")
            .join("abi-cache");

        Self {
            explorer_api_key: std::env::var("ETHERSCAN_API_KEY").ok(),
            cache_dir,
        }
    }
}

/// Fetches verified ABIs from an Etherscan-compatible API and caches them in
/// memory and on disk
#[derive(Debug)]
pub struct AbiResolver {
    client: Client,
    config: AbiSource,
    memory_cache: HashMap<String, JsonAbi>,
}

impl AbiResolver {
    pub fn new(config: AbiSource) -> Self {
        Self {
            client: Client::new(),
            config,
            memory_cache: HashMap::new(),
        }
    }

    fn cache_key(address: Address, network: &str) -> String {
        format!("{}_{:x}", network, address)
    }

    /// Get ABI for a contract, trying cache first, then the explorer API
    pub async fn get_abi(
        &mut self,
        address: Address,
        network: &str,
        explorer_api_url: Option<&str>,
    ) -> Result<JsonAbi> {
        let cache_key = Self::cache_key(address, network);

        if let Some(abi) = self.memory_cache.get(&cache_key) {
            debug!("ABI cache hit for {}", address);
            return Ok(abi.clone());
        }

        if let Ok(abi) = self.load_cached_abi(&cache_key).await {
            debug!("ABI disk cache hit for {}", address);
            self.memory_cache.insert(cache_key, abi.clone());
            return Ok(abi);
        }

        let explorer_api_url = explorer_api_url.ok_or_else(|| {
            anyhow!(
                "No ABI cached for {} and network '{}' has no explorer_api_url configured",
                address,
                network
            )
        })?;

        info!("Fetching ABI from {} for {}", explorer_api_url, address);
        let abi = self
            .fetch_from_explorer(address, explorer_api_url)
            .await
            .map_err(|e| anyhow!(super::utils::interpret_abi_error(&e.to_string(), &address.to_string())))?;

        if let Err(e) = self.cache_abi(&cache_key, &abi).await {
            warn!("Failed to cache ABI for {}: {}", address, e);
        }

        self.memory_cache.insert(cache_key, abi.clone());
        Ok(abi)
    }

    async fn fetch_from_explorer(&self, address: Address, explorer_api_url: &str) -> Result<JsonAbi> {
        let mut url = format!(
            "{}?module=contract&action=getabi&address={:#x}&format=json",
            explorer_api_url.trim_end_matches('/'),
            address
        );

        if let Some(api_key) = &self.config.explorer_api_key {
            url.push_str(&format!("&apikey={}", api_key));
        }

        let response: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to fetch from explorer: {}", e))?
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse explorer response: {}", e))?;

        abi_from_explorer_response(&response)
    }

    async fn load_cached_abi(&self, cache_key: &str) -> Result<JsonAbi> {
        let cache_path = self.config.cache_dir.join(format!("{}.json", cache_key));

        if !cache_path.exists() {
            return Err(anyhow!("Cache file does not exist"));
        }

        let content = fs::read_to_string(&cache_path)
            .await
            .map_err(|e| anyhow!("Failed to read cache file: {}", e))?;

        serde_json::from_str(&content).map_err(|e| anyhow!("Failed to parse cached ABI: {}", e))
    }

    async fn cache_abi(&self, cache_key: &str, abi: &JsonAbi) -> Result<()> {
        if !self.config.cache_dir.exists() {
            fs::create_dir_all(&self.config.cache_dir)
                .await
                .map_err(|e| anyhow!("Failed to create cache directory: {}", e))?;
        }

        let cache_path = self.config.cache_dir.join(format!("{}.json", cache_key));
        let content = serde_json::to_string_pretty(abi)
            .map_err(|e| anyhow!("Failed to serialize ABI: {}", e))?;

        fs::write(&cache_path, content)
            .await
            .map_err(|e| anyhow!("Failed to write cache file: {}", e))?;

        debug!("Cached ABI to {:?}", cache_path);
        Ok(())
    }
}

fn abi_from_explorer_response(response: &Value) -> Result<JsonAbi> {
    let result = response["result"].as_str().unwrap_or_default();

    if response["status"] != "1" {
        let message = response["message"].as_str().unwrap_or("Unknown error");
        return Err(anyhow!("Explorer API error: {} {}", message, result));
    }

    if result == "Contract source code not verified" {
        return Err(anyhow!("Contract source code is not verified"));
    }

    parse_abi_json(result)
}
