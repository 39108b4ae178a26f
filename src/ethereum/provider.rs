use crate::config::{Config, NetworkConfig};
use alloy::{
    eips::BlockId,
    network::TransactionBuilder,
    primitives::{Address, Bytes, TxHash, TxKind},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, TransactionRequest},
    transports::{BoxTransport, RpcError, TransportError},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::{collections::HashMap, fmt};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    backend::{ContractCaller, ContractFilterer, ContractTransactor, Eip1559Fees, LogStream},
    error::{RemoteError, RevertReason},
    utils, BlockTag, CallRequest, Log, LogFilter,
};

/// All three capabilities on top of a JSON-RPC node.
#[derive(Clone)]
pub struct NodeBackend {
    provider: RootProvider<BoxTransport>,
    url: String,
}

impl NodeBackend {
    /// Connect over HTTP, WebSocket or IPC depending on the URL scheme.
    /// Subscriptions need a WebSocket or IPC endpoint.
    pub async fn connect(url: &str) -> Result<Self, RemoteError> {
        let provider = ProviderBuilder::new()
            .on_builtin(url)
            .await
            .map_err(remote_error)?;
        debug!(url, "connected to node");
        Ok(Self {
            provider,
            url: url.to_string(),
        })
    }

    pub fn provider(&self) -> &RootProvider<BoxTransport> {
        &self.provider
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for NodeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBackend").field("url", &self.url).finish()
    }
}

#[async_trait]
impl ContractCaller for NodeBackend {
    async fn call(&self, request: &CallRequest) -> Result<Bytes, RemoteError> {
        let tx = transaction_request(request);
        self.provider
            .call(&tx)
            .block(block_id(request.block))
            .await
            .map_err(remote_error)
    }
}

#[async_trait]
impl ContractTransactor for NodeBackend {
    async fn pending_nonce(&self, address: Address) -> Result<u64, RemoteError> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(remote_error)
    }

    async fn gas_price(&self) -> Result<u128, RemoteError> {
        self.provider.get_gas_price().await.map_err(remote_error)
    }

    async fn fee_estimate(&self) -> Result<Option<Eip1559Fees>, RemoteError> {
        match self.provider.estimate_eip1559_fees(None).await {
            Ok(estimate) => Ok(Some(Eip1559Fees {
                max_fee_per_gas: estimate.max_fee_per_gas,
                max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
            })),
            // no base fee in the latest block
            Err(RpcError::UnsupportedFeature(feature)) => {
                debug!(feature, "node has no fee market, falling back to legacy pricing");
                Ok(None)
            }
            Err(e) => Err(remote_error(e)),
        }
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RemoteError> {
        let tx = transaction_request(request);
        self.provider
            .estimate_gas(&tx)
            .block(block_id(request.block))
            .await
            .map_err(remote_error)
    }

    async fn chain_id(&self) -> Result<u64, RemoteError> {
        self.provider.get_chain_id().await.map_err(remote_error)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RemoteError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(remote_error)?;
        Ok(*pending.tx_hash())
    }
}

#[async_trait]
impl ContractFilterer for NodeBackend {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RemoteError> {
        let logs = self
            .provider
            .get_logs(&to_filter(filter))
            .await
            .map_err(remote_error)?;
        Ok(logs.into_iter().map(Log::from).collect())
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream, RemoteError> {
        let subscription = self
            .provider
            .subscribe_logs(&to_filter(filter))
            .await
            .map_err(remote_error)?;
        Ok(subscription
            .into_stream()
            .map(|log| Ok(Log::from(log)))
            .boxed())
    }
}

fn transaction_request(request: &CallRequest) -> TransactionRequest {
    let mut tx = TransactionRequest::default()
        .with_input(request.data.clone())
        .with_value(request.value);
    if let Some(from) = request.from {
        tx = tx.with_from(from);
    }
    tx.to = Some(request.to.map_or(TxKind::Create, TxKind::Call));
    tx
}

fn block_id(block: BlockTag) -> BlockId {
    match block {
        BlockTag::Latest => BlockId::latest(),
        BlockTag::Pending => BlockId::pending(),
        BlockTag::Number(number) => BlockId::number(number),
    }
}

fn to_filter(filter: &LogFilter) -> Filter {
    let mut out = Filter::new().address(filter.address);
    if let Some(from) = filter.from_block {
        out = out.from_block(from);
    }
    if let Some(to) = filter.to_block {
        out = out.to_block(to);
    }
    for (slot, constraint) in out.topics.iter_mut().zip(&filter.topics) {
        if let Some(values) = constraint {
            *slot = values.clone().into();
        }
    }
    out
}

/// Sort a JSON-RPC failure into revert, rejection or transport trouble.
pub(crate) fn remote_error(err: TransportError) -> RemoteError {
    if let Some(payload) = err.as_error_resp() {
        if let Some(data) = payload.as_revert_data() {
            return RemoteError::Reverted(RevertReason::Opaque(data));
        }
        if payload.message.contains("execution reverted") {
            return RemoteError::Reverted(RevertReason::Opaque(Bytes::new()));
        }
        return RemoteError::Rejected {
            code: payload.code,
            message: payload.message.to_string(),
        };
    }
    RemoteError::Transport(utils::interpret_rpc_error(&err.to_string()))
}

/// One lazily connected backend per configured network.
#[derive(Debug)]
pub struct ProviderManager {
    backends: Mutex<HashMap<String, NodeBackend>>,
    config: Config,
}

impl ProviderManager {
    pub fn new(config: Config) -> Self {
        Self {
            backends: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn get_network_config(&self, network: Option<&str>) -> Result<&NetworkConfig> {
        self.config.network(network)
    }

    pub fn get_available_networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = self.config.networks.keys().cloned().collect();
        networks.sort();
        networks
    }

    /// Backend for `network` (or the default network), connecting on first use.
    pub async fn get_backend(&self, network: Option<&str>) -> Result<NodeBackend> {
        let network_name = network.unwrap_or(&self.config.default_network);
        let network_config = self.config.network(Some(network_name))?;

        let mut backends = self.backends.lock().await;
        if let Some(backend) = backends.get(network_name) {
            return Ok(backend.clone());
        }

        let backend = NodeBackend::connect(&network_config.rpc_url)
            .await
            .map_err(|e| anyhow!("Cannot connect to network '{}': {}", network_name, e))?;

        let chain_id = backend
            .chain_id()
            .await
            .map_err(|e| anyhow!("Cannot query chain id of '{}': {}", network_name, e))?;
        if network_config.chain_id != 0 && chain_id != network_config.chain_id {
            return Err(anyhow!(
                "Network '{}' is configured with chain id {} but the node reports {}",
                network_name,
                network_config.chain_id,
                chain_id
            ));
        }

        info!(network = network_name, chain_id, "connected to network");
        backends.insert(network_name.to_string(), backend.clone());
        Ok(backend)
    }
}
