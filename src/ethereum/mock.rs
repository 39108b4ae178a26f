//! Scripted in-process node used by the unit tests.

use alloy::{
    dyn_abi::DynSolValue,
    json_abi::JsonAbi,
    primitives::{address, keccak256, Address, Bytes, TxHash, U256},
};
use async_trait::async_trait;
use futures::StreamExt;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;

use super::{
    backend::{ContractCaller, ContractFilterer, ContractTransactor, Eip1559Fees, LogStream},
    codec::ERROR_STRING_SELECTOR,
    error::RemoteError,
    CallRequest, Log, LogFilter,
};

pub(crate) const TOKEN: Address = address!("00000000000000000000000000000000000000aa");

pub(crate) fn token_abi() -> JsonAbi {
    JsonAbi::parse([
        "constructor(string name, uint8 decimals)",
        "function name() view returns (string)",
        "function balanceOf(address owner) view returns (uint256)",
        "function transfer(address to, uint256 amount) returns (bool)",
        "function mint(address to, uint256 amount)",
        "function mint(address to, uint256 amount, bytes data)",
        "function burn(uint256 amount)",
        "function burn(address from, uint256 amount)",
        "event Transfer(address indexed from, address indexed to, uint256 value)",
        "event Approval(address indexed owner, address indexed spender, uint256 value)",
        "error InsufficientBalance(uint256 available, uint256 required)",
    ])
    .unwrap()
}

pub(crate) fn transfer_log(from: Address, to: Address, value: u64, block: u64) -> Log {
    Log {
        address: TOKEN,
        topics: vec![
            keccak256("Transfer(address,address,uint256)"),
            from.into_word(),
            to.into_word(),
        ],
        data: DynSolValue::Uint(U256::from(value), 256).abi_encode().into(),
        block_number: Some(block),
        log_index: Some(0),
        ..Default::default()
    }
}

pub(crate) fn approval_log(owner: Address, spender: Address, block: u64) -> Log {
    Log {
        address: TOKEN,
        topics: vec![
            keccak256("Approval(address,address,uint256)"),
            owner.into_word(),
            spender.into_word(),
        ],
        data: DynSolValue::Uint(U256::MAX, 256).abi_encode().into(),
        block_number: Some(block),
        ..Default::default()
    }
}

/// Revert payload of `require(false, message)`.
pub(crate) fn error_string(message: &str) -> Bytes {
    let mut payload = ERROR_STRING_SELECTOR.to_vec();
    payload.extend(DynSolValue::Tuple(vec![DynSolValue::String(message.into())]).abi_encode_params());
    payload.into()
}

pub(crate) type FeedSender = mpsc::UnboundedSender<Result<Log, RemoteError>>;

pub(crate) struct MockBackend {
    pub replies: Mutex<VecDeque<Result<Bytes, RemoteError>>>,
    pub calls: Mutex<Vec<CallRequest>>,
    pub nonce: u64,
    pub gas_price: u128,
    pub fees: Option<Eip1559Fees>,
    pub gas_estimate: Result<u64, RemoteError>,
    pub chain_id: u64,
    pub send_error: Option<RemoteError>,
    pub sent: Mutex<Vec<Bytes>>,
    pub nonce_queries: Mutex<u32>,
    pub history: Vec<Log>,
    pub filters: Mutex<Vec<LogFilter>>,
    /// Apply log filters like a node would; off simulates a node that
    /// returns everything
    pub honor_filters: bool,
    feed: Mutex<Option<mpsc::UnboundedReceiver<Result<Log, RemoteError>>>>,
    pub unsubscribed: Arc<AtomicBool>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            nonce: 7,
            gas_price: 20_000_000_000,
            fees: Some(Eip1559Fees {
                max_fee_per_gas: 30_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
            }),
            gas_estimate: Ok(51_000),
            chain_id: 31337,
            send_error: None,
            sent: Mutex::new(Vec::new()),
            nonce_queries: Mutex::new(0),
            history: Vec::new(),
            filters: Mutex::new(Vec::new()),
            honor_filters: true,
            feed: Mutex::new(None),
            unsubscribed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_reply(self, reply: Result<Bytes, RemoteError>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn ignoring_filters(mut self) -> Self {
        self.honor_filters = false;
        self
    }

    pub fn with_history(mut self, logs: Vec<Log>) -> Self {
        self.history = logs;
        self
    }

    /// Attach a live feed; logs pushed into the returned sender are delivered
    /// to the next subscription, dropping it ends the feed.
    pub fn with_feed(self) -> (Self, FeedSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock().unwrap() = Some(rx);
        (self, tx)
    }
}

struct FeedGuard(Arc<AtomicBool>);

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContractCaller for MockBackend {
    async fn call(&self, request: &CallRequest) -> Result<Bytes, RemoteError> {
        self.calls.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Bytes::new()))
    }
}

#[async_trait]
impl ContractTransactor for MockBackend {
    async fn pending_nonce(&self, _address: Address) -> Result<u64, RemoteError> {
        *self.nonce_queries.lock().unwrap() += 1;
        Ok(self.nonce)
    }

    async fn gas_price(&self) -> Result<u128, RemoteError> {
        Ok(self.gas_price)
    }

    async fn fee_estimate(&self) -> Result<Option<Eip1559Fees>, RemoteError> {
        Ok(self.fees)
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RemoteError> {
        self.calls.lock().unwrap().push(request.clone());
        self.gas_estimate.clone()
    }

    async fn chain_id(&self) -> Result<u64, RemoteError> {
        Ok(self.chain_id)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RemoteError> {
        if let Some(err) = &self.send_error {
            return Err(err.clone());
        }
        self.sent.lock().unwrap().push(Bytes::copy_from_slice(raw));
        Ok(keccak256(raw))
    }
}

#[async_trait]
impl ContractFilterer for MockBackend {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RemoteError> {
        self.filters.lock().unwrap().push(filter.clone());
        Ok(self
            .history
            .iter()
            .filter(|log| !self.honor_filters || (filter.matches(log) && in_range(filter, log)))
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream, RemoteError> {
        self.filters.lock().unwrap().push(filter.clone());
        let rx = self
            .feed
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| RemoteError::Transport("subscriptions not supported".into()))?;

        let guard = FeedGuard(self.unsubscribed.clone());
        let honor_filters = self.honor_filters;
        let filter = filter.clone();
        let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|item| (item, (rx, guard)))
        })
        .filter(move |item| {
            let keep = match item {
                Ok(log) => !honor_filters || filter.matches(log),
                Err(_) => true,
            };
            futures::future::ready(keep)
        });
        Ok(stream.boxed())
    }
}

fn in_range(filter: &LogFilter, log: &Log) -> bool {
    log.block_number.map_or(true, |block| {
        filter.from_block.map_or(true, |from| block >= from)
            && filter.to_block.map_or(true, |to| block <= to)
    })
}
