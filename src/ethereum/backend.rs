//! Node capabilities the contract runtime is built on. Each capability is its
//! own trait so a binding can be wired with only the ones it needs.

use alloy::primitives::{Address, Bytes, TxHash};
use async_trait::async_trait;
use futures::stream::BoxStream;

use super::{error::RemoteError, CallRequest, Log, LogFilter};

/// Live feed of logs; ends (or yields an error) when the transport drops it.
pub type LogStream = BoxStream<'static, Result<Log, RemoteError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eip1559Fees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Read-only calls.
#[async_trait]
pub trait ContractCaller: Send + Sync {
    /// `eth_call`. A revert comes back as `RemoteError::Reverted` with the raw
    /// payload in `RevertReason::Opaque`.
    async fn call(&self, request: &CallRequest) -> Result<Bytes, RemoteError>;
}

/// Everything needed to price, sign and submit a transaction.
#[async_trait]
pub trait ContractTransactor: Send + Sync {
    async fn pending_nonce(&self, address: Address) -> Result<u64, RemoteError>;

    async fn gas_price(&self) -> Result<u128, RemoteError>;

    /// `None` when the chain has no EIP-1559 fee market.
    async fn fee_estimate(&self) -> Result<Option<Eip1559Fees>, RemoteError>;

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RemoteError>;

    async fn chain_id(&self) -> Result<u64, RemoteError>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RemoteError>;
}

/// Historical and live log access.
#[async_trait]
pub trait ContractFilterer: Send + Sync {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RemoteError>;

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream, RemoteError>;
}

/// Placeholder for a capability that was not wired into a [`Composite`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

/// A backend assembled from separately provided capabilities. Slots filled
/// with [`Unavailable`] simply don't implement the matching trait.
#[derive(Debug, Clone, Default)]
pub struct Composite<C = Unavailable, T = Unavailable, F = Unavailable> {
    pub caller: C,
    pub transactor: T,
    pub filterer: F,
}

impl<C> Composite<C> {
    pub fn caller_only(caller: C) -> Self {
        Self {
            caller,
            transactor: Unavailable,
            filterer: Unavailable,
        }
    }
}

impl<C, T, F> Composite<C, T, F> {
    pub fn new(caller: C, transactor: T, filterer: F) -> Self {
        Self {
            caller,
            transactor,
            filterer,
        }
    }
}

#[async_trait]
impl<C, T, F> ContractCaller for Composite<C, T, F>
where
    C: ContractCaller,
    T: Send + Sync,
    F: Send + Sync,
{
    async fn call(&self, request: &CallRequest) -> Result<Bytes, RemoteError> {
        self.caller.call(request).await
    }
}

#[async_trait]
impl<C, T, F> ContractTransactor for Composite<C, T, F>
where
    C: Send + Sync,
    T: ContractTransactor,
    F: Send + Sync,
{
    async fn pending_nonce(&self, address: Address) -> Result<u64, RemoteError> {
        self.transactor.pending_nonce(address).await
    }

    async fn gas_price(&self) -> Result<u128, RemoteError> {
        self.transactor.gas_price().await
    }

    async fn fee_estimate(&self) -> Result<Option<Eip1559Fees>, RemoteError> {
        self.transactor.fee_estimate().await
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RemoteError> {
        self.transactor.estimate_gas(request).await
    }

    async fn chain_id(&self) -> Result<u64, RemoteError> {
        self.transactor.chain_id().await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RemoteError> {
        self.transactor.send_raw_transaction(raw).await
    }
}

#[async_trait]
impl<C, T, F> ContractFilterer for Composite<C, T, F>
where
    C: Send + Sync,
    T: Send + Sync,
    F: ContractFilterer,
{
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RemoteError> {
        self.filterer.get_logs(filter).await
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream, RemoteError> {
        self.filterer.subscribe_logs(filter).await
    }
}
