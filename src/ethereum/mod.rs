pub mod abi;
pub mod backend;
pub mod caller;
pub mod codec;
pub mod contract;
pub mod error;
pub mod filterer;
pub mod iterator;
pub mod provider;
pub mod signer;
pub mod transactor;
pub mod utils;

#[cfg(test)]
pub(crate) mod mock;

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, TxHash, B256, U256},
};
use serde::{Deserialize, Serialize};

pub use backend::{
    Composite, ContractCaller, ContractFilterer, ContractTransactor, Eip1559Fees, LogStream,
    Unavailable,
};
pub use caller::CallOpts;
pub use contract::{BoundContract, ContractDescriptor, Session};
pub use error::{ContractError, RemoteError, RevertReason, SignerError};
pub use filterer::{EventBatch, FilterOpts};
pub use iterator::{IteratorCloser, IteratorState, LogIterator, WatchOpts};
pub use transactor::{deploy, TransactOpts};

/// Block context a read-only call executes against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockTag {
    #[default]
    Latest,
    Pending,
    Number(u64),
}

/// A read-only call as handed to the node.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub from: Option<Address>,
    /// `None` only when estimating gas for a contract creation
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub block: BlockTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPricing {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

/// A fully resolved transaction waiting for a signature.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    pub from: Address,
    /// `None` creates a contract
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub nonce: u64,
    pub gas_limit: u64,
    pub chain_id: u64,
    pub pricing: GasPricing,
}

/// Handle for a signed (and usually submitted) transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionHandle {
    pub hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub nonce: u64,
    pub raw: Bytes,
    pub submitted: bool,
}

/// Log filter with up to four topic slots; `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<Option<Vec<B256>>>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogFilter {
    /// Whether a log satisfies the address and topic constraints. Block range is
    /// the node's business.
    pub fn matches(&self, log: &Log) -> bool {
        if log.address != self.address {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, slot)| match slot {
            None => true,
            Some(allowed) => log.topics.get(i).is_some_and(|t| allowed.contains(t)),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub transaction_hash: Option<TxHash>,
    pub transaction_index: Option<u64>,
    pub log_index: Option<u64>,
    /// Set when the node re-reports a log dropped by a reorg
    pub removed: bool,
}

impl From<alloy::rpc::types::Log> for Log {
    fn from(log: alloy::rpc::types::Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number,
            block_hash: log.block_hash,
            transaction_hash: log.transaction_hash,
            transaction_index: log.transaction_index,
            log_index: log.log_index,
            removed: log.removed,
        }
    }
}

/// An event decoded against its ABI description.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    pub fields: Vec<(String, DynSolValue)>,
    pub raw: Log,
}

impl DecodedEvent {
    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}
