//! Contract bindings: an address plus its ABI, bound to a backend.
//!
//! `BoundContract<B>` only grows `call`, `transact`, `filter` and `watch` when
//! `B` provides the matching capability; those live next to their capability
//! in `caller`, `transactor`, `filterer` and `iterator`.

use alloy::{
    dyn_abi::DynSolValue,
    json_abi::{Event, Function, JsonAbi},
    primitives::{Address, TxHash},
};
use std::{fmt, sync::Arc};
use tracing::debug;

use super::{
    backend::{ContractCaller, ContractTransactor},
    caller::CallOpts,
    codec,
    error::{ContractError, RemoteError, RevertReason},
    transactor::TransactOpts,
    DecodedEvent, Log, LogFilter, TransactionHandle,
};

/// Immutable identity of a deployed contract.
#[derive(Debug, Clone)]
pub struct ContractDescriptor {
    address: Address,
    abi: Arc<JsonAbi>,
}

impl ContractDescriptor {
    pub fn new(address: Address, abi: JsonAbi) -> Self {
        Self {
            address,
            abi: Arc::new(abi),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// Same ABI at another address.
    pub fn at(&self, address: Address) -> Self {
        Self {
            address,
            abi: self.abi.clone(),
        }
    }

    /// Find a method by bare name or full signature (`transfer(address,uint256)`).
    /// Overloads sharing a bare name are told apart by `arity` when given.
    pub fn method(&self, name: &str, arity: Option<usize>) -> Result<&Function, ContractError> {
        if name.contains('(') {
            let wanted: String = name.chars().filter(|c| !c.is_whitespace()).collect();
            return self
                .abi
                .functions()
                .find(|f| f.signature() == wanted)
                .ok_or_else(|| self.unknown_method(name));
        }

        let overloads = self
            .abi
            .function(name)
            .filter(|overloads| !overloads.is_empty())
            .ok_or_else(|| self.unknown_method(name))?;

        if let [only] = overloads.as_slice() {
            return Ok(only);
        }

        let matching: Vec<&Function> = match arity {
            Some(arity) => overloads.iter().filter(|f| f.inputs.len() == arity).collect(),
            None => overloads.iter().collect(),
        };
        match matching.as_slice() {
            [only] => Ok(only),
            _ => Err(ContractError::AmbiguousMethod {
                name: name.to_string(),
                candidates: overloads.iter().map(|f| f.signature()).collect(),
            }),
        }
    }

    /// Find an event by bare name or full signature.
    pub fn event(&self, name: &str) -> Result<&Event, ContractError> {
        if name.contains('(') {
            let wanted: String = name.chars().filter(|c| !c.is_whitespace()).collect();
            return self
                .abi
                .events()
                .find(|e| e.signature() == wanted)
                .ok_or_else(|| ContractError::UnknownEvent(name.to_string()));
        }

        match self.abi.event(name).map(Vec::as_slice) {
            Some([only]) => Ok(only),
            Some([_, _, ..]) => Err(ContractError::UnknownEvent(format!(
                "{} (overloaded, use a full signature)",
                name
            ))),
            _ => Err(ContractError::UnknownEvent(name.to_string())),
        }
    }

    fn unknown_method(&self, name: &str) -> ContractError {
        let available: Vec<String> = self.abi.functions().map(|f| f.signature()).collect();
        if available.is_empty() {
            ContractError::UnknownMethod(format!("{} (the ABI declares no functions)", name))
        } else {
            ContractError::UnknownMethod(format!(
                "{} (available: {})",
                name,
                available.join(", ")
            ))
        }
    }

    /// Build the log filter for `event` with the given indexed constraints.
    pub(crate) fn log_filter(
        &self,
        event: &Event,
        constraints: &[Option<Vec<DynSolValue>>],
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<LogFilter, ContractError> {
        let topics = codec::topic_filter(event, constraints)?;
        debug!(
            address = %self.address,
            event = %event.signature(),
            slots = topics.len(),
            ?from_block,
            ?to_block,
            "built log filter"
        );
        Ok(LogFilter {
            address: self.address,
            topics,
            from_block,
            to_block,
        })
    }

    /// Decode a backend revert payload against this contract's custom errors.
    pub(crate) fn upgrade_revert(&self, err: RemoteError) -> RemoteError {
        match err {
            RemoteError::Reverted(RevertReason::Opaque(data)) => {
                RemoteError::Reverted(codec::decode_revert(&self.abi, &data))
            }
            other => other,
        }
    }
}

/// A contract bound to a backend. Cloning shares the backend.
pub struct BoundContract<B> {
    descriptor: ContractDescriptor,
    backend: Arc<B>,
}

impl<B> Clone for BoundContract<B> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            backend: self.backend.clone(),
        }
    }
}

impl<B> fmt::Debug for BoundContract<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundContract")
            .field("address", &self.descriptor.address)
            .finish_non_exhaustive()
    }
}

impl<B> BoundContract<B> {
    pub fn new(address: Address, abi: JsonAbi, backend: B) -> Self {
        Self::from_descriptor(ContractDescriptor::new(address, abi), Arc::new(backend))
    }

    pub fn from_descriptor(descriptor: ContractDescriptor, backend: Arc<B>) -> Self {
        Self {
            descriptor,
            backend,
        }
    }

    pub fn address(&self) -> Address {
        self.descriptor.address
    }

    pub fn descriptor(&self) -> &ContractDescriptor {
        &self.descriptor
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Decode one log as `event`. Unlike a filter batch, a log belonging to
    /// another event is reported as `TopicMismatch`.
    pub fn parse_log(&self, event: &str, log: &Log) -> Result<DecodedEvent, ContractError> {
        let event = self.descriptor.event(event)?;
        codec::decode_log(event, log)
    }

    /// Preset options for repeated calls and transactions.
    pub fn session(&self, call_opts: CallOpts, transact_opts: TransactOpts) -> Session<B> {
        Session {
            contract: self.clone(),
            call_opts,
            transact_opts,
        }
    }
}

/// A bound contract with fixed call and transaction options.
pub struct Session<B> {
    pub contract: BoundContract<B>,
    pub call_opts: CallOpts,
    pub transact_opts: TransactOpts,
}

impl<B: ContractCaller> Session<B> {
    pub async fn call(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, ContractError> {
        self.contract.call(&self.call_opts, method, args).await
    }
}

impl<B: ContractTransactor> Session<B> {
    pub async fn transact(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<TransactionHandle, ContractError> {
        self.contract.transact(&self.transact_opts, method, args).await
    }

    pub async fn transfer(&self) -> Result<TransactionHandle, ContractError> {
        self.contract.transfer(&self.transact_opts).await
    }
}

impl<B> fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("contract", &self.contract)
            .field("call_opts", &self.call_opts)
            .field("transact_opts", &self.transact_opts)
            .finish()
    }
}

/// Compact log line for a submitted transaction.
pub(crate) fn describe(hash: &TxHash, to: Option<Address>) -> String {
    match to {
        Some(to) => format!("{} -> {}", hash, to),
        None => format!("{} (contract creation)", hash),
    }
}
