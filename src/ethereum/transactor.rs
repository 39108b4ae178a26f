use alloy::{
    dyn_abi::DynSolValue,
    json_abi::JsonAbi,
    primitives::{keccak256, Address, Bytes, U256},
};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

use super::{
    backend::ContractTransactor,
    codec,
    contract::{describe, BoundContract, ContractDescriptor},
    error::{ContractError, SignerError},
    signer::TransactionSigner,
    BlockTag, CallRequest, GasPricing, TransactionHandle, UnsignedTransaction,
};

/// Options for state-changing transactions. Unset fields are resolved from
/// the node at submission time.
#[derive(Clone)]
pub struct TransactOpts {
    pub from: Address,
    pub signer: Arc<dyn TransactionSigner>,
    pub value: U256,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    /// Forces a legacy transaction when set
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    /// Sign but don't submit
    pub no_send: bool,
}

impl TransactOpts {
    pub fn new(from: Address, signer: Arc<dyn TransactionSigner>) -> Self {
        Self {
            from,
            signer,
            value: U256::ZERO,
            nonce: None,
            gas_limit: None,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            no_send: false,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn with_eip1559_fees(mut self, max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Self {
        self.max_fee_per_gas = Some(max_fee_per_gas);
        self.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
        self
    }

    pub fn no_send(mut self) -> Self {
        self.no_send = true;
        self
    }
}

impl fmt::Debug for TransactOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactOpts")
            .field("from", &self.from)
            .field("value", &self.value)
            .field("nonce", &self.nonce)
            .field("gas_limit", &self.gas_limit)
            .field("gas_price", &self.gas_price)
            .field("max_fee_per_gas", &self.max_fee_per_gas)
            .field("max_priority_fee_per_gas", &self.max_priority_fee_per_gas)
            .field("no_send", &self.no_send)
            .finish_non_exhaustive()
    }
}

impl<B: ContractTransactor> BoundContract<B> {
    /// Invoke a state-changing method. Returns once the node accepted the
    /// transaction, without waiting for inclusion.
    pub async fn transact(
        &self,
        opts: &TransactOpts,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<TransactionHandle, ContractError> {
        let function = self.descriptor().method(method, Some(args.len()))?;
        let data = codec::encode_call(function, args)?;
        self.transact_raw(opts, data.into()).await
    }

    /// Send plain value to the contract, triggering its receive or fallback
    /// function.
    pub async fn transfer(&self, opts: &TransactOpts) -> Result<TransactionHandle, ContractError> {
        self.transact_raw(opts, Bytes::new()).await
    }

    /// Transact with pre-encoded call data.
    pub async fn transact_raw(
        &self,
        opts: &TransactOpts,
        data: Bytes,
    ) -> Result<TransactionHandle, ContractError> {
        submit(self.backend(), self.descriptor(), opts, Some(self.address()), data).await
    }
}

/// Deploy a contract: `bytecode` followed by the encoded constructor
/// arguments. Returns the address the contract will live at, the creation
/// transaction and a binding to that address.
pub async fn deploy<B: ContractTransactor>(
    backend: Arc<B>,
    abi: JsonAbi,
    bytecode: &[u8],
    args: &[DynSolValue],
    opts: &TransactOpts,
) -> Result<(Address, TransactionHandle, BoundContract<B>), ContractError> {
    let mut data = bytecode.to_vec();
    match abi.constructor() {
        Some(constructor) => data.extend(codec::encode_arguments(&constructor.inputs, args)?),
        None if !args.is_empty() => {
            return Err(ContractError::Encoding(format!(
                "contract has no constructor but {} arguments were given",
                args.len()
            )))
        }
        None => {}
    }

    let descriptor = ContractDescriptor::new(Address::ZERO, abi);
    let handle = submit(backend.as_ref(), &descriptor, opts, None, data.into()).await?;

    let address = opts.from.create(handle.nonce);
    info!(%address, nonce = handle.nonce, "contract deployment submitted");

    let contract = BoundContract::from_descriptor(descriptor.at(address), backend);
    Ok((address, handle, contract))
}

async fn submit<B: ContractTransactor + ?Sized>(
    backend: &B,
    descriptor: &ContractDescriptor,
    opts: &TransactOpts,
    to: Option<Address>,
    data: Bytes,
) -> Result<TransactionHandle, ContractError> {
    // fail before touching the node if the sender can't sign
    if !opts.signer.has_key(opts.from) {
        return Err(SignerError::UnknownKey(opts.from).into());
    }

    let nonce = match opts.nonce {
        Some(nonce) => nonce,
        None => backend.pending_nonce(opts.from).await?,
    };

    let pricing = resolve_pricing(backend, opts).await?;

    let gas_limit = match opts.gas_limit {
        Some(gas_limit) => gas_limit,
        None => {
            let request = CallRequest {
                from: Some(opts.from),
                to,
                data: data.clone(),
                value: opts.value,
                block: BlockTag::Pending,
            };
            backend
                .estimate_gas(&request)
                .await
                .map_err(|e| descriptor.upgrade_revert(e))?
        }
    };

    let chain_id = backend.chain_id().await?;
    debug!(from = %opts.from, nonce, gas_limit, chain_id, ?pricing, "resolved transaction");

    let tx = UnsignedTransaction {
        from: opts.from,
        to,
        data,
        value: opts.value,
        nonce,
        gas_limit,
        chain_id,
        pricing,
    };
    let raw = opts.signer.sign_transaction(tx).await?;
    let local_hash = keccak256(&raw);

    if opts.no_send {
        debug!(hash = %local_hash, "signed without sending");
        return Ok(TransactionHandle {
            hash: local_hash,
            from: opts.from,
            to,
            nonce,
            raw,
            submitted: false,
        });
    }

    let hash = backend.send_raw_transaction(&raw).await?;
    if hash != local_hash {
        warn!(node = %hash, local = %local_hash, "node reported an unexpected transaction hash");
    }
    info!("transaction submitted: {}", describe(&hash, to));

    Ok(TransactionHandle {
        hash,
        from: opts.from,
        to,
        nonce,
        raw,
        submitted: true,
    })
}

async fn resolve_pricing<B: ContractTransactor + ?Sized>(
    backend: &B,
    opts: &TransactOpts,
) -> Result<GasPricing, ContractError> {
    if let Some(gas_price) = opts.gas_price {
        return Ok(GasPricing::Legacy { gas_price });
    }

    if let (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) =
        (opts.max_fee_per_gas, opts.max_priority_fee_per_gas)
    {
        return Ok(GasPricing::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        });
    }

    match backend.fee_estimate().await? {
        Some(estimate) => {
            let max_priority_fee_per_gas = opts
                .max_priority_fee_per_gas
                .unwrap_or(estimate.max_priority_fee_per_gas);
            // the tip can never exceed the fee cap
            let max_fee_per_gas = opts
                .max_fee_per_gas
                .unwrap_or(estimate.max_fee_per_gas)
                .max(max_priority_fee_per_gas);
            Ok(GasPricing::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            })
        }
        None => Ok(GasPricing::Legacy {
            gas_price: backend.gas_price().await?,
        }),
    }
}
