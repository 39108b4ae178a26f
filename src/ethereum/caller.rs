use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, U256},
};
use tracing::debug;

use super::{
    backend::ContractCaller, codec, contract::BoundContract, error::ContractError, BlockTag,
    CallRequest,
};

/// Options for read-only calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOpts {
    pub from: Option<Address>,
    pub block: BlockTag,
}

impl CallOpts {
    /// Execute against the pending state.
    pub fn pending() -> Self {
        Self {
            block: BlockTag::Pending,
            ..Self::default()
        }
    }

    pub fn at_block(number: u64) -> Self {
        Self {
            block: BlockTag::Number(number),
            ..Self::default()
        }
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

impl<B: ContractCaller> BoundContract<B> {
    /// Invoke a read-only method and decode its return values.
    pub async fn call(
        &self,
        opts: &CallOpts,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, ContractError> {
        let function = self.descriptor().method(method, Some(args.len()))?;
        let data = codec::encode_call(function, args)?;
        let reply = self.call_raw(opts, data.into()).await?;
        codec::decode_reply(function, &reply)
    }

    /// Issue a call with pre-encoded data and return the raw reply.
    pub async fn call_raw(&self, opts: &CallOpts, data: Bytes) -> Result<Bytes, ContractError> {
        let request = CallRequest {
            from: opts.from,
            to: Some(self.address()),
            data,
            value: U256::ZERO,
            block: opts.block,
        };
        debug!(to = %self.address(), block = ?opts.block, "eth_call");

        self.backend()
            .call(&request)
            .await
            .map_err(|e| self.descriptor().upgrade_revert(e).into())
    }
}
