use alloy::{
    dyn_abi::{DynSolType, DynSolValue, Specifier},
    json_abi::{Event, EventParam, Param},
    primitives::{Address, U256},
};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::str::FromStr;

use super::BlockTag;

/// Validates and normalizes an Ethereum address
pub fn validate_address(address: &str) -> Result<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(anyhow!("Address cannot be empty"));
    }

    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(anyhow!(
            "Invalid address format: '{}'. Ethereum addresses must start with '0x'",
            address
        ));
    }

    if address.len() != 42 {
        return Err(anyhow!(
            "Invalid address length: '{}'. Ethereum addresses must be exactly 42 characters (0x + 40 hex characters)",
            address
        ));
    }

    let hex_part = &address[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "Invalid address format: '{}'. Contains non-hexadecimal characters",
            address
        ));
    }

    Address::from_str(address)
        .map_err(|e| anyhow!("Invalid Ethereum address: '{}'. Error: {}", address, e))
}

/// Parses a wei amount given in decimal or `0x` hex
pub fn parse_amount(value_str: &str) -> Result<U256> {
    let value_str = value_str.trim();
    if value_str.is_empty() {
        return Err(anyhow!("Value cannot be empty"));
    }

    if let Some(hex) = value_str
        .strip_prefix("0x")
        .or_else(|| value_str.strip_prefix("0X"))
    {
        U256::from_str_radix(hex, 16)
            .map_err(|_| anyhow!("Invalid hexadecimal value: '{}'", value_str))
    } else {
        U256::from_str(value_str).map_err(|_| {
            anyhow!(
                "Invalid numeric value: '{}'. Use decimal format or '0x' prefixed hex",
                value_str
            )
        })
    }
}

/// Parses `latest`, `pending` or a block number
pub fn parse_block_tag(block: &str) -> Result<BlockTag> {
    match block.trim() {
        "latest" => Ok(BlockTag::Latest),
        "pending" => Ok(BlockTag::Pending),
        number => parse_amount(number)
            .ok()
            .and_then(|n| u64::try_from(n).ok())
            .map(BlockTag::Number)
            .ok_or_else(|| {
                anyhow!(
                    "Invalid block '{}'. Use 'latest', 'pending' or a block number",
                    block
                )
            }),
    }
}

/// Parses textual arguments according to the declared parameter types
pub fn parse_arguments(params: &[Param], args: &[String]) -> Result<Vec<DynSolValue>> {
    if params.len() != args.len() {
        let expected: Vec<String> = params
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect();
        return Err(anyhow!(
            "Parameter count mismatch: expected {} parameters, got {}.\nExpected parameters: [{}]",
            params.len(),
            args.len(),
            expected.join(", ")
        ));
    }

    params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(i, (param, arg))| {
            let ty: DynSolType = param
                .resolve()
                .map_err(|e| anyhow!("Unsupported type '{}': {}", param.ty, e))?;
            ty.coerce_str(arg).map_err(|e| {
                anyhow!(
                    "Invalid parameter #{} ('{}' of type '{}'): {}",
                    i + 1,
                    param.name,
                    param.ty,
                    e
                )
            })
        })
        .collect()
}

/// Parses an indexed-parameter constraint: `*` matches anything, otherwise a
/// comma separated list of allowed values
pub fn parse_constraint<S: Specifier<DynSolType>>(
    name: &str,
    param: &S,
    raw: &str,
) -> Result<Option<Vec<DynSolValue>>> {
    let raw = raw.trim();
    if raw == "*" || raw.is_empty() {
        return Ok(None);
    }
    let ty: DynSolType = param
        .resolve()
        .map_err(|e| anyhow!("Unsupported type of '{}': {}", name, e))?;
    raw.split(',')
        .map(|value| {
            ty.coerce_str(value.trim())
                .map_err(|e| anyhow!("Invalid filter value for '{}': {}", name, e))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Builds per-slot constraints for the indexed parameters of `event` from
/// `name=value[,value..]` clauses. Unnamed parameters are addressed by their
/// position among the indexed ones.
pub fn parse_constraints(event: &Event, clauses: &[String]) -> Result<Vec<Option<Vec<DynSolValue>>>> {
    let indexed: Vec<&EventParam> = event.inputs.iter().filter(|p| p.indexed).collect();
    let mut constraints = vec![None; indexed.len()];

    for clause in clauses {
        let (name, values) = clause
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid filter '{}'. Expected 'param=value[,value..]'", clause))?;
        let name = name.trim();
        let slot = indexed
            .iter()
            .position(|p| p.name == name)
            .or_else(|| name.parse::<usize>().ok().filter(|i| *i < indexed.len()))
            .ok_or_else(|| {
                let names: Vec<&str> = indexed.iter().map(|p| p.name.as_str()).collect();
                anyhow!(
                    "'{}' is not an indexed parameter of {}. Indexed parameters: [{}]",
                    name,
                    event.name,
                    names.join(", ")
                )
            })?;
        constraints[slot] = parse_constraint(name, indexed[slot], values)?;
    }

    Ok(constraints)
}

/// Convert DynSolValue to JSON
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Uint(num, _) => Value::String(num.to_string()),
        DynSolValue::Int(num, _) => Value::String(num.to_string()),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        other => Value::String(format!("0x{}", hex::encode(other.abi_encode_packed()))),
    }
}

/// Convert a list of return values; a single value is unwrapped
pub fn values_to_json(values: &[DynSolValue]) -> Value {
    match values {
        [single] => value_to_json(single),
        values => Value::Array(values.iter().map(value_to_json).collect()),
    }
}

/// Creates user-friendly error messages for common RPC errors
pub fn interpret_rpc_error(error: &str) -> String {
    if error.contains("insufficient funds") {
        "Insufficient funds to cover gas costs. Make sure the account has enough ETH for gas fees.".to_string()
    } else if error.contains("connection refused") || error.contains("network unreachable") {
        "Cannot connect to RPC endpoint. Check your internet connection and RPC URL configuration.".to_string()
    } else if error.contains("timeout") || error.contains("timed out") {
        "Request timed out. The RPC endpoint may be overloaded or unreachable.".to_string()
    } else if error.contains("rate limit") || error.contains("429") {
        "Too many requests to the RPC endpoint. Try again in a few moments or use a different endpoint.".to_string()
    } else if error.contains("method not found") {
        "The requested method is not supported by this RPC endpoint. Subscriptions need a WebSocket or IPC endpoint.".to_string()
    } else {
        error.to_string()
    }
}

/// Creates user-friendly error messages for ABI-related errors
pub fn interpret_abi_error(error: &str, contract_address: &str) -> String {
    if error.contains("404") || error.contains("not verified") || error.contains("not found") {
        format!(
            "Contract verification not found: The contract at {} is not verified on the block explorer. Pass --abi with a local ABI file instead.",
            contract_address
        )
    } else if error.contains("rate limit") || error.contains("429") {
        "API rate limit: Too many requests to the block explorer API. Try again in a few moments or provide your own ETHERSCAN_API_KEY.".to_string()
    } else if error.contains("invalid API key") || error.contains("403") {
        "API authentication error: Invalid explorer API key. Check your ETHERSCAN_API_KEY environment variable.".to_string()
    } else if error.contains("timeout") {
        "Timeout error: Request to the block explorer API timed out. Try again in a few moments."
            .to_string()
    } else {
        format!("ABI resolution error: {}", error)
    }
}
