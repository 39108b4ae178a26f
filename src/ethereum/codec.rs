//! ABI encoding and decoding for calls, replies, event logs and revert payloads.
//!
//! Word-level layout is delegated to alloy's dynamic ABI types; this module owns
//! argument validation, topic construction and the error taxonomy.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, Specifier},
    json_abi::{Event, Function, JsonAbi, Param},
    primitives::{keccak256, Bytes, B256, I256, U256},
};
use tracing::debug;

use super::{
    error::{ContractError, RevertReason},
    DecodedEvent, Log,
};

/// `bytes4(keccak256("Error(string)"))`
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `bytes4(keccak256("Panic(uint256)"))`
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

pub const MAX_TOPICS: usize = 4;

/// Encode `selector || arguments` for a method call.
pub fn encode_call(method: &Function, args: &[DynSolValue]) -> Result<Vec<u8>, ContractError> {
    if args.len() != method.inputs.len() {
        return Err(ContractError::Encoding(format!(
            "method '{}' expects {} arguments, got {}",
            method.signature(),
            method.inputs.len(),
            args.len()
        )));
    }

    let encoded = encode_arguments(&method.inputs, args)?;
    let selector = method.selector();

    let mut data = Vec::with_capacity(4 + encoded.len());
    data.extend_from_slice(selector.as_slice());
    data.extend_from_slice(&encoded);

    debug!(method = %method.signature(), %selector, len = data.len(), "encoded call");
    Ok(data)
}

/// Encode arguments without a selector (constructor arguments).
pub fn encode_arguments(params: &[Param], args: &[DynSolValue]) -> Result<Vec<u8>, ContractError> {
    if args.len() != params.len() {
        return Err(ContractError::Encoding(format!(
            "expected {} arguments, got {}",
            params.len(),
            args.len()
        )));
    }

    let mut values = Vec::with_capacity(args.len());
    for (i, (param, arg)) in params.iter().zip(args).enumerate() {
        let value = resolve(param)
            .and_then(|ty| coerce(&ty, arg))
            .map_err(|reason| {
                ContractError::Encoding(format!(
                    "argument #{} ('{}' of type '{}'): {}",
                    i + 1,
                    param.name,
                    param.selector_type(),
                    reason
                ))
            })?;
        values.push(value);
    }

    Ok(DynSolValue::Tuple(values).abi_encode_params())
}

/// Decode the return values of `method` from a call reply.
pub fn decode_reply(method: &Function, data: &[u8]) -> Result<Vec<DynSolValue>, ContractError> {
    if method.outputs.is_empty() {
        return Ok(Vec::new());
    }
    if data.is_empty() {
        return Err(ContractError::Decoding(format!(
            "empty reply for '{}': no contract code at address, or the method does not exist",
            method.signature()
        )));
    }

    let types = method
        .outputs
        .iter()
        .map(resolve)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ContractError::Decoding)?;

    decode_sequence(types, data).map_err(|e| {
        ContractError::Decoding(format!(
            "reply of '{}' ({} bytes): {}",
            method.signature(),
            data.len(),
            e
        ))
    })
}

/// topic[0] of a non-anonymous event.
pub fn topic_for_event(event: &Event) -> B256 {
    event.selector()
}

/// Encode one indexed argument into its topic word. Dynamic and composite
/// values are hashed, so they can only be matched, not recovered.
pub fn encode_indexed_arg(ty: &DynSolType, value: &DynSolValue) -> Result<B256, ContractError> {
    let value = coerce(ty, value).map_err(|reason| {
        ContractError::Encoding(format!("indexed value of type '{}': {}", ty.sol_type_name(), reason))
    })?;

    let topic = match &value {
        DynSolValue::String(s) => keccak256(s.as_bytes()),
        DynSolValue::Bytes(b) => keccak256(b),
        v if is_hashed(ty) => {
            let mut preimage = Vec::new();
            topic_preimage(v, &mut preimage)
                .map_err(|reason| ContractError::Encoding(format!("indexed value: {}", reason)))?;
            keccak256(preimage)
        }
        v => v.as_word().ok_or_else(|| {
            ContractError::Encoding(format!("'{}' cannot be used as a topic", ty.sol_type_name()))
        })?,
    };
    Ok(topic)
}

/// In-place encoding hashed into the topic of an indexed array or struct:
/// value types take one word, `string`/`bytes` their content right-padded to
/// a word boundary, composites the concatenation of their elements.
fn topic_preimage(value: &DynSolValue, out: &mut Vec<u8>) -> Result<(), String> {
    match value {
        DynSolValue::String(s) => pad_right(s.as_bytes(), out),
        DynSolValue::Bytes(b) => pad_right(b, out),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            for item in items {
                topic_preimage(item, out)?;
            }
        }
        v => {
            let word = v
                .as_word()
                .ok_or_else(|| "value has no word representation".to_string())?;
            out.extend_from_slice(word.as_slice());
        }
    }
    Ok(())
}

fn pad_right(data: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(data);
    let rem = data.len() % 32;
    if rem != 0 {
        out.resize(out.len() + 32 - rem, 0);
    }
}

/// Build the topic slots of a log filter for `event`. Each constraint is either
/// `None` (any value) or the allowed values for that indexed parameter.
pub fn topic_filter(
    event: &Event,
    constraints: &[Option<Vec<DynSolValue>>],
) -> Result<Vec<Option<Vec<B256>>>, ContractError> {
    let indexed: Vec<_> = event.inputs.iter().filter(|p| p.indexed).collect();
    if constraints.len() > indexed.len() {
        return Err(ContractError::Encoding(format!(
            "event '{}' has {} indexed parameters, got {} constraints",
            event.name,
            indexed.len(),
            constraints.len()
        )));
    }

    let mut topics = Vec::with_capacity(MAX_TOPICS);
    if !event.anonymous {
        topics.push(Some(vec![topic_for_event(event)]));
    }

    for (param, constraint) in indexed.iter().zip(constraints) {
        let slot = match constraint {
            Some(values) if !values.is_empty() => {
                let ty = resolve(*param).map_err(ContractError::Encoding)?;
                let words = values
                    .iter()
                    .map(|value| encode_indexed_arg(&ty, value))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| match e {
                        ContractError::Encoding(reason) => ContractError::Encoding(format!(
                            "filter on '{}': {}",
                            param.name, reason
                        )),
                        other => other,
                    })?;
                Some(words)
            }
            _ => None,
        };
        topics.push(slot);
    }

    if topics.len() > MAX_TOPICS {
        return Err(ContractError::Encoding(format!(
            "event '{}' needs {} topic slots, logs carry at most {}",
            event.name,
            topics.len(),
            MAX_TOPICS
        )));
    }

    while matches!(topics.last(), Some(None)) {
        topics.pop();
    }
    Ok(topics)
}

/// Check a log against filter topic slots. A slot that doesn't match yields
/// `TopicMismatch` with the first allowed value as the expectation.
pub fn check_topics(topics: &[Option<Vec<B256>>], log: &Log) -> Result<(), ContractError> {
    for (i, slot) in topics.iter().enumerate() {
        let Some(allowed) = slot else { continue };
        let found = log.topics.get(i).copied();
        if !found.is_some_and(|t| allowed.contains(&t)) {
            return Err(ContractError::TopicMismatch {
                expected: allowed.first().copied().unwrap_or_default(),
                found,
            });
        }
    }
    Ok(())
}

/// Decode a log into the fields of `event`.
pub fn decode_log(event: &Event, log: &Log) -> Result<DecodedEvent, ContractError> {
    let mut topics = log.topics.iter();

    if !event.anonymous {
        let expected = topic_for_event(event);
        match topics.next() {
            Some(topic) if *topic == expected => {}
            found => {
                return Err(ContractError::TopicMismatch {
                    expected,
                    found: found.copied(),
                })
            }
        }
    }

    let indexed_count = event.inputs.iter().filter(|p| p.indexed).count();
    if topics.len() != indexed_count {
        return Err(ContractError::Decoding(format!(
            "event '{}' has {} indexed parameters, log carries {} topics",
            event.signature(),
            indexed_count,
            topics.len()
        )));
    }

    let body_types = event
        .inputs
        .iter()
        .filter(|p| !p.indexed)
        .map(resolve)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ContractError::Decoding)?;
    let mut body = decode_sequence(body_types, &log.data)
        .map_err(|e| {
            ContractError::Decoding(format!(
                "data of event '{}' ({} bytes): {}",
                event.signature(),
                log.data.len(),
                e
            ))
        })?
        .into_iter();

    let mut fields = Vec::with_capacity(event.inputs.len());
    for param in &event.inputs {
        let value = if param.indexed {
            let topic = topics
                .next()
                .ok_or_else(|| ContractError::Decoding("ran out of topics".into()))?;
            let ty = resolve(param).map_err(ContractError::Decoding)?;
            if is_hashed(&ty) {
                DynSolValue::FixedBytes(*topic, 32)
            } else {
                decode_sequence(vec![ty], topic.as_slice())
                    .ok()
                    .and_then(|mut values| values.pop())
                    .ok_or_else(|| {
                        ContractError::Decoding(format!("indexed '{}' in topic {}", param.name, topic))
                    })?
            }
        } else {
            body.next()
                .ok_or_else(|| ContractError::Decoding("ran out of data values".into()))?
        };
        fields.push((param.name.clone(), value));
    }

    Ok(DecodedEvent {
        name: event.name.clone(),
        fields,
        raw: log.clone(),
    })
}

/// Decode a revert payload: `Error(string)`, `Panic(uint256)`, or one of the
/// custom errors declared in `abi`.
pub fn decode_revert(abi: &JsonAbi, data: &[u8]) -> RevertReason {
    if data.len() < 4 {
        return RevertReason::Opaque(Bytes::copy_from_slice(data));
    }
    let (selector, payload) = data.split_at(4);

    if selector == ERROR_STRING_SELECTOR {
        if let Ok(mut values) = decode_sequence(vec![DynSolType::String], payload) {
            if let Some(DynSolValue::String(message)) = values.pop() {
                return RevertReason::Message(message);
            }
        }
    } else if selector == PANIC_SELECTOR {
        if let Ok(mut values) = decode_sequence(vec![DynSolType::Uint(256)], payload) {
            if let Some(DynSolValue::Uint(code, _)) = values.pop() {
                return RevertReason::Panic(code);
            }
        }
    } else if let Some(error) = abi.errors().find(|e| e.selector().as_slice() == selector) {
        let decoded = error
            .inputs
            .iter()
            .map(resolve)
            .collect::<Result<Vec<_>, _>>()
            .ok()
            .and_then(|types| decode_sequence(types, payload).ok());
        if let Some(args) = decoded {
            return RevertReason::Custom {
                name: error.name.clone(),
                args,
            };
        }
    }

    RevertReason::Opaque(Bytes::copy_from_slice(data))
}

fn resolve<S: Specifier<DynSolType>>(param: &S) -> Result<DynSolType, String> {
    param.resolve().map_err(|e| format!("unsupported ABI type: {}", e))
}

fn decode_sequence(
    types: Vec<DynSolType>,
    data: &[u8],
) -> Result<Vec<DynSolValue>, alloy::dyn_abi::Error> {
    match DynSolType::Tuple(types).abi_decode_params(data)? {
        DynSolValue::Tuple(values) => Ok(values),
        other => Ok(vec![other]),
    }
}

/// Indexed values of these types are stored as a hash in their topic.
fn is_hashed(ty: &DynSolType) -> bool {
    !matches!(
        ty,
        DynSolType::Bool
            | DynSolType::Int(_)
            | DynSolType::Uint(_)
            | DynSolType::FixedBytes(_)
            | DynSolType::Address
            | DynSolType::Function
    )
}

/// Convert `value` to the exact shape of `ty`, widening or narrowing integers
/// when the value fits.
pub fn coerce(ty: &DynSolType, value: &DynSolValue) -> Result<DynSolValue, String> {
    match (ty, value) {
        (DynSolType::Bool, DynSolValue::Bool(b)) => Ok(DynSolValue::Bool(*b)),
        (DynSolType::Address, DynSolValue::Address(a)) => Ok(DynSolValue::Address(*a)),
        (DynSolType::Uint(bits), DynSolValue::Uint(v, _)) => fit_uint(*v, *bits),
        (DynSolType::Int(bits), DynSolValue::Int(v, _)) => fit_int(*v, *bits),
        (DynSolType::Int(bits), DynSolValue::Uint(v, _)) => {
            let v = I256::try_from(*v).map_err(|_| format!("{} overflows int{}", v, bits))?;
            fit_int(v, *bits)
        }
        (DynSolType::FixedBytes(size), DynSolValue::FixedBytes(word, len)) if len == size => {
            Ok(DynSolValue::FixedBytes(*word, *size))
        }
        (DynSolType::FixedBytes(size), DynSolValue::Bytes(bytes)) if bytes.len() == *size => {
            let mut word = B256::ZERO;
            word.0[..*size].copy_from_slice(bytes);
            Ok(DynSolValue::FixedBytes(word, *size))
        }
        (DynSolType::Bytes, DynSolValue::Bytes(bytes)) => Ok(DynSolValue::Bytes(bytes.clone())),
        (DynSolType::String, DynSolValue::String(s)) => Ok(DynSolValue::String(s.clone())),
        (DynSolType::Array(inner), DynSolValue::Array(items)) => {
            coerce_items(inner, items).map(DynSolValue::Array)
        }
        (
            DynSolType::FixedArray(inner, len),
            DynSolValue::FixedArray(items) | DynSolValue::Array(items),
        ) => {
            if items.len() != *len {
                return Err(format!("expected {} elements, got {}", len, items.len()));
            }
            coerce_items(inner, items).map(DynSolValue::FixedArray)
        }
        (DynSolType::Function, _) => Err("function types are not supported".to_string()),
        (ty, DynSolValue::Tuple(items)) if ty.as_tuple().is_some() => {
            let types = ty.as_tuple().unwrap_or_default();
            if items.len() != types.len() {
                return Err(format!(
                    "expected a struct of {} fields, got {}",
                    types.len(),
                    items.len()
                ));
            }
            types
                .iter()
                .zip(items)
                .enumerate()
                .map(|(i, (ty, item))| coerce(ty, item).map_err(|e| format!("field {}: {}", i, e)))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::Tuple)
        }
        (ty, value) => Err(format!(
            "expected {}, got {}",
            ty.sol_type_name(),
            value
                .sol_type_name()
                .map(|name| name.into_owned())
                .unwrap_or_else(|| "an empty sequence".to_string())
        )),
    }
}

fn coerce_items(inner: &DynSolType, items: &[DynSolValue]) -> Result<Vec<DynSolValue>, String> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| coerce(inner, item).map_err(|e| format!("element {}: {}", i, e)))
        .collect()
}

fn fit_uint(value: U256, bits: usize) -> Result<DynSolValue, String> {
    if value.bit_len() > bits {
        return Err(format!("{} overflows uint{}", value, bits));
    }
    Ok(DynSolValue::Uint(value, bits))
}

fn fit_int(value: I256, bits: usize) -> Result<DynSolValue, String> {
    if value.bits() as usize > bits {
        return Err(format!("{} overflows int{}", value, bits));
    }
    Ok(DynSolValue::Int(value, bits))
}
