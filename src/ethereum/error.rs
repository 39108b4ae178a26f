use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, B256, U256},
};
use std::fmt;
use thiserror::Error;

/// Errors surfaced by the contract runtime.
#[derive(Error, Debug)]
pub enum ContractError {
    /// A caller-supplied value cannot be represented per the ABI
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Reply or log bytes don't match the expected shape
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The log belongs to a different event
    #[error("topic mismatch: expected {expected}, found {}", found.map(|t| t.to_string()).unwrap_or_else(|| "no topics".to_string()))]
    TopicMismatch { expected: B256, found: Option<B256> },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error("method '{0}' not found in contract ABI")]
    UnknownMethod(String),

    #[error("event '{0}' not found in contract ABI")]
    UnknownEvent(String),

    #[error("method '{name}' is overloaded, use a full signature: {}", candidates.join(", "))]
    AmbiguousMethod { name: String, candidates: Vec<String> },
}

impl ContractError {
    /// Revert reason carried by a remote failure, if any.
    pub fn revert_reason(&self) -> Option<&RevertReason> {
        match self {
            Self::Remote(RemoteError::Reverted(reason)) => Some(reason),
            _ => None,
        }
    }
}

/// The node rejected or failed a call, transaction or subscription.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("execution reverted: {0}")]
    Reverted(RevertReason),

    #[error("node rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("subscription closed by transport")]
    SubscriptionClosed,
}

impl RemoteError {
    /// The `Error(string)` message of a revert, if the payload carried one.
    pub fn revert_message(&self) -> Option<&str> {
        match self {
            Self::Reverted(RevertReason::Message(message)) => Some(message),
            _ => None,
        }
    }
}

/// Decoded revert payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RevertReason {
    /// `Error(string)`
    Message(String),
    /// `Panic(uint256)`
    Panic(U256),
    /// A custom error declared in the contract ABI
    Custom { name: String, args: Vec<DynSolValue> },
    /// Anything that didn't match a known shape
    Opaque(Bytes),
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(message) => write!(f, "{}", message),
            Self::Panic(code) => write!(f, "panic code 0x{:x}", code),
            Self::Custom { name, args } => write!(f, "{}({} args)", name, args.len()),
            Self::Opaque(data) if data.is_empty() => write!(f, "no reason given"),
            Self::Opaque(data) => write!(f, "0x{}", hex::encode(data)),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignerError {
    #[error("no key available for sender {0}")]
    UnknownKey(Address),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),
}
