//! Runtime bindings for Ethereum contracts described by a JSON ABI: read-only
//! calls, signed transactions, historical log queries and live log
//! subscriptions over pluggable backend capabilities.

pub mod config;
pub mod ethereum;
