//! Errors callers may want to match on. Everything else travels as
//! `anyhow::Error` with context attached.

use crate::time::Timestamp;

#[derive(Debug, thiserror::Error)]
pub enum BuchfinkError {
    /// Asset symbol or identifier not present in the registry
    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    /// No quote known for the pair at the requested time
    #[error("no price for {from}/{to} at {timestamp}")]
    NoPriceForGivenTimestamp {
        from: String,
        to: String,
        timestamp: Timestamp,
    },

    /// Malformed `<amount> <ASSET>` string
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),

    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// Account or report name that cannot be used as a file name
    #[error("invalid {kind} name {name:?}: must be a plain file name")]
    InvalidName { kind: &'static str, name: String },

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("already initialized (buchfink.yaml exists in {0})")]
    AlreadyInitialized(String),

    #[error("invalid API key for {exchange}: {reason}")]
    InvalidApiKey { exchange: String, reason: String },
}
