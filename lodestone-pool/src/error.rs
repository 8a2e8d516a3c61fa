//! Error types shared across the pool core.
//!
//! Share outcomes (`InvalidShare`, `RejectedShare`) are not errors; see
//! [`crate::stratum::ShareStatus`].

use thiserror::Error;

/// Errors surfaced by chain adapters, accountants and pipelines.
///
/// Each message carries enough context (chain, row id) to identify the
/// offending record.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Malformed caller input: bad address, wrong hex length, mismatched lists.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Decimal or numeric text that could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// An accounting or state-machine invariant did not hold.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Node RPC, HTTP or exchange failure. Retry at the caller's cadence.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// JSON-RPC `error` field returned by a node.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Functionality that is deliberately absent for a chain.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Unknown chain id.
    #[error("unsupported chain: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        PoolError::InvalidArgument(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        PoolError::InvariantViolation(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        PoolError::Upstream(msg.into())
    }

    /// True for failures worth retrying on the next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Upstream(_) | PoolError::Rpc { .. })
    }
}

impl From<reqwest::Error> for PoolError {
    fn from(err: reqwest::Error) -> Self {
        PoolError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(err: serde_json::Error) -> Self {
        PoolError::Upstream(format!("json: {}", err))
    }
}

impl From<hex::FromHexError> for PoolError {
    fn from(err: hex::FromHexError) -> Self {
        PoolError::InvalidArgument(format!("hex: {}", err))
    }
}

impl From<secp256k1::Error> for PoolError {
    fn from(err: secp256k1::Error) -> Self {
        PoolError::InvalidArgument(format!("secp256k1: {}", err))
    }
}
