//! Core of a multi-chain proof-of-work mining pool.
//!
//! Chain adapters in [`chain`] turn node templates into stratum jobs, verify
//! shares and unlock the rounds the pool finds. [`accounting`] splits mature
//! rounds into balances and settles cross-coin balances through an exchange;
//! [`pipeline`] drives both against a [`repo::Repository`].

pub mod accounting;
pub mod block;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod pipeline;
pub mod pow;
pub mod precise;
pub mod repo;
pub mod rlp;
pub mod rpc;
pub mod stratum;
pub mod tracing;
pub mod tx;
pub mod types;
pub mod u256;

pub use error::{PoolError, Result};
