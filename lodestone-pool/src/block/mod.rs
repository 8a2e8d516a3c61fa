//! Block header builders.
//!
//! Each builder turns a template plus the miner's solution into the header
//! bytes hashed for proof-of-work and the full block submitted to the node.

pub mod equihash;
pub mod kaspa;
pub mod progpow;

pub use equihash::EquihashHeader;
pub use kaspa::KaspaHeader;
pub use progpow::ProgPowHeader;

use crate::tx::write_varint;

/// Append `varint(count) || tx...` to a block body.
pub(crate) fn append_transactions(block: &mut Vec<u8>, txs: &[Vec<u8>]) {
    write_varint(block, txs.len() as u64);
    for tx in txs {
        block.extend_from_slice(tx);
    }
}
