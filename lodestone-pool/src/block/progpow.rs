//! Ravencoin/Firo style header for ProgPow-family hashing.

use super::append_transactions;
use crate::crypto::{hash_from_display_hex, reversed, sha256d};
use crate::error::Result;

pub const HEADER_LEN: usize = 80;

/// Header fields; hashes are kept in internal byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgPowHeader {
    pub version: u32,
    pub prev_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub ntime: u32,
    pub bits: u32,
    pub height: u32,
}

impl ProgPowHeader {
    /// Build from template values with display-order hash hex.
    pub fn new(
        version: u32,
        prev_hash: &str,
        merkle_root: &str,
        ntime: u32,
        bits: u32,
        height: u32,
    ) -> Result<Self> {
        Ok(Self {
            version,
            prev_hash: hash_from_display_hex(prev_hash)?,
            merkle_root: hash_from_display_hex(merkle_root)?,
            ntime,
            bits,
            height,
        })
    }

    /// `version | prev | merkle | time | bits | height`, little-endian.
    pub fn serialize(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&self.version.to_le_bytes());
        header[4..36].copy_from_slice(&self.prev_hash);
        header[36..68].copy_from_slice(&self.merkle_root);
        header[68..72].copy_from_slice(&self.ntime.to_le_bytes());
        header[72..76].copy_from_slice(&self.bits.to_le_bytes());
        header[76..80].copy_from_slice(&self.height.to_le_bytes());
        header
    }

    /// Display-order header hash handed to miners as the job seed.
    pub fn hash(&self) -> [u8; 32] {
        reversed(sha256d(&self.serialize()))
    }

    /// Full block: header, nonce, mix digest and transactions.
    ///
    /// `mix_digest` is in display order as submitted by the miner.
    pub fn serialize_block(&self, nonce: u64, mix_digest: &[u8; 32], txs: &[Vec<u8>]) -> Vec<u8> {
        let mut block = Vec::with_capacity(HEADER_LEN + 40 + txs.iter().map(Vec::len).sum::<usize>());
        block.extend_from_slice(&self.serialize());
        block.extend_from_slice(&nonce.to_le_bytes());
        block.extend_from_slice(&reversed(*mix_digest));
        append_transactions(&mut block, txs);
        block
    }
}
