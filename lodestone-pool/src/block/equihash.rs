//! Zcash-style 140-byte header used by Flux.

use super::append_transactions;
use crate::crypto::{hash_from_display_hex, reversed, sha256d};
use crate::error::{PoolError, Result};

pub const HEADER_LEN: usize = 140;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquihashHeader {
    pub version: u32,
    pub prev_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub sapling_root: [u8; 32],
    pub ntime: u32,
    pub bits: u32,
    /// Full 32-byte nonce in header byte order.
    pub nonce: [u8; 32],
}

impl EquihashHeader {
    pub fn new(
        version: u32,
        prev_hash: &str,
        merkle_root: &str,
        sapling_root: &str,
        ntime: u32,
        bits: u32,
    ) -> Result<Self> {
        Ok(Self {
            version,
            prev_hash: hash_from_display_hex(prev_hash)?,
            merkle_root: hash_from_display_hex(merkle_root)?,
            sapling_root: hash_from_display_hex(sapling_root)?,
            ntime,
            bits,
            nonce: [0u8; 32],
        })
    }

    pub fn with_nonce(mut self, nonce: &[u8]) -> Result<Self> {
        self.nonce = nonce
            .try_into()
            .map_err(|_| PoolError::invalid(format!("equihash nonce is {} bytes", nonce.len())))?;
        Ok(self)
    }

    pub fn serialize(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&self.version.to_le_bytes());
        header[4..36].copy_from_slice(&self.prev_hash);
        header[36..68].copy_from_slice(&self.merkle_root);
        header[68..100].copy_from_slice(&self.sapling_root);
        header[100..104].copy_from_slice(&self.ntime.to_le_bytes());
        header[104..108].copy_from_slice(&self.bits.to_le_bytes());
        header[108..140].copy_from_slice(&self.nonce);
        header
    }

    /// Display-order block hash; `solution` includes its length prefix.
    pub fn hash(&self, solution: &[u8]) -> [u8; 32] {
        let mut data = Vec::with_capacity(HEADER_LEN + solution.len());
        data.extend_from_slice(&self.serialize());
        data.extend_from_slice(solution);
        reversed(sha256d(&data))
    }

    pub fn serialize_block(&self, solution: &[u8], txs: &[Vec<u8>]) -> Vec<u8> {
        let mut block = Vec::with_capacity(HEADER_LEN + solution.len() + 1024);
        block.extend_from_slice(&self.serialize());
        block.extend_from_slice(solution);
        append_transactions(&mut block, txs);
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> EquihashHeader {
        EquihashHeader::new(
            4,
            "000000000000032f5fbf48f0ae5b2ab71df7b44b6b4ea0f7b0ed5c8a7a20d2b1",
            "2b8e1f3a0d5f4e6a7c9b1d3f5e7a9c1b3d5f7e9a1c3b5d7f9e1a3c5b7d9f1e3a",
            &"aa".repeat(32),
            1628302731,
            0x1d0fffff,
        )
        .unwrap()
        .with_nonce(&(0u8..32).collect::<Vec<_>>())
        .unwrap()
    }

    #[test]
    fn test_header_length_and_fields() {
        let bytes = header().serialize();
        assert_eq!(bytes.len(), 140);
        assert_eq!(&bytes[0..4], &[4, 0, 0, 0]);
        assert_eq!(&bytes[104..108], &0x1d0fffffu32.to_le_bytes());
        assert_eq!(bytes[108], 0);
        assert_eq!(bytes[139], 31);
    }

    #[test]
    fn test_hash_with_solution() {
        let mut solution = vec![0x34];
        solution.extend_from_slice(&[7u8; 52]);
        assert_eq!(
            hex::encode(header().hash(&solution)),
            "2dde3da722a8ae96b002bb31b5a703abce8be72d0170f1423806f7c90ed9d713"
        );
    }

    #[test]
    fn test_block_appends_solution_and_txs() {
        let solution = vec![0x34; 53];
        let block = header().serialize_block(&solution, &[vec![0xee; 10], vec![0xdd; 5]]);
        assert_eq!(block.len(), 140 + 53 + 1 + 15);
        assert_eq!(block[193], 2);
    }

    #[test]
    fn test_nonce_length_checked() {
        let result = EquihashHeader::new(4, &"00".repeat(32), &"00".repeat(32), &"00".repeat(32), 0, 0)
            .unwrap()
            .with_nonce(&[0u8; 31]);
        assert!(result.is_err());
    }
}
