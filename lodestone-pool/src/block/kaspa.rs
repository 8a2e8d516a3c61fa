//! Kaspa header hashing.

use crate::crypto::blake2b256_keyed;
use crate::error::Result;

const HASH_KEY: &[u8] = b"BlockHash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KaspaHeader {
    pub version: u16,
    /// Parent hashes grouped by block level.
    pub parents_by_level: Vec<Vec<[u8; 32]>>,
    pub hash_merkle_root: [u8; 32],
    pub accepted_id_merkle_root: [u8; 32],
    pub utxo_commitment: [u8; 32],
    /// Milliseconds since the epoch.
    pub timestamp: u64,
    pub bits: u32,
    pub nonce: u64,
    pub daa_score: u64,
    pub blue_score: u64,
    /// Big-endian blue work; leading zero bytes are dropped when hashing.
    pub blue_work: Vec<u8>,
    pub pruning_point: [u8; 32],
}

impl KaspaHeader {
    fn write(&self, pre_pow: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(512);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.parents_by_level.len() as u64).to_le_bytes());
        for level in &self.parents_by_level {
            buf.extend_from_slice(&(level.len() as u64).to_le_bytes());
            for parent in level {
                buf.extend_from_slice(parent);
            }
        }
        buf.extend_from_slice(&self.hash_merkle_root);
        buf.extend_from_slice(&self.accepted_id_merkle_root);
        buf.extend_from_slice(&self.utxo_commitment);

        let (timestamp, nonce) = if pre_pow { (0, 0) } else { (self.timestamp, self.nonce) };
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&nonce.to_le_bytes());
        buf.extend_from_slice(&self.daa_score.to_le_bytes());
        buf.extend_from_slice(&self.blue_score.to_le_bytes());

        let start = self
            .blue_work
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(self.blue_work.len());
        let work = &self.blue_work[start..];
        buf.extend_from_slice(&(work.len() as u64).to_le_bytes());
        buf.extend_from_slice(work);

        buf.extend_from_slice(&self.pruning_point);
        buf
    }

    /// Block hash; with `pre_pow` the timestamp and nonce are zeroed, giving
    /// the hash miners work on.
    pub fn hash(&self, pre_pow: bool) -> Result<[u8; 32]> {
        blake2b256_keyed(&self.write(pre_pow), HASH_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> KaspaHeader {
        KaspaHeader {
            version: 1,
            parents_by_level: vec![vec![[1; 32], [2; 32]], vec![[3; 32]]],
            hash_merkle_root: [4; 32],
            accepted_id_merkle_root: [5; 32],
            utxo_commitment: [6; 32],
            timestamp: 1_700_000_000_000,
            bits: 0x1d00ffff,
            nonce: 42,
            daa_score: 123456,
            blue_score: 7890,
            blue_work: vec![0x00, 0x01, 0xe2, 0x40],
            pruning_point: [7; 32],
        }
    }

    #[test]
    fn test_block_hash() {
        assert_eq!(
            hex::encode(header().hash(false).unwrap()),
            "41b5f44e86f77193207ae82fb5d8f4ad973881a251778694adc6254a9b37a51e"
        );
    }

    #[test]
    fn test_pre_pow_hash_ignores_time_and_nonce() {
        let expected = "b934b2a81f584264985fe8b687f3837fa2ca48aa812680d94b4388d5830ff181";
        assert_eq!(hex::encode(header().hash(true).unwrap()), expected);

        let mut other = header();
        other.nonce = 7;
        other.timestamp = 1;
        assert_eq!(hex::encode(other.hash(true).unwrap()), expected);
    }
}
