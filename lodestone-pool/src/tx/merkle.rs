//! Block merkle root over transaction ids.

use crate::crypto::{hash_from_display_hex, reversed, sha256d};
use crate::error::{PoolError, Result};

/// Merkle root over internal-order leaves; the last node is paired with
/// itself on odd levels.
pub fn merkle_root(leaves: &[[u8; 32]]) -> Option<[u8; 32]> {
    let mut level = leaves.to_vec();
    if level.is_empty() {
        return None;
    }
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(last) = level.last().copied() {
                level.push(last);
            }
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&pair[0]);
                buf[32..].copy_from_slice(&pair[1]);
                sha256d(&buf)
            })
            .collect();
    }
    level.first().copied()
}

/// Merkle root of display-order txids, returned in display order.
pub fn merkle_root_hex<S: AsRef<str>>(txids: &[S]) -> Result<String> {
    let leaves = txids
        .iter()
        .map(|txid| hash_from_display_hex(txid.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    let root = merkle_root(&leaves).ok_or_else(|| PoolError::invalid("merkle root of no transactions"))?;
    Ok(hex::encode(reversed(root)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_leaf_is_root() {
        let txid = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
        assert_eq!(merkle_root_hex(&[txid]).unwrap(), txid);
    }

    #[test]
    fn test_block_100000_root() {
        let txids = [
            "8c14f0db3df150123e6f3dbbf30f8b955a8249b62ac1d1ff16284aefa3d06d87",
            "fff2525b8931402dd09222c50775608f75787bd2b87e56995a7bdd30f79702c4",
            "6359f0868171b1d194cbee1af2f16ea598ae8fad666d9b012c8ed2b79a236ec4",
            "e9a66845e05d5abc0ad04ec80f774a7e585c6e8db975962d069a522137b80c1d",
        ];
        assert_eq!(
            merkle_root_hex(&txids).unwrap(),
            "f3e94742aca4b5ef85488dc37c06c3282295ffec960994b2c0d5ac2a25a95766"
        );
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let a = [0x01; 32];
        let b = [0x02; 32];
        let c = [0x03; 32];
        let with_dup = merkle_root(&[a, b, c, c]);
        assert_eq!(merkle_root(&[a, b, c]), with_dup);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(merkle_root(&[]).is_none());
        assert!(merkle_root_hex::<&str>(&[]).is_err());
    }
}
