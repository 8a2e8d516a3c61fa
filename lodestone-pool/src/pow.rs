//! Proof-of-work verifier seams.
//!
//! The hash families themselves (KawPow, FiroPow, Equihash 125,4, Cuckoo
//! cycle) live outside this crate. Chain adapters hold them as trait objects
//! and only compare the digests they return against targets.

use crate::crypto::blake2b256;

/// ProgPow-family light verifier.
pub trait ProgPowHasher: Send + Sync {
    /// Returns `(mix_digest, final_digest)`, both in display byte order.
    fn hash(&self, height: u64, header_hash: &[u8; 32], nonce: u64) -> ([u8; 32], [u8; 32]);
}

pub trait EquihashVerifier: Send + Sync {
    /// `header` is the 140-byte header, `solution` excludes its length prefix.
    fn verify(&self, header: &[u8], solution: &[u8]) -> bool;
}

pub trait CuckooVerifier: Send + Sync {
    fn verify(&self, header_hash: &[u8], nonce: u64, edges: &[u32]) -> bool;
}

/// Number of edges in a Cuckoo-cycle solution.
pub const CUCKOO_PROOF_SIZE: usize = 42;

/// Digest compared against the share target: BLAKE2b-256 over the edges as
/// big-endian `u32`s.
pub fn cuckoo_solution_hash(edges: &[u32]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(edges.len() * 4);
    for edge in edges {
        buf.extend_from_slice(&edge.to_be_bytes());
    }
    blake2b256(&buf)
}

/// Verifier that accepts everything; used where the node re-verifies anyway.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustingCuckoo;

impl CuckooVerifier for TrustingCuckoo {
    fn verify(&self, _header_hash: &[u8], _nonce: u64, edges: &[u32]) -> bool {
        edges.len() == CUCKOO_PROOF_SIZE
    }
}
