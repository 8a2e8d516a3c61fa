//! Base58Check with a 4-byte `sha256d` checksum.

use bitcoin::base58;

use crate::error::{PoolError, Result};

/// Smallest payload a versioned address may carry (a RIPEMD-160 hash).
const MIN_PAYLOAD_LEN: usize = 20;

/// Encode `version || payload` with a trailing checksum.
pub fn check_encode(version: &[u8], payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(version.len() + payload.len());
    data.extend_from_slice(version);
    data.extend_from_slice(payload);
    base58::encode_check(&data)
}

/// Decode and verify the checksum; returns the full prefixed payload.
pub fn check_decode_raw(text: &str) -> Result<Vec<u8>> {
    base58::decode_check(text).map_err(|e| PoolError::invalid(format!("base58 {:?}: {}", text, e)))
}

/// Decode a versioned address into `(version, payload)`.
pub fn check_decode(text: &str, version_len: usize) -> Result<(Vec<u8>, Vec<u8>)> {
    let data = check_decode_raw(text)?;
    if data.len() < version_len + MIN_PAYLOAD_LEN {
        return Err(PoolError::invalid(format!(
            "base58 {:?}: decoded length {} too short",
            text,
            data.len()
        )));
    }
    let (version, payload) = data.split_at(version_len);
    Ok((version.to_vec(), payload.to_vec()))
}
