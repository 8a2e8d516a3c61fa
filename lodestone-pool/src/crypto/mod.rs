//! Hash primitives, address codecs and signing helpers.
//!
//! SHA-2, RIPEMD-160 and HMAC come from `bitcoin::hashes`; Keccak from
//! `sha3`; BLAKE2b from `blake2`.

pub mod base58;
pub mod keys;
pub mod schnorr;

use bitcoin::hashes::{hash160, hmac, ripemd160, sha256, sha256d, sha512, Hash, HashEngine};
use blake2::digest::consts::U32;
use blake2::digest::core_api::{Buffer, UpdateCore, VariableOutputCore};
use blake2::digest::{Digest, KeyInit, Mac};
use blake2::{Blake2b, Blake2bMac, Blake2bVarCore};
use sha3::Keccak256;

use crate::error::{PoolError, Result};

type Blake2b256 = Blake2b<U32>;
type Blake2b256Mac = Blake2bMac<U32>;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(data).to_byte_array()
}

/// `sha256(sha256(data))`, in internal (not display) byte order.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

pub fn sha512(data: &[u8]) -> [u8; 64] {
    sha512::Hash::hash(data).to_byte_array()
}

pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    ripemd160::Hash::hash(data).to_byte_array()
}

/// `ripemd160(sha256(data))`.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

pub fn blake2b256(data: &[u8]) -> [u8; 32] {
    Blake2b256::digest(data).into()
}

/// Unkeyed BLAKE2b-256 with a personalization string of at most 16 bytes.
pub fn blake2b256_personal(data: &[u8], personal: &[u8]) -> Result<[u8; 32]> {
    if personal.len() > 16 {
        return Err(PoolError::invalid(format!("personalization too long: {}", personal.len())));
    }
    // The MAC wrapper always compresses a (zero) key block, so drive the core
    // directly with key length 0.
    let mut core = Blake2bVarCore::new_with_params(&[], personal, 0, 32);
    let mut buffer = Buffer::<Blake2bVarCore>::default();
    buffer.digest_blocks(data, |blocks| core.update_blocks(blocks));
    let mut full = Default::default();
    core.finalize_variable_core(&mut buffer, &mut full);

    let mut out = [0u8; 32];
    out.copy_from_slice(&full[..32]);
    Ok(out)
}

/// Keyed BLAKE2b-256.
pub fn blake2b256_keyed(data: &[u8], key: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <Blake2b256Mac as KeyInit>::new_from_slice(key)
        .map_err(|_| PoolError::invalid(format!("blake2b key too long: {}", key.len())))?;
    Mac::update(&mut mac, data);
    Ok(mac.finalize().into_bytes().into())
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut engine = hmac::HmacEngine::<sha256::Hash>::new(key);
    engine.input(data);
    hmac::Hmac::<sha256::Hash>::from_engine(engine).to_byte_array()
}

pub fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut engine = hmac::HmacEngine::<sha512::Hash>::new(key);
    engine.input(data);
    hmac::Hmac::<sha512::Hash>::from_engine(engine).to_byte_array()
}

/// Ethash-family seed hash: Keccak-256 applied once per elapsed epoch to
/// 32 zero bytes.
pub fn ethash_seed_hash(height: u64, epoch_length: u64) -> [u8; 32] {
    let epochs = height / epoch_length.max(1);
    let mut seed = [0u8; 32];
    for _ in 0..epochs {
        seed = keccak256(&seed);
    }
    seed
}

/// Reverse a 32-byte hash between internal and display order.
pub fn reversed(hash: [u8; 32]) -> [u8; 32] {
    let mut out = hash;
    out.reverse();
    out
}

/// Decode a 64-char display-order hex hash into internal byte order.
pub fn hash_from_display_hex(text: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(text.trim_start_matches("0x"))?;
    let mut hash: [u8; 32] = bytes
        .try_into()
        .map_err(|_| PoolError::invalid(format!("hash {:?} is not 32 bytes", text)))?;
    hash.reverse();
    Ok(hash)
}
