//! Bitcoin Cash style Schnorr signatures over secp256k1.
//!
//! Signature is `R.x || s` where `s = k + e·x mod n` and
//! `e = sha256(R.x || compressed(P) || msg)`. The nonce comes from the
//! RFC 6979 HMAC-SHA256 generator keyed with `x || msg || "Schnorr+SHA256  "`
//! and is negated when `R.y` is not a quadratic residue.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use secp256k1::constants::{CURVE_ORDER, FIELD_SIZE};
use secp256k1::{PublicKey, Scalar, SecretKey, SECP256K1};

use super::{hmac_sha256, sha256};
use crate::error::{PoolError, Result};

const ALGO16: &[u8; 16] = b"Schnorr+SHA256  ";

/// HMAC-SHA256 deterministic generator as used by libsecp256k1.
struct Rfc6979 {
    k: [u8; 32],
    v: [u8; 32],
    retry: bool,
}

impl Rfc6979 {
    fn new(seed: &[u8]) -> Self {
        let mut k = [0u8; 32];
        let mut v = [1u8; 32];

        let mut buf = Vec::with_capacity(33 + seed.len());
        buf.extend_from_slice(&v);
        buf.push(0x00);
        buf.extend_from_slice(seed);
        k = hmac_sha256(&k, &buf);
        v = hmac_sha256(&k, &v);

        buf.clear();
        buf.extend_from_slice(&v);
        buf.push(0x01);
        buf.extend_from_slice(seed);
        k = hmac_sha256(&k, &buf);
        v = hmac_sha256(&k, &v);

        Self { k, v, retry: false }
    }

    fn generate(&mut self) -> [u8; 32] {
        if self.retry {
            let mut buf = Vec::with_capacity(33);
            buf.extend_from_slice(&self.v);
            buf.push(0x00);
            self.k = hmac_sha256(&self.k, &buf);
            self.v = hmac_sha256(&self.k, &self.v);
        }
        self.v = hmac_sha256(&self.k, &self.v);
        self.retry = true;
        self.v
    }
}

fn order() -> BigUint {
    BigUint::from_bytes_be(&CURVE_ORDER)
}

fn to_bytes32(value: &BigUint) -> [u8; 32] {
    let raw = value.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - raw.len()..].copy_from_slice(&raw);
    out
}

/// Euler's criterion over the field prime.
fn is_quadratic_residue(y: &[u8]) -> bool {
    let p = BigUint::from_bytes_be(&FIELD_SIZE);
    let exponent = (&p - BigUint::one()) >> 1;
    BigUint::from_bytes_be(y).modpow(&exponent, &p).is_one()
}

fn challenge(r_x: &[u8], public: &PublicKey, msg: &[u8; 32]) -> BigUint {
    let mut buf = Vec::with_capacity(32 + 33 + 32);
    buf.extend_from_slice(r_x);
    buf.extend_from_slice(&public.serialize());
    buf.extend_from_slice(msg);
    BigUint::from_bytes_be(&sha256(&buf)) % order()
}

/// Sign a 32-byte message digest.
pub fn sign(secret: &SecretKey, msg: &[u8; 32]) -> Result<[u8; 64]> {
    let n = order();
    let mut seed = Vec::with_capacity(80);
    seed.extend_from_slice(&secret.secret_bytes());
    seed.extend_from_slice(msg);
    seed.extend_from_slice(ALGO16);
    let mut rng = Rfc6979::new(&seed);

    let nonce = loop {
        let candidate = rng.generate();
        if let Ok(key) = SecretKey::from_slice(&candidate) {
            break key;
        }
    };

    let r_point = PublicKey::from_secret_key(SECP256K1, &nonce).serialize_uncompressed();
    let mut k = BigUint::from_bytes_be(&nonce.secret_bytes());
    if !is_quadratic_residue(&r_point[33..65]) {
        k = &n - k;
    }

    let public = PublicKey::from_secret_key(SECP256K1, secret);
    let e = challenge(&r_point[1..33], &public, msg);
    let x = BigUint::from_bytes_be(&secret.secret_bytes());
    let s = (k + e * x) % &n;

    let mut sig = [0u8; 64];
    sig[..32].copy_from_slice(&r_point[1..33]);
    sig[32..].copy_from_slice(&to_bytes32(&s));
    Ok(sig)
}

/// Verify a signature produced by [`sign`].
pub fn verify(public: &PublicKey, msg: &[u8; 32], sig: &[u8; 64]) -> Result<bool> {
    let n = order();
    let s = BigUint::from_bytes_be(&sig[32..]);
    if s >= n || s.is_zero() {
        return Ok(false);
    }

    let e = challenge(&sig[..32], public, msg);
    let s_key = SecretKey::from_slice(&sig[32..])?;
    let s_g = PublicKey::from_secret_key(SECP256K1, &s_key);

    let r_point = if e.is_zero() {
        s_g
    } else {
        let e_scalar = Scalar::from_be_bytes(to_bytes32(&e))
            .map_err(|_| PoolError::invalid("challenge out of range"))?;
        let e_p = public.mul_tweak(SECP256K1, &e_scalar)?.negate(SECP256K1);
        match s_g.combine(&e_p) {
            Ok(point) => point,
            Err(_) => return Ok(false),
        }
    };

    let encoded = r_point.serialize_uncompressed();
    Ok(is_quadratic_residue(&encoded[33..65]) && encoded[1..33] == sig[..32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::secret_key_from_hex;

    fn key() -> SecretKey {
        secret_key_from_hex("12b004fff7f4b69ef8650e767f18f11ede158148b425660723b9f9a66e61f747")
            .unwrap()
    }

    #[test]
    fn test_sign_then_verify() {
        let msg = sha256(b"Very deterministic message");
        let secret = key();
        let sig = sign(&secret, &msg).unwrap();
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        assert!(verify(&public, &msg, &sig).unwrap());
    }

    #[test]
    fn test_signature_is_deterministic() {
        let msg = sha256(b"payout 42");
        assert_eq!(sign(&key(), &msg).unwrap(), sign(&key(), &msg).unwrap());
        let other = sha256(b"payout 43");
        assert_ne!(sign(&key(), &msg).unwrap(), sign(&key(), &other).unwrap());
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let msg = sha256(b"Very deterministic message");
        let secret = key();
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        let mut sig = sign(&secret, &msg).unwrap();

        let other = sha256(b"another message");
        assert!(!verify(&public, &other, &sig).unwrap());

        sig[63] ^= 0x01;
        assert!(!verify(&public, &msg, &sig).unwrap());
    }

    #[test]
    fn test_rfc6979_generator_advances() {
        let mut rng = Rfc6979::new(b"seed");
        let first = rng.generate();
        let second = rng.generate();
        assert_ne!(first, second);
        assert_eq!(Rfc6979::new(b"seed").generate(), first);
    }
}
