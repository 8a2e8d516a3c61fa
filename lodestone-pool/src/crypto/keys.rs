//! Private-key handling shared by payout adapters and the keygen tool.

use secp256k1::{PublicKey, SecretKey, SECP256K1};

use super::{base58, hash160, keccak256, sha256};
use crate::error::{PoolError, Result};

/// Deterministically derive a signing key from a raw 32-byte secret.
///
/// Payout wallets are created from the obscured form, so this derivation
/// must stay byte-for-byte stable.
pub fn obscure_private_key(raw_hex: &str) -> Result<SecretKey> {
    let raw = hex::decode(raw_hex.trim())?;
    if raw.len() != 32 {
        return Err(PoolError::invalid(format!(
            "private key must be 32 bytes, got {}",
            raw.len()
        )));
    }

    let h = sha256(&raw);
    let mut shuffled = Vec::with_capacity(32);
    shuffled.extend_from_slice(&h[29..31]);
    shuffled.extend_from_slice(&h[0..10]);
    shuffled.extend_from_slice(&h[31..]);
    shuffled.extend_from_slice(&h[10..29]);

    // Rejects zero and values at or above the group order.
    SecretKey::from_slice(&sha256(&shuffled))
        .map_err(|_| PoolError::invalid("obscured key is not a valid secp256k1 scalar"))
}

pub fn secret_key_from_hex(raw_hex: &str) -> Result<SecretKey> {
    let raw = hex::decode(raw_hex.trim().trim_start_matches("0x"))?;
    Ok(SecretKey::from_slice(&raw)?)
}

pub fn public_key(secret: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(SECP256K1, secret)
}

/// Base58Check P2PKH address of the compressed public key.
pub fn p2pkh_address(public: &PublicKey, prefix: &[u8]) -> String {
    base58::check_encode(prefix, &hash160(&public.serialize()))
}

/// 20-byte Ethereum-style account id.
pub fn evm_address_bytes(public: &PublicKey) -> [u8; 20] {
    let uncompressed = public.serialize_uncompressed();
    let digest = keccak256(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

/// EIP-55 mixed-case checksummed address.
pub fn evm_address(public: &PublicKey) -> String {
    to_checksum_address(&evm_address_bytes(public))
}

pub fn to_checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let digest = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a `0x`-prefixed 20-byte account id, ignoring checksum case.
pub fn parse_evm_address(text: &str) -> Result<[u8; 20]> {
    let stripped = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| PoolError::invalid(format!("address {:?} missing 0x prefix", text)))?;
    let bytes = hex::decode(stripped)?;
    bytes
        .try_into()
        .map_err(|_| PoolError::invalid(format!("address {:?} is not 20 bytes", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obscure_private_key_vectors() {
        let key = obscure_private_key(
            "0c28fca386c7a227600b2fe50b7cae11ec86d3bf1fbe471be89827e19d72aa1d",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key.secret_bytes()),
            "e7a4da05951acd28a3b540220a984ada87b4846c266290a0b061eaba78cd8049"
        );

        let key = obscure_private_key(&format!("{}01", "00".repeat(31))).unwrap();
        assert_eq!(
            hex::encode(key.secret_bytes()),
            "380bcc3be7fdaa44a17725223986f3ef6dc903807550cf04bc733dc5f5c65738"
        );
    }

    #[test]
    fn test_obscure_rejects_wrong_length() {
        assert!(obscure_private_key("abcd").is_err());
        assert!(obscure_private_key("zz").is_err());
    }

    #[test]
    fn test_wif_example_address() {
        // Well-known key from the Bitcoin wiki WIF example.
        let secret = secret_key_from_hex(
            "0c28fca386c7a227600b2fe50b7cae11ec86d3bf1fbe471be89827e19d72aa1d",
        )
        .unwrap();
        let public = public_key(&secret);
        assert_eq!(p2pkh_address(&public, &[0x00]).len(), 34);
        assert!(p2pkh_address(&public, &[0x00]).starts_with('1'));
    }

    #[test]
    fn test_evm_address_of_key_one() {
        let secret = secret_key_from_hex(&format!("{}01", "00".repeat(31))).unwrap();
        assert_eq!(
            evm_address(&public_key(&secret)),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn test_parse_evm_address() {
        let parsed = parse_evm_address("0x7dD8E752F5e606Aca3A40DD1dEaDF363dbbCa100").unwrap();
        assert_eq!(parsed[0], 0x7d);
        assert_eq!(parsed[19], 0x00);
        assert!(parse_evm_address("7dD8E752F5e606Aca3A40DD1dEaDF363dbbCa100").is_err());
        assert!(parse_evm_address("0x1234").is_err());
    }
}
