//! Output scripts and script-number encoding.

use bitcoin::bech32::{self, Fe32};

use super::TxContext;
use crate::crypto::base58;
use crate::error::{PoolError, Result};

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;

/// Append a minimal data push.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        len if len < OP_PUSHDATA1 as usize => script.push(len as u8),
        len if len <= 0xff => {
            script.push(OP_PUSHDATA1);
            script.push(len as u8);
        }
        len => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(len as u16).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
}

/// CScriptNum push of a non-negative number, as used for the coinbase
/// height (BIP34) and timestamp.
///
/// 1..=16 use the single-byte `OP_1..OP_16` form; everything else is a
/// length byte followed by the little-endian value with room for the sign
/// bit.
pub fn serialize_number(n: u64) -> Vec<u8> {
    if (1..=16).contains(&n) {
        return vec![0x50 + n as u8];
    }

    let mut out = vec![0u8];
    let mut rest = n;
    while rest > 0x7f {
        out.push((rest & 0xff) as u8);
        rest >>= 8;
    }
    out.push(rest as u8);
    out[0] = (out.len() - 1) as u8;
    out
}

pub fn p2pkh_script(hash: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_DUP, OP_HASH160];
    push_data(&mut script, hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

pub fn p2sh_script(hash: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_HASH160];
    push_data(&mut script, hash);
    script.push(OP_EQUAL);
    script
}

pub fn p2pk_script(pubkey: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(pubkey.len() + 2);
    push_data(&mut script, pubkey);
    script.push(OP_CHECKSIG);
    script
}

/// Version-0 witness program (P2WPKH or P2WSH by program length).
pub fn witness_v0_script(program: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_0];
    push_data(&mut script, program);
    script
}

/// Convert a chain address into its output script.
pub fn address_to_script(address: &str, ctx: &TxContext) -> Result<Vec<u8>> {
    if let Some(hrp) = ctx.bech32_hrp.as_deref() {
        let lower = address.to_ascii_lowercase();
        if lower.starts_with(&format!("{}1", hrp)) {
            return segwit_to_script(address, hrp, ctx.segwit_enabled);
        }
    }

    if (address.len() == 66 || address.len() == 130) && address.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Ok(p2pk_script(&hex::decode(address)?));
    }

    let version_len = ctx.prefix_p2pkh.len();
    let (version, payload) = base58::check_decode(address, version_len)?;
    if payload.len() != 20 {
        return Err(PoolError::invalid(format!(
            "address {}: payload is {} bytes",
            address,
            payload.len()
        )));
    }
    if version == ctx.prefix_p2pkh {
        Ok(p2pkh_script(&payload))
    } else if version == ctx.prefix_p2sh {
        Ok(p2sh_script(&payload))
    } else {
        Err(PoolError::invalid(format!(
            "address {}: unknown version {}",
            address,
            hex::encode(version)
        )))
    }
}

fn segwit_to_script(address: &str, expected_hrp: &str, segwit_enabled: bool) -> Result<Vec<u8>> {
    if !segwit_enabled {
        return Err(PoolError::invalid(format!("address {}: segwit disabled", address)));
    }

    let (hrp, version, program) = bech32::segwit::decode(address)
        .map_err(|e| PoolError::invalid(format!("address {}: {}", address, e)))?;
    if hrp.to_lowercase() != expected_hrp {
        return Err(PoolError::invalid(format!("address {}: wrong hrp", address)));
    }

    match (version, program.len()) {
        (v, 20) | (v, 32) if v == Fe32::Q => Ok(witness_v0_script(&program)),
        (v, _) if v == Fe32::Q => Err(PoolError::invalid(format!(
            "address {}: bad v0 program length {}",
            address,
            program.len()
        ))),
        _ => Err(PoolError::invalid(format!(
            "address {}: witness version {} unsupported",
            address,
            version.to_u8()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, "0100")]
    #[test_case(1, "51")]
    #[test_case(16, "60")]
    #[test_case(17, "0111")]
    #[test_case(127, "017f")]
    #[test_case(128, "028000")]
    #[test_case(1874596, "03a49a1c")]
    #[test_case(1628302731, "048bed0d61")]
    fn test_serialize_number(n: u64, expected: &str) {
        assert_eq!(hex::encode(serialize_number(n)), expected);
    }

    #[test]
    fn test_base58_addresses() {
        let ctx = TxContext::bitcoin();
        let script = address_to_script("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", &ctx).unwrap();
        assert_eq!(
            hex::encode(script),
            "76a91462e907b15cbf27d5425399ebf6f0fb50ebb88f1888ac"
        );

        let script = address_to_script("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy", &ctx).unwrap();
        assert_eq!(script[0], OP_HASH160);
        assert_eq!(script[22], OP_EQUAL);
        assert_eq!(script.len(), 23);
    }

    #[test]
    fn test_segwit_v0_addresses() {
        let ctx = TxContext::bitcoin();
        let script = address_to_script("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", &ctx).unwrap();
        assert_eq!(
            hex::encode(script),
            "0014751e76e8199196d454941c45d1b3a323f1433bd6"
        );

        let script = address_to_script(
            "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3",
            &ctx,
        )
        .unwrap();
        assert_eq!(script.len(), 34);
        assert_eq!(script[0], OP_0);
    }

    #[test]
    fn test_rejects_taproot_and_wrong_checksum_variant() {
        let ctx = TxContext::bitcoin();
        // v1 (taproot) program.
        assert!(address_to_script(
            "bc1p5d7rjq7g6rdk2yhzks9smlaqtedr4dekq08ge8ztwac72sfr9rusxg3297",
            &ctx
        )
        .is_err());
        // v1 encoded with bech32 instead of bech32m.
        assert!(address_to_script(
            "bc1pw508d6qejxtdg4y5r3zarvary0c5xw7kw508d6qejxtdg4y5r3zarvary0c5xw7k7grplx",
            &ctx
        )
        .is_err());
    }

    #[test]
    fn test_segwit_disabled_context() {
        let mut ctx = TxContext::bitcoin();
        ctx.segwit_enabled = false;
        assert!(address_to_script("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", &ctx).is_err());
    }

    #[test]
    fn test_p2pk_hex_address() {
        let ctx = TxContext::bitcoin();
        let pubkey = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
        let script = address_to_script(pubkey, &ctx).unwrap();
        assert_eq!(script.len(), 35);
        assert_eq!(script[0], 33);
        assert_eq!(*script.last().unwrap(), OP_CHECKSIG);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut ctx = TxContext::bitcoin();
        ctx.prefix_p2pkh = vec![0x3c];
        ctx.prefix_p2sh = vec![0x7a];
        assert!(address_to_script("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", &ctx).is_err());
    }

    #[test]
    fn test_push_data_lengths() {
        let mut script = Vec::new();
        push_data(&mut script, &[0xaa; 80]);
        assert_eq!(&script[..2], &[OP_PUSHDATA1, 80]);
        let mut script = Vec::new();
        push_data(&mut script, &[0xaa; 300]);
        assert_eq!(&script[..3], &[OP_PUSHDATA2, 0x2c, 0x01]);
    }
}
