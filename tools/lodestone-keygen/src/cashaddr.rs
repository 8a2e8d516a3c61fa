//! CashAddr-style base32 addresses (Nexa, Kaspa).

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Version byte of a 160-bit pay-to-pubkey-hash payload.
pub const P2PKH_VERSION: u8 = 0x00;

/// Version byte of a Kaspa Schnorr x-only public key payload.
pub const KASPA_SCHNORR_VERSION: u8 = 0x00;

fn polymod(values: &[u8]) -> u64 {
    const GENERATORS: [u64; 5] = [
        0x98_f2bc_8e61,
        0x79_b76d_99e2,
        0xf3_3e5f_b3c4,
        0xae_2eab_e2a8,
        0x1e_4f43_e470,
    ];
    let mut c: u64 = 1;
    for &d in values {
        let c0 = (c >> 35) as u8;
        c = ((c & 0x07_ffff_ffff) << 5) ^ u64::from(d);
        for (bit, generator) in GENERATORS.iter().enumerate() {
            if c0 & (1 << bit) != 0 {
                c ^= generator;
            }
        }
    }
    c ^ 1
}

/// Regroup bytes into 5-bit words, zero-padding the tail.
fn to_base32(data: &[u8]) -> Vec<u8> {
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut out = Vec::with_capacity(data.len() * 8 / 5 + 1);
    for &byte in data {
        acc = ((acc << 8) | u32::from(byte)) & 0xffff;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(((acc >> bits) & 31) as u8);
        }
    }
    if bits > 0 {
        out.push(((acc << (5 - bits)) & 31) as u8);
    }
    out
}

/// `prefix:` followed by the base32 payload and an 8-word checksum.
pub fn encode(prefix: &str, payload: &[u8]) -> String {
    let mut words = to_base32(payload);

    let mut checked: Vec<u8> = prefix.bytes().map(|b| b & 31).collect();
    checked.push(0);
    checked.extend_from_slice(&words);
    checked.extend_from_slice(&[0; 8]);
    let checksum = polymod(&checked);
    words.extend((0..8).map(|i| ((checksum >> (5 * (7 - i))) & 31) as u8));

    let body: String = words.iter().map(|&w| CHARSET[w as usize] as char).collect();
    format!("{}:{}", prefix, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cashaddr_p2pkh_vector() {
        let mut payload = vec![P2PKH_VERSION];
        payload.extend(hex::decode("76a04053bda0a88bda5177b86a15c3b29f559873").unwrap());
        assert_eq!(
            encode("bitcoincash", &payload),
            "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a"
        );
    }

    #[test]
    fn test_kaspa_length() {
        let mut payload = vec![KASPA_SCHNORR_VERSION];
        payload.extend([7u8; 32]);
        let address = encode("kaspa", &payload);
        // 33 bytes -> 53 words, plus 8 checksum words.
        assert_eq!(address.len(), "kaspa:".len() + 61);
        assert!(address.starts_with("kaspa:q"));
    }
}
