//! Recursive-length-prefix encoding, shared by the Aeternity and EVM
//! transaction builders.

use num_bigint::BigUint;

/// An RLP item: a byte string or a list of items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rlp {
    Bytes(Vec<u8>),
    List(Vec<Rlp>),
}

impl Rlp {
    /// Unsigned integer as its minimal big-endian bytes; zero is empty.
    pub fn uint(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Rlp::Bytes(bytes[first..].to_vec())
    }

    pub fn big_uint(value: &BigUint) -> Self {
        if value == &BigUint::default() {
            return Rlp::Bytes(Vec::new());
        }
        Rlp::Bytes(value.to_bytes_be())
    }

    pub fn bytes(data: &[u8]) -> Self {
        Rlp::Bytes(data.to_vec())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Rlp::Bytes(data) if data.len() == 1 && data[0] < 0x80 => out.push(data[0]),
            Rlp::Bytes(data) => {
                write_length(out, data.len(), 0x80);
                out.extend_from_slice(data);
            }
            Rlp::List(items) => {
                let mut payload = Vec::new();
                for item in items {
                    item.encode_into(&mut payload);
                }
                write_length(out, payload.len(), 0xc0);
                out.extend_from_slice(&payload);
            }
        }
    }
}

fn write_length(out: &mut Vec<u8>, len: usize, offset: u8) {
    if len < 56 {
        out.push(offset + len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let len_bytes = &bytes[first..];
    out.push(offset + 55 + len_bytes.len() as u8);
    out.extend_from_slice(len_bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Rlp::bytes(b"dog"), "83646f67"; "short string")]
    #[test_case(Rlp::bytes(b""), "80"; "empty string")]
    #[test_case(Rlp::uint(0), "80"; "zero")]
    #[test_case(Rlp::uint(15), "0f"; "single byte")]
    #[test_case(Rlp::uint(1024), "820400"; "two bytes")]
    #[test_case(Rlp::List(vec![]), "c0"; "empty list")]
    #[test_case(Rlp::List(vec![Rlp::bytes(b"cat"), Rlp::bytes(b"dog")]), "c88363617483646f67"; "list")]
    fn test_encode(item: Rlp, expected: &str) {
        assert_eq!(hex::encode(item.encode()), expected);
    }

    #[test]
    fn test_long_string_prefix() {
        let text = b"Lorem ipsum dolor sit amet, consectetur adipisicing elit";
        let encoded = Rlp::bytes(text).encode();
        assert_eq!(&encoded[..2], &[0xb8, 0x38]);
        assert_eq!(&encoded[2..], text);
    }

    #[test]
    fn test_big_uint_matches_uint() {
        assert_eq!(Rlp::big_uint(&BigUint::from(1024u32)), Rlp::uint(1024));
        assert_eq!(Rlp::big_uint(&BigUint::default()), Rlp::uint(0));
    }
}
