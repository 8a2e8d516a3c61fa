//! UTXO transaction assembly.
//!
//! A [`Transaction`] is built against a [`TxContext`] describing the chain's
//! address prefixes and transaction header rules, then serialized in the
//! chain's wire format:
//!
//! ```text
//! version | [version_group_id] | [0x00 0x01] | inputs | outputs | [witnesses]
//!         | lock_time | [expiry_height + empty sapling fields] | [extra_payload]
//! ```

pub mod coinbase;
pub mod fee;
pub mod merkle;
pub mod script;

use bitcoin::consensus::encode::{serialize, VarInt};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use crate::crypto::{self, blake2b256_personal, hash_from_display_hex, sha256d};
use crate::error::{PoolError, Result};

pub use script::address_to_script;

pub const SIGHASH_ALL: u32 = 1;

/// DER length of a signature whose `r` and `s` are both 32 bytes with the
/// top bit clear.
pub const FIXED_DER_LEN: usize = 70;

/// Nonce-grinding attempts before giving up on a fixed-length signature.
const MAX_GRIND: u32 = 1024;

/// ECDSA signature ground to exactly [`FIXED_DER_LEN`] DER bytes, so a
/// transaction's length does not depend on what it signs.
pub fn sign_fixed_len(digest: [u8; 32], secret: &SecretKey) -> Result<Vec<u8>> {
    let msg = Message::from_digest(digest);
    let mut nonce_data = [0u8; 32];
    for attempt in 0..MAX_GRIND {
        let signature = if attempt == 0 {
            SECP256K1.sign_ecdsa_low_r(&msg, secret)
        } else {
            nonce_data[..4].copy_from_slice(&attempt.to_le_bytes());
            SECP256K1.sign_ecdsa_with_noncedata(&msg, secret, &nonce_data)
        };
        let der = signature.serialize_der();
        if der.len() == FIXED_DER_LEN {
            return Ok(der.to_vec());
        }
    }
    Err(PoolError::invariant("no fixed-length signature within the grind budget"))
}

/// Signature-hash algorithm for transparent inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SighashKind {
    /// Original Bitcoin algorithm: whole transaction with one script populated.
    Legacy,
    /// ZIP-243 BLAKE2b digest for Sapling-era transactions.
    Zip243 { branch_id: u32 },
}

/// Per-chain transaction rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxContext {
    pub prefix_p2pkh: Vec<u8>,
    pub prefix_p2sh: Vec<u8>,
    /// Bech32 human-readable part; `None` for chains without segwit addresses.
    pub bech32_hrp: Option<String>,
    pub segwit_enabled: bool,
    pub version: u32,
    /// OR-ed into the version when serializing (Overwinter flag).
    pub version_mask: u32,
    pub version_group_id: Option<u32>,
    pub expiry_height: Option<u32>,
    pub lock_time: u32,
    pub sighash: SighashKind,
}

impl TxContext {
    pub fn bitcoin() -> Self {
        Self {
            prefix_p2pkh: vec![0x00],
            prefix_p2sh: vec![0x05],
            bech32_hrp: Some("bc".into()),
            segwit_enabled: true,
            version: 2,
            version_mask: 0,
            version_group_id: None,
            expiry_height: None,
            lock_time: 0,
            sighash: SighashKind::Legacy,
        }
    }

    pub fn bitcoin_testnet() -> Self {
        Self {
            prefix_p2pkh: vec![0x6f],
            prefix_p2sh: vec![0xc4],
            bech32_hrp: Some("tb".into()),
            ..Self::bitcoin()
        }
    }

    pub fn ravencoin(mainnet: bool) -> Self {
        let (p2pkh, p2sh) = if mainnet { (0x3c, 0x7a) } else { (0x6f, 0xc4) };
        Self {
            prefix_p2pkh: vec![p2pkh],
            prefix_p2sh: vec![p2sh],
            bech32_hrp: None,
            segwit_enabled: false,
            ..Self::bitcoin()
        }
    }

    pub fn firo(mainnet: bool) -> Self {
        let (p2pkh, p2sh) = if mainnet { (0x52, 0x07) } else { (0x41, 0xb2) };
        Self {
            prefix_p2pkh: vec![p2pkh],
            prefix_p2sh: vec![p2sh],
            bech32_hrp: None,
            segwit_enabled: false,
            ..Self::bitcoin()
        }
    }

    pub fn flux(mainnet: bool) -> Self {
        let (p2pkh, p2sh) = if mainnet {
            (vec![0x1c, 0xb8], vec![0x1c, 0xbd])
        } else {
            (vec![0x1d, 0x25], vec![0x1c, 0xba])
        };
        Self {
            prefix_p2pkh: p2pkh,
            prefix_p2sh: p2sh,
            bech32_hrp: None,
            segwit_enabled: false,
            version: 4,
            version_mask: 0x8000_0000,
            version_group_id: Some(0x892f_2085),
            expiry_height: Some(0),
            lock_time: 0,
            sighash: SighashKind::Zip243 {
                branch_id: 0x76b8_09bb,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// Previous txid in internal byte order.
    pub prev_hash: [u8; 32],
    pub prev_index: u32,
    pub script: Vec<u8>,
    pub sequence: u32,
    /// Value of the spent output; required by ZIP-243 signing.
    pub value: Option<u64>,
    pub witness: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    ctx: TxContext,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, n: u64) {
    buf.extend_from_slice(&serialize(&VarInt(n)));
}

fn write_script(buf: &mut Vec<u8>, script: &[u8]) {
    write_varint(buf, script.len() as u64);
    buf.extend_from_slice(script);
}

impl Transaction {
    pub fn new(ctx: TxContext) -> Self {
        Self {
            ctx,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn context(&self) -> &TxContext {
        &self.ctx
    }

    /// Add an input spending `prev_hash` (display-order hex) at `prev_index`.
    pub fn add_input(
        &mut self,
        prev_hash: &str,
        prev_index: u32,
        sequence: u32,
        script: Vec<u8>,
    ) -> Result<()> {
        self.inputs.push(TxIn {
            prev_hash: hash_from_display_hex(prev_hash)?,
            prev_index,
            script,
            sequence,
            value: None,
            witness: Vec::new(),
        });
        Ok(())
    }

    pub fn add_output(&mut self, script: Vec<u8>, value: u64) {
        self.outputs.push(TxOut { value, script });
    }

    /// Add an output paying `address` under this transaction's context.
    pub fn add_address_output(&mut self, address: &str, value: u64) -> Result<()> {
        let script = address_to_script(address, &self.ctx)?;
        self.add_output(script, value);
        Ok(())
    }

    pub fn set_witness(&mut self, index: usize, witness: Vec<Vec<u8>>) -> Result<()> {
        let input = self
            .inputs
            .get_mut(index)
            .ok_or_else(|| PoolError::invalid(format!("no input {}", index)))?;
        input.witness = witness;
        Ok(())
    }

    fn has_witness(&self) -> bool {
        self.ctx.segwit_enabled && self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    fn header(&self) -> u32 {
        self.ctx.version | self.ctx.version_mask
    }

    /// Full wire serialization.
    pub fn serialize(&self, extra_payload: Option<&[u8]>) -> Vec<u8> {
        self.serialize_inner(extra_payload, self.has_witness(), None)
    }

    /// Serialization without witness data, as hashed for the txid.
    pub fn serialize_stripped(&self, extra_payload: Option<&[u8]>) -> Vec<u8> {
        self.serialize_inner(extra_payload, false, None)
    }

    fn serialize_inner(
        &self,
        extra_payload: Option<&[u8]>,
        with_witness: bool,
        only_script: Option<(usize, &[u8])>,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&self.header().to_le_bytes());
        if let Some(group) = self.ctx.version_group_id {
            buf.extend_from_slice(&group.to_le_bytes());
        }
        if with_witness {
            buf.extend_from_slice(&[0x00, 0x01]);
        }

        write_varint(&mut buf, self.inputs.len() as u64);
        for (i, input) in self.inputs.iter().enumerate() {
            buf.extend_from_slice(&input.prev_hash);
            buf.extend_from_slice(&input.prev_index.to_le_bytes());
            match only_script {
                Some((index, script)) if index == i => write_script(&mut buf, script),
                Some(_) => write_script(&mut buf, &[]),
                None => write_script(&mut buf, &input.script),
            }
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            write_script(&mut buf, &output.script);
        }

        if with_witness {
            for input in &self.inputs {
                write_varint(&mut buf, input.witness.len() as u64);
                for item in &input.witness {
                    write_script(&mut buf, item);
                }
            }
        }

        buf.extend_from_slice(&self.ctx.lock_time.to_le_bytes());

        if let Some(expiry) = self.ctx.expiry_height {
            buf.extend_from_slice(&expiry.to_le_bytes());
            if self.ctx.version_group_id.is_some() {
                // valueBalance, vShieldedSpend, vShieldedOutput, vJoinSplit
                buf.extend_from_slice(&0i64.to_le_bytes());
                buf.extend_from_slice(&[0x00, 0x00, 0x00]);
            }
        }

        if let Some(payload) = extra_payload {
            write_script(&mut buf, payload);
        }

        buf
    }

    /// Display-order txid.
    pub fn txid(&self, extra_payload: Option<&[u8]>) -> String {
        hex::encode(crypto::reversed(sha256d(&self.serialize_stripped(extra_payload))))
    }

    /// Legacy signature hash of input `index` committing to `script`.
    pub fn calculate_script_sig(&self, index: usize, script: &[u8]) -> Result<[u8; 32]> {
        if index >= self.inputs.len() {
            return Err(PoolError::invalid(format!("no input {}", index)));
        }
        let mut preimage = self.serialize_inner(None, false, Some((index, script)));
        preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        Ok(sha256d(&preimage))
    }

    /// ZIP-243 signature hash for a transparent input.
    fn zip243_sighash(&self, index: usize, script: &[u8], branch_id: u32) -> Result<[u8; 32]> {
        let input = self
            .inputs
            .get(index)
            .ok_or_else(|| PoolError::invalid(format!("no input {}", index)))?;
        let amount = input
            .value
            .ok_or_else(|| PoolError::invalid(format!("input {} has no value", index)))?;

        let mut prevouts = Vec::new();
        let mut sequences = Vec::new();
        for input in &self.inputs {
            prevouts.extend_from_slice(&input.prev_hash);
            prevouts.extend_from_slice(&input.prev_index.to_le_bytes());
            sequences.extend_from_slice(&input.sequence.to_le_bytes());
        }
        let mut outputs = Vec::new();
        for output in &self.outputs {
            outputs.extend_from_slice(&output.value.to_le_bytes());
            write_script(&mut outputs, &output.script);
        }

        let mut preimage = Vec::with_capacity(512);
        preimage.extend_from_slice(&self.header().to_le_bytes());
        preimage.extend_from_slice(&self.ctx.version_group_id.unwrap_or(0).to_le_bytes());
        preimage.extend_from_slice(&blake2b256_personal(&prevouts, b"ZcashPrevoutHash")?);
        preimage.extend_from_slice(&blake2b256_personal(&sequences, b"ZcashSequencHash")?);
        preimage.extend_from_slice(&blake2b256_personal(&outputs, b"ZcashOutputsHash")?);
        preimage.extend_from_slice(&[0u8; 32 * 3]);
        preimage.extend_from_slice(&self.ctx.lock_time.to_le_bytes());
        preimage.extend_from_slice(&self.ctx.expiry_height.unwrap_or(0).to_le_bytes());
        preimage.extend_from_slice(&0i64.to_le_bytes());
        preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        preimage.extend_from_slice(&input.prev_hash);
        preimage.extend_from_slice(&input.prev_index.to_le_bytes());
        write_script(&mut preimage, script);
        preimage.extend_from_slice(&amount.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());

        let mut personal = Vec::with_capacity(16);
        personal.extend_from_slice(b"ZcashSigHash");
        personal.extend_from_slice(&branch_id.to_le_bytes());
        blake2b256_personal(&preimage, &personal)
    }

    /// Signature hash of input `index` under the context's algorithm.
    pub fn sighash(&self, index: usize, script: &[u8]) -> Result<[u8; 32]> {
        match self.ctx.sighash {
            SighashKind::Legacy => self.calculate_script_sig(index, script),
            SighashKind::Zip243 { branch_id } => self.zip243_sighash(index, script, branch_id),
        }
    }

    /// Sign input `index` as P2PKH spending `prev_script`.
    pub fn sign_p2pkh(&mut self, index: usize, prev_script: &[u8], secret: &SecretKey) -> Result<()> {
        let digest = self.sighash(index, prev_script)?;
        let mut sig = sign_fixed_len(digest, secret)?;
        sig.push(SIGHASH_ALL as u8);

        let pubkey = PublicKey::from_secret_key(SECP256K1, secret).serialize();
        let mut script_sig = Vec::with_capacity(sig.len() + pubkey.len() + 2);
        script::push_data(&mut script_sig, &sig);
        script::push_data(&mut script_sig, &pubkey);
        self.inputs[index].script = script_sig;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{p2pkh_address, public_key, secret_key_from_hex};
    use secp256k1::ecdsa::Signature;

    fn funded_tx(ctx: TxContext) -> Transaction {
        let mut tx = Transaction::new(ctx);
        tx.add_input(
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            1,
            0xffff_ffff,
            Vec::new(),
        )
        .unwrap();
        tx.add_output(script::p2pkh_script(&[0x11; 20]), 50_000);
        tx
    }

    #[test]
    fn test_serialize_layout() {
        let tx = funded_tx(TxContext::bitcoin());
        let raw = tx.serialize(None);

        assert_eq!(&raw[0..4], &2u32.to_le_bytes());
        assert_eq!(raw[4], 1);
        // prev hash reversed into internal order
        assert_eq!(raw[5], 0x3b);
        assert_eq!(raw[36], 0x4a);
        assert_eq!(&raw[37..41], &1u32.to_le_bytes());
        assert_eq!(raw[41], 0);
        assert_eq!(&raw[42..46], &[0xff; 4]);
        assert_eq!(raw[46], 1);
        assert_eq!(&raw[47..55], &50_000u64.to_le_bytes());
        assert_eq!(raw[55], 25);
        assert_eq!(&raw[raw.len() - 4..], &[0u8; 4]);
        assert_eq!(raw.len(), 4 + 1 + 41 + 1 + 34 + 4);
    }

    #[test]
    fn test_witness_flag_only_with_witness_data() {
        let mut tx = funded_tx(TxContext::bitcoin());
        let plain = tx.serialize(None);
        tx.set_witness(0, vec![vec![0xaa; 3]]).unwrap();
        let witnessed = tx.serialize(None);

        assert_eq!(&witnessed[4..6], &[0x00, 0x01]);
        assert_eq!(witnessed.len(), plain.len() + 2 + 1 + 1 + 3);
        assert_eq!(tx.serialize_stripped(None), plain);
    }

    #[test]
    fn test_flux_overwinter_header() {
        let tx = funded_tx(TxContext::flux(true));
        let raw = tx.serialize(None);

        assert_eq!(&raw[0..4], &0x8000_0004u32.to_le_bytes());
        assert_eq!(&raw[4..8], &0x892f_2085u32.to_le_bytes());
        // lock_time, expiry_height, valueBalance and three empty vectors
        assert_eq!(&raw[raw.len() - 19..], &[0u8; 19]);
    }

    #[test]
    fn test_extra_payload_appended_with_length() {
        let mut ctx = TxContext::firo(true);
        ctx.version = 0x50003;
        let tx = funded_tx(ctx);
        let payload = [0xab; 5];
        let raw = tx.serialize(Some(&payload));

        assert_eq!(&raw[0..4], &0x50003u32.to_le_bytes());
        assert_eq!(&raw[raw.len() - 6..], &[5, 0xab, 0xab, 0xab, 0xab, 0xab]);
        assert_ne!(tx.txid(Some(&payload)), tx.txid(None));
    }

    #[test]
    fn test_sighash_populates_only_signed_input() {
        let mut tx = funded_tx(TxContext::bitcoin());
        tx.add_input(
            "0000000000000000000000000000000000000000000000000000000000000001",
            0,
            0xffff_ffff,
            vec![0x51],
        )
        .unwrap();

        let prev = script::p2pkh_script(&[0x22; 20]);
        let first = tx.calculate_script_sig(0, &prev).unwrap();
        let second = tx.calculate_script_sig(1, &prev).unwrap();
        assert_ne!(first, second);

        let mut preimage = tx.serialize_inner(None, false, Some((0, prev.as_slice())));
        preimage.extend_from_slice(&[1, 0, 0, 0]);
        assert_eq!(first, sha256d(&preimage));
        assert!(tx.calculate_script_sig(2, &prev).is_err());
    }

    #[test]
    fn test_sign_p2pkh_produces_verifiable_signature() {
        let secret = secret_key_from_hex(
            "0c28fca386c7a227600b2fe50b7cae11ec86d3bf1fbe471be89827e19d72aa1d",
        )
        .unwrap();
        let public = public_key(&secret);
        let ctx = TxContext::bitcoin();
        let prev = address_to_script(&p2pkh_address(&public, &ctx.prefix_p2pkh), &ctx).unwrap();

        let mut tx = funded_tx(ctx);
        tx.sign_p2pkh(0, &prev, &secret).unwrap();
        let digest = tx.calculate_script_sig(0, &prev).unwrap();

        let script_sig = tx.inputs[0].script.clone();
        let sig_len = script_sig[0] as usize;
        let der = &script_sig[1..sig_len];
        assert_eq!(script_sig[sig_len], SIGHASH_ALL as u8);
        assert_eq!(script_sig[sig_len + 1], 33);

        let signature = Signature::from_der(der).unwrap();
        assert!(SECP256K1
            .verify_ecdsa(&Message::from_digest(digest), &signature, &public)
            .is_ok());
        assert_eq!(sig_len, FIXED_DER_LEN + 1);
    }

    #[test]
    fn test_signature_length_is_fixed() {
        let secret = secret_key_from_hex(
            "0c28fca386c7a227600b2fe50b7cae11ec86d3bf1fbe471be89827e19d72aa1d",
        )
        .unwrap();
        let public = public_key(&secret);
        for i in 0..200u32 {
            let digest = sha256d(&i.to_le_bytes());
            let der = sign_fixed_len(digest, &secret).unwrap();
            assert_eq!(der.len(), FIXED_DER_LEN, "digest {}", i);
            let signature = Signature::from_der(&der).unwrap();
            assert!(SECP256K1
                .verify_ecdsa(&Message::from_digest(digest), &signature, &public)
                .is_ok());
        }
    }

    #[test]
    fn test_zip243_requires_input_value() {
        let mut tx = funded_tx(TxContext::flux(true));
        let prev = script::p2pkh_script(&[0x33; 20]);
        assert!(tx.sighash(0, &prev).is_err());

        tx.inputs[0].value = Some(100_000);
        let digest = tx.sighash(0, &prev).unwrap();
        assert_ne!(digest, tx.calculate_script_sig(0, &prev).unwrap());
    }

    #[test]
    fn test_zip243_sighash_vector() {
        let mut tx = funded_tx(TxContext::flux(true));
        tx.inputs[0].value = Some(100_000);
        let prev = script::p2pkh_script(&[0x33; 20]);
        assert_eq!(
            hex::encode(tx.sighash(0, &prev).unwrap()),
            "2a2738867b39eb6cd85e62af0b71b64ea042c95a82dd96ac86c979c41d117335"
        );
    }
}
