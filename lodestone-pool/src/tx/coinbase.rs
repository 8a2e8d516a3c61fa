//! Coinbase transaction generation for UTXO chains.

use super::script::serialize_number;
use super::{Transaction, TxContext, TxOut};
use crate::error::{PoolError, Result};

const NULL_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Consensus bounds on the coinbase input script.
const MIN_SCRIPT_LEN: usize = 2;
const MAX_SCRIPT_LEN: usize = 100;

/// Contents of the coinbase input script.
#[derive(Debug, Clone, Default)]
pub struct CoinbaseScript {
    pub height: u64,
    /// Template time; when set it is pushed after the height together with
    /// the extranonce size byte.
    pub ntime: Option<u32>,
    pub extra_nonce_size: u8,
    /// Pool tag or other trailing bytes.
    pub extra_data: Vec<u8>,
}

impl CoinbaseScript {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut script = serialize_number(self.height);
        if let Some(ntime) = self.ntime {
            script.extend(serialize_number(ntime as u64));
            script.push(self.extra_nonce_size);
        }
        script.extend_from_slice(&self.extra_data);

        if !(MIN_SCRIPT_LEN..=MAX_SCRIPT_LEN).contains(&script.len()) {
            return Err(PoolError::invalid(format!(
                "coinbase script length {} out of range",
                script.len()
            )));
        }
        Ok(script)
    }
}

/// Build the coinbase: one null-prevout input and the given outputs.
pub fn generate_coinbase(
    ctx: &TxContext,
    script: &CoinbaseScript,
    outputs: Vec<TxOut>,
) -> Result<Transaction> {
    if outputs.is_empty() {
        return Err(PoolError::invalid("coinbase needs at least one output"));
    }

    let mut tx = Transaction::new(ctx.clone());
    tx.add_input(NULL_HASH, 0xffff_ffff, 0xffff_ffff, script.encode()?)?;
    for output in outputs {
        tx.add_output(output.script, output.value);
    }
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::script::p2pkh_script;

    fn pool_output(value: u64) -> TxOut {
        TxOut {
            value,
            script: p2pkh_script(&[0x44; 20]),
        }
    }

    #[test]
    fn test_coinbase_script_height_only() {
        let script = CoinbaseScript {
            height: 1874596,
            extra_data: b"/lodestone/".to_vec(),
            ..Default::default()
        };
        let encoded = script.encode().unwrap();
        assert_eq!(&encoded[..4], &[0x03, 0xa4, 0x9a, 0x1c]);
        assert_eq!(&encoded[4..], b"/lodestone/");
    }

    #[test]
    fn test_coinbase_script_with_time() {
        let script = CoinbaseScript {
            height: 1874596,
            ntime: Some(1628302731),
            extra_nonce_size: 8,
            extra_data: Vec::new(),
        };
        assert_eq!(
            hex::encode(script.encode().unwrap()),
            "03a49a1c048bed0d6108"
        );
    }

    #[test]
    fn test_coinbase_script_bounds() {
        let script = CoinbaseScript {
            height: 5,
            ..Default::default()
        };
        assert!(script.encode().is_err());

        let script = CoinbaseScript {
            height: 1874596,
            extra_data: vec![0u8; 120],
            ..Default::default()
        };
        assert!(script.encode().is_err());
    }

    #[test]
    fn test_generate_coinbase_null_prevout() {
        let script = CoinbaseScript {
            height: 1874596,
            ..Default::default()
        };
        let tx = generate_coinbase(&TxContext::ravencoin(true), &script, vec![pool_output(5_000)]).unwrap();

        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.inputs[0].prev_hash, [0u8; 32]);
        assert_eq!(tx.inputs[0].prev_index, 0xffff_ffff);
        assert_eq!(tx.inputs[0].sequence, 0xffff_ffff);
        assert_eq!(tx.outputs[0].value, 5_000);

        assert!(generate_coinbase(&TxContext::ravencoin(true), &script, Vec::new()).is_err());
    }
}
