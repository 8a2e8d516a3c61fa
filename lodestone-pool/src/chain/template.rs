//! `getblocktemplate` parsing and coinbase assembly for UTXO chains.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{PoolError, Result};
use crate::tx::coinbase::{generate_coinbase, CoinbaseScript};
use crate::tx::merkle::merkle_root_hex;
use crate::tx::{TxContext, TxOut};

/// Tag written after the height in every coinbase script.
pub(crate) const POOL_TAG: &[u8] = b"/lodestone/";

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TemplateTx {
    pub data: String,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl TemplateTx {
    fn id(&self) -> Result<&str> {
        self.txid
            .as_deref()
            .or(self.hash.as_deref())
            .ok_or_else(|| PoolError::upstream("template transaction without txid"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BlockTemplate {
    pub version: u32,
    #[serde(rename = "previousblockhash")]
    pub prev_hash: String,
    pub bits: String,
    pub height: u64,
    #[serde(rename = "curtime")]
    pub cur_time: u32,
    #[serde(rename = "coinbasevalue")]
    pub coinbase_value: u64,
    #[serde(default)]
    pub transactions: Vec<TemplateTx>,
    /// Chain-specific fields (masternode payouts, sapling root, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BlockTemplate {
    pub fn parse(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| PoolError::upstream(format!("getblocktemplate: {}", e)))
    }

    pub fn bits(&self) -> Result<u32> {
        u32::from_str_radix(&self.bits, 16)
            .map_err(|_| PoolError::upstream(format!("template bits {:?}", self.bits)))
    }

    /// Template transactions minus blacklisted txids.
    pub fn included(&self, blacklist: &[String]) -> Vec<&TemplateTx> {
        self.transactions
            .iter()
            .filter(|tx| match tx.id() {
                Ok(id) => !blacklist.iter().any(|b| b.eq_ignore_ascii_case(id)),
                Err(_) => true,
            })
            .collect()
    }

    pub fn extra_str(&self, name: &str) -> Result<&str> {
        self.extra
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| PoolError::upstream(format!("template missing {:?}", name)))
    }

    pub fn extra_u64(&self, name: &str) -> Result<u64> {
        self.extra
            .get(name)
            .and_then(Value::as_u64)
            .ok_or_else(|| PoolError::upstream(format!("template missing {:?}", name)))
    }
}

/// Coinbase plus the transaction set of a job.
#[derive(Debug, Clone)]
pub(crate) struct AssembledBlock {
    pub coinbase_txid: String,
    /// Display-order hex.
    pub merkle_root: String,
    /// Serialized transactions, coinbase first.
    pub txs: Vec<Vec<u8>>,
}

pub(crate) fn assemble(
    ctx: &TxContext,
    template: &BlockTemplate,
    outputs: Vec<TxOut>,
    extra_payload: Option<&[u8]>,
    included: &[&TemplateTx],
) -> Result<AssembledBlock> {
    let script = CoinbaseScript {
        height: template.height,
        extra_data: POOL_TAG.to_vec(),
        ..Default::default()
    };
    let coinbase = generate_coinbase(ctx, &script, outputs)?;
    let coinbase_txid = coinbase.txid(extra_payload);

    let mut txids = vec![coinbase_txid.clone()];
    let mut txs = vec![coinbase.serialize(extra_payload)];
    for tx in included {
        txids.push(tx.id()?.to_string());
        txs.push(hex::decode(&tx.data)?);
    }

    Ok(AssembledBlock {
        merkle_root: merkle_root_hex(&txids)?,
        coinbase_txid,
        txs,
    })
}
