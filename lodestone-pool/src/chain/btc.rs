//! Bitcoin payouts through a block explorer.
//!
//! The pool never mines BTC; it only receives switch withdrawals and pays
//! them out. There is no node: balances and confirmations come from a
//! blockchair-style REST facade and the fee rate from public fee APIs.

use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigInt;
use reqwest::Method;
use secp256k1::SecretKey;
use serde_json::{json, Value};

use super::{utxo, ChainId, CreatedTx, PayoutNode, TxOutput, TxResponse};
use crate::config::{ChainParams, NodeConfig};
use crate::crypto::keys::{obscure_private_key, p2pkh_address, public_key};
use crate::error::{PoolError, Result};
use crate::rpc::Transport;
use crate::tracing::prelude::*;
use crate::tx::{address_to_script, TxContext};
use crate::types::Utxo;

const FEE_API_TIMEOUT: Duration = Duration::from_secs(3);

type FeeParser = fn(&Value) -> Option<u64>;

/// Public fee-rate sources in the order they are tried.
const FEE_SOURCES: [(&str, FeeParser); 3] = [
    ("https://api.blockchain.info/mempool/fees", parse_blockchain_info),
    ("https://www.bitgo.com/api/v2/btc/tx/fee", parse_bitgo),
    ("https://bitcoiner.live/api/fees/estimates/latest", parse_bitcoiner),
];

/// `{"regular": 12, "priority": 20, ...}` in sat/vB.
fn parse_blockchain_info(reply: &Value) -> Option<u64> {
    reply.get("regular")?.as_u64()
}

/// `{"feePerKb": 12000, ...}` in sat/kB.
fn parse_bitgo(reply: &Value) -> Option<u64> {
    Some(reply.get("feePerKb")?.as_u64()? / 1000)
}

/// Half-hour target of `{"estimates": {"30": {"sat_per_vbyte": 11.2}}}`.
fn parse_bitcoiner(reply: &Value) -> Option<u64> {
    let rate = reply.pointer("/estimates/30/sat_per_vbyte")?.as_f64()?;
    (rate.is_finite() && rate > 0.0).then(|| rate.ceil() as u64)
}

pub struct BtcNode {
    params: ChainParams,
    ctx: TxContext,
    transport: Transport,
    api_key: Option<String>,
    secret: SecretKey,
    address: String,
    pool_script: Vec<u8>,
}

impl BtcNode {
    pub fn new(config: &NodeConfig, transport: Transport) -> Result<Self> {
        let ctx = if config.mainnet {
            TxContext::bitcoin()
        } else {
            TxContext::bitcoin_testnet()
        };
        let secret = obscure_private_key(&config.raw_priv_hex)?;
        let address = p2pkh_address(&public_key(&secret), &ctx.prefix_p2pkh);
        let pool_script = address_to_script(&address, &ctx)?;

        Ok(Self {
            params: ChainParams::for_chain(ChainId::Btc, config.mainnet),
            ctx,
            transport,
            api_key: config.external_api_key.clone(),
            secret,
            address,
            pool_script,
        })
    }

    /// Fee rate in sat/byte from the first source that answers with a
    /// non-zero value.
    pub async fn fee_rate(&self) -> Result<u64> {
        for (url, parse) in FEE_SOURCES {
            match self.transport.fetch_url(url, FEE_API_TIMEOUT).await {
                Ok(reply) => match parse(&reply) {
                    Some(rate) if rate > 0 => return Ok(rate),
                    _ => debug!(chain = "BTC", url, "Fee source returned no usable rate"),
                },
                Err(e) => debug!(chain = "BTC", url, error = %e, "Fee source failed"),
            }
        }
        warn!(chain = "BTC", "No fee source answered");
        Err(PoolError::upstream("BTC: no fee rate source answered"))
    }

    fn explorer_path(&self, path: &str) -> String {
        match &self.api_key {
            Some(key) => format!("{}?key={}", path, key),
            None => path.to_string(),
        }
    }

    /// Explorer call, unwrapped from its `{data, context}` envelope.
    async fn explorer(&self, method: Method, path: &str, body: Option<Value>) -> Result<(Value, Value)> {
        let reply = self
            .transport
            .exec_http(method, &self.explorer_path(path), body)
            .await?;
        let context = reply.get("context").cloned().unwrap_or(Value::Null);
        match context.get("code").and_then(Value::as_u64) {
            Some(200) => {}
            code => {
                let message = context.get("error").and_then(Value::as_str).unwrap_or("no error message");
                return Err(PoolError::upstream(format!("BTC explorer {}: code {:?}: {}", path, code, message)));
            }
        }
        let data = reply
            .get("data")
            .cloned()
            .ok_or_else(|| PoolError::upstream(format!("BTC explorer {}: no data", path)))?;
        Ok((data, context))
    }
}

#[async_trait]
impl PayoutNode for BtcNode {
    fn chain(&self) -> ChainId {
        self.params.chain
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn get_balance(&self, address: &str) -> Result<BigInt> {
        let (data, _) = self
            .explorer(Method::GET, &format!("/dashboards/address/{}", address), None)
            .await?;
        let balance = data
            .get(address)
            .and_then(|entry| entry.pointer("/address/balance"))
            .and_then(Value::as_i64)
            .ok_or_else(|| PoolError::upstream(format!("BTC explorer: no balance for {}", address)))?;
        Ok(BigInt::from(balance))
    }

    async fn get_tx(&self, txid: &str) -> Result<TxResponse> {
        let (data, context) = self
            .explorer(Method::GET, &format!("/dashboards/transaction/{}", txid), None)
            .await?;
        let tx = data
            .get(txid)
            .and_then(|entry| entry.get("transaction"))
            .ok_or_else(|| PoolError::upstream(format!("BTC explorer: unknown transaction {}", txid)))?;

        let block_id = tx.get("block_id").and_then(Value::as_i64).unwrap_or(-1);
        let tip = context.get("state").and_then(Value::as_i64).unwrap_or(block_id);
        let confirmations = if block_id < 0 { 0 } else { (tip - block_id + 1).max(0) as u64 };
        Ok(TxResponse {
            txid: txid.to_string(),
            confirmations,
            confirmed: confirmations > 0,
            fee: tx.get("fee").and_then(Value::as_i64).map(BigInt::from),
        })
    }

    async fn create_tx(&self, inputs: &[Utxo], outputs: &[TxOutput]) -> Result<CreatedTx> {
        let fee_per_byte = self.fee_rate().await?;
        utxo::create_tx(&self.ctx, &self.secret, &self.pool_script, inputs, outputs, fee_per_byte)
    }

    async fn broadcast_tx(&self, raw: &str) -> Result<String> {
        let (data, _) = self
            .explorer(Method::POST, "/push/transaction", Some(json!({ "data": raw })))
            .await?;
        data.get("transaction_hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PoolError::upstream("BTC explorer: push returned no transaction hash"))
    }
}
