//! Node operations shared by the bitcoind-derived chains (RVN, FIRO, FLUX).

use futures::stream::{self, StreamExt, TryStreamExt};
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use secp256k1::SecretKey;
use serde_json::{json, Value};
use time::OffsetDateTime;

use super::{coin_to_units, field, field_str, field_u64, BlockSummary, ChainId, CreatedTx, NodeStatus, TxOutput, TxResponse};
use crate::error::{PoolError, Result};
use crate::rpc::Transport;
use crate::tracing::prelude::*;
use crate::tx::fee::{generate_tx, PayoutOutput, SpendInput};
use crate::tx::TxContext;
use crate::types::{Round, Utxo};

/// Child requests in flight while walking a block range.
pub(crate) const BLOCK_FANOUT: usize = 25;

pub(crate) async fn get_status(transport: &Transport) -> Result<NodeStatus> {
    let info = transport.exec_rpc("getblockchaininfo", json!([])).await?;
    Ok(NodeStatus {
        height: field_u64(&info, "blocks")?,
        syncing: info
            .get("initialblockdownload")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

async fn block_summary(transport: &Transport, chain: ChainId, height: u64) -> Result<BlockSummary> {
    let hash = transport.exec_rpc("getblockhash", json!([height])).await?;
    let hash = hash
        .as_str()
        .ok_or_else(|| PoolError::upstream(format!("getblockhash {}: not a string", height)))?
        .to_string();
    let block = transport.exec_rpc("getblock", json!([hash])).await?;
    let txids = field(&block, "tx")?
        .as_array()
        .ok_or_else(|| PoolError::upstream(format!("block {}: tx is not an array", hash)))?;
    let coinbase_id = txids
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| PoolError::upstream(format!("block {}: no coinbase", hash)))?;
    let coinbase = transport
        .exec_rpc("getrawtransaction", json!([coinbase_id, 1]))
        .await?;

    let value: f64 = vouts(&coinbase)?
        .iter()
        .filter_map(|out| out.get("value").and_then(Value::as_f64))
        .sum();

    Ok(BlockSummary {
        chain,
        height,
        value,
        difficulty: block.get("difficulty").and_then(Value::as_f64).unwrap_or_default(),
        tx_count: txids.len() as u64,
        timestamp: field_u64(&block, "time")?,
        hash,
    })
}

pub(crate) async fn get_blocks(transport: &Transport, chain: ChainId, start: u64, end: u64) -> Result<Vec<BlockSummary>> {
    if end < start {
        return Err(PoolError::invalid(format!("block range {}..={} is empty", start, end)));
    }
    stream::iter(start..=end)
        .map(|height| block_summary(transport, chain, height))
        .buffered(BLOCK_FANOUT)
        .try_collect()
        .await
}

fn vouts(tx: &Value) -> Result<&Vec<Value>> {
    field(tx, "vout")?
        .as_array()
        .ok_or_else(|| PoolError::upstream("vout is not an array"))
}

/// `(index, value)` of every output paying `script_hex`.
pub(crate) fn outputs_paying(tx: &Value, script_hex: &str, units: u32) -> Result<Vec<(u32, BigInt)>> {
    let mut found = Vec::new();
    for (position, out) in vouts(tx)?.iter().enumerate() {
        let script = out.pointer("/scriptPubKey/hex").and_then(Value::as_str);
        if script.map(|s| s.eq_ignore_ascii_case(script_hex)).unwrap_or(false) {
            let index = out.get("n").and_then(Value::as_u64).unwrap_or(position as u64);
            let index = u32::try_from(index).map_err(|_| PoolError::upstream(format!("vout index {}", index)))?;
            found.push((index, coin_to_units(field(out, "value")?, units)?));
        }
    }
    Ok(found)
}

/// The canonical block and coinbase for a round, or `None` when the round
/// has been orphaned (off the main chain or not our coinbase).
pub(crate) async fn fetch_coinbase(transport: &Transport, round: &Round) -> Result<Option<(Value, Value)>> {
    let block = transport.exec_rpc("getblock", json!([round.hash])).await?;
    let confirmations = block.get("confirmations").and_then(Value::as_i64).unwrap_or(-1);
    if confirmations == -1 {
        return Ok(None);
    }

    let first = field(&block, "tx")?
        .as_array()
        .and_then(|txs| txs.first())
        .and_then(Value::as_str)
        .map(str::to_string);
    let expected = round.coinbase_txid.as_deref();
    match (first, expected) {
        (Some(first), Some(expected)) if first.eq_ignore_ascii_case(expected) => {
            let coinbase = transport.exec_rpc("getrawtransaction", json!([first, 1])).await?;
            Ok(Some((block, coinbase)))
        }
        _ => Ok(None),
    }
}

fn block_time(block: &Value) -> Option<OffsetDateTime> {
    block
        .get("time")
        .and_then(Value::as_i64)
        .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
}

/// Shared unlock: orphan detection, then `value` from the outputs paying
/// the pool script. `check` lets a chain validate the coinbase further.
pub(crate) async fn unlock_round<F>(
    transport: &Transport,
    round: &mut Round,
    pool_script_hex: &str,
    units: u32,
    check: F,
) -> Result<()>
where
    F: FnOnce(&Value) -> Result<()>,
{
    let Some((block, coinbase)) = fetch_coinbase(transport, round).await? else {
        info!(chain = %round.chain_id, height = round.height, hash = %round.hash, "Round orphaned");
        round.mark_orphan();
        return Ok(());
    };
    check(&coinbase)?;

    let paid: BigInt = outputs_paying(&coinbase, pool_script_hex, units)?
        .into_iter()
        .map(|(_, value)| value)
        .sum();
    if paid.is_zero() {
        info!(chain = %round.chain_id, height = round.height, "Coinbase does not pay the pool, orphaning");
        round.mark_orphan();
        return Ok(());
    }

    round.orphan = false;
    round.pending = false;
    round.value = Some(paid);
    if let Some(at) = block_time(&block) {
        round.created_at = Some(at);
    }
    info!(chain = %round.chain_id, height = round.height, value = ?round.value, "Round unlocked");
    Ok(())
}

pub(crate) async fn mature_round(
    transport: &Transport,
    round: &mut Round,
    pool_script_hex: &str,
    units: u32,
    mature_depth: u64,
) -> Result<Vec<Utxo>> {
    let block = transport.exec_rpc("getblock", json!([round.hash])).await?;
    let confirmations = block.get("confirmations").and_then(Value::as_i64).unwrap_or(-1);
    if confirmations == -1 {
        round.mark_orphan();
        return Ok(Vec::new());
    }
    if (confirmations as u64) < mature_depth {
        return Ok(Vec::new());
    }

    let txid = round
        .coinbase_txid
        .clone()
        .ok_or_else(|| PoolError::invariant(format!("round {}: no coinbase txid", round.id)))?;
    let coinbase = transport.exec_rpc("getrawtransaction", json!([txid, 1])).await?;
    let utxos = outputs_paying(&coinbase, pool_script_hex, units)?
        .into_iter()
        .map(|(index, value)| {
            let mut utxo = Utxo::new(&round.chain_id, &txid, index, value);
            utxo.round_id = Some(round.id);
            utxo
        })
        .collect();

    round.mark_mature()?;
    Ok(utxos)
}

/// `submitblock`: null on success, a rejection reason otherwise.
pub(crate) async fn submit_block(transport: &Transport, chain: ChainId, block: &[u8]) -> Result<()> {
    let reply = transport.exec_rpc("submitblock", json!([hex::encode(block)])).await?;
    match reply {
        Value::Null => Ok(()),
        Value::String(reason) => Err(PoolError::upstream(format!("{}: block rejected: {}", chain, reason))),
        other => Err(PoolError::upstream(format!("{}: submitblock returned {}", chain, other))),
    }
}

pub(crate) async fn get_balance(transport: &Transport, address: &str) -> Result<BigInt> {
    let reply = transport
        .exec_rpc("getaddressbalance", json!([{ "addresses": [address] }]))
        .await?;
    Ok(BigInt::from(field_u64(&reply, "balance")?))
}

pub(crate) async fn get_tx(transport: &Transport, txid: &str) -> Result<TxResponse> {
    let tx = transport.exec_rpc("getrawtransaction", json!([txid, 1])).await?;
    let confirmations = tx.get("confirmations").and_then(Value::as_u64).unwrap_or(0);
    Ok(TxResponse {
        txid: field_str(&tx, "txid").unwrap_or(txid).to_string(),
        confirmations,
        confirmed: confirmations > 0,
        fee: None,
    })
}

pub(crate) async fn broadcast_tx(transport: &Transport, raw: &str) -> Result<String> {
    let txid = transport.exec_rpc("sendrawtransaction", json!([raw])).await?;
    txid.as_str()
        .map(str::to_string)
        .ok_or_else(|| PoolError::upstream("sendrawtransaction: txid is not a string"))
}

fn to_u64(value: &BigInt, what: &str) -> Result<u64> {
    value
        .to_u64()
        .ok_or_else(|| PoolError::invalid(format!("{} {} out of range", what, value)))
}

/// Sign a payout spending pool-owned outputs locked to `pool_script`.
pub(crate) fn create_tx(
    ctx: &TxContext,
    secret: &SecretKey,
    pool_script: &[u8],
    inputs: &[Utxo],
    outputs: &[TxOutput],
    fee_per_byte: u64,
) -> Result<CreatedTx> {
    let spends = inputs
        .iter()
        .map(|utxo| {
            Ok(SpendInput {
                txid: utxo.txid.clone(),
                index: utxo.index,
                value: to_u64(&utxo.value, "input")?,
                script_pubkey: pool_script.to_vec(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let payouts = outputs
        .iter()
        .map(|out| {
            Ok(PayoutOutput {
                address: out.address.clone(),
                value: to_u64(&out.value, "output")?,
                split_fee: out.split_fee,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let generated = generate_tx(ctx, secret, &spends, &payouts, fee_per_byte)?;
    Ok(CreatedTx {
        txid: generated.txid,
        raw: hex::encode(generated.raw),
        fee: BigInt::from(generated.fee),
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::rpc::FixtureMap;
    use std::sync::Arc;

    const POOL_SCRIPT: &str = "76a914111111111111111111111111111111111111111188ac";

    fn transport(fixtures: FixtureMap) -> Transport {
        Transport::Mock(Arc::new(fixtures))
    }

    fn round(coinbase_txid: &str) -> Round {
        let mut round = Round::pending("RVN", 1874596, &"ab".repeat(32), 81234.5);
        round.id = 7;
        round.coinbase_txid = Some(coinbase_txid.to_string());
        round
    }

    #[tokio::test]
    async fn test_unlock_assigns_pool_value() {
        let cb = "cc".repeat(32);
        let fixtures = FixtureMap::new()
            .with_rpc("getblock", block(&"ab".repeat(32), 30, &cb))
            .with_rpc(
                "getrawtransaction",
                coinbase(&cb, &[(2500.0, POOL_SCRIPT), (125.5, "76a914222222222222222222222222222222222222222288ac")]),
            );
        let mut round = round(&cb);
        unlock_round(&transport(fixtures), &mut round, POOL_SCRIPT, 8, |_| Ok(()))
            .await
            .unwrap();

        assert!(!round.orphan);
        assert!(!round.pending);
        assert_eq!(round.value, Some(BigInt::from(250_000_000_000u64)));
        assert!(round.created_at.is_some());
    }

    #[tokio::test]
    async fn test_unlock_orphans_are_idempotent() {
        let cb = "cc".repeat(32);
        let transport = transport(FixtureMap::new().with_rpc("getblock", block(&"ab".repeat(32), -1, &cb)));
        let mut round = round(&cb);
        unlock_round(&transport, &mut round, POOL_SCRIPT, 8, |_| Ok(())).await.unwrap();
        let first = (round.pending, round.mature, round.orphan);
        unlock_round(&transport, &mut round, POOL_SCRIPT, 8, |_| Ok(())).await.unwrap();
        assert_eq!((round.pending, round.mature, round.orphan), first);
        assert!(round.orphan);
    }

    #[tokio::test]
    async fn test_unlock_orphans_foreign_coinbase() {
        let transport = transport(FixtureMap::new().with_rpc("getblock", block(&"ab".repeat(32), 10, &"dd".repeat(32))));
        let mut round = round(&"cc".repeat(32));
        unlock_round(&transport, &mut round, POOL_SCRIPT, 8, |_| Ok(())).await.unwrap();
        assert!(round.orphan);
        assert!(round.value.is_none());
    }

    #[tokio::test]
    async fn test_mature_round_waits_for_depth() {
        let cb = "cc".repeat(32);
        let fixtures = FixtureMap::new()
            .with_rpc("getblock", block(&"ab".repeat(32), 50, &cb))
            .with_rpc("getrawtransaction", coinbase(&cb, &[(2500.0, POOL_SCRIPT)]));
        let transport = transport(fixtures);
        let mut round = round(&cb);
        round.value = Some(BigInt::from(250_000_000_000u64));

        assert!(mature_round(&transport, &mut round, POOL_SCRIPT, 8, 101).await.unwrap().is_empty());
        assert!(!round.mature);

        let utxos = mature_round(&transport, &mut round, POOL_SCRIPT, 8, 25).await.unwrap();
        assert!(round.mature);
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].index, 0);
        assert_eq!(utxos[0].round_id, Some(7));
        assert_eq!(utxos[0].value, BigInt::from(250_000_000_000u64));
    }

    #[tokio::test]
    async fn test_get_blocks_in_order() {
        let cb = "cc".repeat(32);
        let fixtures = FixtureMap::new()
            .with_rpc_for("getblockhash", json!([10]), json!("0a".repeat(32)))
            .with_rpc_for("getblockhash", json!([11]), json!("0b".repeat(32)))
            .with_rpc("getblock", block(&"0a".repeat(32), 5, &cb))
            .with_rpc("getrawtransaction", coinbase(&cb, &[(2500.0, POOL_SCRIPT), (0.5, POOL_SCRIPT)]));
        let blocks = get_blocks(&transport(fixtures), ChainId::Rvn, 10, 11).await.unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].height, 10);
        assert_eq!(blocks[1].hash, "0b".repeat(32));
        assert_eq!(blocks[0].value, 2500.5);
        assert_eq!(blocks[0].tx_count, 2);
        assert!(get_blocks(&Transport::Mock(Arc::new(FixtureMap::new())), ChainId::Rvn, 5, 4).await.is_err());
    }

    #[tokio::test]
    async fn test_tx_and_balance_calls() {
        let fixtures = FixtureMap::new()
            .with_rpc("getaddressbalance", json!({"balance": 1234, "received": 5000}))
            .with_rpc("getrawtransaction", json!({"txid": "ff", "confirmations": 3}))
            .with_rpc("sendrawtransaction", json!("ff"));
        let transport = transport(fixtures);
        assert_eq!(get_balance(&transport, "RAddr").await.unwrap(), BigInt::from(1234));
        let tx = get_tx(&transport, "ff").await.unwrap();
        assert!(tx.confirmed);
        assert_eq!(tx.confirmations, 3);
        assert_eq!(broadcast_tx(&transport, "00").await.unwrap(), "ff");
    }
}
