//! Flux adapter: Equihash 125,4 over a Zcash-style header.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use secp256k1::SecretKey;
use serde_json::{json, Value};

use super::template::{assemble, BlockTemplate};
use super::{utxo, BlockSummary, ChainId, CreatedTx, MiningNode, NodeStatus, PayoutNode, TxOutput, TxResponse};
use crate::block::EquihashHeader;
use crate::config::{ChainParams, DevWallet, NodeConfig};
use crate::crypto::keys::{obscure_private_key, p2pkh_address, public_key};
use crate::crypto::{reversed, sha256d};
use crate::error::{PoolError, Result};
use crate::pow::EquihashVerifier;
use crate::rpc::{HostPing, Transport};
use crate::stratum::{self, BlockBuilder, StratumJob, StratumWork, SubmitOutcome, WorkSolution};
use crate::tracing::prelude::*;
use crate::tx::{address_to_script, TxContext, TxOut};
use crate::types::{target_from_bits, Difficulty, Round, Utxo};
use crate::u256::U256;

/// Fluxnode tiers as named in the block template.
const NODE_TIERS: [&str; 3] = ["cumulus", "nimbus", "stratus"];

/// Check the three fluxnode payouts against the 5% / 12.5% / 30% split.
pub fn check_fluxnode_ratio(amounts: &[u64]) -> Result<()> {
    let mut sorted = amounts.to_vec();
    sorted.sort_unstable();
    match sorted.as_slice() {
        [a, b, c] if *a > 0 && b * 2 == a * 5 && *c == a * 6 => Ok(()),
        _ => Err(PoolError::invariant(format!(
            "fluxnode payouts {:?} do not match the expected split",
            amounts
        ))),
    }
}

pub struct FluxNode {
    params: ChainParams,
    ctx: TxContext,
    transport: Transport,
    verifier: Option<Arc<dyn EquihashVerifier>>,
    secret: SecretKey,
    address: String,
    pool_script: Vec<u8>,
    dev_wallets: Vec<DevWallet>,
    txid_blacklist: Vec<String>,
    next_job: AtomicU64,
}

impl FluxNode {
    pub fn new(config: &NodeConfig, transport: Transport, verifier: Option<Arc<dyn EquihashVerifier>>) -> Result<Self> {
        let ctx = TxContext::flux(config.mainnet);
        let secret = obscure_private_key(&config.raw_priv_hex)?;
        let address = p2pkh_address(&public_key(&secret), &ctx.prefix_p2pkh);
        let pool_script = address_to_script(&address, &ctx)?;

        Ok(Self {
            params: ChainParams::for_chain(ChainId::Flux, config.mainnet),
            ctx,
            transport,
            verifier,
            secret,
            address,
            pool_script,
            dev_wallets: config.dev_wallets.clone(),
            txid_blacklist: config.txid_blacklist.clone(),
            next_job: AtomicU64::new(1),
        })
    }

    fn verifier(&self) -> Result<&Arc<dyn EquihashVerifier>> {
        self.verifier
            .as_ref()
            .ok_or_else(|| PoolError::invalid("FLUX: no equihash verifier configured"))
    }

    fn fluxnode_outputs(&self, template: &BlockTemplate) -> Result<Vec<TxOut>> {
        NODE_TIERS
            .iter()
            .filter(|tier| template.extra.contains_key(&format!("{}_fluxnode_payout_address", tier)))
            .map(|tier| {
                let address = template.extra_str(&format!("{}_fluxnode_payout_address", tier))?;
                Ok(TxOut {
                    value: template.extra_u64(&format!("{}_fluxnode_payout_amount", tier))?,
                    script: address_to_script(address, &self.ctx)?,
                })
            })
            .collect()
    }

    /// Pool output first, then dev wallets and fluxnode payouts.
    pub(crate) fn coinbase_outputs(&self, template: &BlockTemplate) -> Result<Vec<TxOut>> {
        let mut others = Vec::new();
        for wallet in &self.dev_wallets {
            others.push(TxOut {
                value: wallet.amount,
                script: address_to_script(&wallet.address, &self.ctx)?,
            });
        }
        others.extend(self.fluxnode_outputs(template)?);

        let owed: u64 = others.iter().map(|o| o.value).sum();
        let pool_value = template.coinbase_value.checked_sub(owed).ok_or_else(|| {
            PoolError::upstream(format!(
                "FLUX: coinbase value {} below required payouts {}",
                template.coinbase_value, owed
            ))
        })?;

        let mut outputs = vec![TxOut {
            value: pool_value,
            script: self.pool_script.clone(),
        }];
        outputs.extend(others);
        Ok(outputs)
    }

    /// Non-pool coinbase outputs minus dev wallet amounts must be the three
    /// fluxnode tiers.
    fn check_coinbase(&self, coinbase: &Value) -> Result<()> {
        let pool_script = hex::encode(&self.pool_script);
        let mut dev_amounts: Vec<u64> = self.dev_wallets.iter().map(|w| w.amount).collect();
        let mut node_amounts = Vec::new();

        let outputs = coinbase
            .get("vout")
            .and_then(Value::as_array)
            .ok_or_else(|| PoolError::upstream("coinbase without vout"))?;
        for out in outputs {
            let script = out.pointer("/scriptPubKey/hex").and_then(Value::as_str).unwrap_or_default();
            if script.eq_ignore_ascii_case(&pool_script) {
                continue;
            }
            let value = super::coin_to_units(super::field(out, "value")?, self.params.units)?
                .to_u64()
                .ok_or_else(|| PoolError::upstream("coinbase output out of range"))?;
            if value == 0 {
                continue;
            }
            match dev_amounts.iter().position(|a| *a == value) {
                Some(i) => {
                    dev_amounts.swap_remove(i);
                }
                None => node_amounts.push(value),
            }
        }
        check_fluxnode_ratio(&node_amounts)
    }
}

#[async_trait]
impl MiningNode for FluxNode {
    fn chain(&self) -> ChainId {
        ChainId::Flux
    }

    fn params(&self) -> &ChainParams {
        &self.params
    }

    async fn get_status(&self) -> Result<NodeStatus> {
        utxo::get_status(&self.transport).await
    }

    async fn ping_hosts(&self) -> Vec<HostPing> {
        self.transport.ping_hosts().await
    }

    async fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<BlockSummary>> {
        utxo::get_blocks(&self.transport, ChainId::Flux, start, end).await
    }

    async fn get_job(&self) -> Result<StratumJob> {
        let reply = self
            .transport
            .exec_rpc_from_args_synced("getblocktemplate", json!([]))
            .await?;
        let template = BlockTemplate::parse(reply)?;
        let bits = template.bits()?;
        let included = template.included(&self.txid_blacklist);

        let block = assemble(&self.ctx, &template, self.coinbase_outputs(&template)?, None, &included)?;
        let header = EquihashHeader::new(
            template.version,
            &template.prev_hash,
            &block.merkle_root,
            template.extra_str("finalsaplingroothash")?,
            template.cur_time,
            bits,
        )?;

        let network_target = target_from_bits(bits);
        Ok(StratumJob {
            id: format!("{:x}", self.next_job.fetch_add(1, Ordering::Relaxed)),
            host_id: String::new(),
            header_hash: hex::encode(reversed(sha256d(&header.serialize()))),
            seed_hash: None,
            height: template.height,
            bits,
            network_difficulty: Difficulty::from_hash(network_target, self.params.max_target).value(),
            network_target,
            coinbase_txid: Some(block.coinbase_txid),
            builder: BlockBuilder::Equihash {
                header,
                txs: block.txs,
            },
        })
    }

    fn notify_params(&self, job: &StratumJob, clean_jobs: bool) -> Result<Vec<Value>> {
        match &job.builder {
            BlockBuilder::Equihash { header, .. } => Ok(stratum::equihash_notify(&job.id, header, clean_jobs)),
            _ => Err(PoolError::invalid(format!("job {} is not an equihash job", job.id))),
        }
    }

    fn parse_work(&self, params: &[Value], extra_nonce: &str) -> Result<StratumWork> {
        stratum::parse_equihash_work(params, extra_nonce)
    }

    async fn submit_work(&self, job: &StratumJob, work: &StratumWork, diff_factor: f64) -> Result<SubmitOutcome> {
        let WorkSolution::Equihash { nonce, ntime, solution } = &work.solution else {
            return Ok(SubmitOutcome::invalid());
        };
        let BlockBuilder::Equihash { header, txs } = &job.builder else {
            return Err(PoolError::invalid(format!("job {} is not an equihash job", job.id)));
        };
        if solution.len() < 2 {
            return Ok(SubmitOutcome::invalid());
        }

        let mut header = header.clone().with_nonce(nonce)?;
        header.ntime = *ntime;
        if !self.verifier()?.verify(&header.serialize(), &solution[1..]) {
            return Ok(SubmitOutcome::invalid());
        }

        let hash_bytes = header.hash(solution);
        let hash = hex::encode(hash_bytes);
        let digest = U256::from_be_bytes(hash_bytes);
        let share_difficulty = Difficulty::new(self.params.share_difficulty).scaled(diff_factor);
        if !share_difficulty.is_met_by(digest, self.params.max_target) {
            debug!(chain = "FLUX", worker = %work.worker_id, hash = %hash, "Share rejected");
            return Ok(SubmitOutcome::rejected(hash));
        }

        let mut outcome = SubmitOutcome::accepted(hash.clone());
        if digest > job.network_target {
            return Ok(outcome);
        }

        info!(chain = "FLUX", height = job.height, hash = %hash, worker = %work.worker_id, "Block found");
        let block = header.serialize_block(solution, txs);
        if let Err(e) = utxo::submit_block(&self.transport, ChainId::Flux, &block).await {
            error!(chain = "FLUX", height = job.height, error = %e, "Block submission failed");
            outcome.submit_error = Some(e);
        }

        let mut round = Round::pending("FLUX", job.height, &hash, job.network_difficulty);
        round.nonce = Some(hex::encode(nonce));
        round.solution = Some(hex::encode(solution));
        round.coinbase_txid = job.coinbase_txid.clone();
        outcome.round = Some(round);
        Ok(outcome)
    }

    async fn unlock_round(&self, round: &mut Round) -> Result<()> {
        let script = hex::encode(&self.pool_script);
        utxo::unlock_round(&self.transport, round, &script, self.params.units, |coinbase| {
            self.check_coinbase(coinbase)
        })
        .await
    }

    async fn mature_round(&self, round: &mut Round) -> Result<Vec<Utxo>> {
        let script = hex::encode(&self.pool_script);
        utxo::mature_round(&self.transport, round, &script, self.params.units, self.params.mature_depth).await
    }
}

#[async_trait]
impl PayoutNode for FluxNode {
    fn chain(&self) -> ChainId {
        ChainId::Flux
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn get_balance(&self, address: &str) -> Result<BigInt> {
        utxo::get_balance(&self.transport, address).await
    }

    async fn get_tx(&self, txid: &str) -> Result<TxResponse> {
        utxo::get_tx(&self.transport, txid).await
    }

    async fn create_tx(&self, inputs: &[Utxo], outputs: &[TxOutput]) -> Result<CreatedTx> {
        utxo::create_tx(
            &self.ctx,
            &self.secret,
            &self.pool_script,
            inputs,
            outputs,
            self.params.fee_per_byte,
        )
    }

    async fn broadcast_tx(&self, raw: &str) -> Result<String> {
        utxo::broadcast_tx(&self.transport, raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::utxo::fixtures;
    use super::*;
    use crate::rpc::FixtureMap;
    use test_case::test_case;

    fn node_address(node: &FluxNode) -> String {
        node.address.clone()
    }

    fn template(node_address: &str) -> Value {
        json!({
            "version": 4,
            "previousblockhash": "00000000a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c",
            "finalsaplingroothash": "3e49b5f954aa9d3545bc6c37744661eea48d7c34e3000d82b7f0010c30f4c2fb",
            "bits": "1d07ffff",
            "height": 1500000,
            "curtime": 1700000000,
            "coinbasevalue": 1_000_000_000u64,
            "transactions": [],
            "cumulus_fluxnode_payout_address": node_address,
            "cumulus_fluxnode_payout_amount": 50_000_000u64,
            "nimbus_fluxnode_payout_address": node_address,
            "nimbus_fluxnode_payout_amount": 125_000_000u64,
            "stratus_fluxnode_payout_address": node_address,
            "stratus_fluxnode_payout_amount": 300_000_000u64
        })
    }

    fn node(fixtures: Arc<FixtureMap>, valid: bool) -> FluxNode {
        FluxNode::new(&config(true), Transport::Mock(fixtures), Some(Arc::new(FixedEquihash(valid)))).unwrap()
    }

    fn work(ntime: u32) -> StratumWork {
        let mut solution = vec![0x34];
        solution.extend_from_slice(&[0x5a; 52]);
        StratumWork {
            worker_id: "rig".into(),
            job_id: "1".into(),
            solution: WorkSolution::Equihash {
                nonce: [0x07; 32],
                ntime,
                solution,
            },
        }
    }

    #[test_case(&[50, 125, 300], true; "ordered")]
    #[test_case(&[300, 50, 125], true; "unordered")]
    #[test_case(&[50, 125, 301], false; "wrong stratus")]
    #[test_case(&[50, 125], false; "missing tier")]
    #[test_case(&[0, 0, 0], false; "zero")]
    fn test_fluxnode_ratio(amounts: &[u64], ok: bool) {
        assert_eq!(check_fluxnode_ratio(amounts).is_ok(), ok);
    }

    #[tokio::test]
    async fn test_job_subtracts_fluxnode_payouts() {
        let bootstrap = node(Arc::new(FixtureMap::new()), true);
        let address = node_address(&bootstrap);
        let fixtures = Arc::new(FixtureMap::new().with_rpc("getblocktemplate", template(&address)));
        let node = node(fixtures, true);

        let parsed = BlockTemplate::parse(template(&address)).unwrap();
        let values: Vec<u64> = node.coinbase_outputs(&parsed).unwrap().iter().map(|o| o.value).collect();
        assert_eq!(values, vec![525_000_000, 50_000_000, 125_000_000, 300_000_000]);

        let job = node.get_job().await.unwrap();
        let params = node.notify_params(&job, true).unwrap();
        assert_eq!(params.len(), 10);
        assert_eq!(params[8], json!("125_4"));
        assert_eq!(params[9], json!("ZelProof"));
        assert_eq!(params[1], json!("04000000"));
    }

    #[tokio::test]
    async fn test_submit_invalid_and_block() {
        let bootstrap = node(Arc::new(FixtureMap::new()), true);
        let address = node_address(&bootstrap);
        let fixtures = Arc::new(
            FixtureMap::new()
                .with_rpc("getblocktemplate", template(&address))
                .with_rpc("submitblock", Value::Null),
        );

        let rejecting = node(Arc::clone(&fixtures), false);
        let job = rejecting.get_job().await.unwrap();
        let outcome = rejecting.submit_work(&job, &work(1700000000), 1.0).await.unwrap();
        assert_eq!(outcome.status, stratum::ShareStatus::Invalid);

        // A vanishing factor and an all-ones network target accept any hash.
        let accepting = node(Arc::clone(&fixtures), true);
        let mut easy = job.clone();
        easy.network_target = U256::MAX;
        let outcome = accepting.submit_work(&easy, &work(1700000000), 1e-30).await.unwrap();
        assert_eq!(outcome.status, stratum::ShareStatus::Accepted);
        let round = outcome.round.unwrap();
        assert_eq!(round.chain_id, "FLUX");
        assert_eq!(round.solution.as_deref().map(str::len), Some(106));
        assert_eq!(fixtures.calls_to("submitblock").len(), 1);
    }

    #[tokio::test]
    async fn test_unlock_checks_fluxnode_split() {
        let node = node(Arc::new(FixtureMap::new()), true);
        let pool_script = hex::encode(&node.pool_script);
        let other = "76a914333333333333333333333333333333333333333388ac";

        let good = fixtures::coinbase("cb", &[(5.25, &pool_script), (0.5, other), (1.25, other), (3.0, other)]);
        node.check_coinbase(&good).unwrap();

        let bad = fixtures::coinbase("cb", &[(5.25, &pool_script), (0.5, other), (1.0, other), (3.0, other)]);
        assert!(node.check_coinbase(&bad).is_err());
    }
}
