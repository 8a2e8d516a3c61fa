//! Ravencoin (KawPow) and Firo (FiroPow) adapter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigInt;
use secp256k1::SecretKey;
use serde_json::{json, Value};

use super::template::{assemble, BlockTemplate};
use super::{utxo, BlockSummary, ChainId, CreatedTx, MiningNode, NodeStatus, PayoutNode, TxOutput, TxResponse};
use crate::block::ProgPowHeader;
use crate::config::{ChainParams, DevWallet, NodeConfig};
use crate::crypto::ethash_seed_hash;
use crate::crypto::keys::{obscure_private_key, p2pkh_address, public_key};
use crate::error::{PoolError, Result};
use crate::pow::ProgPowHasher;
use crate::rpc::{HostPing, Transport};
use crate::stratum::{self, BlockBuilder, StratumJob, StratumWork, SubmitOutcome, WorkSolution};
use crate::tracing::prelude::*;
use crate::tx::{address_to_script, TxContext, TxOut};
use crate::types::{target_from_bits, Difficulty, Round, Utxo};
use crate::u256::U256;

/// Special-transaction type of Firo's coinbase when it carries a payload.
const FIRO_COINBASE_VERSION: u32 = 3 | (5 << 16);

pub struct ProgPowNode {
    chain: ChainId,
    params: ChainParams,
    ctx: TxContext,
    transport: Transport,
    hasher: Option<Arc<dyn ProgPowHasher>>,
    secret: SecretKey,
    address: String,
    pool_script: Vec<u8>,
    dev_wallets: Vec<DevWallet>,
    txid_blacklist: Vec<String>,
    next_job: AtomicU64,
}

impl ProgPowNode {
    pub fn new(
        chain: ChainId,
        config: &NodeConfig,
        transport: Transport,
        hasher: Option<Arc<dyn ProgPowHasher>>,
    ) -> Result<Self> {
        let ctx = match chain {
            ChainId::Rvn => TxContext::ravencoin(config.mainnet),
            ChainId::Firo => TxContext::firo(config.mainnet),
            other => return Err(PoolError::invalid(format!("{} is not a progpow chain", other))),
        };
        let secret = obscure_private_key(&config.raw_priv_hex)?;
        let address = p2pkh_address(&public_key(&secret), &ctx.prefix_p2pkh);
        let pool_script = address_to_script(&address, &ctx)?;

        Ok(Self {
            chain,
            params: ChainParams::for_chain(chain, config.mainnet),
            ctx,
            transport,
            hasher,
            secret,
            address,
            pool_script,
            dev_wallets: config.dev_wallets.clone(),
            txid_blacklist: config.txid_blacklist.clone(),
            next_job: AtomicU64::new(1),
        })
    }

    fn hasher(&self) -> Result<&Arc<dyn ProgPowHasher>> {
        self.hasher
            .as_ref()
            .ok_or_else(|| PoolError::invalid(format!("{}: no progpow hasher configured", self.chain)))
    }

    /// Masternode ("znode") payees listed in a Firo template.
    fn znode_outputs(&self, template: &BlockTemplate) -> Result<Vec<TxOut>> {
        let Some(Value::Array(payees)) = template.extra.get("znode") else {
            return Ok(Vec::new());
        };
        payees
            .iter()
            .map(|payee| {
                let value = payee
                    .get("amount")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| PoolError::upstream("znode payee without amount"))?;
                let script = match payee.get("script").and_then(Value::as_str) {
                    Some(script) => hex::decode(script)?,
                    None => {
                        let address = payee
                            .get("payee")
                            .and_then(Value::as_str)
                            .ok_or_else(|| PoolError::upstream("znode payee without address"))?;
                        address_to_script(address, &self.ctx)?
                    }
                };
                Ok(TxOut { value, script })
            })
            .collect()
    }

    /// Pool output first, then dev wallets, masternodes and the witness
    /// commitment when the template has one.
    pub(crate) fn coinbase_outputs(&self, template: &BlockTemplate) -> Result<Vec<TxOut>> {
        let mut others = Vec::new();
        for wallet in &self.dev_wallets {
            others.push(TxOut {
                value: wallet.amount,
                script: address_to_script(&wallet.address, &self.ctx)?,
            });
        }
        others.extend(self.znode_outputs(template)?);

        let owed: u64 = others.iter().map(|o| o.value).sum();
        let pool_value = template.coinbase_value.checked_sub(owed).ok_or_else(|| {
            PoolError::upstream(format!(
                "{}: coinbase value {} below required payouts {}",
                self.chain, template.coinbase_value, owed
            ))
        })?;

        let mut outputs = vec![TxOut {
            value: pool_value,
            script: self.pool_script.clone(),
        }];
        outputs.extend(others);
        if let Some(commitment) = template.extra.get("default_witness_commitment").and_then(Value::as_str) {
            outputs.push(TxOut {
                value: 0,
                script: hex::decode(commitment)?,
            });
        }
        Ok(outputs)
    }
}

#[async_trait]
impl MiningNode for ProgPowNode {
    fn chain(&self) -> ChainId {
        self.chain
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
        utxo::get_blocks(&self.transport, self.chain, start, end).await
    }

    async fn get_job(&self) -> Result<StratumJob> {
        let reply = self
            .transport
            .exec_rpc_from_args_synced("getblocktemplate", json!([{ "rules": ["segwit"] }]))
            .await?;
        let template = BlockTemplate::parse(reply)?;
        let bits = template.bits()?;

        // Firo's live template is mined without its mempool transactions.
        let included = match self.chain {
            ChainId::Firo if !self.transport.is_mock() => Vec::new(),
            _ => template.included(&self.txid_blacklist),
        };

        let payload = match template.extra.get("coinbase_payload").and_then(Value::as_str) {
            Some(text) if !text.is_empty() => Some(hex::decode(text)?),
            _ => None,
        };
        let mut ctx = self.ctx.clone();
        if self.chain == ChainId::Firo && payload.is_some() {
            ctx.version = FIRO_COINBASE_VERSION;
        }

        let block = assemble(&ctx, &template, self.coinbase_outputs(&template)?, payload.as_deref(), &included)?;
        let height = u32::try_from(template.height)
            .map_err(|_| PoolError::upstream(format!("template height {}", template.height)))?;
        let header = ProgPowHeader::new(
            template.version,
            &template.prev_hash,
            &block.merkle_root,
            template.cur_time,
            bits,
            height,
        )?;

        let network_target = target_from_bits(bits);
        Ok(StratumJob {
            id: format!("{:x}", self.next_job.fetch_add(1, Ordering::Relaxed)),
            host_id: String::new(),
            header_hash: hex::encode(header.hash()),
            seed_hash: Some(hex::encode(ethash_seed_hash(template.height, self.params.epoch_length))),
            height: template.height,
            bits,
            network_difficulty: Difficulty::from_hash(network_target, self.params.max_target).value(),
            network_target,
            coinbase_txid: Some(block.coinbase_txid),
            builder: BlockBuilder::ProgPow {
                header,
                txs: block.txs,
            },
        })
    }

    fn notify_params(&self, job: &StratumJob, clean_jobs: bool) -> Result<Vec<Value>> {
        let share_target = Difficulty::new(self.params.share_difficulty).to_target(self.params.max_target);
        Ok(stratum::progpow_notify(job, share_target, clean_jobs))
    }

    fn parse_work(&self, params: &[Value], extra_nonce: &str) -> Result<StratumWork> {
        stratum::parse_progpow_work(params, extra_nonce)
    }

    async fn submit_work(&self, job: &StratumJob, work: &StratumWork, diff_factor: f64) -> Result<SubmitOutcome> {
        let WorkSolution::ProgPow {
            nonce,
            header_hash,
            mix_digest,
        } = &work.solution
        else {
            return Ok(SubmitOutcome::invalid());
        };
        let BlockBuilder::ProgPow { header, txs } = &job.builder else {
            return Err(PoolError::invalid(format!("job {} is not a progpow job", job.id)));
        };

        if hex::encode(header_hash) != job.header_hash {
            return Ok(SubmitOutcome::invalid());
        }
        let (mix, digest) = self.hasher()?.hash(job.height, header_hash, *nonce);
        if &mix != mix_digest {
            return Ok(SubmitOutcome::invalid());
        }

        let hash = hex::encode(digest);
        let digest = U256::from_be_bytes(digest);
        let share_difficulty = Difficulty::new(self.params.share_difficulty).scaled(diff_factor);
        if !share_difficulty.is_met_by(digest, self.params.max_target) {
            debug!(chain = %self.chain, worker = %work.worker_id, hash = %hash, "Share rejected");
            return Ok(SubmitOutcome::rejected(hash));
        }

        let mut outcome = SubmitOutcome::accepted(hash.clone());
        if digest > job.network_target {
            return Ok(outcome);
        }

        info!(chain = %self.chain, height = job.height, hash = %hash, worker = %work.worker_id, "Block found");
        let block = header.serialize_block(*nonce, mix_digest, txs);
        if let Err(e) = utxo::submit_block(&self.transport, self.chain, &block).await {
            error!(chain = %self.chain, height = job.height, error = %e, "Block submission failed");
            outcome.submit_error = Some(e);
        }

        let mut round = Round::pending(&self.chain.to_string(), job.height, &hash, job.network_difficulty);
        round.nonce = Some(format!("{:016x}", nonce));
        round.mix_digest = Some(hex::encode(mix_digest));
        round.coinbase_txid = job.coinbase_txid.clone();
        if self.params.epoch_length > 0 {
            round.epoch_height = Some(job.height - job.height % self.params.epoch_length);
        }
        outcome.round = Some(round);
        Ok(outcome)
    }

    async fn unlock_round(&self, round: &mut Round) -> Result<()> {
        let script = hex::encode(&self.pool_script);
        utxo::unlock_round(&self.transport, round, &script, self.params.units, |_| Ok(())).await
    }

    async fn mature_round(&self, round: &mut Round) -> Result<Vec<Utxo>> {
        let script = hex::encode(&self.pool_script);
        utxo::mature_round(&self.transport, round, &script, self.params.units, self.params.mature_depth).await
    }
}

#[async_trait]
impl PayoutNode for ProgPowNode {
    fn chain(&self) -> ChainId {
        self.chain
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
