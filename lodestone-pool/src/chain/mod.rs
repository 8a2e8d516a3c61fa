//! Chain adapters.
//!
//! Every supported chain exposes the same capability set. Mining chains
//! implement [`MiningNode`] (templates, shares, round unlocking) and every
//! chain the pool pays out on implements [`PayoutNode`]. Callers pick an
//! adapter by chain id through [`get_mining_node`] / [`get_payout_node`] and
//! dispatch through the [`MiningChain`] / [`PayoutChain`] enums.
//!
//! Adapters are immutable after construction. Their [`Transport`] is either
//! a live host pool or a fixture map, fixed when the adapter is built.

pub mod aeternity;
pub mod btc;
pub mod evm;
pub mod flux;
pub mod progpow;
mod template;
mod utxo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigInt;
use serde_json::Value;
use strum::{Display, EnumIter, EnumString};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{ChainParams, NodeConfig};
use crate::error::{PoolError, Result};
use crate::pow::{CuckooVerifier, EquihashVerifier, ProgPowHasher};
use crate::precise::Precise;
use crate::rpc::{HealthProbe, HostPing, HostPool, Transport};
use crate::stratum::{StratumJob, StratumWork, SubmitOutcome};
use crate::tracing::prelude::*;
use crate::types::{Round, Utxo};

pub use aeternity::AeternityNode;
pub use btc::BtcNode;
pub use evm::EvmNode;
pub use flux::FluxNode;
pub use progpow::ProgPowNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ChainId {
    Btc,
    Rvn,
    Firo,
    Flux,
    Ae,
    Eth,
    Etc,
    Usdc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub height: u64,
    pub syncing: bool,
}

/// Block as reported by the node, for reconciliation and dashboards.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSummary {
    pub chain: ChainId,
    pub hash: String,
    pub height: u64,
    /// Coinbase value in whole coins.
    pub value: f64,
    pub difficulty: f64,
    pub tx_count: u64,
    pub timestamp: u64,
}

/// One payout destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: String,
    pub value: BigInt,
    /// Whether this output bears part of the network fee.
    pub split_fee: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTx {
    pub txid: String,
    /// Signed transaction in the encoding the chain broadcasts (hex, `tx_`, `0x`).
    pub raw: String,
    pub fee: BigInt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResponse {
    pub txid: String,
    pub confirmations: u64,
    pub confirmed: bool,
    pub fee: Option<BigInt>,
}

/// Externally supplied PoW verifiers. A chain can only mine when its
/// family's verifier is present.
#[derive(Clone, Default)]
pub struct Verifiers {
    pub progpow: Option<Arc<dyn ProgPowHasher>>,
    pub equihash: Option<Arc<dyn EquihashVerifier>>,
    pub cuckoo: Option<Arc<dyn CuckooVerifier>>,
}

/// Job production, share verification and round unlocking.
#[async_trait]
pub trait MiningNode: Send + Sync {
    fn chain(&self) -> ChainId;

    fn params(&self) -> &ChainParams;

    async fn get_status(&self) -> Result<NodeStatus>;

    async fn ping_hosts(&self) -> Vec<HostPing>;

    /// Blocks in `start..=end`.
    async fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<BlockSummary>>;

    /// Fetch the current template and turn it into a job.
    async fn get_job(&self) -> Result<StratumJob>;

    /// `mining.notify` params for a job at the pool's share difficulty.
    fn notify_params(&self, job: &StratumJob, clean_jobs: bool) -> Result<Vec<Value>>;

    fn parse_work(&self, params: &[Value], extra_nonce: &str) -> Result<StratumWork>;

    /// Verify a share against `share_difficulty · diff_factor` and, when it
    /// also meets the network target, submit the block.
    async fn submit_work(&self, job: &StratumJob, work: &StratumWork, diff_factor: f64) -> Result<SubmitOutcome>;

    /// Decide orphan status and assign value once the round is deep enough.
    async fn unlock_round(&self, round: &mut Round) -> Result<()>;

    /// Mark a sufficiently deep round mature and report the pool's outputs.
    async fn mature_round(&self, round: &mut Round) -> Result<Vec<Utxo>>;
}

/// Wallet operations for paying out.
#[async_trait]
pub trait PayoutNode: Send + Sync {
    fn chain(&self) -> ChainId;

    /// Pool wallet address.
    fn address(&self) -> &str;

    async fn get_balance(&self, address: &str) -> Result<BigInt>;

    async fn get_tx(&self, txid: &str) -> Result<TxResponse>;

    /// Build and sign, without broadcasting.
    async fn create_tx(&self, inputs: &[Utxo], outputs: &[TxOutput]) -> Result<CreatedTx>;

    async fn broadcast_tx(&self, raw: &str) -> Result<String>;
}

pub enum MiningChain {
    ProgPow(ProgPowNode),
    Flux(FluxNode),
    Aeternity(AeternityNode),
}

impl MiningChain {
    pub fn as_node(&self) -> &dyn MiningNode {
        match self {
            MiningChain::ProgPow(node) => node,
            MiningChain::Flux(node) => node,
            MiningChain::Aeternity(node) => node,
        }
    }

    pub fn into_shared(self) -> Arc<dyn MiningNode> {
        match self {
            MiningChain::ProgPow(node) => Arc::new(node),
            MiningChain::Flux(node) => Arc::new(node),
            MiningChain::Aeternity(node) => Arc::new(node),
        }
    }
}

pub enum PayoutChain {
    Btc(BtcNode),
    ProgPow(ProgPowNode),
    Flux(FluxNode),
    Aeternity(AeternityNode),
    Evm(EvmNode),
}

impl PayoutChain {
    pub fn as_node(&self) -> &dyn PayoutNode {
        match self {
            PayoutChain::Btc(node) => node,
            PayoutChain::ProgPow(node) => node,
            PayoutChain::Flux(node) => node,
            PayoutChain::Aeternity(node) => node,
            PayoutChain::Evm(node) => node,
        }
    }
}

fn parse_chain(chain: &str) -> Result<ChainId> {
    chain
        .parse()
        .map_err(|_| PoolError::Unsupported(format!("chain {}", chain)))
}

fn connect(config: &NodeConfig, probe: HealthProbe) -> Result<Transport> {
    let pool = HostPool::new(&config.urls, config.host_timeout, probe)?;
    Ok(Transport::Real(Arc::new(pool)))
}

fn missing_verifier(chain: ChainId, family: &str) -> PoolError {
    PoolError::invalid(format!("{}: no {} verifier configured", chain, family))
}

pub fn get_mining_node(chain: &str, config: NodeConfig, verifiers: &Verifiers) -> Result<MiningChain> {
    let id = parse_chain(chain)?;
    match id {
        ChainId::Rvn | ChainId::Firo => {
            let hasher = verifiers.progpow.clone().ok_or_else(|| missing_verifier(id, "progpow"))?;
            let transport = connect(&config, HealthProbe::blockchain_info())?;
            Ok(MiningChain::ProgPow(ProgPowNode::new(id, &config, transport, Some(hasher))?))
        }
        ChainId::Flux => {
            let verifier = verifiers.equihash.clone().ok_or_else(|| missing_verifier(id, "equihash"))?;
            let transport = connect(&config, HealthProbe::blockchain_info())?;
            Ok(MiningChain::Flux(FluxNode::new(&config, transport, Some(verifier))?))
        }
        ChainId::Ae => {
            let verifier = verifiers.cuckoo.clone().ok_or_else(|| missing_verifier(id, "cuckoo"))?;
            let transport = connect(&config, HealthProbe::aeternity_status())?;
            Ok(MiningChain::Aeternity(AeternityNode::new(&config, transport, Some(verifier))?))
        }
        _ => Err(PoolError::Unsupported(format!("mining on {}", id))),
    }
}

pub fn get_payout_node(chain: &str, config: NodeConfig) -> Result<PayoutChain> {
    let id = parse_chain(chain)?;
    match id {
        ChainId::Btc => {
            let transport = connect(&config, HealthProbe::Http {
                path: "/stats",
                parse: |v| Some((v.pointer("/data/blocks")?.as_u64()?, false)),
            })?;
            Ok(PayoutChain::Btc(BtcNode::new(&config, transport)?))
        }
        ChainId::Rvn | ChainId::Firo => {
            let transport = connect(&config, HealthProbe::blockchain_info())?;
            Ok(PayoutChain::ProgPow(ProgPowNode::new(id, &config, transport, None)?))
        }
        ChainId::Flux => {
            let transport = connect(&config, HealthProbe::blockchain_info())?;
            Ok(PayoutChain::Flux(FluxNode::new(&config, transport, None)?))
        }
        ChainId::Ae => {
            let transport = connect(&config, HealthProbe::aeternity_status())?;
            Ok(PayoutChain::Aeternity(AeternityNode::new(&config, transport, None)?))
        }
        ChainId::Eth | ChainId::Etc | ChainId::Usdc => {
            let transport = connect(&config, HealthProbe::eth_block_number())?;
            Ok(PayoutChain::Evm(EvmNode::new(id, &config, transport)?))
        }
    }
}

/// Poll the node every `interval` and emit a job whenever the height moves
/// or the chain's refresh interval has passed since the last emitted job.
///
/// Returns when `cancel` fires or the receiving side hangs up. Retryable
/// upstream failures are logged and polled again.
pub async fn job_notify(
    node: Arc<dyn MiningNode>,
    interval: Duration,
    jobs: mpsc::Sender<StratumJob>,
    cancel: CancellationToken,
) -> Result<()> {
    let chain = node.chain();
    let refresh = node.params().refresh_interval;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<(u64, Instant)> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(chain = %chain, "Job notifier cancelled");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let job = match node.get_job().await {
            Ok(job) => job,
            Err(e) if e.is_retryable() => {
                warn!(chain = %chain, error = %e, "Template fetch failed");
                continue;
            }
            Err(e) => return Err(e),
        };

        let due = match last {
            None => true,
            Some((height, at)) => height != job.height || at.elapsed() >= refresh,
        };
        if !due {
            continue;
        }

        debug!(chain = %chain, height = job.height, job = %job.id, "New job");
        last = Some((job.height, Instant::now()));
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(chain = %chain, "Job notifier cancelled");
                return Ok(());
            }
            sent = jobs.send(job) => {
                if sent.is_err() {
                    debug!(chain = %chain, "Job receiver closed");
                    return Ok(());
                }
            }
        }
    }
}

/// Convert a node's coin-denominated JSON number (or numeric string) into
/// base units, truncating past `units` decimals.
pub(crate) fn coin_to_units(value: &Value, units: u32) -> Result<BigInt> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(PoolError::upstream(format!("expected amount, got {}", other))),
    };
    Ok(Precise::parse(&text)?.to_units(units))
}

pub(crate) fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value> {
    value
        .get(name)
        .ok_or_else(|| PoolError::upstream(format!("response missing {:?}", name)))
}

pub(crate) fn field_str<'a>(value: &'a Value, name: &str) -> Result<&'a str> {
    field(value, name)?
        .as_str()
        .ok_or_else(|| PoolError::upstream(format!("{:?} is not a string", name)))
}

pub(crate) fn field_u64(value: &Value, name: &str) -> Result<u64> {
    field(value, name)?
        .as_u64()
        .ok_or_else(|| PoolError::upstream(format!("{:?} is not an unsigned integer", name)))
}
