//! Aeternity adapter.
//!
//! Unlike the bitcoind family this talks plain REST to an Aeternity node.
//! Key blocks are mined with Cuckoo Cycle; the node hands out a pending key
//! block, the pool hashes its header for miners and posts the block back
//! with the winning nonce and cycle. Payouts are Ed25519-signed RLP spend
//! transactions from a single account, so there are no UTXOs to track.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use futures::stream::{self, StreamExt, TryStreamExt};
use num_bigint::{BigInt, BigUint};
use num_traits::{Signed, Zero};
use reqwest::Method;
use serde_json::{json, Value};
use time::OffsetDateTime;

use super::utxo::BLOCK_FANOUT;
use super::{coin_to_units, field, field_str, field_u64, BlockSummary, ChainId, CreatedTx, MiningNode, NodeStatus, PayoutNode, TxOutput, TxResponse};
use crate::config::{ChainParams, NodeConfig};
use crate::crypto::keys::obscure_private_key;
use crate::crypto::{base58, blake2b256, sha256d};
use crate::error::{PoolError, Result};
use crate::pow::{cuckoo_solution_hash, CuckooVerifier, CUCKOO_PROOF_SIZE};
use crate::rlp::Rlp;
use crate::rpc::{HostPing, Transport};
use crate::stratum::{self, BlockBuilder, StratumJob, StratumWork, SubmitOutcome, WorkSolution};
use crate::tracing::prelude::*;
use crate::types::{target_from_bits, Difficulty, Round, Utxo};
use crate::u256::U256;

const SPEND_TX_TAG: u64 = 12;
const SIGNED_TX_TAG: u64 = 11;
const TX_VERSION: u64 = 1;
const ACCOUNT_ID_TAG: u8 = 1;

const BASE_GAS: u64 = 15_000;
const GAS_PER_BYTE: u64 = 20;
const GAS_PRICE: u64 = 1_000_000_000;

const KEY_BLOCK_FLAG: u32 = 0x8000_0000;
const INFO_FLAG: u32 = 0x4000_0000;
const POW_LEN: usize = CUCKOO_PROOF_SIZE * 4;

/// `<prefix>_` + base58check, as used for hashes and account ids.
pub fn encode_id(prefix: &str, payload: &[u8]) -> String {
    format!("{}_{}", prefix, base58::check_encode(&[], payload))
}

/// Decode a 32-byte base58 api value carrying one of `prefixes`.
pub fn decode_id(text: &str, prefixes: &[&str]) -> Result<[u8; 32]> {
    let (prefix, body) = text
        .split_once('_')
        .ok_or_else(|| PoolError::invalid(format!("{:?} has no type prefix", text)))?;
    if !prefixes.contains(&prefix) {
        return Err(PoolError::invalid(format!("{:?}: expected one of {:?}", text, prefixes)));
    }
    let data = base58::check_decode_raw(body)?;
    data.try_into()
        .map_err(|d: Vec<u8>| PoolError::invalid(format!("{:?} decodes to {} bytes", text, d.len())))
}

/// `<prefix>_` + base64 with a 4-byte `sha256d` checksum, as used for
/// serialized transactions and block info.
pub fn encode_base64(prefix: &str, data: &[u8]) -> String {
    let mut buf = data.to_vec();
    buf.extend_from_slice(&sha256d(data)[..4]);
    format!("{}_{}", prefix, STANDARD.encode(buf))
}

pub fn decode_base64(text: &str, prefix: &str) -> Result<Vec<u8>> {
    let body = text
        .strip_prefix(prefix)
        .and_then(|t| t.strip_prefix('_'))
        .ok_or_else(|| PoolError::invalid(format!("{:?}: expected prefix {}", text, prefix)))?;
    let mut data = STANDARD
        .decode(body)
        .map_err(|e| PoolError::invalid(format!("{:?}: {}", text, e)))?;
    if data.len() < 4 {
        return Err(PoolError::invalid(format!("{:?} too short", text)));
    }
    let checksum = data.split_off(data.len() - 4);
    if checksum != sha256d(&data)[..4] {
        return Err(PoolError::invalid(format!("{:?}: bad checksum", text)));
    }
    Ok(data)
}

/// Ed25519 wallet key, seeded from the obscured form of the raw secret.
pub fn signing_key(raw_priv_hex: &str) -> Result<SigningKey> {
    let seed = obscure_private_key(raw_priv_hex)?.secret_bytes();
    Ok(SigningKey::from_bytes(&seed))
}

pub fn account_address(key: &VerifyingKey) -> String {
    encode_id("ak", key.as_bytes())
}

fn account_id(public: &[u8; 32]) -> Rlp {
    let mut id = Vec::with_capacity(33);
    id.push(ACCOUNT_ID_TAG);
    id.extend_from_slice(public);
    Rlp::Bytes(id)
}

/// Minimum fee for a transaction of `tx_len` bytes.
pub fn min_fee(tx_len: usize) -> BigUint {
    BigUint::from(BASE_GAS + tx_len as u64 * GAS_PER_BYTE) * GAS_PRICE
}

/// Unsigned spend transaction, zero TTL and empty payload.
pub fn spend_tx(sender: &[u8; 32], recipient: &[u8; 32], amount: &BigUint, fee: &BigUint, nonce: u64) -> Vec<u8> {
    Rlp::List(vec![
        Rlp::uint(SPEND_TX_TAG),
        Rlp::uint(TX_VERSION),
        account_id(sender),
        account_id(recipient),
        Rlp::big_uint(amount),
        Rlp::big_uint(fee),
        Rlp::uint(0),
        Rlp::uint(nonce),
        Rlp::bytes(&[]),
    ])
    .encode()
}

/// A spend ready to broadcast.
#[derive(Debug, Clone)]
pub struct SignedSpend {
    pub tx: Vec<u8>,
    pub signature: Signature,
    pub signed: Vec<u8>,
    pub amount: BigUint,
    pub fee: BigUint,
}

impl SignedSpend {
    pub fn hash(&self) -> String {
        encode_id("th", &blake2b256(&self.signed))
    }

    pub fn encoded(&self) -> String {
        encode_base64("tx", &self.signed)
    }
}

/// Build and sign a spend whose fee covers its own length. With
/// `split_fee` the recipient bears the fee.
pub fn sign_spend(
    key: &SigningKey,
    network_id: &str,
    recipient: &[u8; 32],
    value: &BigUint,
    split_fee: bool,
    nonce: u64,
) -> Result<SignedSpend> {
    let sender = key.verifying_key().to_bytes();
    let mut fee = BigUint::zero();
    let (tx, amount) = loop {
        let amount = if split_fee {
            if &fee >= value {
                return Err(PoolError::invalid(format!("spend of {} does not cover fee {}", value, fee)));
            }
            value - &fee
        } else {
            value.clone()
        };
        let tx = spend_tx(&sender, recipient, &amount, &fee, nonce);
        let required = min_fee(tx.len());
        if required <= fee {
            break (tx, amount);
        }
        fee = required;
    };

    let mut message = network_id.as_bytes().to_vec();
    message.extend_from_slice(&tx);
    let signature = key.sign(&message);
    let signed = Rlp::List(vec![
        Rlp::uint(SIGNED_TX_TAG),
        Rlp::uint(TX_VERSION),
        Rlp::List(vec![Rlp::bytes(&signature.to_bytes())]),
        Rlp::bytes(&tx),
    ])
    .encode();

    Ok(SignedSpend {
        tx,
        signature,
        signed,
        amount,
        fee,
    })
}

/// Key block header as hashed for Cuckoo Cycle and for the block id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHeader {
    pub version: u32,
    pub height: u64,
    pub prev_hash: [u8; 32],
    pub prev_key_hash: [u8; 32],
    pub state_hash: [u8; 32],
    pub miner: [u8; 32],
    pub beneficiary: [u8; 32],
    pub target: u32,
    pub pow: [u32; CUCKOO_PROOF_SIZE],
    pub nonce: u64,
    /// Milliseconds since the epoch.
    pub time: u64,
    pub info: Vec<u8>,
}

impl KeyHeader {
    /// Parse a `GET /v3/key-blocks/pending` reply.
    pub fn from_pending(block: &Value) -> Result<Self> {
        let version = u32::try_from(field_u64(block, "version")?)
            .map_err(|_| PoolError::upstream("key block version out of range"))?;
        let target = u32::try_from(field_u64(block, "target")?)
            .map_err(|_| PoolError::upstream("key block target out of range"))?;
        let info = match block.get("info").and_then(Value::as_str) {
            Some(text) => decode_base64(text, "cb")?,
            None => Vec::new(),
        };

        Ok(Self {
            version,
            height: field_u64(block, "height")?,
            prev_hash: decode_id(field_str(block, "prev_hash")?, &["kh", "mh"])?,
            prev_key_hash: decode_id(field_str(block, "prev_key_hash")?, &["kh"])?,
            state_hash: decode_id(field_str(block, "state_hash")?, &["bs"])?,
            miner: decode_id(field_str(block, "miner")?, &["ak"])?,
            beneficiary: decode_id(field_str(block, "beneficiary")?, &["ak"])?,
            target,
            pow: [0; CUCKOO_PROOF_SIZE],
            nonce: 0,
            time: field_u64(block, "time")?,
            info,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut flags = KEY_BLOCK_FLAG;
        if !self.info.is_empty() {
            flags |= INFO_FLAG;
        }

        let mut out = Vec::with_capacity(8 + 8 + 5 * 32 + 4 + POW_LEN + 16 + self.info.len());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.prev_hash);
        out.extend_from_slice(&self.prev_key_hash);
        out.extend_from_slice(&self.state_hash);
        out.extend_from_slice(&self.miner);
        out.extend_from_slice(&self.beneficiary);
        out.extend_from_slice(&self.target.to_be_bytes());
        for edge in &self.pow {
            out.extend_from_slice(&edge.to_be_bytes());
        }
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.time.to_be_bytes());
        out.extend_from_slice(&self.info);
        out
    }

    /// Hash miners search over: the header with nonce and cycle zeroed.
    pub fn pow_hash(&self) -> [u8; 32] {
        let blank = Self {
            pow: [0; CUCKOO_PROOF_SIZE],
            nonce: 0,
            ..self.clone()
        };
        blake2b256(&blank.serialize())
    }

    /// Key block hash once nonce and cycle are filled in.
    pub fn hash(&self) -> [u8; 32] {
        blake2b256(&self.serialize())
    }

    fn pow_bytes(&self) -> Vec<u8> {
        self.pow.iter().flat_map(|edge| edge.to_be_bytes()).collect()
    }
}

pub struct AeternityNode {
    params: ChainParams,
    transport: Transport,
    verifier: Option<Arc<dyn CuckooVerifier>>,
    key: SigningKey,
    address: String,
    next_job: AtomicU64,
}

impl AeternityNode {
    pub fn new(config: &NodeConfig, transport: Transport, verifier: Option<Arc<dyn CuckooVerifier>>) -> Result<Self> {
        let key = signing_key(&config.raw_priv_hex)?;
        let address = account_address(&key.verifying_key());
        Ok(Self {
            params: ChainParams::for_chain(ChainId::Ae, config.mainnet),
            transport,
            verifier,
            key,
            address,
            next_job: AtomicU64::new(1),
        })
    }

    fn verifier(&self) -> Result<&Arc<dyn CuckooVerifier>> {
        self.verifier
            .as_ref()
            .ok_or_else(|| PoolError::invalid("AE: no cuckoo verifier configured"))
    }

    fn network_id(&self) -> Result<&'static str> {
        self.params
            .network_id
            .ok_or_else(|| PoolError::invalid("AE: no network id configured"))
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.transport.exec_http(Method::GET, path, None).await
    }

    async fn key_block_at(&self, height: u64) -> Result<Value> {
        self.get(&format!("/v3/key-blocks/height/{}", height)).await
    }

    async fn balance_at(&self, height: u64) -> Result<BigInt> {
        let account = self
            .get(&format!("/v3/accounts/{}/height/{}", self.address, height))
            .await?;
        coin_to_units(field(&account, "balance")?, 0)
    }

    async fn block_summary(&self, height: u64) -> Result<BlockSummary> {
        let block = self.key_block_at(height).await?;
        let target = u32::try_from(field_u64(&block, "target")?)
            .map_err(|_| PoolError::upstream("key block target out of range"))?;
        Ok(BlockSummary {
            chain: ChainId::Ae,
            hash: field_str(&block, "hash")?.to_string(),
            height,
            // Rewards are paid out later and are not part of the key block.
            value: 0.0,
            difficulty: Difficulty::from_hash(target_from_bits(target), self.params.max_target).value(),
            tx_count: 0,
            timestamp: field_u64(&block, "time")? / 1000,
        })
    }

    /// Whether the key block at the round's height is ours and canonical.
    async fn is_canonical(&self, round: &Round) -> Result<Option<Value>> {
        let block = self.key_block_at(round.height).await?;
        let ours = field_str(&block, "hash")? == round.hash && field_str(&block, "beneficiary")? == self.address;
        Ok(ours.then_some(block))
    }
}

#[async_trait]
impl MiningNode for AeternityNode {
    fn chain(&self) -> ChainId {
        ChainId::Ae
    }

    fn params(&self) -> &ChainParams {
        &self.params
    }

    async fn get_status(&self) -> Result<NodeStatus> {
        let status = self.get("/v3/status").await?;
        Ok(NodeStatus {
            height: field_u64(&status, "top_block_height")?,
            syncing: status.get("syncing").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    async fn ping_hosts(&self) -> Vec<HostPing> {
        self.transport.ping_hosts().await
    }

    async fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<BlockSummary>> {
        if end < start {
            return Err(PoolError::invalid(format!("block range {}..={} is empty", start, end)));
        }
        stream::iter(start..=end)
            .map(|height| self.block_summary(height))
            .buffered(BLOCK_FANOUT)
            .try_collect()
            .await
    }

    async fn get_job(&self) -> Result<StratumJob> {
        let (host_id, pending_block) = self
            .transport
            .exec_http_with_host(Method::GET, "/v3/key-blocks/pending", None)
            .await?;
        let header = KeyHeader::from_pending(&pending_block)?;
        if header.beneficiary != self.key.verifying_key().to_bytes() {
            warn!(chain = "AE", "Pending block does not pay the pool account");
        }

        let network_target = target_from_bits(header.target);
        Ok(StratumJob {
            id: format!("{:x}", self.next_job.fetch_add(1, Ordering::Relaxed)),
            host_id,
            header_hash: hex::encode(header.pow_hash()),
            seed_hash: None,
            height: header.height,
            bits: header.target,
            network_difficulty: Difficulty::from_hash(network_target, self.params.max_target).value(),
            network_target,
            coinbase_txid: None,
            builder: BlockBuilder::Cuckoo { pending_block },
        })
    }

    fn notify_params(&self, job: &StratumJob, clean_jobs: bool) -> Result<Vec<Value>> {
        let share_target = Difficulty::new(self.params.share_difficulty).to_target(self.params.max_target);
        Ok(stratum::cuckoo_notify(job, share_target, clean_jobs))
    }

    fn parse_work(&self, params: &[Value], extra_nonce: &str) -> Result<StratumWork> {
        stratum::parse_cuckoo_work(params, extra_nonce)
    }

    async fn submit_work(&self, job: &StratumJob, work: &StratumWork, diff_factor: f64) -> Result<SubmitOutcome> {
        let WorkSolution::Cuckoo { nonce, edges } = &work.solution else {
            return Ok(SubmitOutcome::invalid());
        };
        let BlockBuilder::Cuckoo { pending_block } = &job.builder else {
            return Err(PoolError::invalid(format!("job {} is not a cuckoo job", job.id)));
        };

        let header_hash = hex::decode(&job.header_hash)?;
        if edges.len() != CUCKOO_PROOF_SIZE || !self.verifier()?.verify(&header_hash, *nonce, edges) {
            return Ok(SubmitOutcome::invalid());
        }

        let digest_bytes = cuckoo_solution_hash(edges);
        let hash = hex::encode(digest_bytes);
        let digest = U256::from_be_bytes(digest_bytes);
        let share_difficulty = Difficulty::new(self.params.share_difficulty).scaled(diff_factor);
        if !share_difficulty.is_met_by(digest, self.params.max_target) {
            debug!(chain = "AE", worker = %work.worker_id, hash = %hash, "Share rejected");
            return Ok(SubmitOutcome::rejected(hash));
        }

        let mut outcome = SubmitOutcome::accepted(hash);
        if digest > job.network_target {
            return Ok(outcome);
        }

        let mut header = KeyHeader::from_pending(pending_block)?;
        header.nonce = *nonce;
        header.pow.copy_from_slice(edges);
        let block_hash = encode_id("kh", &header.hash());
        info!(chain = "AE", height = job.height, hash = %block_hash, worker = %work.worker_id, "Block found");

        let mut body = pending_block.clone();
        if let Some(fields) = body.as_object_mut() {
            fields.insert("nonce".into(), json!(nonce));
            fields.insert("pow".into(), json!(edges));
        }
        if let Err(e) = self
            .transport
            .exec_http_sticky(&job.host_id, Method::POST, "/v3/key-blocks", Some(body))
            .await
        {
            error!(chain = "AE", height = job.height, error = %e, "Block submission failed");
            outcome.submit_error = Some(e);
        }

        let mut round = Round::pending("AE", job.height, &block_hash, job.network_difficulty);
        round.nonce = Some(format!("{:016x}", nonce));
        round.solution = Some(hex::encode(header.pow_bytes()));
        outcome.round = Some(round);
        Ok(outcome)
    }

    /// Orphan unless the key block at the round's height is ours. Value is
    /// only known once the delayed reward lands, see `mature_round`.
    async fn unlock_round(&self, round: &mut Round) -> Result<()> {
        let Some(block) = self.is_canonical(round).await? else {
            info!(chain = "AE", height = round.height, hash = %round.hash, "Round orphaned");
            round.mark_orphan();
            return Ok(());
        };

        round.orphan = false;
        round.pending = false;
        let millis = field_u64(&block, "time")?;
        round.created_at = OffsetDateTime::from_unix_timestamp((millis / 1000) as i64).ok();
        info!(chain = "AE", height = round.height, "Round unlocked");
        Ok(())
    }

    /// Beneficiary rewards arrive `mature_depth` blocks later; the value is
    /// the pool account's balance change across that block.
    async fn mature_round(&self, round: &mut Round) -> Result<Vec<Utxo>> {
        let payout_height = round.height + self.params.mature_depth;
        if self.get_status().await?.height < payout_height {
            return Ok(Vec::new());
        }
        if self.is_canonical(round).await?.is_none() {
            round.mark_orphan();
            return Ok(Vec::new());
        }

        let reward = self.balance_at(payout_height).await? - self.balance_at(payout_height - 1).await?;
        if !reward.is_positive() {
            error!(chain = "AE", height = round.height, reward = %reward, "No reward at payout height");
            return Err(PoolError::invariant(format!(
                "round {}: balance change {} at height {}",
                round.id, reward, payout_height
            )));
        }
        round.value = Some(reward);
        round.mark_mature()?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl PayoutNode for AeternityNode {
    fn chain(&self) -> ChainId {
        ChainId::Ae
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn get_balance(&self, address: &str) -> Result<BigInt> {
        let account = self.get(&format!("/v3/accounts/{}", address)).await?;
        coin_to_units(field(&account, "balance")?, 0)
    }

    async fn get_tx(&self, txid: &str) -> Result<TxResponse> {
        let tx = self.get(&format!("/v3/transactions/{}", txid)).await?;
        let block_height = tx.get("block_height").and_then(Value::as_i64).unwrap_or(-1);
        let confirmations = if block_height < 0 {
            0
        } else {
            let top = self.get_status().await?.height;
            (top + 1).saturating_sub(block_height as u64)
        };
        let fee = match tx.pointer("/tx/fee") {
            Some(fee) => Some(coin_to_units(fee, 0)?),
            None => None,
        };
        Ok(TxResponse {
            txid: txid.to_string(),
            confirmations,
            confirmed: confirmations > 0,
            fee,
        })
    }

    /// Spends come from the pool account; `inputs` are not used.
    async fn create_tx(&self, _inputs: &[Utxo], outputs: &[TxOutput]) -> Result<CreatedTx> {
        let [output] = outputs else {
            return Err(PoolError::invalid(format!(
                "AE spends pay exactly one recipient, got {}",
                outputs.len()
            )));
        };
        let value = output
            .value
            .to_biguint()
            .ok_or_else(|| PoolError::invalid(format!("negative spend {}", output.value)))?;
        let recipient = decode_id(&output.address, &["ak"])?;

        let account = self.get(&format!("/v3/accounts/{}", self.address)).await?;
        let nonce = field_u64(&account, "nonce")? + 1;

        let spend = sign_spend(&self.key, self.network_id()?, &recipient, &value, output.split_fee, nonce)?;
        Ok(CreatedTx {
            txid: spend.hash(),
            raw: spend.encoded(),
            fee: BigInt::from(spend.fee),
        })
    }

    async fn broadcast_tx(&self, raw: &str) -> Result<String> {
        let reply = self
            .transport
            .exec_http(Method::POST, "/v3/transactions", Some(json!({ "tx": raw })))
            .await?;
        Ok(field_str(&reply, "tx_hash")?.to_string())
    }
}
