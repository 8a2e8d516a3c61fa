//! Jobs handed to the stratum server and the work that comes back.
//!
//! The socket layer lives elsewhere; this module fixes the JSON shapes the
//! chain adapters produce and parse.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::Display;

use crate::block::{EquihashHeader, ProgPowHeader};
use crate::error::{PoolError, Result};
use crate::types::Round;
use crate::u256::U256;

/// Everything needed to turn a solved share back into a block.
#[derive(Debug, Clone)]
pub enum BlockBuilder {
    ProgPow {
        header: ProgPowHeader,
        txs: Vec<Vec<u8>>,
    },
    Equihash {
        header: EquihashHeader,
        txs: Vec<Vec<u8>>,
    },
    /// Aeternity pending key block as returned by the node.
    Cuckoo { pending_block: Value },
}

/// One unit of work derived from a block template. Not persisted.
#[derive(Debug, Clone)]
pub struct StratumJob {
    pub id: String,
    pub host_id: String,
    /// Display-order hex of the value miners hash against.
    pub header_hash: String,
    /// Ethash-family seed, absent for other algorithms.
    pub seed_hash: Option<String>,
    pub height: u64,
    pub bits: u32,
    pub network_difficulty: f64,
    pub network_target: U256,
    pub coinbase_txid: Option<String>,
    pub builder: BlockBuilder,
}

/// Solution fields by algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkSolution {
    ProgPow {
        nonce: u64,
        header_hash: [u8; 32],
        mix_digest: [u8; 32],
    },
    Equihash {
        /// Full 32-byte nonce (extranonce1 || nonce2).
        nonce: [u8; 32],
        ntime: u32,
        /// Solution including its compact-size prefix.
        solution: Vec<u8>,
    },
    Cuckoo { nonce: u64, edges: Vec<u32> },
}

/// A share as submitted by a worker. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratumWork {
    pub worker_id: String,
    pub job_id: String,
    pub solution: WorkSolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ShareStatus {
    #[strum(serialize = "accepted")]
    Accepted,
    #[strum(serialize = "rejected")]
    Rejected,
    #[strum(serialize = "invalid")]
    Invalid,
}

/// Result of `submit_work`. A failed block submission still reports the
/// accepted share alongside the error.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub status: ShareStatus,
    pub hash: Option<String>,
    pub round: Option<Round>,
    pub submit_error: Option<PoolError>,
}

impl SubmitOutcome {
    pub fn invalid() -> Self {
        Self::with_status(ShareStatus::Invalid, None)
    }

    pub fn rejected(hash: String) -> Self {
        Self::with_status(ShareStatus::Rejected, Some(hash))
    }

    pub fn accepted(hash: String) -> Self {
        Self::with_status(ShareStatus::Accepted, Some(hash))
    }

    fn with_status(status: ShareStatus, hash: Option<String>) -> Self {
        Self {
            status,
            hash,
            round: None,
            submit_error: None,
        }
    }
}

/// Stratum framing: a request/notification or a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request {
        id: Option<u64>,
        method: String,
        params: Value,
    },
    Response {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
}

impl JsonRpcMessage {
    pub fn notify(params: Vec<Value>) -> Self {
        JsonRpcMessage::Request {
            id: None,
            method: "mining.notify".to_string(),
            params: Value::Array(params),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request { method, .. } => Some(method),
            JsonRpcMessage::Response { .. } => None,
        }
    }

    pub fn params(&self) -> Option<&[Value]> {
        match self {
            JsonRpcMessage::Request {
                params: Value::Array(items),
                ..
            } => Some(items),
            _ => None,
        }
    }
}

/// `[job_id, header_hash, seed_hash, share_target, clean_jobs, height, bits]`
pub fn progpow_notify(job: &StratumJob, share_target: U256, clean_jobs: bool) -> Vec<Value> {
    vec![
        json!(job.id),
        json!(format!("0x{}", job.header_hash)),
        json!(format!("0x{}", job.seed_hash.as_deref().unwrap_or_default())),
        json!(format!("0x{}", share_target.to_hex())),
        json!(clean_jobs),
        json!(job.height),
        json!(format!("{:08x}", job.bits)),
    ]
}

/// `[job_id, version, prev, merkle, sapling, ntime, bits, clean_jobs, "125_4", "ZelProof"]`
/// with every field in header byte order.
pub fn equihash_notify(job_id: &str, header: &EquihashHeader, clean_jobs: bool) -> Vec<Value> {
    vec![
        json!(job_id),
        json!(hex::encode(header.version.to_le_bytes())),
        json!(hex::encode(header.prev_hash)),
        json!(hex::encode(header.merkle_root)),
        json!(hex::encode(header.sapling_root)),
        json!(hex::encode(header.ntime.to_le_bytes())),
        json!(hex::encode(header.bits.to_le_bytes())),
        json!(clean_jobs),
        json!("125_4"),
        json!("ZelProof"),
    ]
}

/// `[job_id, header_hash, height, share_target, clean_jobs]`
pub fn cuckoo_notify(job: &StratumJob, share_target: U256, clean_jobs: bool) -> Vec<Value> {
    vec![
        json!(job.id),
        json!(job.header_hash),
        json!(job.height),
        json!(share_target.to_hex()),
        json!(clean_jobs),
    ]
}

fn param_str<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a str> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| PoolError::invalid(format!("{} missing or not a string", name)))
}

fn hex_field(text: &str, name: &str, digits: usize) -> Result<Vec<u8>> {
    let stripped = text.strip_prefix("0x").unwrap_or(text);
    if stripped.len() != digits {
        return Err(PoolError::invalid(format!(
            "{} must be {} hex digits, got {}",
            name,
            digits,
            stripped.len()
        )));
    }
    Ok(hex::decode(stripped)?)
}

fn hash_field(text: &str, name: &str) -> Result<[u8; 32]> {
    let bytes = hex_field(text, name, 64)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn check_extra_nonce(nonce_hex: &str, extra_nonce: &str) -> Result<()> {
    if !nonce_hex.to_ascii_lowercase().starts_with(&extra_nonce.to_ascii_lowercase()) {
        return Err(PoolError::invalid(format!(
            "nonce {} does not carry extranonce {}",
            nonce_hex, extra_nonce
        )));
    }
    Ok(())
}

/// `[worker, job_id, nonce(16), header_hash(64), mix_digest(64)]`
pub fn parse_progpow_work(params: &[Value], extra_nonce: &str) -> Result<StratumWork> {
    if params.len() != 5 {
        return Err(PoolError::invalid(format!("expected 5 params, got {}", params.len())));
    }
    let nonce_text = param_str(params, 2, "nonce")?;
    let nonce_bytes = hex_field(nonce_text, "nonce", 16)?;
    check_extra_nonce(nonce_text.trim_start_matches("0x"), extra_nonce)?;

    let mut nonce = [0u8; 8];
    nonce.copy_from_slice(&nonce_bytes);

    Ok(StratumWork {
        worker_id: param_str(params, 0, "worker")?.to_string(),
        job_id: param_str(params, 1, "job id")?.to_string(),
        solution: WorkSolution::ProgPow {
            nonce: u64::from_be_bytes(nonce),
            header_hash: hash_field(param_str(params, 3, "header hash")?, "header hash")?,
            mix_digest: hash_field(param_str(params, 4, "mix digest")?, "mix digest")?,
        },
    })
}

/// `[worker, job_id, ntime(8), nonce2(56), solution(106)]`; the full nonce is
/// the session's 4-byte extranonce followed by the 28 submitted bytes.
pub fn parse_equihash_work(params: &[Value], extra_nonce: &str) -> Result<StratumWork> {
    if params.len() != 5 {
        return Err(PoolError::invalid(format!("expected 5 params, got {}", params.len())));
    }
    let ntime_bytes = hex_field(param_str(params, 2, "ntime")?, "ntime", 8)?;
    let nonce2 = hex_field(param_str(params, 3, "nonce")?, "nonce", 56)?;
    let solution = hex_field(param_str(params, 4, "solution")?, "solution", 106)?;
    let prefix = hex_field(extra_nonce, "extranonce", 8)?;

    let mut nonce = [0u8; 32];
    nonce[..4].copy_from_slice(&prefix);
    nonce[4..].copy_from_slice(&nonce2);
    let mut ntime = [0u8; 4];
    ntime.copy_from_slice(&ntime_bytes);

    Ok(StratumWork {
        worker_id: param_str(params, 0, "worker")?.to_string(),
        job_id: param_str(params, 1, "job id")?.to_string(),
        solution: WorkSolution::Equihash {
            nonce,
            ntime: u32::from_le_bytes(ntime),
            solution,
        },
    })
}

/// `[worker, job_id, nonce(8), [42 edges]]`; the 64-bit nonce is the
/// session extranonce in the high half.
pub fn parse_cuckoo_work(params: &[Value], extra_nonce: &str) -> Result<StratumWork> {
    if params.len() != 4 {
        return Err(PoolError::invalid(format!("expected 4 params, got {}", params.len())));
    }
    let low = hex_field(param_str(params, 2, "nonce")?, "nonce", 8)?;
    let high = hex_field(extra_nonce, "extranonce", 8)?;
    let mut nonce = [0u8; 8];
    nonce[..4].copy_from_slice(&high);
    nonce[4..].copy_from_slice(&low);

    let edges = params[3]
        .as_array()
        .ok_or_else(|| PoolError::invalid("solution is not an array"))?
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|e| u32::try_from(e).ok())
                .ok_or_else(|| PoolError::invalid(format!("bad cuckoo edge {}", v)))
        })
        .collect::<Result<Vec<u32>>>()?;
    if edges.len() != crate::pow::CUCKOO_PROOF_SIZE {
        return Err(PoolError::invalid(format!(
            "cuckoo solution has {} edges",
            edges.len()
        )));
    }

    Ok(StratumWork {
        worker_id: param_str(params, 0, "worker")?.to_string(),
        job_id: param_str(params, 1, "job id")?.to_string(),
        solution: WorkSolution::Cuckoo {
            nonce: u64::from_be_bytes(nonce),
            edges,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progpow_params(nonce: &str) -> Vec<Value> {
        vec![
            json!("worker.1"),
            json!("1a"),
            json!(nonce),
            json!(format!("0x{}", "ab".repeat(32))),
            json!(format!("0x{}", "cd".repeat(32))),
        ]
    }

    #[test]
    fn test_parse_progpow_work() {
        let work = parse_progpow_work(&progpow_params("0x6a28f8000c5cc063"), "6a28").unwrap();
        assert_eq!(work.job_id, "1a");
        match work.solution {
            WorkSolution::ProgPow {
                nonce,
                header_hash,
                mix_digest,
            } => {
                assert_eq!(nonce, 0x6a28f8000c5cc063);
                assert_eq!(header_hash, [0xab; 32]);
                assert_eq!(mix_digest, [0xcd; 32]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_progpow_work_rejects_bad_input() {
        assert!(parse_progpow_work(&progpow_params("0x6a28f8000c5cc0"), "").is_err());
        assert!(parse_progpow_work(&progpow_params("0x6a28f8000c5cc063"), "ffff").is_err());
        assert!(parse_progpow_work(&progpow_params("0x6a28f8000c5cc063")[..4], "").is_err());
    }

    #[test]
    fn test_parse_equihash_work() {
        let params = vec![
            json!("w"),
            json!("2"),
            json!("8bed0d61"),
            json!("11".repeat(28)),
            json!(format!("34{}", "07".repeat(52))),
        ];
        let work = parse_equihash_work(&params, "a1b2c3d4").unwrap();
        match work.solution {
            WorkSolution::Equihash {
                nonce,
                ntime,
                solution,
            } => {
                assert_eq!(&nonce[..4], &[0xa1, 0xb2, 0xc3, 0xd4]);
                assert_eq!(nonce[31], 0x11);
                assert_eq!(ntime, 1628302731);
                assert_eq!(solution.len(), 53);
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut short = params.clone();
        short[4] = json!("34");
        assert!(parse_equihash_work(&short, "a1b2c3d4").is_err());
    }

    #[test]
    fn test_parse_cuckoo_work() {
        let edges: Vec<u32> = (0..42).map(|i| i * 1000).collect();
        let params = vec![json!("w"), json!("3"), json!("0000beef"), json!(edges)];
        let work = parse_cuckoo_work(&params, "00000001").unwrap();
        assert_eq!(
            work.solution,
            WorkSolution::Cuckoo {
                nonce: 0x0000_0001_0000_beef,
                edges,
            }
        );

        let params = vec![json!("w"), json!("3"), json!("0000beef"), json!([1, 2, 3])];
        assert!(parse_cuckoo_work(&params, "00000001").is_err());
    }

    #[test]
    fn test_notify_message_shape() {
        let header = EquihashHeader::new(4, &"00".repeat(32), &"11".repeat(32), &"22".repeat(32), 1, 0x1d0fffff)
            .unwrap();
        let message = JsonRpcMessage::notify(equihash_notify("7", &header, true));
        let text = serde_json::to_string(&message).unwrap();
        assert!(text.contains("\"method\":\"mining.notify\""));
        assert!(text.contains("\"id\":null"));

        let parsed: JsonRpcMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.method(), Some("mining.notify"));
        let params = parsed.params().unwrap();
        assert_eq!(params.len(), 10);
        assert_eq!(params[1], json!("04000000"));
        assert_eq!(params[6], json!("ffff0f1d"));
        assert_eq!(params[9], json!("ZelProof"));
    }

    #[test]
    fn test_response_parses() {
        let parsed: JsonRpcMessage = serde_json::from_str(r#"{"id":4,"result":true}"#).unwrap();
        assert_eq!(
            parsed,
            JsonRpcMessage::Response {
                id: 4,
                result: Some(json!(true)),
                error: None
            }
        );
    }
}
