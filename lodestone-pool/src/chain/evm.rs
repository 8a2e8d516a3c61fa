//! Ethereum-family payouts: native ETH/ETC sends and ERC-20 transfers.
//!
//! Transactions are legacy EIP-155 envelopes signed with the pool's
//! secp256k1 key. Token chains (USDC) share the ETH node and pay gas in
//! ETH, which is why USDC payouts carry a fee balance.

use async_trait::async_trait;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Signed, Zero};
use secp256k1::{Message, SecretKey, SECP256K1};
use serde_json::{json, Value};

use super::{ChainId, CreatedTx, PayoutNode, TxOutput, TxResponse};
use crate::config::{ChainParams, NodeConfig};
use crate::crypto::keccak256;
use crate::crypto::keys::{evm_address, obscure_private_key, parse_evm_address, public_key};
use crate::error::{PoolError, Result};
use crate::rlp::Rlp;
use crate::rpc::Transport;
use crate::tracing::prelude::*;
use crate::types::Utxo;

const NATIVE_GAS_LIMIT: u64 = 21_000;
const TOKEN_GAS_LIMIT: u64 = 100_000;

/// `transfer(address,uint256)`
const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
/// `balanceOf(address)`
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

fn pad32(data: &[u8]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[32 - data.len()..].copy_from_slice(data);
    word
}

/// ABI call data for `transfer(to, amount)`.
pub fn transfer_data(to: &[u8; 20], amount: &BigUint) -> Result<Vec<u8>> {
    let amount = amount.to_bytes_be();
    if amount.len() > 32 {
        return Err(PoolError::invalid("token amount exceeds 256 bits"));
    }
    let mut data = TRANSFER_SELECTOR.to_vec();
    data.extend_from_slice(&pad32(to));
    data.extend_from_slice(&pad32(&amount));
    Ok(data)
}

fn balance_of_data(owner: &[u8; 20]) -> Vec<u8> {
    let mut data = BALANCE_OF_SELECTOR.to_vec();
    data.extend_from_slice(&pad32(owner));
    data
}

/// `0x`-prefixed hex quantity; `0x` alone is zero.
pub fn parse_quantity(value: &Value) -> Result<BigInt> {
    let text = value
        .as_str()
        .ok_or_else(|| PoolError::upstream(format!("expected hex quantity, got {}", value)))?;
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| PoolError::upstream(format!("quantity {:?} missing 0x prefix", text)))?;
    if digits.is_empty() {
        return Ok(BigInt::zero());
    }
    BigInt::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| PoolError::upstream(format!("quantity {:?} is not hex", text)))
}

fn to_unsigned(value: &BigInt, what: &str) -> Result<BigUint> {
    value
        .to_biguint()
        .ok_or_else(|| PoolError::invalid(format!("negative {} {}", what, value)))
}

/// Pre-EIP-1559 transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: BigUint,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: BigUint,
    pub data: Vec<u8>,
}

impl LegacyTx {
    fn fields(&self) -> Vec<Rlp> {
        vec![
            Rlp::uint(self.nonce),
            Rlp::big_uint(&self.gas_price),
            Rlp::uint(self.gas_limit),
            Rlp::bytes(&self.to),
            Rlp::big_uint(&self.value),
            Rlp::bytes(&self.data),
        ]
    }

    /// EIP-155 signing payload.
    pub fn signing_payload(&self, chain_id: u64) -> Vec<u8> {
        let mut fields = self.fields();
        fields.extend([Rlp::uint(chain_id), Rlp::uint(0), Rlp::uint(0)]);
        Rlp::List(fields).encode()
    }

    /// Signed raw transaction and its hash.
    pub fn sign(&self, secret: &SecretKey, chain_id: u64) -> Result<(Vec<u8>, [u8; 32])> {
        let digest = keccak256(&self.signing_payload(chain_id));
        let signature = SECP256K1.sign_ecdsa_recoverable(&Message::from_digest(digest), secret);
        let (recovery_id, compact) = signature.serialize_compact();
        let recovery = u64::try_from(recovery_id.to_i32())
            .map_err(|_| PoolError::invalid("negative recovery id"))?;

        let mut fields = self.fields();
        fields.push(Rlp::uint(recovery + chain_id * 2 + 35));
        fields.push(Rlp::big_uint(&BigUint::from_bytes_be(&compact[..32])));
        fields.push(Rlp::big_uint(&BigUint::from_bytes_be(&compact[32..])));
        let raw = Rlp::List(fields).encode();
        let hash = keccak256(&raw);
        Ok((raw, hash))
    }
}

pub struct EvmNode {
    params: ChainParams,
    transport: Transport,
    secret: SecretKey,
    address: String,
    chain_id: u64,
    /// ERC-20 contract for token chains.
    contract: Option<[u8; 20]>,
}

impl EvmNode {
    pub fn new(chain: ChainId, config: &NodeConfig, transport: Transport) -> Result<Self> {
        let params = ChainParams::for_chain(chain, config.mainnet);
        let chain_id = params
            .evm_chain_id
            .ok_or_else(|| PoolError::Unsupported(format!("{} is not an EVM chain", chain)))?;
        let contract = params.token_contract.map(parse_evm_address).transpose()?;
        let secret = obscure_private_key(&config.raw_priv_hex)?;
        let address = evm_address(&public_key(&secret));

        Ok(Self {
            params,
            transport,
            secret,
            address,
            chain_id,
            contract,
        })
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<BigInt> {
        parse_quantity(&self.transport.exec_rpc(method, params).await?)
    }
}

#[async_trait]
impl PayoutNode for EvmNode {
    fn chain(&self) -> ChainId {
        self.params.chain
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn get_balance(&self, address: &str) -> Result<BigInt> {
        match &self.contract {
            None => self.quantity("eth_getBalance", json!([address, "latest"])).await,
            Some(contract) => {
                let call = json!({
                    "to": format!("0x{}", hex::encode(contract)),
                    "data": format!("0x{}", hex::encode(balance_of_data(&parse_evm_address(address)?))),
                });
                self.quantity("eth_call", json!([call, "latest"])).await
            }
        }
    }

    async fn get_tx(&self, txid: &str) -> Result<TxResponse> {
        let receipt = self.transport.exec_rpc("eth_getTransactionReceipt", json!([txid])).await?;
        if receipt.is_null() {
            return Ok(TxResponse {
                txid: txid.to_string(),
                confirmations: 0,
                confirmed: false,
                fee: None,
            });
        }

        if receipt.get("status").and_then(Value::as_str) == Some("0x0") {
            error!(chain = %self.params.chain, txid, "Payout transaction reverted");
            return Err(PoolError::invariant(format!("{}: transaction {} reverted", self.params.chain, txid)));
        }

        let block = parse_quantity(super::field(&receipt, "blockNumber")?)?;
        let tip = self.quantity("eth_blockNumber", json!([])).await?;
        let confirmations = (tip - block + 1u32).max(BigInt::zero());
        let fee = match (receipt.get("gasUsed"), receipt.get("effectiveGasPrice")) {
            (Some(used), Some(price)) => Some(parse_quantity(used)? * parse_quantity(price)?),
            _ => None,
        };
        let confirmations = u64::try_from(confirmations)
            .map_err(|_| PoolError::upstream(format!("{}: confirmations out of range", txid)))?;

        Ok(TxResponse {
            txid: txid.to_string(),
            confirmations,
            confirmed: confirmations > 0,
            fee,
        })
    }

    /// Account-model chains spend from the pool account; `inputs` are not
    /// used. With `split_fee` a native send deducts the gas cost from the
    /// amount; token sends always pay gas from the ETH balance.
    async fn create_tx(&self, _inputs: &[Utxo], outputs: &[TxOutput]) -> Result<CreatedTx> {
        let [output] = outputs else {
            return Err(PoolError::invalid(format!(
                "{} payouts pay exactly one recipient, got {}",
                self.params.chain,
                outputs.len()
            )));
        };
        if !output.value.is_positive() {
            return Err(PoolError::invalid(format!("non-positive payout {}", output.value)));
        }
        let recipient = parse_evm_address(&output.address)?;

        let nonce = self
            .quantity("eth_getTransactionCount", json!([self.address, "pending"]))
            .await?;
        let nonce = u64::try_from(nonce).map_err(|_| PoolError::upstream("nonce out of range"))?;
        let gas_price = to_unsigned(&self.quantity("eth_gasPrice", json!([])).await?, "gas price")?;

        let tx = match &self.contract {
            None => {
                let fee = &gas_price * NATIVE_GAS_LIMIT;
                let mut value = to_unsigned(&output.value, "payout")?;
                if output.split_fee {
                    if value <= fee {
                        return Err(PoolError::invalid(format!("payout {} does not cover gas {}", value, fee)));
                    }
                    value -= fee;
                }
                LegacyTx {
                    nonce,
                    gas_price,
                    gas_limit: NATIVE_GAS_LIMIT,
                    to: recipient,
                    value,
                    data: Vec::new(),
                }
            }
            Some(contract) => LegacyTx {
                nonce,
                gas_price,
                gas_limit: TOKEN_GAS_LIMIT,
                to: *contract,
                value: BigUint::zero(),
                data: transfer_data(&recipient, &to_unsigned(&output.value, "payout")?)?,
            },
        };

        let (raw, hash) = tx.sign(&self.secret, self.chain_id)?;
        Ok(CreatedTx {
            txid: format!("0x{}", hex::encode(hash)),
            raw: format!("0x{}", hex::encode(raw)),
            fee: BigInt::from_biguint(Sign::Plus, &tx.gas_price * tx.gas_limit),
        })
    }

    async fn broadcast_tx(&self, raw: &str) -> Result<String> {
        let hash = self.transport.exec_rpc("eth_sendRawTransaction", json!([raw])).await?;
        hash.as_str()
            .map(str::to_string)
            .ok_or_else(|| PoolError::upstream("eth_sendRawTransaction: hash is not a string"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::crypto::keys::secret_key_from_hex;
    use crate::rpc::FixtureMap;
    use std::sync::Arc;

    fn node(chain: ChainId, fixtures: FixtureMap) -> (EvmNode, Arc<FixtureMap>) {
        let fixtures = Arc::new(fixtures);
        let node = EvmNode::new(chain, &config(true), Transport::Mock(Arc::clone(&fixtures))).unwrap();
        (node, fixtures)
    }

    fn recipient() -> String {
        format!("0x{}", "35".repeat(20))
    }

    #[test]
    fn test_eip155_example() {
        let tx = LegacyTx {
            nonce: 9,
            gas_price: BigUint::from(20_000_000_000u64),
            gas_limit: 21_000,
            to: [0x35; 20],
            value: BigUint::from(1_000_000_000_000_000_000u64),
            data: Vec::new(),
        };
        assert_eq!(
            hex::encode(tx.signing_payload(1)),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );

        let secret = secret_key_from_hex(&"46".repeat(32)).unwrap();
        let (raw, hash) = tx.sign(&secret, 1).unwrap();
        assert_eq!(
            hex::encode(raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a0\
             28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb70330\
             4b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
        assert_eq!(
            hex::encode(hash),
            "33469b22e9f636356c4160a87eb19df52b7412e8eac32a4a55ffe88ea8350788"
        );
    }

    #[test]
    fn test_transfer_data() {
        let data = transfer_data(&[0x35; 20], &BigUint::from(5_000_000_000u64)).unwrap();
        assert_eq!(data.len(), 68);
        assert_eq!(hex::encode(&data[..4]), "a9059cbb");
        assert_eq!(&data[16..36], &[0x35; 20]);
        assert_eq!(hex::encode(&data[60..]), "000000012a05f200");
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x1b4")).unwrap(), BigInt::from(436));
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), BigInt::zero());
        assert!(parse_quantity(&json!("1b4")).is_err());
        assert!(parse_quantity(&json!(436)).is_err());
    }

    #[tokio::test]
    async fn test_native_payout_splits_gas() {
        let (node, fixtures) = node(
            ChainId::Eth,
            FixtureMap::new()
                .with_rpc("eth_getTransactionCount", json!("0x9"))
                .with_rpc("eth_gasPrice", json!("0x4a817c800"))
                .with_rpc("eth_sendRawTransaction", json!("0xfeed")),
        );
        let output = TxOutput {
            address: recipient(),
            value: BigInt::from(1_000_000_000_000_000_000u64),
            split_fee: true,
        };

        let created = node.create_tx(&[], &[output]).await.unwrap();
        assert_eq!(created.fee, BigInt::from(21_000u64 * 20_000_000_000));
        let raw = hex::decode(created.raw.trim_start_matches("0x")).unwrap();
        assert_eq!(created.txid, format!("0x{}", hex::encode(keccak256(&raw))));
        // Value 1e18 - 4.2e14 = 0x0ddf38b6c895c000.
        assert!(created.raw.contains("880ddf38b6c895c000"));

        assert_eq!(node.broadcast_tx(&created.raw).await.unwrap(), "0xfeed");
        assert_eq!(fixtures.calls_to("eth_getTransactionCount")[0][1], json!("pending"));
    }

    #[tokio::test]
    async fn test_token_payout_and_balance() {
        let (node, fixtures) = node(
            ChainId::Usdc,
            FixtureMap::new()
                .with_rpc("eth_getTransactionCount", json!("0x0"))
                .with_rpc("eth_gasPrice", json!("0x3b9aca00"))
                .with_rpc("eth_call", json!("0x00000000000000000000000000000000000000000000000000000000004c4b40")),
        );
        let output = TxOutput {
            address: recipient(),
            value: BigInt::from(5_000_000_000u64),
            split_fee: true,
        };

        let created = node.create_tx(&[], &[output]).await.unwrap();
        assert_eq!(created.fee, BigInt::from(100_000u64 * 1_000_000_000));
        assert!(created.raw.contains(&format!("a9059cbb{}{}", "00".repeat(12), "35".repeat(20))));
        assert!(created.raw.to_lowercase().contains("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"));

        let balance = node.get_balance(&recipient()).await.unwrap();
        assert_eq!(balance, BigInt::from(5_000_000));
        let call = &fixtures.calls_to("eth_call")[0][0];
        assert_eq!(call["data"], json!(format!("0x70a08231{}{}", "00".repeat(12), "35".repeat(20))));
    }

    #[tokio::test]
    async fn test_receipts() {
        let (node, _) = node(
            ChainId::Etc,
            FixtureMap::new()
                .with_rpc_for("eth_getTransactionReceipt", json!(["0xaa"]), Value::Null)
                .with_rpc_for(
                    "eth_getTransactionReceipt",
                    json!(["0xbb"]),
                    json!({"status": "0x1", "blockNumber": "0x10", "gasUsed": "0x5208", "effectiveGasPrice": "0x2"}),
                )
                .with_rpc_for("eth_getTransactionReceipt", json!(["0xcc"]), json!({"status": "0x0", "blockNumber": "0x10"}))
                .with_rpc("eth_blockNumber", json!("0x13")),
        );

        assert!(!node.get_tx("0xaa").await.unwrap().confirmed);
        let mined = node.get_tx("0xbb").await.unwrap();
        assert_eq!(mined.confirmations, 4);
        assert_eq!(mined.fee, Some(BigInt::from(42_000)));
        assert!(node.get_tx("0xcc").await.is_err());
        assert_eq!(PayoutNode::chain(&node), ChainId::Etc);
    }

    #[test]
    fn test_rejects_non_evm_chain() {
        let transport = Transport::Mock(Arc::new(FixtureMap::new()));
        assert!(EvmNode::new(ChainId::Rvn, &config(true), transport).is_err());
    }
}
