//! Construction-time configuration.
//!
//! Node settings come from the environment, one variable group per chain:
//!
//! - `<PREFIX>_URLS`: comma separated node URLs (presence enables the chain)
//! - `<PREFIX>_PRIV_KEY`: raw 32-byte wallet secret, hex
//! - `<PREFIX>_API_KEY`: key for an external API (block explorer)
//! - `<PREFIX>_MAINNET`: `false`/`0` selects testnet (default: mainnet)
//! - `<PREFIX>_TIMEOUT_MS`: per-request timeout (default: 3000)
//! - `<PREFIX>_DEV_WALLETS`: `address:amount` pairs for fixed coinbase outputs
//! - `<PREFIX>_TXID_BLACKLIST`: template transactions never to include

use std::collections::HashMap;
use std::time::Duration;

use num_bigint::BigInt;

use crate::chain::ChainId;
use crate::error::{PoolError, Result};
use crate::precise::pow10;
use crate::u256::U256;

const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// A fixed coinbase output paid every block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevWallet {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub mainnet: bool,
    pub urls: Vec<String>,
    pub raw_priv_hex: String,
    pub external_api_key: Option<String>,
    pub host_timeout: Duration,
    pub dev_wallets: Vec<DevWallet>,
    pub txid_blacklist: Vec<String>,
}

impl NodeConfig {
    pub fn new(mainnet: bool, urls: Vec<String>, raw_priv_hex: &str) -> Self {
        Self {
            mainnet,
            urls,
            raw_priv_hex: raw_priv_hex.to_string(),
            external_api_key: None,
            host_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            dev_wallets: Vec::new(),
            txid_blacklist: Vec::new(),
        }
    }

    /// `None` when `<PREFIX>_URLS` is unset; malformed values are errors.
    pub fn from_env(prefix: &str) -> Result<Option<Self>> {
        let var = |name: &str| std::env::var(format!("{}_{}", prefix, name)).ok();

        let urls: Vec<String> = match var("URLS") {
            Some(raw) => split_list(&raw),
            None => return Ok(None),
        };
        if urls.is_empty() {
            return Err(PoolError::invalid(format!("{}_URLS is empty", prefix)));
        }

        let mainnet = var("MAINNET")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        let timeout_ms = match var("TIMEOUT_MS") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| PoolError::invalid(format!("{}_TIMEOUT_MS: {:?}", prefix, raw)))?,
            None => DEFAULT_TIMEOUT_MS,
        };

        let dev_wallets = match var("DEV_WALLETS") {
            Some(raw) => parse_dev_wallets(&raw)?,
            None => Vec::new(),
        };

        Ok(Some(Self {
            mainnet,
            urls,
            raw_priv_hex: var("PRIV_KEY").unwrap_or_default(),
            external_api_key: var("API_KEY").filter(|k| !k.is_empty()),
            host_timeout: Duration::from_millis(timeout_ms),
            dev_wallets,
            txid_blacklist: var("TXID_BLACKLIST").map(|v| split_list(&v)).unwrap_or_default(),
        }))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_dev_wallets(raw: &str) -> Result<Vec<DevWallet>> {
    split_list(raw)
        .iter()
        .map(|entry| {
            let (address, amount) = entry
                .split_once(':')
                .ok_or_else(|| PoolError::invalid(format!("dev wallet {:?}: expected address:amount", entry)))?;
            let amount = amount
                .parse()
                .map_err(|_| PoolError::invalid(format!("dev wallet {:?}: bad amount", entry)))?;
            Ok(DevWallet {
                address: address.to_string(),
                amount,
            })
        })
        .collect()
}

/// Static per-chain constants.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub chain: ChainId,
    /// Decimal places of the base unit.
    pub units: u32,
    /// Confirmations before a round's value is known.
    pub immature_depth: u64,
    /// Confirmations before a round may be credited and spent.
    pub mature_depth: u64,
    /// Difficulty-1 target.
    pub max_target: U256,
    pub share_difficulty: f64,
    pub difficulty_factor: f64,
    pub epoch_length: u64,
    /// Emit a job at least this often even without a new block.
    pub refresh_interval: Duration,
    pub fee_per_byte: u64,
    pub fallback_url: Option<&'static str>,
    pub network_id: Option<&'static str>,
    pub evm_chain_id: Option<u64>,
    pub token_contract: Option<&'static str>,
}

impl ChainParams {
    pub fn for_chain(chain: ChainId, mainnet: bool) -> Self {
        // kawpow/firopow difficulty-1: 0x00000000ff000000...
        let progpow_max = U256::from_u64(0xff) << 216;
        let base = Self {
            chain,
            units: 8,
            immature_depth: 25,
            mature_depth: 101,
            max_target: progpow_max,
            share_difficulty: 1.0,
            difficulty_factor: 1.0,
            epoch_length: 0,
            refresh_interval: Duration::from_secs(60),
            fee_per_byte: 1,
            fallback_url: None,
            network_id: None,
            evm_chain_id: None,
            token_contract: None,
        };

        match chain {
            ChainId::Btc => Self {
                fee_per_byte: 10,
                fallback_url: Some("https://api.blockchair.com/bitcoin"),
                ..base
            },
            ChainId::Rvn => Self {
                share_difficulty: 0.5,
                epoch_length: 7500,
                fee_per_byte: 1100,
                ..base
            },
            ChainId::Firo => Self {
                share_difficulty: 0.5,
                epoch_length: 1300,
                refresh_interval: Duration::from_secs(5 * 60),
                fee_per_byte: 110,
                ..base
            },
            ChainId::Flux => Self {
                // Equihash 125,4 difficulty-1: 0x0007ffff00...
                max_target: U256::from_u64(0x0007_ffff) << 224,
                refresh_interval: Duration::from_secs(2 * 60),
                ..base
            },
            ChainId::Ae => Self {
                units: 18,
                immature_depth: 18,
                mature_depth: 180,
                max_target: U256::from_u64(0xffff) << 240,
                share_difficulty: 1.0,
                difficulty_factor: 42.0,
                refresh_interval: Duration::from_secs(15),
                fallback_url: Some(if mainnet {
                    "https://mainnet.aeternity.io"
                } else {
                    "https://testnet.aeternity.io"
                }),
                network_id: Some(if mainnet { "ae_mainnet" } else { "ae_uat" }),
                ..base
            },
            ChainId::Eth => Self {
                units: 18,
                evm_chain_id: Some(if mainnet { 1 } else { 11155111 }),
                ..base
            },
            ChainId::Etc => Self {
                units: 18,
                evm_chain_id: Some(if mainnet { 61 } else { 63 }),
                ..base
            },
            ChainId::Usdc => Self {
                units: 6,
                evm_chain_id: Some(if mainnet { 1 } else { 11155111 }),
                token_contract: Some(if mainnet {
                    "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
                } else {
                    "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"
                }),
                ..base
            },
        }
    }
}

/// Round accountant knobs.
#[derive(Debug, Clone)]
pub struct AccountantConfig {
    /// ETH per one unit of the payout coin's USD price, as quoted by the
    /// exchange when the run starts.
    pub eth_rate: f64,
    /// Fee-balance target for USDC payouts, in wei.
    pub usdc_fee_balance: BigInt,
    /// Gas reserve carved per request, in USD.
    pub fee_balance_usd: f64,
    pub default_pool_fee_bps: u32,
    /// Addresses with a negotiated pool fee.
    pub pool_fee_overrides: HashMap<String, u32>,
}

impl AccountantConfig {
    pub fn new(eth_rate: f64) -> Self {
        let mut overrides = HashMap::new();
        overrides.insert("0x7dD8E752F5e606Aca3A40DD1dEaDF363dbbCa100".to_ascii_lowercase(), 45);
        Self {
            eth_rate,
            usdc_fee_balance: BigInt::from(25u8) * pow10(15),
            fee_balance_usd: 0.025,
            default_pool_fee_bps: 100,
            pool_fee_overrides: overrides,
        }
    }

    pub fn pool_fee_bps(&self, address: &str) -> u32 {
        self.pool_fee_overrides
            .get(&address.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_pool_fee_bps)
    }
}

/// Minimum per-coin sums before a coin joins a switch.
#[derive(Debug, Clone)]
pub struct SwitchThresholds(HashMap<String, BigInt>);

impl SwitchThresholds {
    pub fn get(&self, coin: &str) -> Option<&BigInt> {
        self.0.get(coin)
    }

    pub fn set(&mut self, coin: &str, value: BigInt) {
        self.0.insert(coin.to_string(), value);
    }
}

impl Default for SwitchThresholds {
    fn default() -> Self {
        let mut table = HashMap::new();
        table.insert("ETH".to_string(), pow10(18));
        table.insert("ETC".to_string(), BigInt::from(150u8) * pow10(18));
        table.insert("RVN".to_string(), BigInt::from(20_000u32) * pow10(8));
        table.insert("BTC".to_string(), pow10(7));
        table.insert("USDC".to_string(), BigInt::from(5000u32) * pow10(6));
        Self(table)
    }
}
