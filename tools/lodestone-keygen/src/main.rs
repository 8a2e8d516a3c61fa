//! Payout key generator for the pool's chains.

mod cashaddr;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ed25519_dalek::SigningKey;
use lodestone_pool::chain::aeternity;
use lodestone_pool::crypto::{hash160, keys};
use lodestone_pool::tx::TxContext;
use lodestone_pool::PoolError;
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::PublicKey;
use tracing::debug;

/// Conflux account addresses live in the 0x1 space.
const CFX_ADDRESS_TYPE: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
enum Chain {
    Btc,
    Erg,
    Firo,
    Flux,
    Kas,
    Nexa,
    Rvn,
    Bsc,
    Etc,
    Eth,
    Cfx,
    Ae,
}

/// Generate a wallet key and print its address
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Chain to generate the key for
    #[arg(short, long, value_enum, ignore_case = true)]
    chain: Chain,

    /// Derive the address from the obscured key the pool signs with
    #[arg(long)]
    obscure: bool,

    /// Use testnet address prefixes
    #[arg(long)]
    testnet: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

#[derive(Debug)]
struct Generated {
    raw_hex: String,
    /// Present with `--obscure`.
    obscured_hex: Option<String>,
    address: String,
}

fn random_hex() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

fn generate(chain: Chain, obscure: bool, mainnet: bool) -> Result<Generated> {
    if chain == Chain::Ae {
        return generate_ae(random_hex(), obscure);
    }
    let mut attempts = 0u64;
    loop {
        attempts += 1;
        let raw_hex = random_hex();
        let derived = if obscure {
            keys::obscure_private_key(&raw_hex)
        } else {
            keys::secret_key_from_hex(&raw_hex)
        };
        // Out-of-range scalars are vanishingly rare; draw again.
        let Ok(secret) = derived else {
            continue;
        };
        let Some(address) = secp_address(chain, &keys::public_key(&secret), mainnet)? else {
            continue;
        };
        debug!(?chain, attempts, "Key generated");
        return Ok(Generated {
            obscured_hex: obscure.then(|| hex::encode(secret.secret_bytes())),
            raw_hex,
            address,
        });
    }
}

/// Address of a secp256k1 key; `None` when the key must be redrawn.
fn secp_address(chain: Chain, public: &PublicKey, mainnet: bool) -> Result<Option<String>> {
    let address = match chain {
        Chain::Btc => {
            let ctx = if mainnet {
                TxContext::bitcoin()
            } else {
                TxContext::bitcoin_testnet()
            };
            keys::p2pkh_address(public, &ctx.prefix_p2pkh)
        }
        Chain::Rvn => keys::p2pkh_address(public, &TxContext::ravencoin(mainnet).prefix_p2pkh),
        Chain::Firo => keys::p2pkh_address(public, &TxContext::firo(mainnet).prefix_p2pkh),
        Chain::Flux => keys::p2pkh_address(public, &TxContext::flux(mainnet).prefix_p2pkh),
        Chain::Kas => {
            let mut payload = vec![cashaddr::KASPA_SCHNORR_VERSION];
            payload.extend_from_slice(&public.serialize()[1..]);
            cashaddr::encode(if mainnet { "kaspa" } else { "kaspatest" }, &payload)
        }
        Chain::Nexa => {
            let mut payload = vec![cashaddr::P2PKH_VERSION];
            payload.extend_from_slice(&hash160(&public.serialize()));
            cashaddr::encode(if mainnet { "nexa" } else { "nexatest" }, &payload)
        }
        Chain::Bsc | Chain::Etc | Chain::Eth => keys::evm_address(public),
        Chain::Cfx => {
            if keys::evm_address_bytes(public)[0] != CFX_ADDRESS_TYPE {
                return Ok(None);
            }
            keys::evm_address(public)
        }
        Chain::Erg | Chain::Ae => {
            return Err(PoolError::NotImplemented(format!("{:?} secp256k1 key derivation", chain)).into());
        }
    };
    Ok(Some(address))
}

fn generate_ae(raw_hex: String, obscure: bool) -> Result<Generated> {
    let key = if obscure {
        aeternity::signing_key(&raw_hex)?
    } else {
        let seed: [u8; 32] = hex::decode(&raw_hex)?
            .try_into()
            .map_err(|_| PoolError::invalid("seed must be 32 bytes"))?;
        SigningKey::from_bytes(&seed)
    };
    Ok(Generated {
        obscured_hex: obscure.then(|| hex::encode(key.to_bytes())),
        address: aeternity::account_address(&key.verifying_key()),
        raw_hex,
    })
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("lodestone_keygen=debug".parse()?),
            )
            .init();
    }

    let generated = generate(args.chain, args.obscure, !args.testnet)
        .with_context(|| format!("Failed to generate a {:?} key", args.chain))?;

    println!("private key:  {}", generated.raw_hex);
    if let Some(obscured) = &generated.obscured_hex {
        println!("obscured key: {}", obscured);
    }
    println!("address:      {}", generated.address);
    Ok(())
}
