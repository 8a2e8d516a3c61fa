//! Payout transaction generation with per-byte fee targeting.
//!
//! The fee is assessed against the exact serialized length of the signed
//! transaction and pro-rated across outputs that opted in to fee sharing.
//! Signatures have a fixed DER length, so the length measured at zero fee is
//! the length of the final transaction.

use secp256k1::SecretKey;

use super::{address_to_script, Transaction, TxContext};
use crate::error::{PoolError, Result};
use crate::tracing::prelude::*;

/// Largest payout transaction we will build.
pub const MAX_TX_SIZE: usize = 50_000;

/// A spendable output owned by the pool wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendInput {
    /// Display-order txid.
    pub txid: String,
    pub index: u32,
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutOutput {
    pub address: String,
    pub value: u64,
    /// Whether this output bears part of the network fee.
    pub split_fee: bool,
}

/// Signed payout transaction.
#[derive(Debug, Clone)]
pub struct GeneratedTx {
    pub tx: Transaction,
    pub raw: Vec<u8>,
    pub txid: String,
    pub fee: u64,
    /// Output values after fee deduction, aligned with the request.
    pub output_values: Vec<u64>,
}

/// Deduct `fee` from the fee-sharing outputs in proportion to value.
///
/// The first sharing output absorbs the rounding remainder.
pub fn distribute_fee(outputs: &[PayoutOutput], fee: u64) -> Result<Vec<u64>> {
    let sharing: u128 = outputs
        .iter()
        .filter(|o| o.split_fee)
        .map(|o| o.value as u128)
        .sum();
    if sharing == 0 {
        return Err(PoolError::invalid("no output opted in to fee sharing"));
    }

    let mut shares: Vec<u64> = outputs
        .iter()
        .map(|o| {
            if o.split_fee {
                (fee as u128 * o.value as u128 / sharing) as u64
            } else {
                0
            }
        })
        .collect();

    let assigned: u64 = shares.iter().sum();
    if let Some(first) = outputs.iter().position(|o| o.split_fee) {
        shares[first] += fee - assigned;
    }

    outputs
        .iter()
        .zip(shares)
        .map(|(output, share)| match output.value.checked_sub(share) {
            Some(value) if value > 0 || share == 0 => Ok(value),
            _ => Err(PoolError::invalid(format!(
                "output to {} ({}) cannot cover fee share {}",
                output.address, output.value, share
            ))),
        })
        .collect()
}

fn build_signed(
    ctx: &TxContext,
    secret: &SecretKey,
    inputs: &[SpendInput],
    outputs: &[PayoutOutput],
    values: &[u64],
) -> Result<Transaction> {
    let mut tx = Transaction::new(ctx.clone());
    for input in inputs {
        tx.add_input(&input.txid, input.index, 0xffff_ffff, Vec::new())?;
        if let Some(last) = tx.inputs.last_mut() {
            last.value = Some(input.value);
        }
    }
    for (output, value) in outputs.iter().zip(values) {
        tx.add_output(address_to_script(&output.address, ctx)?, *value);
    }
    for (index, input) in inputs.iter().enumerate() {
        tx.sign_p2pkh(index, &input.script_pubkey, secret)?;
    }
    Ok(tx)
}

/// Build and sign a payout paying `fee_per_byte` on its exact length.
///
/// Inputs must sum to the outputs; include a change output explicitly.
pub fn generate_tx(
    ctx: &TxContext,
    secret: &SecretKey,
    inputs: &[SpendInput],
    outputs: &[PayoutOutput],
    fee_per_byte: u64,
) -> Result<GeneratedTx> {
    if inputs.is_empty() || outputs.is_empty() {
        return Err(PoolError::invalid("payout needs inputs and outputs"));
    }
    let input_sum: u128 = inputs.iter().map(|i| i.value as u128).sum();
    let output_sum: u128 = outputs.iter().map(|o| o.value as u128).sum();
    if input_sum != output_sum {
        return Err(PoolError::invalid(format!(
            "inputs {} != outputs {}",
            input_sum, output_sum
        )));
    }

    let unfunded: Vec<u64> = outputs.iter().map(|o| o.value).collect();
    let length = build_signed(ctx, secret, inputs, outputs, &unfunded)?
        .serialize(None)
        .len();
    if length > MAX_TX_SIZE {
        return Err(PoolError::invalid(format!(
            "payout transaction too large: {} bytes",
            length
        )));
    }

    let fee = length as u64 * fee_per_byte;
    let values = distribute_fee(outputs, fee)?;
    let tx = build_signed(ctx, secret, inputs, outputs, &values)?;
    let raw = tx.serialize(None);
    if raw.len() != length {
        return Err(PoolError::invariant(format!(
            "payout transaction is {} bytes after fee, {} before",
            raw.len(),
            length
        )));
    }

    let txid = tx.txid(None);
    debug!(txid = %txid, bytes = length, fee, "Payout transaction built");
    Ok(GeneratedTx {
        tx,
        raw,
        txid,
        fee,
        output_values: values,
    })
}
