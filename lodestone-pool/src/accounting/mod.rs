//! Deterministic bookkeeping for mined rounds and exchange switches.
//!
//! Both accountants are single-task objects built per pipeline run. They
//! hold the rows they produce in plain vectors; callers persist them once
//! the books validate.

mod bimap;
mod fee_balance;
mod round;
mod switch;

pub use bimap::{Bimap, BimapEntry};
pub use fee_balance::FeeBalancePolicy;
pub use round::{RoundAccountant, Stage};
pub use switch::{find_path, Market, SwitchAccountant, MARKETS};

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::error::{PoolError, Result};

/// Split `total` in proportion to `weights`, flooring each share and adding
/// the remainder to the first one.
pub(crate) fn split_proportional(total: &BigInt, weights: &[BigInt]) -> Result<Vec<BigInt>> {
    let weight_sum: BigInt = weights.iter().sum();
    if weight_sum.is_zero() {
        if total.is_zero() {
            return Ok(vec![BigInt::zero(); weights.len()]);
        }
        return Err(PoolError::invariant(format!("cannot split {} over zero weight", total)));
    }
    if weights.iter().any(Signed::is_negative) {
        return Err(PoolError::invariant("negative split weight"));
    }

    let mut parts: Vec<BigInt> = weights.iter().map(|w| total * w / &weight_sum).collect();
    let remainder = total - parts.iter().sum::<BigInt>();
    if remainder.is_negative() {
        return Err(PoolError::invariant(format!("negative split remainder {}", remainder)));
    }
    if let Some(first) = parts.first_mut() {
        *first += remainder;
    }
    Ok(parts)
}
