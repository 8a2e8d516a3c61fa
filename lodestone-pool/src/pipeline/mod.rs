//! Storage-backed drivers for the accountants.
//!
//! Each public method is one step a scheduler runs on its own cadence. A step
//! reads what it needs through [`Repository`](crate::repo::Repository), does
//! its work, and writes every touched row back before returning. Steps are
//! safe to repeat: a step with nothing to do returns without side effects.

mod credit;
mod switch;

pub use credit::CreditPipeline;
pub use switch::SwitchPipeline;

use crate::error::{PoolError, Result};
use crate::repo::Repository;
use crate::types::{Owner, Payout};

/// The single open payout for `owner` in `coin`, inserted when none exists.
async fn open_payout(repo: &dyn Repository, owner: Owner, coin: &str, address: &str) -> Result<Payout> {
    let mut open = match owner {
        Owner::Miner(id) => repo.get_unspent_payouts_by_miner(id, coin).await?,
        Owner::Recipient(id) => repo.get_unspent_payouts_by_recipient(id, coin).await?,
    };
    if open.len() > 1 {
        return Err(PoolError::invariant(format!(
            "{:?}: {} unspent {} payouts",
            owner,
            open.len(),
            coin
        )));
    }
    match open.pop() {
        Some(payout) => Ok(payout),
        None => {
            let mut payout = Payout::new(owner, coin, address);
            payout.id = repo.insert_payout(&payout).await?;
            Ok(payout)
        }
    }
}
