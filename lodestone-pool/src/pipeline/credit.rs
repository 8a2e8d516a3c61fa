use std::sync::Arc;

use crate::accounting::RoundAccountant;
use crate::chain::MiningNode;
use crate::config::AccountantConfig;
use crate::error::Result;
use crate::repo::Repository;
use crate::tracing::prelude::*;
use crate::types::Owner;

use super::open_payout;

/// Takes a chain's rounds from pending through unlock and maturity into
/// credited balances.
pub struct CreditPipeline {
    node: Arc<dyn MiningNode>,
    repo: Arc<dyn Repository>,
}

impl CreditPipeline {
    pub fn new(node: Arc<dyn MiningNode>, repo: Arc<dyn Repository>) -> Self {
        Self { node, repo }
    }

    fn chain_id(&self) -> String {
        self.node.chain().to_string()
    }

    /// Assign value or orphan status to rounds at least `immature_depth`
    /// below the tip. Returns how many rounds were unlocked.
    pub async fn unlock_rounds(&self) -> Result<usize> {
        let chain_id = self.chain_id();
        let status = self.node.get_status().await?;
        let Some(height) = status.height.checked_sub(self.node.params().immature_depth) else {
            return Ok(0);
        };

        let rounds = self.repo.get_pending_rounds(&chain_id, height).await?;
        let mut unlocked = 0;
        for mut round in rounds {
            self.node.unlock_round(&mut round).await?;
            if round.pending {
                continue;
            }
            self.repo.update_round(&round).await?;
            info!(
                chain = %chain_id,
                round = round.id,
                height = round.height,
                orphan = round.orphan,
                value = ?round.value,
                "Round unlocked"
            );
            unlocked += 1;
        }
        Ok(unlocked)
    }

    /// Mark unlocked rounds at least `mature_depth` below the tip mature and
    /// record their wallet outputs. Returns how many rounds matured.
    pub async fn mature_rounds(&self) -> Result<usize> {
        let chain_id = self.chain_id();
        let status = self.node.get_status().await?;
        let Some(height) = status.height.checked_sub(self.node.params().mature_depth) else {
            return Ok(0);
        };

        let rounds = self.repo.get_immature_rounds(&chain_id, height).await?;
        let mut matured = 0;
        for mut round in rounds {
            let utxos = self.node.mature_round(&mut round).await?;
            if !round.mature {
                continue;
            }
            for utxo in &utxos {
                self.repo.insert_utxo(utxo).await?;
            }
            self.repo.update_round(&round).await?;
            debug!(chain = %chain_id, round = round.id, utxos = utxos.len(), "Round matured");
            matured += 1;
        }
        Ok(matured)
    }

    /// Split every mature, unspent round among miners and recipients and
    /// persist the result. Nothing is written unless the books balance.
    /// Returns how many balances were written.
    pub async fn credit_rounds(&self, config: AccountantConfig) -> Result<usize> {
        let chain_id = self.chain_id();
        let mut rounds = self.repo.get_mature_unspent_rounds(&chain_id).await?;
        if rounds.is_empty() {
            return Ok(0);
        }
        rounds.sort_by_key(|r| (r.height, r.id));
        let round_ids: Vec<u64> = rounds.iter().map(|r| r.id).collect();

        let mut accountant = RoundAccountant::new(&chain_id, self.node.params().units, config)?;
        for round in rounds {
            accountant.add_round(round)?;
        }
        accountant.finalize_rounds()?;

        for &round_id in &round_ids {
            let shares = self.repo.get_round_shares(round_id).await?;
            accountant.credit_round(round_id, &shares)?;
        }
        accountant.finalize_round_credits()?;

        let mut miner_ids: Vec<u64> = Vec::new();
        for id in accountant.balances().iter().filter_map(|b| b.miner_id()) {
            if !miner_ids.contains(&id) {
                miner_ids.push(id);
            }
        }
        for miner_id in miner_ids {
            let miner = self.repo.get_miner(miner_id).await?;
            let payout = open_payout(self.repo.as_ref(), Owner::Miner(miner.id), &miner.coin_id, &miner.address).await?;
            accountant.credit_miner(&miner, payout)?;
        }
        accountant.finalize_miners()?;

        for recipient in self.repo.get_recipients().await? {
            let owner = Owner::Recipient(recipient.id);
            let payout = open_payout(self.repo.as_ref(), owner, &recipient.coin_id, &recipient.address).await?;
            accountant.credit_recipient(&recipient, payout)?;
        }
        accountant.finalize_recipients()?;
        accountant.validate_books()?;

        let (rounds, balances, payouts) = accountant.into_parts();
        for balance in &balances {
            self.repo.insert_balance(balance).await?;
        }
        for payout in &payouts {
            self.repo.update_payout(payout).await?;
        }
        for mut round in rounds {
            round.spent = true;
            self.repo.update_round(&round).await?;
        }
        info!(chain = %chain_id, rounds = round_ids.len(), balances = balances.len(), "Rounds credited");
        Ok(balances.len())
    }

    /// Run unlock, maturity and crediting in order.
    pub async fn run(&self, config: AccountantConfig) -> Result<usize> {
        self.unlock_rounds().await?;
        self.mature_rounds().await?;
        self.credit_rounds(config).await
    }
}
