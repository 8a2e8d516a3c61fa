//! In-process repository for dry runs and tests.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::Repository;
use crate::error::{PoolError, Result};
use crate::types::{
    Balance, Miner, Owner, Payout, Recipient, Round, RoundShare, Switch, SwitchDeposit, SwitchTrade,
    SwitchWithdrawal, Utxo,
};

trait Row: Clone {
    const TABLE: &'static str;
    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
}

macro_rules! impl_row {
    ($($ty:ty => $table:literal),* $(,)?) => {
        $(
            impl Row for $ty {
                const TABLE: &'static str = $table;
                fn id(&self) -> u64 {
                    self.id
                }
                fn set_id(&mut self, id: u64) {
                    self.id = id;
                }
            }
        )*
    };
}

impl_row!(
    Round => "rounds",
    Miner => "miners",
    Recipient => "recipients",
    Payout => "payouts",
    Balance => "balances",
    Switch => "switches",
    SwitchDeposit => "switch_deposits",
    SwitchTrade => "switch_trades",
    SwitchWithdrawal => "switch_withdrawals",
    Utxo => "utxos",
);

#[derive(Debug)]
struct Table<T> {
    rows: Vec<T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T: Row> Table<T> {
    /// Ids start at 1.
    fn insert(&mut self, row: &T) -> u64 {
        let id = self.rows.len() as u64 + 1;
        let mut row = row.clone();
        row.set_id(id);
        self.rows.push(row);
        id
    }

    fn update(&mut self, row: &T) -> Result<()> {
        let slot = self
            .rows
            .iter_mut()
            .find(|r| r.id() == row.id())
            .ok_or_else(|| PoolError::invalid(format!("{} {}: no such row", T::TABLE, row.id())))?;
        *slot = row.clone();
        Ok(())
    }

    fn get(&self, id: u64) -> Result<T> {
        self.rows
            .iter()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| PoolError::invalid(format!("{} {}: no such row", T::TABLE, id)))
    }

    fn select(&self, filter: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.iter().filter(|r| filter(r)).cloned().collect()
    }
}

#[derive(Debug, Default)]
struct State {
    rounds: Table<Round>,
    shares: Vec<RoundShare>,
    miners: Table<Miner>,
    recipients: Table<Recipient>,
    payouts: Table<Payout>,
    balances: Table<Balance>,
    switches: Table<Switch>,
    deposits: Table<SwitchDeposit>,
    trades: Table<SwitchTrade>,
    withdrawals: Table<SwitchWithdrawal>,
    utxos: Table<Utxo>,
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| PoolError::upstream("repository state poisoned"))
    }

    pub fn seed_round(&self, round: &Round) -> Result<u64> {
        Ok(self.state()?.rounds.insert(round))
    }

    pub fn seed_share(&self, share: RoundShare) -> Result<()> {
        self.state()?.shares.push(share);
        Ok(())
    }

    pub fn seed_miner(&self, miner: &Miner) -> Result<u64> {
        Ok(self.state()?.miners.insert(miner))
    }

    pub fn seed_recipient(&self, recipient: &Recipient) -> Result<u64> {
        Ok(self.state()?.recipients.insert(recipient))
    }

    pub fn rounds(&self) -> Result<Vec<Round>> {
        Ok(self.state()?.rounds.rows.clone())
    }

    pub fn balances(&self) -> Result<Vec<Balance>> {
        Ok(self.state()?.balances.rows.clone())
    }

    pub fn payouts(&self) -> Result<Vec<Payout>> {
        Ok(self.state()?.payouts.rows.clone())
    }

    pub fn utxos(&self) -> Result<Vec<Utxo>> {
        Ok(self.state()?.utxos.rows.clone())
    }

    pub fn switches(&self) -> Result<Vec<Switch>> {
        Ok(self.state()?.switches.rows.clone())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_pending_rounds(&self, chain_id: &str, pending_height: u64) -> Result<Vec<Round>> {
        Ok(self
            .state()?
            .rounds
            .select(|r| r.chain_id == chain_id && r.pending && r.height <= pending_height))
    }

    async fn get_immature_rounds(&self, chain_id: &str, mature_height: u64) -> Result<Vec<Round>> {
        Ok(self.state()?.rounds.select(|r| {
            r.chain_id == chain_id && !r.pending && !r.mature && !r.orphan && r.height <= mature_height
        }))
    }

    async fn get_mature_unspent_rounds(&self, chain_id: &str) -> Result<Vec<Round>> {
        Ok(self
            .state()?
            .rounds
            .select(|r| r.chain_id == chain_id && r.mature && !r.spent))
    }

    async fn update_round(&self, round: &Round) -> Result<()> {
        self.state()?.rounds.update(round)
    }

    async fn get_round_shares(&self, round_id: u64) -> Result<Vec<RoundShare>> {
        Ok(self
            .state()?
            .shares
            .iter()
            .filter(|s| s.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn get_miner(&self, miner_id: u64) -> Result<Miner> {
        self.state()?.miners.get(miner_id)
    }

    async fn get_recipients(&self) -> Result<Vec<Recipient>> {
        Ok(self.state()?.recipients.rows.clone())
    }

    async fn get_unspent_payouts_by_miner(&self, miner_id: u64, coin_id: &str) -> Result<Vec<Payout>> {
        Ok(self.state()?.payouts.select(|p| {
            p.owner == Owner::Miner(miner_id) && p.coin_id == coin_id && !p.spent
        }))
    }

    async fn get_unspent_payouts_by_recipient(&self, recipient_id: u64, coin_id: &str) -> Result<Vec<Payout>> {
        Ok(self.state()?.payouts.select(|p| {
            p.owner == Owner::Recipient(recipient_id) && p.coin_id == coin_id && !p.spent
        }))
    }

    async fn get_payout(&self, payout_id: u64) -> Result<Payout> {
        self.state()?.payouts.get(payout_id)
    }

    async fn insert_payout(&self, payout: &Payout) -> Result<u64> {
        Ok(self.state()?.payouts.insert(payout))
    }

    async fn update_payout(&self, payout: &Payout) -> Result<()> {
        self.state()?.payouts.update(payout)
    }

    async fn insert_balance(&self, balance: &Balance) -> Result<u64> {
        Ok(self.state()?.balances.insert(balance))
    }

    async fn update_balance(&self, balance: &Balance) -> Result<()> {
        self.state()?.balances.update(balance)
    }

    async fn get_unswitched_balances(&self) -> Result<Vec<Balance>> {
        Ok(self
            .state()?
            .balances
            .select(|b| b.pending && !b.spent && b.out_switch_id.is_none() && b.in_coin != b.out_coin))
    }

    async fn get_balances_by_switch(&self, switch_id: u64) -> Result<Vec<Balance>> {
        Ok(self.state()?.balances.select(|b| b.out_switch_id == Some(switch_id)))
    }

    async fn update_pending_balances_swap_out_payout_id(&self, old_payout_id: u64, new_payout_id: u64) -> Result<()> {
        let mut state = self.state()?;
        for balance in state.balances.rows.iter_mut() {
            if balance.pending && balance.out_payout_id == Some(old_payout_id) {
                balance.out_payout_id = Some(new_payout_id);
            }
        }
        Ok(())
    }

    async fn insert_switch(&self, switch: &Switch) -> Result<u64> {
        Ok(self.state()?.switches.insert(switch))
    }

    async fn get_active_switches(&self) -> Result<Vec<Switch>> {
        Ok(self.state()?.switches.select(Switch::is_active))
    }

    async fn update_switch(&self, switch: &Switch) -> Result<()> {
        self.state()?.switches.update(switch)
    }

    async fn insert_deposit(&self, deposit: &SwitchDeposit) -> Result<u64> {
        Ok(self.state()?.deposits.insert(deposit))
    }

    async fn update_deposit(&self, deposit: &SwitchDeposit) -> Result<()> {
        self.state()?.deposits.update(deposit)
    }

    async fn get_deposits_by_switch(&self, switch_id: u64) -> Result<Vec<SwitchDeposit>> {
        Ok(self.state()?.deposits.select(|d| d.switch_id == switch_id))
    }

    async fn insert_trade(&self, trade: &SwitchTrade) -> Result<u64> {
        Ok(self.state()?.trades.insert(trade))
    }

    async fn update_trade(&self, trade: &SwitchTrade) -> Result<()> {
        self.state()?.trades.update(trade)
    }

    async fn get_trades_by_switch(&self, switch_id: u64) -> Result<Vec<SwitchTrade>> {
        Ok(self.state()?.trades.select(|t| t.switch_id == switch_id))
    }

    async fn insert_withdrawal(&self, withdrawal: &SwitchWithdrawal) -> Result<u64> {
        Ok(self.state()?.withdrawals.insert(withdrawal))
    }

    async fn update_withdrawal(&self, withdrawal: &SwitchWithdrawal) -> Result<()> {
        self.state()?.withdrawals.update(withdrawal)
    }

    async fn get_withdrawals_by_switch(&self, switch_id: u64) -> Result<Vec<SwitchWithdrawal>> {
        Ok(self.state()?.withdrawals.select(|w| w.switch_id == switch_id))
    }

    async fn get_unspent_utxos(&self, chain_id: &str) -> Result<Vec<Utxo>> {
        Ok(self
            .state()?
            .utxos
            .select(|u| u.chain_id == chain_id && u.active && !u.spent))
    }

    async fn insert_utxo(&self, utxo: &Utxo) -> Result<u64> {
        Ok(self.state()?.utxos.insert(utxo))
    }

    async fn update_utxo(&self, utxo: &Utxo) -> Result<()> {
        self.state()?.utxos.update(utxo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    #[tokio::test]
    async fn test_insert_assigns_ids_and_update_replaces() {
        let repo = MemoryRepository::new();
        let payout = Payout::new(Owner::Miner(1), "ETH", "0x1");
        assert_eq!(repo.insert_payout(&payout).await.unwrap(), 1);
        assert_eq!(repo.insert_payout(&payout).await.unwrap(), 2);

        let mut stored = repo.get_payout(2).await.unwrap();
        stored.value = BigInt::from(5);
        repo.update_payout(&stored).await.unwrap();
        assert_eq!(repo.get_payout(2).await.unwrap().value, BigInt::from(5));

        stored.id = 9;
        assert!(repo.update_payout(&stored).await.is_err());
    }

    #[tokio::test]
    async fn test_round_queries_follow_lifecycle() {
        let repo = MemoryRepository::new();
        let mut round = Round::pending("RVN", 100, "00aa", 1.0);
        round.id = repo.seed_round(&round).unwrap();
        repo.seed_round(&Round::pending("RVN", 200, "00bb", 1.0)).unwrap();
        repo.seed_round(&Round::pending("FIRO", 100, "00cc", 1.0)).unwrap();

        assert_eq!(repo.get_pending_rounds("RVN", 150).await.unwrap().len(), 1);

        round.pending = false;
        round.value = Some(BigInt::from(1));
        repo.update_round(&round).await.unwrap();
        assert_eq!(repo.get_immature_rounds("RVN", 150).await.unwrap().len(), 1);
        assert!(repo.get_mature_unspent_rounds("RVN").await.unwrap().is_empty());

        round.mark_mature().unwrap();
        repo.update_round(&round).await.unwrap();
        assert_eq!(repo.get_mature_unspent_rounds("RVN").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_swap_out_payout_id_moves_pending_only() {
        let repo = MemoryRepository::new();
        let mut pending = Balance::new(Owner::Miner(1), "ETH", BigInt::from(10), Some(1));
        pending.out_coin = "USDC".into();
        pending.out_payout_id = Some(4);
        let mut settled = pending.clone();
        settled.settle();
        repo.insert_balance(&pending).await.unwrap();
        repo.insert_balance(&settled).await.unwrap();

        repo.update_pending_balances_swap_out_payout_id(4, 7).await.unwrap();
        let ids: Vec<Option<u64>> = repo.balances().unwrap().iter().map(|b| b.out_payout_id).collect();
        assert_eq!(ids, vec![Some(7), Some(4)]);
        assert_eq!(repo.get_unswitched_balances().await.unwrap().len(), 1);
    }
}
