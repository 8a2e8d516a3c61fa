//! Storage seam for the pipelines.
//!
//! The relational store lives outside this crate; pipelines only see this
//! trait. Updates take the whole row. Callers wrap each pipeline step in a
//! transaction, so every method must be safe to repeat with the same input.

mod memory;

pub use memory::MemoryRepository;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    Balance, Miner, Payout, Recipient, Round, RoundShare, Switch, SwitchDeposit, SwitchTrade,
    SwitchWithdrawal, Utxo,
};

#[async_trait]
pub trait Repository: Send + Sync {
    /// Pending rounds at or below `pending_height`.
    async fn get_pending_rounds(&self, chain_id: &str, pending_height: u64) -> Result<Vec<Round>>;

    /// Unlocked rounds at or below `mature_height` that are not yet mature.
    async fn get_immature_rounds(&self, chain_id: &str, mature_height: u64) -> Result<Vec<Round>>;

    async fn get_mature_unspent_rounds(&self, chain_id: &str) -> Result<Vec<Round>>;

    async fn update_round(&self, round: &Round) -> Result<()>;

    async fn get_round_shares(&self, round_id: u64) -> Result<Vec<RoundShare>>;

    async fn get_miner(&self, miner_id: u64) -> Result<Miner>;

    async fn get_recipients(&self) -> Result<Vec<Recipient>>;

    async fn get_unspent_payouts_by_miner(&self, miner_id: u64, coin_id: &str) -> Result<Vec<Payout>>;

    async fn get_unspent_payouts_by_recipient(&self, recipient_id: u64, coin_id: &str) -> Result<Vec<Payout>>;

    async fn get_payout(&self, payout_id: u64) -> Result<Payout>;

    /// Returns the new id.
    async fn insert_payout(&self, payout: &Payout) -> Result<u64>;

    async fn update_payout(&self, payout: &Payout) -> Result<()>;

    async fn insert_balance(&self, balance: &Balance) -> Result<u64>;

    async fn update_balance(&self, balance: &Balance) -> Result<()>;

    /// Pending balances not yet part of a switch.
    async fn get_unswitched_balances(&self) -> Result<Vec<Balance>>;

    async fn get_balances_by_switch(&self, switch_id: u64) -> Result<Vec<Balance>>;

    /// Point pending balances of a spent payout at its successor.
    async fn update_pending_balances_swap_out_payout_id(&self, old_payout_id: u64, new_payout_id: u64) -> Result<()>;

    async fn insert_switch(&self, switch: &Switch) -> Result<u64>;

    async fn get_active_switches(&self) -> Result<Vec<Switch>>;

    async fn update_switch(&self, switch: &Switch) -> Result<()>;

    async fn insert_deposit(&self, deposit: &SwitchDeposit) -> Result<u64>;

    async fn update_deposit(&self, deposit: &SwitchDeposit) -> Result<()>;

    async fn get_deposits_by_switch(&self, switch_id: u64) -> Result<Vec<SwitchDeposit>>;

    async fn insert_trade(&self, trade: &SwitchTrade) -> Result<u64>;

    async fn update_trade(&self, trade: &SwitchTrade) -> Result<()>;

    async fn get_trades_by_switch(&self, switch_id: u64) -> Result<Vec<SwitchTrade>>;

    async fn insert_withdrawal(&self, withdrawal: &SwitchWithdrawal) -> Result<u64>;

    async fn update_withdrawal(&self, withdrawal: &SwitchWithdrawal) -> Result<()>;

    async fn get_withdrawals_by_switch(&self, switch_id: u64) -> Result<Vec<SwitchWithdrawal>>;

    /// Active, unspent outputs of the pool wallet.
    async fn get_unspent_utxos(&self, chain_id: &str) -> Result<Vec<Utxo>>;

    async fn insert_utxo(&self, utxo: &Utxo) -> Result<u64>;

    async fn update_utxo(&self, utxo: &Utxo) -> Result<()>;
}
