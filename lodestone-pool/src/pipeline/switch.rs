use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::accounting::SwitchAccountant;
use crate::chain::{ChainId, PayoutNode, TxOutput};
use crate::config::SwitchThresholds;
use crate::error::{PoolError, Result};
use crate::exchange::{DepositStatus, ExchangeClient, OrderStatus, WithdrawalStatus};
use crate::repo::Repository;
use crate::tracing::prelude::*;
use crate::types::{BalanceOutType, Switch, SwitchDeposit, SwitchStatus, SwitchTrade, SwitchWithdrawal, Utxo};

/// Prices are quoted against this coin and treated as USD.
const USD_COIN: &str = "USDC";

/// How much of the switch history to replay into an accountant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Replay {
    Balances,
    Deposits,
    Trades,
    Withdrawals,
}

/// Drives one switch at a time from deposit to distribution.
///
/// Each [`step`](Self::step) runs the action for the active switch's status
/// and advances the status when that action is complete. Actions that wait
/// on the exchange return without advancing and are polled again.
pub struct SwitchPipeline {
    repo: Arc<dyn Repository>,
    exchange: Arc<dyn ExchangeClient>,
    wallets: HashMap<String, Arc<dyn PayoutNode>>,
    thresholds: SwitchThresholds,
}

impl SwitchPipeline {
    pub fn new(repo: Arc<dyn Repository>, exchange: Arc<dyn ExchangeClient>, thresholds: SwitchThresholds) -> Self {
        Self {
            repo,
            exchange,
            wallets: HashMap::new(),
            thresholds,
        }
    }

    /// Register the pool wallet deposits are sent from and withdrawals
    /// arrive at.
    pub fn with_wallet(mut self, wallet: Arc<dyn PayoutNode>) -> Self {
        self.wallets.insert(wallet.chain().to_string(), wallet);
        self
    }

    fn wallet(&self, coin: &str) -> Result<&Arc<dyn PayoutNode>> {
        self.wallets
            .get(coin)
            .ok_or_else(|| PoolError::Unsupported(format!("no {} wallet configured", coin)))
    }

    async fn usd_price(&self, coin: &str) -> Result<f64> {
        if coin == USD_COIN {
            return Ok(1.0);
        }
        self.exchange.get_rate(coin, USD_COIN).await
    }

    /// Start a switch over every pending cross-coin balance that clears the
    /// thresholds. Refuses while another switch is active; returns `None`
    /// when nothing qualifies.
    pub async fn initiate_switch(&self) -> Result<Option<Switch>> {
        if let Some(active) = self.repo.get_active_switches().await?.first() {
            return Err(PoolError::invariant(format!(
                "switch {} still active at {}",
                active.id, active.status
            )));
        }
        let balances = self.repo.get_unswitched_balances().await?;
        if balances.is_empty() {
            return Ok(None);
        }

        let mut accountant = SwitchAccountant::new(0, balances, self.thresholds.clone())?;
        let mut coins = accountant.bimap().inputs();
        coins.extend(accountant.bimap().outputs());
        coins.sort();
        coins.dedup();
        let mut prices = HashMap::new();
        for coin in coins {
            let price = self.usd_price(&coin).await?;
            prices.insert(coin, price);
        }
        accountant.estimate_outputs(&prices)?;

        let dropped = accountant.check_thresholds();
        if accountant.bimap().is_empty() {
            debug!(dropped = ?dropped, "Nothing to switch");
            return Ok(None);
        }

        let mut switch = Switch::new();
        switch.id = self.repo.insert_switch(&switch).await?;
        let switched = accountant.switched_balances();
        for balance in &switched {
            let mut balance = (*balance).clone();
            balance.out_switch_id = Some(switch.id);
            self.repo.update_balance(&balance).await?;
        }
        info!(switch = switch.id, balances = switched.len(), dropped = ?dropped, "Switch initiated");
        Ok(Some(switch))
    }

    /// Run the active switch's current action. Returns the switch's status
    /// afterwards, or `None` when no switch is active.
    pub async fn step(&self) -> Result<Option<SwitchStatus>> {
        let Some(mut switch) = self.repo.get_active_switches().await?.into_iter().next() else {
            return Ok(None);
        };
        let id = switch.id;
        let done = match switch.status {
            SwitchStatus::DepositInactive => self.send_deposits(id).await?,
            SwitchStatus::DepositUnregistered => self.register_deposits(id).await?,
            SwitchStatus::DepositUnconfirmed => self.confirm_deposits(id).await?,
            SwitchStatus::DepositComplete => self.generate_trades(id).await?,
            SwitchStatus::TradesInactive => self.execute_trades(id, 1).await?,
            SwitchStatus::TradesCompleteStageOne => self.execute_trades(id, 2).await?,
            SwitchStatus::TradesCompleteStageTwo => self.initiate_withdrawals(id).await?,
            SwitchStatus::WithdrawalsActive => self.confirm_withdrawals(id).await?,
            SwitchStatus::WithdrawalsComplete => self.distribute(id).await?,
            SwitchStatus::SwitchComplete => false,
        };
        if done {
            if let Some(next) = switch.status.next() {
                switch.advance(next)?;
                self.repo.update_switch(&switch).await?;
                info!(switch = id, status = %switch.status, "Switch advanced");
            }
        }
        Ok(Some(switch.status))
    }

    async fn replay(&self, switch_id: u64, through: Replay) -> Result<SwitchAccountant> {
        let balances = self.repo.get_balances_by_switch(switch_id).await?;
        let mut accountant = SwitchAccountant::new(switch_id, balances, self.thresholds.clone())?;
        if through >= Replay::Deposits {
            for deposit in self.repo.get_deposits_by_switch(switch_id).await? {
                accountant.add_deposit(&deposit)?;
            }
        }
        if through >= Replay::Trades {
            let mut paths: BTreeMap<u32, Vec<SwitchTrade>> = BTreeMap::new();
            for trade in self.repo.get_trades_by_switch(switch_id).await? {
                paths.entry(trade.path_id).or_default().push(trade);
            }
            for path in paths.values() {
                accountant.add_trade_path(path)?;
            }
        }
        if through >= Replay::Withdrawals {
            for withdrawal in self.repo.get_withdrawals_by_switch(switch_id).await? {
                accountant.add_withdrawal(&withdrawal)?;
            }
        }
        Ok(accountant)
    }

    /// Send each input coin's total to the exchange deposit address.
    async fn send_deposits(&self, switch_id: u64) -> Result<bool> {
        let accountant = self.replay(switch_id, Replay::Balances).await?;
        let sent = self.repo.get_deposits_by_switch(switch_id).await?;

        for (coin, value) in accountant.deposit_values() {
            if sent.iter().any(|d| d.chain_id == coin) {
                continue;
            }
            let wallet = self.wallet(&coin)?;
            let address = self.exchange.get_deposit_address(&coin).await?;
            let mut outputs = vec![TxOutput {
                address,
                value: value.clone(),
                split_fee: true,
            }];

            let (inputs, change) = if spends_utxos(wallet.chain()) {
                let (inputs, change) = select_inputs(self.repo.get_unspent_utxos(&coin).await?, &value)?;
                if change.is_positive() {
                    outputs.push(TxOutput {
                        address: wallet.address().to_string(),
                        value: change.clone(),
                        split_fee: false,
                    });
                }
                (inputs, change)
            } else {
                (Vec::new(), BigInt::zero())
            };

            let tx = wallet.create_tx(&inputs, &outputs).await?;
            let txid = wallet.broadcast_tx(&tx.raw).await?;
            let mut deposit = SwitchDeposit::new(switch_id, &coin, &txid, value.clone());
            deposit.id = self.repo.insert_deposit(&deposit).await?;

            for mut utxo in inputs {
                utxo.spent = true;
                utxo.deposit_id = Some(deposit.id);
                self.repo.update_utxo(&utxo).await?;
            }
            if change.is_positive() {
                let index = (outputs.len() - 1) as u32;
                self.repo.insert_utxo(&Utxo::new(&coin, &txid, index, change)).await?;
            }
            info!(switch = switch_id, coin = %coin, value = %value, fee = %tx.fee, txid = %txid, "Deposit sent");
        }
        Ok(true)
    }

    /// Match each sent deposit to the exchange's record by txid.
    async fn register_deposits(&self, switch_id: u64) -> Result<bool> {
        let mut done = true;
        for mut deposit in self.repo.get_deposits_by_switch(switch_id).await? {
            if deposit.registered {
                continue;
            }
            let mut known = self.exchange.get_open_deposits_for(&deposit.chain_id).await?;
            known.extend(self.exchange.get_closed_deposits_for(&deposit.chain_id).await?);
            let Some(remote) = known.into_iter().find(|d| d.txid == deposit.txid) else {
                debug!(switch = switch_id, deposit = deposit.id, txid = %deposit.txid, "Deposit not seen yet");
                done = false;
                continue;
            };
            remote.status.check(&remote.id)?;
            deposit.exchange_deposit_id = Some(remote.id);
            deposit.registered = true;
            self.repo.update_deposit(&deposit).await?;
        }
        Ok(done)
    }

    /// Record what the exchange credited; the shortfall is the deposit's fee.
    async fn confirm_deposits(&self, switch_id: u64) -> Result<bool> {
        let mut done = true;
        for mut deposit in self.repo.get_deposits_by_switch(switch_id).await? {
            if !deposit.pending {
                continue;
            }
            let exchange_id = deposit
                .exchange_deposit_id
                .clone()
                .ok_or_else(|| PoolError::invariant(format!("deposit {}: never registered", deposit.id)))?;
            let remote = self.exchange.get_deposit_by_id(&exchange_id).await?;
            if remote.status.check(&remote.id)? != DepositStatus::Completed {
                done = false;
                continue;
            }
            let fees = &deposit.value - &remote.quantity;
            if fees.is_negative() {
                return Err(PoolError::invariant(format!(
                    "deposit {}: exchange credited {} for {} sent",
                    deposit.id, remote.quantity, deposit.value
                )));
            }
            deposit.fees = Some(fees);
            deposit.value = remote.quantity;
            deposit.cost_basis_price = Some(self.usd_price(&deposit.chain_id).await?);
            deposit.pending = false;
            self.repo.update_deposit(&deposit).await?;
            info!(switch = switch_id, deposit = deposit.id, value = %deposit.value, fees = ?deposit.fees, "Deposit confirmed");
        }
        Ok(done)
    }

    /// Persist one trade path per cell, later stages first so each trade can
    /// point at its successor.
    async fn generate_trades(&self, switch_id: u64) -> Result<bool> {
        if !self.repo.get_trades_by_switch(switch_id).await?.is_empty() {
            return Ok(true);
        }
        let accountant = self.replay(switch_id, Replay::Deposits).await?;
        for path in accountant.generate_trades()? {
            let mut next_trade_id = None;
            for mut trade in path.into_iter().rev() {
                trade.next_trade_id = next_trade_id;
                trade.id = self.repo.insert_trade(&trade).await?;
                next_trade_id = Some(trade.id);
            }
        }
        Ok(true)
    }

    /// Place and poll the orders of one stage. Proceeds of a filled trade
    /// become its successor's value. Complete once every trade of the stage
    /// has filled.
    async fn execute_trades(&self, switch_id: u64, stage: u8) -> Result<bool> {
        let mut trades = self.repo.get_trades_by_switch(switch_id).await?;
        let mut handoffs: Vec<(u64, BigInt)> = Vec::new();

        for trade in trades.iter_mut().filter(|t| t.stage == stage && !t.filled) {
            if !trade.initiated {
                let value = trade
                    .value
                    .clone()
                    .ok_or_else(|| PoolError::invariant(format!("trade {}: nothing to trade", trade.id)))?;
                let order = self.exchange.create_order(&trade.market, trade.direction, &value).await?;
                trade.exchange_order_id = Some(order.id);
                trade.order_value = Some(value);
                trade.initiated = true;
                trade.open = true;
                self.repo.update_trade(trade).await?;
                info!(switch = switch_id, trade = trade.id, market = %trade.market, direction = %trade.direction, "Order placed");
            }

            let order_id = trade
                .exchange_order_id
                .clone()
                .ok_or_else(|| PoolError::invariant(format!("trade {}: initiated without order", trade.id)))?;
            let order = self.exchange.get_order(&order_id).await?;
            if order.status != OrderStatus::Closed {
                continue;
            }
            if !order.filled {
                return Err(PoolError::invariant(format!(
                    "trade {}: order {} closed unfilled",
                    trade.id, order_id
                )));
            }

            trade.slippage = self.slippage(&trade.market, order.rate).await?;
            trade.fair_market_price = Some(self.usd_price(&trade.from_chain_id).await?);
            trade.trade_fees = Some(order.fees);
            trade.open = false;
            trade.filled = true;
            if let Some(next) = trade.next_trade_id {
                handoffs.push((next, order.output_amount.clone()));
            }
            trade.proceeds = Some(order.output_amount);
            self.repo.update_trade(trade).await?;
            info!(switch = switch_id, trade = trade.id, proceeds = ?trade.proceeds, slippage = ?trade.slippage, "Order filled");
        }

        for (next_id, value) in handoffs {
            let next = trades
                .iter_mut()
                .find(|t| t.id == next_id)
                .ok_or_else(|| PoolError::invariant(format!("trade {}: successor missing", next_id)))?;
            next.value = Some(value);
            self.repo.update_trade(next).await?;
        }

        Ok(trades.iter().filter(|t| t.stage == stage).all(|t| t.filled))
    }

    /// Fill rate relative to the current mid-market rate; negative is worse
    /// for a sell.
    async fn slippage(&self, market: &str, rate: f64) -> Result<Option<f64>> {
        let Some((base, quote)) = market.split_once('-') else {
            return Ok(None);
        };
        let reference = self.exchange.get_rate(base, quote).await?;
        if reference <= 0.0 || rate <= 0.0 {
            return Ok(None);
        }
        Ok(Some((rate - reference) / reference))
    }

    /// Withdraw each output coin's proceeds to the pool wallet.
    async fn initiate_withdrawals(&self, switch_id: u64) -> Result<bool> {
        let accountant = self.replay(switch_id, Replay::Trades).await?;
        let requested = self.repo.get_withdrawals_by_switch(switch_id).await?;

        for coin in accountant.bimap().outputs() {
            if requested.iter().any(|w| w.chain_id == coin) {
                continue;
            }
            let amount = accountant.bimap().get_output_sum(&coin);
            let address = self.wallet(&coin)?.address().to_string();
            let receipt = self.exchange.withdraw(&address, &coin, &amount).await?;
            let withdrawal = SwitchWithdrawal {
                id: 0,
                switch_id,
                chain_id: coin.clone(),
                exchange_withdrawal_id: Some(receipt.id),
                address,
                txid: None,
                value: receipt.quantity,
                trade_fees: accountant.bimap().get_output_trade_sum(&coin),
                withdrawal_fees: receipt.tx_cost,
                cost_basis_price: None,
                pending: true,
                confirmed: false,
                spent: false,
            };
            let id = self.repo.insert_withdrawal(&withdrawal).await?;
            info!(switch = switch_id, withdrawal = id, coin = %coin, value = %withdrawal.value, "Withdrawal requested");
        }
        Ok(true)
    }

    async fn confirm_withdrawals(&self, switch_id: u64) -> Result<bool> {
        let mut done = true;
        for mut withdrawal in self.repo.get_withdrawals_by_switch(switch_id).await? {
            if !withdrawal.pending {
                continue;
            }
            let exchange_id = withdrawal
                .exchange_withdrawal_id
                .clone()
                .ok_or_else(|| PoolError::invariant(format!("withdrawal {}: no exchange id", withdrawal.id)))?;
            let remote = self.exchange.get_withdrawal_by_id(&exchange_id).await?;
            if remote.status.check(&remote.id)? != WithdrawalStatus::Completed {
                done = false;
                continue;
            }
            withdrawal.txid = remote.txid;
            withdrawal.cost_basis_price = Some(self.usd_price(&withdrawal.chain_id).await?);
            withdrawal.pending = false;
            withdrawal.confirmed = true;
            self.repo.update_withdrawal(&withdrawal).await?;
            info!(switch = switch_id, withdrawal = withdrawal.id, txid = ?withdrawal.txid, "Withdrawal confirmed");
        }
        Ok(done)
    }

    /// Settle every switched balance and credit its payout.
    async fn distribute(&self, switch_id: u64) -> Result<bool> {
        let mut accountant = self.replay(switch_id, Replay::Withdrawals).await?;
        accountant.distribute()?;

        for balance in accountant.switched_balances() {
            self.repo.update_balance(balance).await?;
            let payout_id = balance
                .out_payout_id
                .ok_or_else(|| PoolError::invariant(format!("balance {}: no payout", balance.id)))?;
            let mut payout = self.repo.get_payout(payout_id).await?;
            if payout.spent {
                return Err(PoolError::invariant(format!(
                    "balance {}: payout {} already spent",
                    balance.id, payout_id
                )));
            }
            match balance.out_type {
                BalanceOutType::Standard => payout.credit(balance),
                BalanceOutType::FeeBalance => {
                    if let Some(out) = &balance.out_value {
                        payout.in_fee_balance += out;
                    }
                    payout.fee_balance_pending = false;
                }
            }
            self.repo.update_payout(&payout).await?;
        }

        for mut deposit in self.repo.get_deposits_by_switch(switch_id).await? {
            deposit.spent = true;
            self.repo.update_deposit(&deposit).await?;
        }
        for mut withdrawal in self.repo.get_withdrawals_by_switch(switch_id).await? {
            withdrawal.spent = true;
            self.repo.update_withdrawal(&withdrawal).await?;
        }
        Ok(true)
    }
}

fn spends_utxos(chain: ChainId) -> bool {
    matches!(chain, ChainId::Btc | ChainId::Rvn | ChainId::Firo | ChainId::Flux)
}

/// Take outputs in stored order until they cover `value`; returns the
/// chosen inputs and the change.
fn select_inputs(available: Vec<Utxo>, value: &BigInt) -> Result<(Vec<Utxo>, BigInt)> {
    let mut total = BigInt::zero();
    let mut chosen = Vec::new();
    for utxo in available {
        if total >= *value {
            break;
        }
        total += &utxo.value;
        chosen.push(utxo);
    }
    if total < *value {
        return Err(PoolError::invariant(format!(
            "wallet holds {} of {} needed",
            total, value
        )));
    }
    let change = total - value;
    Ok((chosen, change))
}
