//! The `(in_coin, out_coin)` grid a switch settles through.
//!
//! Deposits arrive per input coin and withdrawals leave per output coin, so
//! both sides have to be spread over the cells sharing that coin. Cells are
//! kept in key order; integer remainders always land on the smallest key.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use super::split_proportional;
use crate::error::{PoolError, Result};
use crate::types::{Balance, SwitchTrade};

/// One `(in_coin, out_coin)` cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BimapEntry {
    pub in_coin: String,
    pub out_coin: String,
    /// Indices into the switch's balance list.
    pub balances: Vec<usize>,
    /// Net of pool fees, in the input coin.
    pub input_value: BigInt,
    /// What reached the exchange after deposit fees.
    pub trade_value: BigInt,
    pub deposit_fees: BigInt,
    /// In the output coin.
    pub trade_fees: BigInt,
    pub withdrawal_fees: BigInt,
    /// Proceeds of the path's last trade.
    pub actual_output: BigInt,
    pub estimate_output: BigInt,
    /// What the withdrawal delivered for this cell.
    pub final_output: BigInt,
}

#[derive(Debug, Clone, Default)]
pub struct Bimap {
    entries: BTreeMap<(String, String), BimapEntry>,
}

impl Bimap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &BimapEntry> {
        self.entries.values()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut BimapEntry> {
        self.entries.values_mut()
    }

    pub fn entry(&self, in_coin: &str, out_coin: &str) -> Option<&BimapEntry> {
        self.entries.get(&(in_coin.to_string(), out_coin.to_string()))
    }

    pub fn inputs(&self) -> Vec<String> {
        let mut coins: Vec<String> = self.entries.keys().map(|(i, _)| i.clone()).collect();
        coins.dedup();
        coins
    }

    pub fn outputs(&self) -> Vec<String> {
        let mut coins: Vec<String> = self.entries.keys().map(|(_, o)| o.clone()).collect();
        coins.sort();
        coins.dedup();
        coins
    }

    pub fn add_by_input(&mut self, in_coin: &str, out_coin: &str, balance: usize, value: &BigInt) {
        let entry = self
            .entries
            .entry((in_coin.to_string(), out_coin.to_string()))
            .or_insert_with(|| BimapEntry {
                in_coin: in_coin.to_string(),
                out_coin: out_coin.to_string(),
                ..Default::default()
            });
        entry.balances.push(balance);
        entry.input_value += value;
    }

    pub fn get_input_sum(&self, in_coin: &str) -> BigInt {
        self.by_input(in_coin).map(|e| &e.input_value).sum()
    }

    pub fn get_output_sum(&self, out_coin: &str) -> BigInt {
        self.by_output(out_coin).map(|e| &e.actual_output).sum()
    }

    pub fn get_output_estimate_sum(&self, out_coin: &str) -> BigInt {
        self.by_output(out_coin).map(|e| &e.estimate_output).sum()
    }

    pub fn get_output_trade_sum(&self, out_coin: &str) -> BigInt {
        self.by_output(out_coin).map(|e| &e.trade_fees).sum()
    }

    pub fn delete_by_input(&mut self, in_coin: &str) -> Vec<BimapEntry> {
        self.delete_where(|(i, _)| i == in_coin)
    }

    pub fn delete_by_output(&mut self, out_coin: &str) -> Vec<BimapEntry> {
        self.delete_where(|(_, o)| o == out_coin)
    }

    fn delete_where(&mut self, matches: impl Fn(&(String, String)) -> bool) -> Vec<BimapEntry> {
        let keys: Vec<(String, String)> = self.entries.keys().filter(|k| matches(k)).cloned().collect();
        keys.iter().filter_map(|k| self.entries.remove(k)).collect()
    }

    fn by_input<'a>(&'a self, in_coin: &'a str) -> impl Iterator<Item = &'a BimapEntry> {
        self.entries.values().filter(move |e| e.in_coin == in_coin)
    }

    fn by_output<'a>(&'a self, out_coin: &'a str) -> impl Iterator<Item = &'a BimapEntry> {
        self.entries.values().filter(move |e| e.out_coin == out_coin)
    }

    /// Spread a deposit's fees over the cells fed by `in_coin`.
    pub fn add_deposit(&mut self, in_coin: &str, value: &BigInt, fees: &BigInt) -> Result<()> {
        let input = self.get_input_sum(in_coin);
        if input.is_zero() {
            return Err(PoolError::invalid(format!("deposit of {}: no balances", in_coin)));
        }
        if value + fees != input {
            return Err(PoolError::invariant(format!(
                "deposit of {}: value {} + fees {} != inputs {}",
                in_coin, value, fees, input
            )));
        }

        let cells: Vec<&mut BimapEntry> = self.entries.values_mut().filter(|e| e.in_coin == in_coin).collect();
        let weights: Vec<BigInt> = cells.iter().map(|e| e.input_value.clone()).collect();
        let shares = split_proportional(fees, &weights)?;
        for (entry, share) in cells.into_iter().zip(shares) {
            entry.trade_value = &entry.input_value - &share;
            entry.deposit_fees = share;
        }
        Ok(())
    }

    /// Record the filled trades of one cell's path.
    ///
    /// Fees of earlier stages are carried into the output coin at the rate
    /// the following stage filled at.
    pub fn add_trade_path(&mut self, in_coin: &str, out_coin: &str, trades: &[SwitchTrade]) -> Result<()> {
        let key = (in_coin.to_string(), out_coin.to_string());
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| PoolError::invalid(format!("no {} -> {} cell", in_coin, out_coin)))?;

        let mut stages: Vec<&SwitchTrade> = trades.iter().collect();
        stages.sort_by_key(|t| t.stage);
        let filled = |t: &SwitchTrade| -> Result<(BigInt, BigInt, BigInt)> {
            match (&t.value, &t.proceeds, &t.trade_fees, t.filled) {
                (Some(value), Some(proceeds), Some(fees), true) => Ok((value.clone(), proceeds.clone(), fees.clone())),
                _ => Err(PoolError::invariant(format!("trade {}: not filled", t.id))),
            }
        };

        let first = stages
            .first()
            .ok_or_else(|| PoolError::invalid(format!("{} -> {}: empty trade path", in_coin, out_coin)))?;
        if first.from_chain_id != in_coin || stages.last().map(|t| t.to_chain_id.as_str()) != Some(out_coin) {
            return Err(PoolError::invariant(format!("{} -> {}: path endpoints differ", in_coin, out_coin)));
        }

        let mut carried = BigInt::zero();
        let mut proceeds = BigInt::zero();
        for trade in stages {
            let (value, stage_proceeds, fees) = filled(trade)?;
            if !carried.is_zero() {
                if value.is_zero() {
                    return Err(PoolError::invariant(format!("trade {}: zero value", trade.id)));
                }
                carried = carried * &stage_proceeds / &value;
            }
            carried += fees;
            proceeds = stage_proceeds;
        }

        entry.actual_output = proceeds;
        entry.trade_fees = carried;
        Ok(())
    }

    /// Spread a withdrawal over the cells paying out in `out_coin`.
    pub fn add_withdrawal(
        &mut self,
        out_coin: &str,
        value: &BigInt,
        fees: &BigInt,
        trade_fees: &BigInt,
    ) -> Result<()> {
        let output = self.get_output_sum(out_coin);
        if value + fees != output {
            return Err(PoolError::invariant(format!(
                "withdrawal of {}: value {} + fees {} != proceeds {}",
                out_coin, value, fees, output
            )));
        }
        let recorded = self.get_output_trade_sum(out_coin);
        if *trade_fees != recorded {
            return Err(PoolError::invariant(format!(
                "withdrawal of {}: trade fees {} != recorded {}",
                out_coin, trade_fees, recorded
            )));
        }

        let cells: Vec<&mut BimapEntry> = self.entries.values_mut().filter(|e| e.out_coin == out_coin).collect();
        let weights: Vec<BigInt> = cells.iter().map(|e| e.actual_output.clone()).collect();
        let shares = split_proportional(value, &weights)?;
        for (entry, share) in cells.into_iter().zip(shares) {
            entry.withdrawal_fees = &entry.actual_output - &share;
            entry.final_output = share;
        }
        Ok(())
    }

    /// Project each cell's output and fees back onto its balances.
    ///
    /// Deposit fees are rescaled into the output coin by
    /// `final_output / input_value`; pool fees by `total / input_value` where
    /// `total` is the output plus every fee. Every balance must then close in
    /// the output coin.
    pub fn distribute_to_balances(&self, balances: &mut [Balance]) -> Result<()> {
        for entry in self.entries.values() {
            if entry.input_value.is_zero() {
                return Err(PoolError::invariant(format!(
                    "{} -> {}: zero input value",
                    entry.in_coin, entry.out_coin
                )));
            }
            let deposit_fees = &entry.deposit_fees * &entry.final_output / &entry.input_value;
            let exchange_fees = deposit_fees + &entry.trade_fees + &entry.withdrawal_fees;
            let total = &entry.final_output + &exchange_fees;

            let mut weights = Vec::with_capacity(entry.balances.len());
            for &index in &entry.balances {
                let balance = balances
                    .get(index)
                    .ok_or_else(|| PoolError::invariant(format!("balance index {} out of range", index)))?;
                weights.push(&balance.in_value - &balance.pool_fees);
            }
            let outputs = split_proportional(&entry.final_output, &weights)?;
            let fees = split_proportional(&exchange_fees, &weights)?;
            let weight_sum: BigInt = weights.iter().sum();
            if weight_sum.is_zero() {
                return Err(PoolError::invariant(format!(
                    "{} -> {}: balances carry no value",
                    entry.in_coin, entry.out_coin
                )));
            }

            for (position, ((&index, out), fee)) in entry.balances.iter().zip(outputs).zip(fees).enumerate() {
                // Split remainders all land on the first balance.
                let remainder_credit = if position == 0 {
                    (&out - &entry.final_output * &weights[0] / &weight_sum)
                        + (&fee - &exchange_fees * &weights[0] / &weight_sum)
                } else {
                    BigInt::zero()
                };

                let balance = &mut balances[index];
                if out.is_negative() || fee.is_negative() {
                    return Err(PoolError::invariant(format!("balance {}: negative switch output", balance.id)));
                }
                balance.pool_fees = &balance.pool_fees * &total / &entry.input_value;
                balance.out_value = Some(out);
                balance.exchange_fees = fee;
                balance.pending = false;
                balance.check_switch_closure(&total, &entry.input_value, &remainder_credit)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Owner, TradeDirection};

    fn trade(stage: u8, from: &str, to: &str, value: u64, proceeds: u64, fees: u64) -> SwitchTrade {
        SwitchTrade {
            id: stage as u64,
            switch_id: 1,
            path_id: 0,
            stage,
            exchange_order_id: None,
            market: format!("{}-{}", from, to),
            direction: TradeDirection::Sell,
            from_chain_id: from.into(),
            to_chain_id: to.into(),
            value: Some(BigInt::from(value)),
            order_value: None,
            proceeds: Some(BigInt::from(proceeds)),
            trade_fees: Some(BigInt::from(fees)),
            slippage: None,
            fair_market_price: None,
            next_trade_id: None,
            initiated: true,
            open: false,
            filled: true,
        }
    }

    #[test]
    fn test_sums_and_deletes() {
        let mut bimap = Bimap::new();
        bimap.add_by_input("ETH", "BTC", 0, &BigInt::from(10));
        bimap.add_by_input("ETH", "USDC", 1, &BigInt::from(5));
        bimap.add_by_input("RVN", "BTC", 2, &BigInt::from(7));
        bimap.add_by_input("ETH", "BTC", 3, &BigInt::from(1));

        assert_eq!(bimap.get_input_sum("ETH"), BigInt::from(16));
        assert_eq!(bimap.inputs(), vec!["ETH", "RVN"]);
        assert_eq!(bimap.outputs(), vec!["BTC", "USDC"]);
        assert_eq!(bimap.entry("ETH", "BTC").unwrap().balances, vec![0, 3]);

        assert_eq!(bimap.delete_by_output("BTC").len(), 2);
        assert_eq!(bimap.inputs(), vec!["ETH"]);
        assert_eq!(bimap.delete_by_input("ETH").len(), 1);
        assert!(bimap.is_empty());
    }

    #[test]
    fn test_deposit_fees_split_by_input() {
        let mut bimap = Bimap::new();
        bimap.add_by_input("ETH", "BTC", 0, &BigInt::from(200));
        bimap.add_by_input("ETH", "USDC", 1, &BigInt::from(100));

        assert!(bimap.add_deposit("ETH", &BigInt::from(290), &BigInt::from(11)).is_err());
        bimap.add_deposit("ETH", &BigInt::from(290), &BigInt::from(10)).unwrap();
        let btc = bimap.entry("ETH", "BTC").unwrap();
        assert_eq!((btc.deposit_fees.clone(), btc.trade_value.clone()), (BigInt::from(7), BigInt::from(193)));
        let usdc = bimap.entry("ETH", "USDC").unwrap();
        assert_eq!(usdc.deposit_fees, BigInt::from(3));
    }

    #[test]
    fn test_two_stage_path_carries_fees() {
        let mut bimap = Bimap::new();
        bimap.add_by_input("RVN", "USDC", 0, &BigInt::from(1_000_000));
        let path = [
            trade(2, "BTC", "USDC", 2_000, 1_000_000, 500),
            trade(1, "RVN", "BTC", 1_000_000, 2_000, 10),
        ];
        bimap.add_trade_path("RVN", "USDC", &path).unwrap();
        let entry = bimap.entry("RVN", "USDC").unwrap();
        assert_eq!(entry.actual_output, BigInt::from(1_000_000));
        assert_eq!(entry.trade_fees, BigInt::from(5_500));

        let mut unfilled = path.clone();
        unfilled[0].filled = false;
        assert!(bimap.add_trade_path("RVN", "USDC", &unfilled).is_err());
    }

    #[test]
    fn test_withdrawal_requires_matching_proceeds() {
        let mut bimap = Bimap::new();
        bimap.add_by_input("ETH", "BTC", 0, &BigInt::from(100));
        bimap
            .add_trade_path("ETH", "BTC", &[trade(1, "ETH", "BTC", 100, 50, 1)])
            .unwrap();
        let (value, fees, trade_fees) = (BigInt::from(45), BigInt::from(5), BigInt::from(1));
        assert!(bimap.add_withdrawal("BTC", &value, &BigInt::from(4), &trade_fees).is_err());
        assert!(bimap.add_withdrawal("BTC", &value, &fees, &BigInt::from(2)).is_err());
        bimap.add_withdrawal("BTC", &value, &fees, &trade_fees).unwrap();
        assert_eq!(bimap.entry("ETH", "BTC").unwrap().final_output, value);
    }

    #[test]
    fn test_distribute_remainders_to_first_balance() {
        let mut balances = vec![
            Balance::new(Owner::Miner(1), "ETH", BigInt::from(100), Some(1)),
            Balance::new(Owner::Miner(2), "ETH", BigInt::from(100), Some(1)),
            Balance::new(Owner::Miner(3), "ETH", BigInt::from(100), Some(1)),
        ];
        let mut bimap = Bimap::new();
        for (index, balance) in balances.iter().enumerate() {
            bimap.add_by_input("ETH", "BTC", index, &balance.in_value);
        }
        bimap.add_deposit("ETH", &BigInt::from(300), &BigInt::zero()).unwrap();
        bimap
            .add_trade_path("ETH", "BTC", &[trade(1, "ETH", "BTC", 300, 11, 1)])
            .unwrap();
        bimap
            .add_withdrawal("BTC", &BigInt::from(10), &BigInt::from(1), &BigInt::from(1))
            .unwrap();
        bimap.distribute_to_balances(&mut balances).unwrap();

        let outs: Vec<BigInt> = balances.iter().map(|b| b.out_value.clone().unwrap()).collect();
        assert_eq!(outs, vec![BigInt::from(4), BigInt::from(3), BigInt::from(3)]);
        let fees: Vec<BigInt> = balances.iter().map(|b| b.exchange_fees.clone()).collect();
        assert_eq!(fees, vec![BigInt::from(2), BigInt::from(0), BigInt::from(0)]);
        assert!(balances.iter().all(|b| !b.pending));
    }

    #[test]
    fn test_distribute_closes_every_balance_with_pool_fees() {
        let mut balances: Vec<Balance> = [(1, 1_000_003u64, 10_000u64), (2, 499_999, 5_000), (3, 7_001, 0)]
            .into_iter()
            .map(|(owner, value, pool_fees)| {
                let mut balance = Balance::new(Owner::Miner(owner), "RVN", BigInt::from(value), Some(1));
                balance.id = owner;
                balance.out_coin = "BTC".into();
                balance.pool_fees = BigInt::from(pool_fees);
                balance
            })
            .collect();
        let mut bimap = Bimap::new();
        for (index, balance) in balances.iter().enumerate() {
            bimap.add_by_input("RVN", "BTC", index, &(&balance.in_value - &balance.pool_fees));
        }
        // net input 1_492_003
        bimap.add_deposit("RVN", &BigInt::from(1_491_000), &BigInt::from(1_003)).unwrap();
        bimap
            .add_trade_path("RVN", "BTC", &[trade(1, "RVN", "BTC", 1_491_000, 7_777, 23)])
            .unwrap();
        bimap
            .add_withdrawal("BTC", &BigInt::from(7_700), &BigInt::from(77), &BigInt::from(23))
            .unwrap();
        bimap.distribute_to_balances(&mut balances).unwrap();

        let entry = bimap.entry("RVN", "BTC").unwrap();
        let deposit_fees = &entry.deposit_fees * &entry.final_output / &entry.input_value;
        let total = &entry.final_output + deposit_fees + &entry.trade_fees + &entry.withdrawal_fees;
        let out: BigInt = balances.iter().map(|b| b.out_value.clone().unwrap()).sum();
        assert_eq!(out, BigInt::from(7_700));
        for balance in &balances {
            let converted = &balance.in_value * &total / &entry.input_value;
            let sum = balance.out_value.clone().unwrap() + &balance.pool_fees + &balance.exchange_fees;
            let drift = sum - converted;
            assert!(drift >= BigInt::from(-2) && drift <= BigInt::from(4), "balance {}: {}", balance.id, drift);
            assert!(balance.check_closure().is_err());
        }
        assert!(balances[0].pool_fees > BigInt::zero());
        assert_eq!(balances[2].pool_fees, BigInt::zero());
    }

    #[test]
    fn test_distribute_rejects_balance_that_does_not_close() {
        let mut balances = vec![Balance::new(Owner::Miner(1), "ETH", BigInt::from(100), Some(1))];
        balances[0].out_coin = "BTC".into();
        let mut bimap = Bimap::new();
        // cell weighted at half the balance's net value
        bimap.add_by_input("ETH", "BTC", 0, &BigInt::from(50));
        bimap.add_deposit("ETH", &BigInt::from(50), &BigInt::zero()).unwrap();
        bimap
            .add_trade_path("ETH", "BTC", &[trade(1, "ETH", "BTC", 50, 10, 0)])
            .unwrap();
        bimap
            .add_withdrawal("BTC", &BigInt::from(10), &BigInt::zero(), &BigInt::zero())
            .unwrap();
        let result = bimap.distribute_to_balances(&mut balances);
        assert!(matches!(result, Err(PoolError::InvariantViolation(_))));
    }
}
