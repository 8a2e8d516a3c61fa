//! Settling pending cross-coin balances through an exchange.

use std::collections::HashMap;
use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::Zero;

use super::bimap::Bimap;
use crate::chain::ChainId;
use crate::config::{ChainParams, SwitchThresholds};
use crate::error::{PoolError, Result};
use crate::precise::Precise;
use crate::tracing::prelude::*;
use crate::types::{Balance, SwitchDeposit, SwitchTrade, SwitchWithdrawal, TradeDirection};

/// Coin every path without a direct market routes through.
const HUB_COIN: &str = "BTC";

/// A spot market, `base-quote`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Market {
    pub base: &'static str,
    pub quote: &'static str,
}

impl Market {
    pub fn name(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    fn connects(&self, a: &str, b: &str) -> bool {
        (self.base == a && self.quote == b) || (self.base == b && self.quote == a)
    }

    /// Selling the base coin, buying it otherwise.
    pub fn direction(&self, from: &str) -> TradeDirection {
        if from == self.base {
            TradeDirection::Sell
        } else {
            TradeDirection::Buy
        }
    }
}

pub const MARKETS: [Market; 8] = [
    Market { base: "BTC", quote: "USDC" },
    Market { base: "ETH", quote: "USDC" },
    Market { base: "ETH", quote: "BTC" },
    Market { base: "ETC", quote: "BTC" },
    Market { base: "RVN", quote: "BTC" },
    Market { base: "FIRO", quote: "BTC" },
    Market { base: "FLUX", quote: "BTC" },
    Market { base: "AE", quote: "BTC" },
];

/// Hops from `from` to `to`: a direct market, otherwise two hops through
/// BTC. Longer paths are not traded.
pub fn find_path(from: &str, to: &str) -> Result<Vec<(Market, String, String)>> {
    let direct = |a: &str, b: &str| MARKETS.iter().copied().find(|m| m.connects(a, b));
    if let Some(market) = direct(from, to) {
        return Ok(vec![(market, from.to_string(), to.to_string())]);
    }
    match (direct(from, HUB_COIN), direct(HUB_COIN, to)) {
        (Some(first), Some(second)) => Ok(vec![
            (first, from.to_string(), HUB_COIN.to_string()),
            (second, HUB_COIN.to_string(), to.to_string()),
        ]),
        _ => Err(PoolError::Unsupported(format!("no market path {} -> {}", from, to))),
    }
}

fn coin_units(coin: &str) -> Result<u32> {
    let chain = ChainId::from_str(coin).map_err(|_| PoolError::Unsupported(format!("coin {}", coin)))?;
    Ok(ChainParams::for_chain(chain, true).units)
}

pub struct SwitchAccountant {
    switch_id: u64,
    thresholds: SwitchThresholds,
    balances: Vec<Balance>,
    bimap: Bimap,
}

impl SwitchAccountant {
    /// Index every pending cross-coin balance by its `(in, out)` pair.
    pub fn new(switch_id: u64, balances: Vec<Balance>, thresholds: SwitchThresholds) -> Result<Self> {
        let mut bimap = Bimap::new();
        for (index, balance) in balances.iter().enumerate() {
            if !balance.pending || balance.spent || balance.in_coin == balance.out_coin {
                return Err(PoolError::invalid(format!(
                    "balance {}: not a pending {} -> {} balance",
                    balance.id, balance.in_coin, balance.out_coin
                )));
            }
            if balance.out_switch_id.is_some_and(|id| id != switch_id) {
                return Err(PoolError::invalid(format!(
                    "balance {}: already in switch {:?}",
                    balance.id, balance.out_switch_id
                )));
            }
            let value = &balance.in_value - &balance.pool_fees;
            bimap.add_by_input(&balance.in_coin, &balance.out_coin, index, &value);
        }
        Ok(Self {
            switch_id,
            thresholds,
            balances,
            bimap,
        })
    }

    pub fn switch_id(&self) -> u64 {
        self.switch_id
    }

    pub fn bimap(&self) -> &Bimap {
        &self.bimap
    }

    pub fn balances(&self) -> &[Balance] {
        &self.balances
    }

    /// Balances still part of the switch after thresholds were applied.
    pub fn switched_balances(&self) -> Vec<&Balance> {
        let mut indices: Vec<usize> = self.bimap.entries().flat_map(|e| e.balances.iter().copied()).collect();
        indices.sort_unstable();
        indices.into_iter().map(|i| &self.balances[i]).collect()
    }

    pub fn into_balances(self) -> Vec<Balance> {
        self.balances
    }

    /// Expected output of each cell from USD prices per coin.
    pub fn estimate_outputs(&mut self, usd_prices: &HashMap<String, f64>) -> Result<()> {
        let price = |coin: &str| -> Result<Precise> {
            let quote = usd_prices
                .get(coin)
                .ok_or_else(|| PoolError::upstream(format!("no price for {}", coin)))?;
            Precise::from_f64(*quote)
        };
        for entry in self.bimap.entries_mut() {
            let input = Precise::from_units(entry.input_value.clone(), coin_units(&entry.in_coin)?);
            let usd = input.mul(&price(&entry.in_coin)?);
            entry.estimate_output = usd.div(&price(&entry.out_coin)?)?.to_units(coin_units(&entry.out_coin)?);
        }
        Ok(())
    }

    /// Drop coins below their switching minimum until nothing changes.
    /// Coins without a threshold are never switched. Returns the dropped
    /// coins in the order they were dropped.
    pub fn check_thresholds(&mut self) -> Vec<String> {
        let mut dropped = Vec::new();
        loop {
            let mut changed = false;
            for coin in self.bimap.inputs() {
                let sum = self.bimap.get_input_sum(&coin);
                if self.thresholds.get(&coin).map_or(true, |min| sum < *min) {
                    debug!(switch = self.switch_id, coin = %coin, value = %sum, "Input below threshold");
                    self.bimap.delete_by_input(&coin);
                    dropped.push(coin);
                    changed = true;
                }
            }
            for coin in self.bimap.outputs() {
                let sum = self.bimap.get_output_estimate_sum(&coin);
                if self.thresholds.get(&coin).map_or(true, |min| sum < *min) {
                    debug!(switch = self.switch_id, coin = %coin, value = %sum, "Output below threshold");
                    self.bimap.delete_by_output(&coin);
                    dropped.push(coin);
                    changed = true;
                }
            }
            if !changed {
                return dropped;
            }
        }
    }

    /// Value to deposit per input coin.
    pub fn deposit_values(&self) -> Vec<(String, BigInt)> {
        self.bimap
            .inputs()
            .into_iter()
            .map(|coin| {
                let value = self.bimap.get_input_sum(&coin);
                (coin, value)
            })
            .collect()
    }

    pub fn add_deposit(&mut self, deposit: &SwitchDeposit) -> Result<()> {
        let fees = deposit
            .fees
            .as_ref()
            .ok_or_else(|| PoolError::invalid(format!("deposit {}: fees not known", deposit.id)))?;
        self.bimap.add_deposit(&deposit.chain_id, &deposit.value, fees)
    }

    /// One linear trade path per cell. Only stage 1 carries a value;
    /// `next_trade_id` is linked once the trades have ids.
    pub fn generate_trades(&self) -> Result<Vec<Vec<SwitchTrade>>> {
        let mut paths = Vec::new();
        for (path_id, entry) in self.bimap.entries().enumerate() {
            if entry.trade_value.is_zero() {
                return Err(PoolError::invariant(format!(
                    "switch {}: {} deposit not applied",
                    self.switch_id, entry.in_coin
                )));
            }
            let hops = find_path(&entry.in_coin, &entry.out_coin)?;
            let trades = hops
                .into_iter()
                .enumerate()
                .map(|(i, (market, from, to))| SwitchTrade {
                    id: 0,
                    switch_id: self.switch_id,
                    path_id: path_id as u32,
                    stage: i as u8 + 1,
                    exchange_order_id: None,
                    market: market.name(),
                    direction: market.direction(&from),
                    from_chain_id: from,
                    to_chain_id: to,
                    value: (i == 0).then(|| entry.trade_value.clone()),
                    order_value: None,
                    proceeds: None,
                    trade_fees: None,
                    slippage: None,
                    fair_market_price: None,
                    next_trade_id: None,
                    initiated: false,
                    open: false,
                    filled: false,
                })
                .collect();
            paths.push(trades);
        }
        Ok(paths)
    }

    pub fn add_trade_path(&mut self, trades: &[SwitchTrade]) -> Result<()> {
        let first = trades
            .iter()
            .min_by_key(|t| t.stage)
            .ok_or_else(|| PoolError::invalid("empty trade path"))?;
        let last = trades
            .iter()
            .max_by_key(|t| t.stage)
            .ok_or_else(|| PoolError::invalid("empty trade path"))?;
        self.bimap
            .add_trade_path(&first.from_chain_id, &last.to_chain_id, trades)
    }

    pub fn add_withdrawal(&mut self, withdrawal: &SwitchWithdrawal) -> Result<()> {
        self.bimap.add_withdrawal(
            &withdrawal.chain_id,
            &withdrawal.value,
            &withdrawal.withdrawal_fees,
            &withdrawal.trade_fees,
        )
    }

    /// Settle every switched balance in its output coin.
    pub fn distribute(&mut self) -> Result<()> {
        self.bimap.distribute_to_balances(&mut self.balances)?;

        for entry in self.bimap.entries() {
            let mut out = BigInt::zero();
            let mut fees = BigInt::zero();
            for &index in &entry.balances {
                let balance = &mut self.balances[index];
                balance.out_switch_id = Some(self.switch_id);
                out += balance.out_value.as_ref().unwrap_or(&BigInt::zero());
                fees += &balance.exchange_fees;
            }
            if out != entry.final_output {
                error!(switch = self.switch_id, in_coin = %entry.in_coin, out_coin = %entry.out_coin, "Output drift");
                return Err(PoolError::invariant(format!(
                    "switch {}: {} -> {} distributed {} of {}",
                    self.switch_id, entry.in_coin, entry.out_coin, out, entry.final_output
                )));
            }
            info!(
                switch = self.switch_id,
                in_coin = %entry.in_coin,
                out_coin = %entry.out_coin,
                balances = entry.balances.len(),
                output = %out,
                exchange_fees = %fees,
                "Switch distributed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Owner;
    use test_case::test_case;

    fn pending(owner: u64, in_coin: &str, out_coin: &str, value: BigInt) -> Balance {
        let mut balance = Balance::new(Owner::Miner(owner), in_coin, value, Some(1));
        balance.id = owner;
        balance.out_coin = out_coin.into();
        balance
    }

    fn eth(whole: u64, tenths: u64) -> BigInt {
        BigInt::from(whole) * BigInt::from(10u64.pow(18)) + BigInt::from(tenths) * BigInt::from(10u64.pow(17))
    }

    #[test_case("ETH", "BTC", &["ETH-BTC"]; "direct")]
    #[test_case("BTC", "ETH", &["ETH-BTC"]; "reverse direct")]
    #[test_case("RVN", "USDC", &["RVN-BTC", "BTC-USDC"]; "via hub")]
    #[test_case("RVN", "ETH", &["RVN-BTC", "ETH-BTC"]; "hub to base")]
    fn test_find_path(from: &str, to: &str, markets: &[&str]) {
        let path = find_path(from, to).unwrap();
        let names: Vec<String> = path.iter().map(|(m, _, _)| m.name()).collect();
        assert_eq!(names, markets);
        assert_eq!(path[0].1, from);
        assert_eq!(path.last().unwrap().2, to);
    }

    #[test]
    fn test_find_path_rejects_unknown() {
        assert!(matches!(find_path("KAS", "USDC"), Err(PoolError::Unsupported(_))));
    }

    #[test]
    fn test_direction_follows_base() {
        let market = MARKETS[2];
        assert_eq!(market.direction("ETH"), TradeDirection::Sell);
        assert_eq!(market.direction("BTC"), TradeDirection::Buy);
    }

    #[test]
    fn test_single_balance_switch() {
        let balance = pending(1, "ETH", "BTC", eth(30, 0));
        let mut accountant = SwitchAccountant::new(5, vec![balance], SwitchThresholds::default()).unwrap();
        assert_eq!(accountant.deposit_values(), vec![("ETH".to_string(), eth(30, 0))]);

        let mut deposit = SwitchDeposit::new(5, "ETH", "0xdead", BigInt::from(27_999_999_999_968_800_000u128));
        deposit.fees = Some(BigInt::from(2_000_000_000_031_200_000u64));
        accountant.add_deposit(&deposit).unwrap();

        let mut paths = accountant.generate_trades().unwrap();
        assert_eq!(paths.len(), 1);
        let mut trade = paths.remove(0).remove(0);
        assert_eq!(trade.value, Some(BigInt::from(27_999_999_999_968_800_000u128)));
        assert_eq!(trade.direction, TradeDirection::Sell);
        trade.proceeds = Some(BigInt::from(183_354_122));
        trade.trade_fees = Some(BigInt::from(56_524));
        trade.filled = true;
        accountant.add_trade_path(&[trade]).unwrap();

        let withdrawal = SwitchWithdrawal {
            id: 1,
            switch_id: 5,
            chain_id: "BTC".into(),
            exchange_withdrawal_id: None,
            address: "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".into(),
            txid: None,
            value: BigInt::from(183_299_999),
            trade_fees: BigInt::from(56_524),
            withdrawal_fees: BigInt::from(54_123),
            cost_basis_price: None,
            pending: false,
            confirmed: true,
            spent: false,
        };
        accountant.add_withdrawal(&withdrawal).unwrap();
        accountant.distribute().unwrap();

        let settled = &accountant.balances()[0];
        assert_eq!(settled.out_value, Some(BigInt::from(183_299_999)));
        assert_eq!(settled.exchange_fees, BigInt::from(12_330_646));
        assert_eq!(settled.out_switch_id, Some(5));
        assert!(!settled.pending);
    }

    #[test]
    fn test_multi_balance_switch_closes_in_output_coin() {
        let balances: Vec<Balance> = [
            (1, eth(10, 0), eth(0, 1)),
            (2, eth(5, 0), BigInt::from(50_000_000_000_000_000u64)),
            (3, eth(0, 1), BigInt::zero()),
        ]
        .into_iter()
        .map(|(owner, value, pool_fees)| {
            let mut balance = pending(owner, "ETH", "BTC", value);
            balance.pool_fees = pool_fees;
            balance
        })
        .collect();
        let mut accountant = SwitchAccountant::new(6, balances, SwitchThresholds::default()).unwrap();
        let net = accountant.deposit_values()[0].1.clone();
        assert_eq!(net, BigInt::from(14_950_000_000_000_000_000u128));

        let fees = BigInt::from(10_000_000_000_000_000u64);
        let mut deposit = SwitchDeposit::new(6, "ETH", "0xdead", &net - &fees);
        deposit.fees = Some(fees);
        accountant.add_deposit(&deposit).unwrap();

        let mut trade = accountant.generate_trades().unwrap().remove(0).remove(0);
        trade.proceeds = Some(BigInt::from(91_000_000));
        trade.trade_fees = Some(BigInt::from(30_000));
        trade.filled = true;
        accountant.add_trade_path(&[trade]).unwrap();

        let withdrawal = SwitchWithdrawal {
            id: 1,
            switch_id: 6,
            chain_id: "BTC".into(),
            exchange_withdrawal_id: None,
            address: "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".into(),
            txid: None,
            value: BigInt::from(90_990_000),
            trade_fees: BigInt::from(30_000),
            withdrawal_fees: BigInt::from(10_000),
            cost_basis_price: None,
            pending: false,
            confirmed: true,
            spent: false,
        };
        accountant.add_withdrawal(&withdrawal).unwrap();
        accountant.distribute().unwrap();

        let entry = accountant.bimap().entry("ETH", "BTC").unwrap().clone();
        let deposit_fees = &entry.deposit_fees * &entry.final_output / &entry.input_value;
        let total = &entry.final_output + deposit_fees + &entry.trade_fees + &entry.withdrawal_fees;
        let settled = accountant.balances();
        let out: BigInt = settled.iter().map(|b| b.out_value.clone().unwrap()).sum();
        assert_eq!(out, BigInt::from(90_990_000));
        for balance in settled {
            let converted = &balance.in_value * &total / &entry.input_value;
            let sum = balance.out_value.clone().unwrap() + &balance.pool_fees + &balance.exchange_fees;
            let drift = sum - converted;
            assert!(drift >= BigInt::from(-2) && drift <= BigInt::from(4), "balance {}: {}", balance.id, drift);
            assert_eq!(balance.out_switch_id, Some(6));
        }
        assert!(settled[0].pool_fees > settled[1].pool_fees);
        assert!(settled[2].pool_fees.is_zero());
    }

    #[test]
    fn test_deposit_mismatch_is_fatal() {
        let mut accountant = SwitchAccountant::new(
            5,
            vec![pending(1, "ETH", "BTC", eth(2, 0))],
            SwitchThresholds::default(),
        )
        .unwrap();
        let mut deposit = SwitchDeposit::new(5, "ETH", "0xdead", eth(1, 9));
        assert!(matches!(accountant.add_deposit(&deposit), Err(PoolError::InvalidArgument(_))));
        deposit.fees = Some(BigInt::from(1));
        assert!(matches!(accountant.add_deposit(&deposit), Err(PoolError::InvariantViolation(_))));
        assert!(accountant.generate_trades().is_err());
    }

    #[test]
    fn test_thresholds_reach_fixpoint() {
        let balances = vec![
            pending(1, "ETH", "USDC", eth(0, 6)),
            pending(2, "ETH", "BTC", eth(0, 6)),
            pending(3, "RVN", "BTC", BigInt::from(30_000_000_000_000u64)),
            pending(4, "FLUX", "BTC", BigInt::from(1_000_000_000_000u64)),
        ];
        let mut accountant = SwitchAccountant::new(9, balances, SwitchThresholds::default()).unwrap();
        let prices: HashMap<String, f64> = [("ETH", 2000.0), ("USDC", 1.0), ("BTC", 50_000.0), ("RVN", 0.02), ("FLUX", 0.5)]
            .into_iter()
            .map(|(coin, price)| (coin.to_string(), price))
            .collect();
        accountant.estimate_outputs(&prices).unwrap();
        assert_eq!(
            accountant.bimap().entry("RVN", "BTC").unwrap().estimate_output,
            BigInt::from(12_000_000)
        );

        let dropped = accountant.check_thresholds();
        assert_eq!(dropped, vec!["FLUX", "USDC", "ETH"]);
        let left: Vec<u64> = accountant.switched_balances().iter().map(|b| b.id).collect();
        assert_eq!(left, vec![3]);
    }

    #[test]
    fn test_rejects_settled_balances() {
        let mut settled = pending(1, "ETH", "ETH", eth(1, 0));
        settled.settle();
        assert!(SwitchAccountant::new(1, vec![settled], SwitchThresholds::default()).is_err());
    }
}
