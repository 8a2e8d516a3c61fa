//! Gas reserves for token payouts.
//!
//! A USDC payout is an ERC-20 transfer whose gas the pool pays in ETH. The
//! reserve is funded by carving a slice off the owner's incoming balances
//! into a `FeeBalance` row that settles in ETH.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::config::AccountantConfig;
use crate::error::{PoolError, Result};
use crate::precise::{Precise, Rounding};
use crate::types::{Balance, BalanceOutType, Payout};

const TOKEN_COIN: &str = "USDC";
const GAS_COIN: &str = "ETH";
/// wei (18 places) to USDC (6 places).
const WEI_TO_TOKEN_SHIFT: u32 = 12;

#[derive(Debug, Clone)]
pub struct FeeBalancePolicy {
    /// Reserve target in wei.
    target: BigInt,
    /// Reserve value in the source chain's base units.
    native_target: BigInt,
    eth_rate: Precise,
}

impl FeeBalancePolicy {
    /// `units` are the decimal places of the coin balances are carved from.
    pub fn new(config: &AccountantConfig, units: u32) -> Result<Self> {
        if !(config.eth_rate.is_finite() && config.eth_rate > 0.0) {
            return Err(PoolError::invalid(format!("eth rate {} must be positive", config.eth_rate)));
        }
        let reserve = Precise::from_f64(config.fee_balance_usd / config.eth_rate)?;
        Ok(Self {
            target: config.usdc_fee_balance.clone(),
            native_target: reserve.shift(units as i32).ceil(),
            eth_rate: Precise::from_f64(config.eth_rate)?,
        })
    }

    pub fn native_target(&self) -> &BigInt {
        &self.native_target
    }

    fn eligible(payout: &Payout) -> bool {
        payout.coin_id == TOKEN_COIN && !payout.fee_balance_pending
    }

    /// Reserve to carve from a miner's balances, in native units.
    pub fn miner_request(&self, payout: &Payout) -> Option<BigInt> {
        (Self::eligible(payout) && payout.in_fee_balance < self.target).then(|| self.native_target.clone())
    }

    /// Reserve to carve from a recipient's balances.
    ///
    /// The gate compares the reserve against the native target while the
    /// amount is measured against the wei target, so a reserve between the
    /// two produces a zero-valued carve.
    pub fn recipient_request(&self, payout: &Payout) -> Option<BigInt> {
        if !(Self::eligible(payout) && payout.in_fee_balance < self.native_target) {
            return None;
        }
        let missing = &self.target - &payout.in_fee_balance;
        Some(if missing.is_negative() { BigInt::zero() } else { missing })
    }

    /// Move `amount` of `balance`'s net value into a new `FeeBalance` row.
    ///
    /// Pool fees follow the moved value proportionally so both rows stay
    /// closed. The new row settles at once when the source coin is already
    /// the gas coin.
    pub fn carve(&self, balance: &mut Balance, amount: &BigInt) -> Result<Balance> {
        let net = &balance.in_value - &balance.pool_fees;
        if amount.is_negative() || *amount > net {
            return Err(PoolError::invariant(format!(
                "balance {}: fee balance {} outside net value {}",
                balance.id, amount, net
            )));
        }
        let pool_fees = if net.is_zero() {
            BigInt::zero()
        } else {
            &balance.pool_fees * amount / &net
        };

        let mut reserve = Balance::new(
            balance.owner,
            &balance.in_coin,
            amount + &pool_fees,
            balance.in_round_id,
        );
        reserve.pool_fees = pool_fees;
        reserve.out_type = BalanceOutType::FeeBalance;
        reserve.out_coin = GAS_COIN.to_string();
        reserve.out_payout_id = balance.out_payout_id;
        if reserve.in_coin == GAS_COIN {
            reserve.settle();
        }

        balance.in_value -= &reserve.in_value;
        balance.pool_fees -= &reserve.pool_fees;
        Ok(reserve)
    }

    /// Account a carved row on its payout.
    pub fn record(&self, payout: &mut Payout, reserve: &Balance) {
        payout.fee_balance_coin = Some(GAS_COIN.to_string());
        match &reserve.out_value {
            Some(out) if !reserve.pending => {
                payout.in_fee_balance += out;
                if reserve.in_coin == GAS_COIN {
                    payout.pool_fees += self.wei_to_token(&reserve.pool_fees);
                }
            }
            _ => payout.fee_balance_pending = true,
        }
    }

    /// `wei · eth_rate / 10^12`, truncated.
    fn wei_to_token(&self, wei: &BigInt) -> BigInt {
        Precise::from_integer(wei.clone())
            .mul(&self.eth_rate)
            .shift(-(WEI_TO_TOKEN_SHIFT as i32))
            .to_integer(Rounding::Truncate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Owner;

    fn policy() -> FeeBalancePolicy {
        FeeBalancePolicy::new(&AccountantConfig::new(0.705), 18).unwrap()
    }

    fn usdc_payout(in_fee_balance: u64) -> Payout {
        let mut payout = Payout::new(Owner::Miner(2), "USDC", "0x2");
        payout.in_fee_balance = BigInt::from(in_fee_balance);
        payout
    }

    #[test]
    fn test_native_target_rounds_up() {
        assert_eq!(policy().native_target(), &BigInt::from(35_460_992_907_801_420u64));
        assert!(FeeBalancePolicy::new(&AccountantConfig::new(0.0), 18).is_err());
    }

    #[test]
    fn test_miner_request_gate() {
        let policy = policy();
        assert_eq!(policy.miner_request(&usdc_payout(0)), Some(policy.native_target().clone()));
        assert_eq!(policy.miner_request(&usdc_payout(25_000_000_000_000_000)), None);

        let mut pending = usdc_payout(0);
        pending.fee_balance_pending = true;
        assert_eq!(policy.miner_request(&pending), None);
        assert_eq!(policy.miner_request(&Payout::new(Owner::Miner(1), "ETH", "0x1")), None);
    }

    #[test]
    fn test_recipient_request_unit_mismatch() {
        let policy = policy();
        assert_eq!(
            policy.recipient_request(&usdc_payout(30_000_000_000_000_000)),
            Some(BigInt::zero())
        );
        assert_eq!(
            policy.recipient_request(&usdc_payout(5_000_000_000_000_000)),
            Some(BigInt::from(20_000_000_000_000_000u64))
        );
        assert_eq!(policy.recipient_request(&usdc_payout(40_000_000_000_000_000)), None);
    }

    #[test]
    fn test_carve_keeps_both_rows_closed() {
        let policy = policy();
        let mut balance = Balance::new(Owner::Miner(2), "ETH", BigInt::from(728_416_326_106_183_382u64), Some(1));
        balance.pool_fees = BigInt::from(7_284_163_261_061_833u64);
        balance.out_coin = "USDC".into();

        let reserve = policy.carve(&mut balance, &policy.native_target().clone()).unwrap();
        assert_eq!(reserve.pool_fees, BigInt::from(358_191_847_553_549u64));
        assert_eq!(reserve.in_value, BigInt::from(35_819_184_755_354_969u64));
        assert_eq!(reserve.out_value, Some(BigInt::from(35_460_992_907_801_420u64)));
        assert!(!reserve.pending);
        reserve.check_closure().unwrap();

        assert_eq!(balance.in_value, BigInt::from(692_597_141_350_828_413u64));
        assert_eq!(balance.pool_fees, BigInt::from(6_925_971_413_508_284u64));

        let mut payout = usdc_payout(0);
        policy.record(&mut payout, &reserve);
        assert_eq!(payout.in_fee_balance, BigInt::from(35_460_992_907_801_420u64));
        assert_eq!(payout.pool_fees, BigInt::from(252));
        assert_eq!(payout.fee_balance_coin.as_deref(), Some("ETH"));
    }

    #[test]
    fn test_carve_from_other_coin_stays_pending() {
        let policy = policy();
        let mut balance = Balance::new(Owner::Miner(3), "RVN", BigInt::from(1000), Some(1));
        let reserve = policy.carve(&mut balance, &BigInt::from(400)).unwrap();
        assert!(reserve.pending);
        assert_eq!(balance.in_value, BigInt::from(600));
        assert!(policy.carve(&mut balance, &BigInt::from(601)).is_err());

        let mut payout = usdc_payout(0);
        policy.record(&mut payout, &reserve);
        assert!(payout.fee_balance_pending);
        assert!(payout.in_fee_balance.is_zero());
    }
}
