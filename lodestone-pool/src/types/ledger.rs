//! Balances, payouts and the identities they belong to.

use num_bigint::BigInt;
use num_traits::Zero;
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::error::{PoolError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Miner {
    pub id: u64,
    /// Preferred payout coin.
    pub coin_id: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id: u64,
    pub coin_id: String,
    pub address: String,
    /// Share of pool fees in basis points.
    pub fraction_bps: u32,
}

/// Who a balance or payout is owed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {
    Miner(u64),
    Recipient(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum BalanceOutType {
    #[strum(serialize = "standard")]
    Standard,
    /// Gas reserve credited in the payout's fee coin.
    #[strum(serialize = "fee_balance")]
    FeeBalance,
}

/// One credit row of the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub id: u64,
    pub owner: Owner,
    pub in_coin: String,
    pub in_value: BigInt,
    pub in_round_id: Option<u64>,
    pub in_deposit_id: Option<u64>,
    pub pool_fees: BigInt,
    pub exchange_fees: BigInt,
    pub out_coin: String,
    pub out_value: Option<BigInt>,
    pub out_type: BalanceOutType,
    pub out_payout_id: Option<u64>,
    pub out_switch_id: Option<u64>,
    pub pending: bool,
    pub spent: bool,
}

impl Balance {
    pub fn new(owner: Owner, in_coin: &str, in_value: BigInt, in_round_id: Option<u64>) -> Self {
        Self {
            id: 0,
            owner,
            in_coin: in_coin.to_string(),
            in_value,
            in_round_id,
            in_deposit_id: None,
            pool_fees: BigInt::zero(),
            exchange_fees: BigInt::zero(),
            out_coin: in_coin.to_string(),
            out_value: None,
            out_type: BalanceOutType::Standard,
            out_payout_id: None,
            out_switch_id: None,
            pending: true,
            spent: false,
        }
    }

    pub fn miner_id(&self) -> Option<u64> {
        match self.owner {
            Owner::Miner(id) => Some(id),
            Owner::Recipient(_) => None,
        }
    }

    pub fn recipient_id(&self) -> Option<u64> {
        match self.owner {
            Owner::Recipient(id) => Some(id),
            Owner::Miner(_) => None,
        }
    }

    /// Settle in the same coin: everything not taken as fees goes out.
    pub fn settle(&mut self) {
        self.out_value = Some(&self.in_value - &self.pool_fees - &self.exchange_fees);
        self.pending = false;
    }

    /// `in = out + pool_fees + exchange_fees` once settled in the input coin.
    /// Switched balances close through [`Balance::check_switch_closure`].
    pub fn check_closure(&self) -> Result<()> {
        let out = match &self.out_value {
            Some(out) => out,
            None => return Ok(()),
        };
        if self.in_coin != self.out_coin {
            return Err(PoolError::invariant(format!(
                "balance {}: {} -> {} settles through a switch",
                self.id, self.in_coin, self.out_coin
            )));
        }
        let sum = out + &self.pool_fees + &self.exchange_fees;
        if sum != self.in_value {
            return Err(PoolError::invariant(format!(
                "balance {}: in {} != out {} + pool fees {} + exchange fees {}",
                self.id, self.in_value, out, self.pool_fees, self.exchange_fees
            )));
        }
        if self.in_round_id.is_some() && self.in_deposit_id.is_some() {
            return Err(PoolError::invariant(format!(
                "balance {}: both round and deposit source set",
                self.id
            )));
        }
        Ok(())
    }

    /// Closure of a switched balance, in the output coin.
    ///
    /// `in_value` converts at the cell's rate `total / input_value`, where
    /// `total` is the cell's output plus exchange fees. Flooring of the three
    /// parts may lose up to two units; the split remainders credited to this
    /// balance may add up to `remainder_credit`.
    pub fn check_switch_closure(
        &self,
        total: &BigInt,
        input_value: &BigInt,
        remainder_credit: &BigInt,
    ) -> Result<()> {
        let out = self
            .out_value
            .as_ref()
            .ok_or_else(|| PoolError::invariant(format!("balance {}: not settled", self.id)))?;
        if input_value.is_zero() {
            return Err(PoolError::invariant(format!("balance {}: zero switch input", self.id)));
        }
        let converted = &self.in_value * total / input_value;
        let drift = out + &self.pool_fees + &self.exchange_fees - &converted;
        if drift < BigInt::from(-2) || &drift > remainder_credit {
            return Err(PoolError::invariant(format!(
                "balance {}: in {} ({} {}) != out {} + pool fees {} + exchange fees {}",
                self.id, self.in_value, converted, self.out_coin, out, self.pool_fees, self.exchange_fees
            )));
        }
        Ok(())
    }
}

/// Aggregate of balances funding one on-chain send.
#[derive(Debug, Clone, PartialEq)]
pub struct Payout {
    pub id: u64,
    pub owner: Owner,
    pub coin_id: String,
    pub address: String,
    pub value: BigInt,
    pub pool_fees: BigInt,
    pub exchange_fees: BigInt,
    pub fee_balance_coin: Option<String>,
    pub in_fee_balance: BigInt,
    pub out_fee_balance: Option<BigInt>,
    pub fee_balance_pending: bool,
    pub txid: Option<String>,
    pub spent: bool,
    pub confirmed: bool,
    pub spent_at: Option<OffsetDateTime>,
    pub confirmed_at: Option<OffsetDateTime>,
}

impl Payout {
    pub fn new(owner: Owner, coin_id: &str, address: &str) -> Self {
        Self {
            id: 0,
            owner,
            coin_id: coin_id.to_string(),
            address: address.to_string(),
            value: BigInt::zero(),
            pool_fees: BigInt::zero(),
            exchange_fees: BigInt::zero(),
            fee_balance_coin: None,
            in_fee_balance: BigInt::zero(),
            out_fee_balance: None,
            fee_balance_pending: false,
            txid: None,
            spent: false,
            confirmed: false,
            spent_at: None,
            confirmed_at: None,
        }
    }

    /// Record a settled balance's output.
    pub fn credit(&mut self, balance: &Balance) {
        if let Some(out) = &balance.out_value {
            match balance.out_type {
                BalanceOutType::Standard => {
                    self.value += out;
                    self.pool_fees += &balance.pool_fees;
                    self.exchange_fees += &balance.exchange_fees;
                }
                BalanceOutType::FeeBalance => {}
            }
        }
    }

    /// Mark as sent and return the next open payout for the same owner and
    /// coin, carrying any unused fee balance forward.
    pub fn spend(&mut self, txid: &str, out_fee_balance: BigInt, at: OffsetDateTime) -> Result<Payout> {
        if self.spent {
            return Err(PoolError::invariant(format!("payout {}: already spent", self.id)));
        }
        let residual = &self.in_fee_balance - &out_fee_balance;
        if residual < BigInt::zero() {
            return Err(PoolError::invariant(format!(
                "payout {}: spent fee balance {} exceeds reserve {}",
                self.id, out_fee_balance, self.in_fee_balance
            )));
        }

        self.txid = Some(txid.to_string());
        self.spent = true;
        self.spent_at = Some(at);
        self.out_fee_balance = Some(out_fee_balance);

        let mut successor = Payout::new(self.owner, &self.coin_id, &self.address);
        successor.fee_balance_coin = self.fee_balance_coin.clone();
        successor.in_fee_balance = residual;
        Ok(successor)
    }
}

/// Unspent coinbase or change output owned by the pool wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct Utxo {
    pub id: u64,
    pub chain_id: String,
    pub txid: String,
    pub index: u32,
    pub value: BigInt,
    pub active: bool,
    pub spent: bool,
    pub round_id: Option<u64>,
    pub payout_id: Option<u64>,
    pub deposit_id: Option<u64>,
}

impl Utxo {
    pub fn new(chain_id: &str, txid: &str, index: u32, value: BigInt) -> Self {
        Self {
            id: 0,
            chain_id: chain_id.to_string(),
            txid: txid.to_string(),
            index,
            value,
            active: true,
            spent: false,
            round_id: None,
            payout_id: None,
            deposit_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_settle_closes_balance() {
        let mut balance = Balance::new(Owner::Miner(1), "ETH", BigInt::from(1000), Some(7));
        balance.pool_fees = BigInt::from(10);
        balance.settle();
        assert_eq!(balance.out_value, Some(BigInt::from(990)));
        assert!(!balance.pending);
        balance.check_closure().unwrap();

        balance.out_value = Some(BigInt::from(991));
        assert!(balance.check_closure().is_err());
    }

    #[test]
    fn test_cross_coin_balance_needs_switch_closure() {
        // 300 units in, switched at 20 output units each
        let mut balance = Balance::new(Owner::Miner(1), "ETH", BigInt::from(300), Some(7));
        balance.out_coin = "BTC".into();
        balance.pool_fees = BigInt::from(60);
        balance.exchange_fees = BigInt::from(40);
        balance.out_value = Some(BigInt::from(5_900));
        assert!(balance.check_closure().is_err());

        let (total, input) = (BigInt::from(5_940), BigInt::from(297));
        balance.check_switch_closure(&total, &input, &BigInt::zero()).unwrap();

        balance.out_value = Some(BigInt::from(5_901));
        assert!(balance.check_switch_closure(&total, &input, &BigInt::zero()).is_err());
        balance
            .check_switch_closure(&total, &input, &BigInt::from(1))
            .unwrap();

        balance.out_value = Some(BigInt::from(5_897));
        assert!(balance.check_switch_closure(&total, &input, &BigInt::from(5)).is_err());
    }

    #[test]
    fn test_balance_source_is_exclusive() {
        let mut balance = Balance::new(Owner::Miner(1), "ETH", BigInt::from(5), Some(7));
        balance.in_deposit_id = Some(3);
        balance.settle();
        assert!(balance.check_closure().is_err());
    }

    #[test]
    fn test_payout_credit_skips_fee_balance_rows() {
        let mut payout = Payout::new(Owner::Miner(1), "ETH", "0xabc");
        let mut standard = Balance::new(Owner::Miner(1), "ETH", BigInt::from(100), Some(1));
        standard.pool_fees = BigInt::from(1);
        standard.settle();
        let mut reserve = Balance::new(Owner::Miner(1), "ETH", BigInt::from(50), Some(1));
        reserve.out_type = BalanceOutType::FeeBalance;
        reserve.settle();

        payout.credit(&standard);
        payout.credit(&reserve);
        assert_eq!(payout.value, BigInt::from(99));
        assert_eq!(payout.pool_fees, BigInt::from(1));
    }

    #[test]
    fn test_spend_carries_fee_balance_forward() {
        let mut payout = Payout::new(Owner::Recipient(2), "USDC", "0xabc");
        payout.id = 9;
        payout.fee_balance_coin = Some("ETH".into());
        payout.in_fee_balance = BigInt::from(30);

        let next = payout
            .spend("0xfeed", BigInt::from(12), OffsetDateTime::UNIX_EPOCH)
            .unwrap();
        assert!(payout.spent);
        assert_eq!(next.in_fee_balance, BigInt::from(18));
        assert_eq!(next.owner, Owner::Recipient(2));
        assert!(payout
            .spend("0xfeed", BigInt::from(0), OffsetDateTime::UNIX_EPOCH)
            .is_err());
    }

    #[test]
    fn test_out_type_names() {
        assert_eq!(BalanceOutType::FeeBalance.to_string(), "fee_balance");
        assert_eq!(
            BalanceOutType::from_str("standard").unwrap(),
            BalanceOutType::Standard
        );
    }
}
