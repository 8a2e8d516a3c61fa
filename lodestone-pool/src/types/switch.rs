//! Exchange switch records.

use num_bigint::BigInt;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::error::{PoolError, Result};

/// Lifecycle of a switch. Stored as the numeric code; codes 2, 6 and 8 were
/// retired "active" stages and are refused on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum SwitchStatus {
    DepositInactive,
    DepositUnregistered,
    DepositUnconfirmed,
    DepositComplete,
    TradesInactive,
    TradesCompleteStageOne,
    TradesCompleteStageTwo,
    WithdrawalsActive,
    WithdrawalsComplete,
    SwitchComplete,
}

const RETIRED_CODES: [i32; 3] = [2, 6, 8];

impl SwitchStatus {
    pub fn code(self) -> i32 {
        match self {
            SwitchStatus::DepositInactive => 0,
            SwitchStatus::DepositUnregistered => 1,
            SwitchStatus::DepositUnconfirmed => 3,
            SwitchStatus::DepositComplete => 4,
            SwitchStatus::TradesInactive => 5,
            SwitchStatus::TradesCompleteStageOne => 7,
            SwitchStatus::TradesCompleteStageTwo => 9,
            SwitchStatus::WithdrawalsActive => 10,
            SwitchStatus::WithdrawalsComplete => 11,
            SwitchStatus::SwitchComplete => 12,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        if RETIRED_CODES.contains(&code) {
            return Err(PoolError::invariant(format!(
                "switch status {} is a retired stage",
                code
            )));
        }
        SwitchStatus::iter()
            .find(|s| s.code() == code)
            .ok_or_else(|| PoolError::invalid(format!("unknown switch status {}", code)))
    }

    /// The stage that follows, `None` once complete.
    pub fn next(self) -> Option<Self> {
        SwitchStatus::iter().skip_while(|s| *s != self).nth(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub id: u64,
    pub status: SwitchStatus,
}

impl Switch {
    pub fn new() -> Self {
        Self {
            id: 0,
            status: SwitchStatus::DepositInactive,
        }
    }

    /// Move forward to `status`; switches never go backwards.
    pub fn advance(&mut self, status: SwitchStatus) -> Result<()> {
        if status <= self.status {
            return Err(PoolError::invariant(format!(
                "switch {}: cannot move from {} to {}",
                self.id, self.status, status
            )));
        }
        self.status = status;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status != SwitchStatus::SwitchComplete
    }
}

impl Default for Switch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchDeposit {
    pub id: u64,
    pub switch_id: u64,
    pub chain_id: String,
    pub txid: String,
    pub exchange_deposit_id: Option<String>,
    pub value: BigInt,
    pub fees: Option<BigInt>,
    pub cost_basis_price: Option<f64>,
    pub registered: bool,
    pub pending: bool,
    pub spent: bool,
}

impl SwitchDeposit {
    pub fn new(switch_id: u64, chain_id: &str, txid: &str, value: BigInt) -> Self {
        Self {
            id: 0,
            switch_id,
            chain_id: chain_id.to_string(),
            txid: txid.to_string(),
            exchange_deposit_id: None,
            value,
            fees: None,
            cost_basis_price: None,
            registered: false,
            pending: true,
            spent: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum TradeDirection {
    #[strum(serialize = "BUY")]
    Buy,
    #[strum(serialize = "SELL")]
    Sell,
}

/// One market order of a trade path.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchTrade {
    pub id: u64,
    pub switch_id: u64,
    pub path_id: u32,
    /// 1 or 2.
    pub stage: u8,
    pub exchange_order_id: Option<String>,
    pub market: String,
    pub direction: TradeDirection,
    pub from_chain_id: String,
    pub to_chain_id: String,
    /// Only stage 1 trades start with a value; later stages receive the
    /// predecessor's proceeds.
    pub value: Option<BigInt>,
    pub order_value: Option<BigInt>,
    pub proceeds: Option<BigInt>,
    pub trade_fees: Option<BigInt>,
    pub slippage: Option<f64>,
    pub fair_market_price: Option<f64>,
    pub next_trade_id: Option<u64>,
    pub initiated: bool,
    pub open: bool,
    pub filled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchWithdrawal {
    pub id: u64,
    pub switch_id: u64,
    pub chain_id: String,
    pub exchange_withdrawal_id: Option<String>,
    pub address: String,
    pub txid: Option<String>,
    pub value: BigInt,
    pub trade_fees: BigInt,
    pub withdrawal_fees: BigInt,
    pub cost_basis_price: Option<f64>,
    pub pending: bool,
    pub confirmed: bool,
    pub spent: bool,
}
