//! The exchange a switch trades through.
//!
//! Amounts cross this interface as integer base units of the coin involved;
//! implementations convert to and from the exchange's decimal strings.
//! Statuses the exchange can never recover from (orphaned deposits,
//! cancelled withdrawals) are turned into invariant violations by
//! [`DepositStatus::check`] and [`WithdrawalStatus::check`].

use async_trait::async_trait;
use num_bigint::BigInt;
use strum::{Display, EnumString};

use crate::error::{PoolError, Result};
use crate::types::TradeDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CurrencyStatus {
    Online,
    Offline,
    /// Deposits or withdrawals suspended.
    Delisted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    pub coin: String,
    pub status: CurrencyStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum DepositStatus {
    #[strum(serialize = "DEPOSIT_PENDING")]
    Pending,
    #[strum(serialize = "DEPOSIT_COMPLETED")]
    Completed,
    #[strum(serialize = "DEPOSIT_ORPHANED")]
    Orphaned,
    #[strum(serialize = "DEPOSIT_INVALIDATED")]
    Invalidated,
}

impl DepositStatus {
    pub fn check(self, deposit_id: &str) -> Result<Self> {
        match self {
            DepositStatus::Orphaned | DepositStatus::Invalidated => Err(PoolError::invariant(format!(
                "exchange deposit {}: {}",
                deposit_id, self
            ))),
            status => Ok(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deposit {
    pub id: String,
    pub coin: String,
    pub txid: String,
    pub quantity: BigInt,
    pub status: DepositStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum OrderStatus {
    #[strum(serialize = "OPEN")]
    Open,
    #[strum(serialize = "CLOSED")]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    /// Average fill rate, quote per base.
    pub rate: f64,
    pub filled: bool,
    pub input_amount: BigInt,
    pub output_amount: BigInt,
    /// In the output coin.
    pub fees: BigInt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum WithdrawalStatus {
    #[strum(serialize = "WITHDRAWAL_REQUESTED")]
    Requested,
    #[strum(serialize = "WITHDRAWAL_PENDING")]
    Pending,
    #[strum(serialize = "WITHDRAWAL_COMPLETED")]
    Completed,
    #[strum(serialize = "WITHDRAWAL_CANCELLED")]
    Cancelled,
    #[strum(serialize = "WITHDRAWAL_INVALID_ADDRESS")]
    InvalidAddress,
}

impl WithdrawalStatus {
    pub fn check(self, withdrawal_id: &str) -> Result<Self> {
        match self {
            WithdrawalStatus::Cancelled | WithdrawalStatus::InvalidAddress => Err(PoolError::invariant(format!(
                "exchange withdrawal {}: {}",
                withdrawal_id, self
            ))),
            status => Ok(status),
        }
    }
}

/// Returned when a withdrawal is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalReceipt {
    pub id: String,
    /// Amount that will arrive.
    pub quantity: BigInt,
    pub tx_cost: BigInt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub id: String,
    pub coin: String,
    pub quantity: BigInt,
    pub tx_cost: BigInt,
    pub txid: Option<String>,
    pub status: WithdrawalStatus,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Mid-market rate, `quote` per `base`.
    async fn get_rate(&self, base: &str, quote: &str) -> Result<f64>;

    async fn get_currency(&self, coin: &str) -> Result<Currency>;

    async fn get_deposit_address(&self, coin: &str) -> Result<String>;

    /// Market order on `market` (`BASE-QUOTE`) for `quantity` of the coin
    /// being sold.
    async fn create_order(&self, market: &str, direction: TradeDirection, quantity: &BigInt) -> Result<Order>;

    async fn get_order(&self, id: &str) -> Result<Order>;

    async fn get_open_deposits_for(&self, coin: &str) -> Result<Vec<Deposit>>;

    async fn get_closed_deposits_for(&self, coin: &str) -> Result<Vec<Deposit>>;

    async fn get_deposit_by_id(&self, id: &str) -> Result<Deposit>;

    async fn withdraw(&self, address: &str, coin: &str, amount: &BigInt) -> Result<WithdrawalReceipt>;

    async fn get_withdrawal_by_id(&self, id: &str) -> Result<Withdrawal>;
}
