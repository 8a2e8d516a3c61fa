//! Records shared by the chain adapters, accountants and pipelines.
//!
//! Amounts are integer base units (satoshis, wei, aettos) held as `BigInt`.
//! Columns that may be unset in storage are `Option`s.

mod difficulty;
mod ledger;
mod round;
mod switch;

pub use difficulty::{target_from_bits, Difficulty};
pub use ledger::{Balance, BalanceOutType, Miner, Owner, Payout, Recipient, Utxo};
pub use round::{Round, RoundShare};
pub use switch::{
    Switch, SwitchDeposit, SwitchStatus, SwitchTrade, SwitchWithdrawal, TradeDirection,
};
