//! Splitting mature block rewards among miners and fee recipients.
//!
//! The accountant walks a fixed sequence of stages; every `finalize_*` call
//! checks a running sum before moving on and refuses to run out of order:
//!
//! ```text
//! Initialized -> RoundsSet -> RoundsCredited -> MinersCredited
//!             -> RecipientsCredited -> BooksValidated
//! ```

use std::collections::{BTreeMap, HashSet};

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use strum::Display;

use super::fee_balance::FeeBalancePolicy;
use super::split_proportional;
use crate::config::AccountantConfig;
use crate::error::{PoolError, Result};
use crate::tracing::prelude::*;
use crate::types::{Balance, BalanceOutType, Miner, Owner, Payout, Recipient, Round, RoundShare};

const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Stage {
    Initialized,
    RoundsSet,
    RoundsCredited,
    MinersCredited,
    RecipientsCredited,
    BooksValidated,
}

pub struct RoundAccountant {
    chain_id: String,
    config: AccountantConfig,
    fee_policy: FeeBalancePolicy,
    stage: Stage,
    spendable: BigInt,
    rounds: Vec<Round>,
    credited_rounds: HashSet<u64>,
    balances: Vec<Balance>,
    /// Payout index per balance, set once the balance is credited.
    links: Vec<Option<usize>>,
    payouts: Vec<Payout>,
    round_fees: BTreeMap<u64, BigInt>,
    used_fees: BTreeMap<u64, BigInt>,
    /// First recipient balance of each round, which takes the fee remainder.
    oldest_recipient: BTreeMap<u64, usize>,
    recipient_bps: u32,
}

impl RoundAccountant {
    /// `units` are the decimal places of `chain_id`'s base unit.
    pub fn new(chain_id: &str, units: u32, config: AccountantConfig) -> Result<Self> {
        let fee_policy = FeeBalancePolicy::new(&config, units)?;
        Ok(Self {
            chain_id: chain_id.to_string(),
            config,
            fee_policy,
            stage: Stage::Initialized,
            spendable: BigInt::zero(),
            rounds: Vec::new(),
            credited_rounds: HashSet::new(),
            balances: Vec::new(),
            links: Vec::new(),
            payouts: Vec::new(),
            round_fees: BTreeMap::new(),
            used_fees: BTreeMap::new(),
            oldest_recipient: BTreeMap::new(),
            recipient_bps: 0,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn spendable(&self) -> &BigInt {
        &self.spendable
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn balances(&self) -> &[Balance] {
        &self.balances
    }

    pub fn payouts(&self) -> &[Payout] {
        &self.payouts
    }

    /// Hand the produced rows to the caller for persisting.
    pub fn into_parts(self) -> (Vec<Round>, Vec<Balance>, Vec<Payout>) {
        (self.rounds, self.balances, self.payouts)
    }

    fn require(&self, stage: Stage, operation: &str) -> Result<()> {
        if self.stage != stage {
            return Err(PoolError::invariant(format!(
                "{} accountant: {} needs stage {}, at {}",
                self.chain_id, operation, stage, self.stage
            )));
        }
        Ok(())
    }

    fn violation(&self, msg: String) -> PoolError {
        error!(chain = %self.chain_id, stage = %self.stage, "{}", msg);
        PoolError::invariant(msg)
    }

    pub fn add_round(&mut self, round: Round) -> Result<()> {
        self.require(Stage::Initialized, "add_round")?;
        if round.chain_id != self.chain_id {
            return Err(PoolError::invalid(format!(
                "round {}: chain {} in {} accountant",
                round.id, round.chain_id, self.chain_id
            )));
        }
        if self.rounds.iter().any(|r| r.id == round.id) {
            return Err(PoolError::invalid(format!("round {}: added twice", round.id)));
        }
        self.spendable += round.total_value()?;
        self.rounds.push(round);
        Ok(())
    }

    pub fn finalize_rounds(&mut self) -> Result<()> {
        self.require(Stage::Initialized, "finalize_rounds")?;
        let total: BigInt = self
            .rounds
            .iter()
            .map(Round::total_value)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .sum();
        if total != self.spendable {
            return Err(self.violation(format!("spendable {} != round total {}", self.spendable, total)));
        }
        self.stage = Stage::RoundsSet;
        Ok(())
    }

    /// One balance per share row, proportional to the share count.
    pub fn credit_round(&mut self, round_id: u64, shares: &[RoundShare]) -> Result<()> {
        self.require(Stage::RoundsSet, "credit_round")?;
        let round = self
            .rounds
            .iter()
            .find(|r| r.id == round_id)
            .ok_or_else(|| PoolError::invalid(format!("round {}: not added", round_id)))?;
        if !self.credited_rounds.insert(round_id) {
            return Err(PoolError::invalid(format!("round {}: credited twice", round_id)));
        }

        let total = round.total_value()?;
        let mut miners = Vec::with_capacity(shares.len());
        for share in shares {
            if share.round_id != round_id {
                return Err(PoolError::invalid(format!(
                    "round {}: share for round {}",
                    round_id, share.round_id
                )));
            }
            let miner_id = share
                .miner_id
                .ok_or_else(|| PoolError::invalid(format!("round {}: share without miner", round_id)))?;
            miners.push(miner_id);
        }
        let weights: Vec<BigInt> = shares.iter().map(|s| BigInt::from(s.count)).collect();
        if weights.iter().all(Zero::is_zero) {
            return Err(self.violation(format!("round {}: no shares", round_id)));
        }

        let values = split_proportional(&total, &weights)?;
        let chain_id = self.chain_id.clone();
        for (miner_id, value) in miners.into_iter().zip(values) {
            self.push_balance(Balance::new(Owner::Miner(miner_id), &chain_id, value, Some(round_id)));
        }
        debug!(chain = %self.chain_id, round = round_id, shares = shares.len(), value = %total, "Round credited");
        Ok(())
    }

    pub fn finalize_round_credits(&mut self) -> Result<()> {
        self.require(Stage::RoundsSet, "finalize_round_credits")?;
        if let Some(round) = self.rounds.iter().find(|r| !self.credited_rounds.contains(&r.id)) {
            return Err(self.violation(format!("round {}: never credited", round.id)));
        }
        let credited: BigInt = self.balances.iter().map(|b| &b.in_value).sum();
        if credited != self.spendable {
            return Err(self.violation(format!("spendable {} != credited {}", self.spendable, credited)));
        }
        self.stage = Stage::RoundsCredited;
        Ok(())
    }

    /// Deduct pool fees from every balance of `miner` and route it into
    /// `payout`, carving a gas reserve when the payout needs one.
    pub fn credit_miner(&mut self, miner: &Miner, payout: Payout) -> Result<()> {
        self.require(Stage::RoundsCredited, "credit_miner")?;
        let owner = Owner::Miner(miner.id);
        let payout_index = self.push_payout(owner, &miner.coin_id, payout)?;
        let fee_bps = self.config.pool_fee_bps(&miner.address);

        let indices = self.uncredited(owner);
        if indices.is_empty() {
            return Err(PoolError::invalid(format!("miner {}: no balances to credit", miner.id)));
        }

        let mut request = self.fee_policy.miner_request(&self.payouts[payout_index]);
        for index in indices {
            let balance = &mut self.balances[index];
            balance.pool_fees = &balance.in_value * fee_bps / BPS_DENOMINATOR;
            if let Some(want) = request.take() {
                let remaining = self.carve_reserve(index, payout_index, &want)?;
                request = (remaining.is_positive()).then_some(remaining);
            }
            self.route(index, payout_index);
        }
        Ok(())
    }

    pub fn finalize_miners(&mut self) -> Result<()> {
        self.require(Stage::RoundsCredited, "finalize_miners")?;
        if let Some(index) = self.links.iter().position(Option::is_none) {
            return Err(self.violation(format!(
                "miner {:?}: balance for round {:?} never credited",
                self.balances[index].miner_id(),
                self.balances[index].in_round_id
            )));
        }
        for balance in &self.balances {
            if let Some(round_id) = balance.in_round_id {
                *self.round_fees.entry(round_id).or_default() += &balance.pool_fees;
            }
        }
        self.stage = Stage::MinersCredited;
        Ok(())
    }

    /// Credit `recipient`'s fraction of each round's pool fees.
    pub fn credit_recipient(&mut self, recipient: &Recipient, payout: Payout) -> Result<()> {
        self.require(Stage::MinersCredited, "credit_recipient")?;
        self.recipient_bps += recipient.fraction_bps;
        if self.recipient_bps > BPS_DENOMINATOR {
            return Err(self.violation(format!(
                "recipient fractions sum to {} bps",
                self.recipient_bps
            )));
        }
        let owner = Owner::Recipient(recipient.id);
        let payout_index = self.push_payout(owner, &recipient.coin_id, payout)?;

        let mut request = self.fee_policy.recipient_request(&self.payouts[payout_index]);
        let chain_id = self.chain_id.clone();
        let round_ids: Vec<u64> = self.rounds.iter().map(|r| r.id).collect();
        for round_id in round_ids {
            let fees = self.round_fees.get(&round_id).cloned().unwrap_or_default();
            let value = fees * recipient.fraction_bps / BPS_DENOMINATOR;
            *self.used_fees.entry(round_id).or_default() += &value;

            let index = self.push_balance(Balance::new(owner, &chain_id, value, Some(round_id)));
            self.oldest_recipient.entry(round_id).or_insert(index);
            if let Some(want) = request.take() {
                let remaining = self.carve_reserve(index, payout_index, &want)?;
                request = (remaining.is_positive()).then_some(remaining);
            }
            self.route(index, payout_index);
        }
        Ok(())
    }

    /// Sweep each round's undistributed fees to its oldest recipient balance.
    pub fn finalize_recipients(&mut self) -> Result<()> {
        self.require(Stage::MinersCredited, "finalize_recipients")?;
        for (round_id, fees) in &self.round_fees {
            let used = self.used_fees.get(round_id).cloned().unwrap_or_default();
            let remainder = fees - used;
            if remainder.is_negative() {
                return Err(self.violation(format!("round {}: recipients over-credited by {}", round_id, -remainder)));
            }
            if remainder.is_zero() {
                continue;
            }
            let index = *self
                .oldest_recipient
                .get(round_id)
                .ok_or_else(|| self.violation(format!("round {}: {} fees with no recipient", round_id, remainder)))?;

            let balance = &mut self.balances[index];
            balance.in_value += &remainder;
            if let Some(out) = balance.out_value.as_mut() {
                *out += &remainder;
                if let Some(payout_index) = self.links[index] {
                    self.payouts[payout_index].value += &remainder;
                }
            }
        }
        self.stage = Stage::RecipientsCredited;
        Ok(())
    }

    /// Conservation checks over everything credited.
    pub fn validate_books(&mut self) -> Result<()> {
        self.require(Stage::RecipientsCredited, "validate_books")?;

        let mut miner_in = BigInt::zero();
        let mut miner_fees = BigInt::zero();
        let mut recipient_in = BigInt::zero();
        let mut by_round: BTreeMap<u64, BigInt> = BTreeMap::new();
        for balance in &self.balances {
            balance.check_closure()?;
            match balance.owner {
                Owner::Miner(_) => {
                    miner_in += &balance.in_value;
                    miner_fees += &balance.pool_fees;
                    if let Some(round_id) = balance.in_round_id {
                        *by_round.entry(round_id).or_default() += &balance.in_value;
                    }
                }
                Owner::Recipient(_) => recipient_in += &balance.in_value,
            }
        }

        if miner_in != self.spendable {
            return Err(self.violation(format!("spendable {} != credited {}", self.spendable, miner_in)));
        }
        for round in &self.rounds {
            let expected = round.total_value()?;
            let credited = by_round.get(&round.id).cloned().unwrap_or_default();
            if credited != expected {
                return Err(self.violation(format!("round {}: value {} != credited {}", round.id, expected, credited)));
            }
        }
        if miner_fees != recipient_in {
            return Err(self.violation(format!(
                "pool fees {} != recipient credits {}",
                miner_fees, recipient_in
            )));
        }

        info!(
            chain = %self.chain_id,
            rounds = self.rounds.len(),
            balances = self.balances.len(),
            spendable = %self.spendable,
            pool_fees = %miner_fees,
            "Books validated"
        );
        self.stage = Stage::BooksValidated;
        Ok(())
    }

    fn push_balance(&mut self, balance: Balance) -> usize {
        self.balances.push(balance);
        self.links.push(None);
        self.balances.len() - 1
    }

    fn push_payout(&mut self, owner: Owner, coin_id: &str, payout: Payout) -> Result<usize> {
        if payout.owner != owner || payout.coin_id != coin_id || payout.spent {
            return Err(PoolError::invalid(format!(
                "payout {}: not an open {} payout of {:?}",
                payout.id, coin_id, owner
            )));
        }
        if self.payouts.iter().any(|p| p.owner == owner) {
            return Err(PoolError::invalid(format!("{:?}: credited twice", owner)));
        }
        self.payouts.push(payout);
        Ok(self.payouts.len() - 1)
    }

    fn uncredited(&self, owner: Owner) -> Vec<usize> {
        (0..self.balances.len())
            .filter(|&i| self.balances[i].owner == owner && self.links[i].is_none())
            .collect()
    }

    /// Carve up to `want` off balance `index`; returns what is still wanted.
    fn carve_reserve(&mut self, index: usize, payout_index: usize, want: &BigInt) -> Result<BigInt> {
        let balance = &mut self.balances[index];
        let net = &balance.in_value - &balance.pool_fees;
        let amount = if *want < net { want.clone() } else { net };

        balance.out_payout_id = Some(self.payouts[payout_index].id);
        let reserve = self.fee_policy.carve(balance, &amount)?;
        self.fee_policy.record(&mut self.payouts[payout_index], &reserve);
        debug!(
            chain = %self.chain_id,
            owner = ?reserve.owner,
            value = %amount,
            pending = reserve.pending,
            "Fee balance carved"
        );
        let reserve_index = self.push_balance(reserve);
        self.links[reserve_index] = Some(payout_index);
        Ok(want - amount)
    }

    /// Settle same-coin balances into the payout; leave the rest for a switch.
    fn route(&mut self, index: usize, payout_index: usize) {
        let payout = &mut self.payouts[payout_index];
        let balance = &mut self.balances[index];
        balance.out_coin = payout.coin_id.clone();
        balance.out_type = BalanceOutType::Standard;
        balance.out_payout_id = Some(payout.id);
        if balance.out_coin == balance.in_coin {
            balance.settle();
            payout.credit(balance);
        } else {
            balance.pending = true;
        }
        self.links[index] = Some(payout_index);
    }
}
