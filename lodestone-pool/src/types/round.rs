//! Mined blocks and the shares credited against them.

use num_bigint::BigInt;
use time::OffsetDateTime;

use crate::error::{PoolError, Result};

/// A block found by the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    pub id: u64,
    pub chain_id: String,
    pub miner_id: Option<u64>,
    pub height: u64,
    pub uncle_height: Option<u64>,
    pub epoch_height: Option<u64>,
    pub hash: String,
    pub coinbase_txid: Option<String>,
    pub nonce: Option<String>,
    pub solution: Option<String>,
    pub mix_digest: Option<String>,
    pub difficulty: f64,
    pub value: Option<BigInt>,
    pub mev_value: Option<BigInt>,
    /// Chain coin to USD at unlock time.
    pub cost_basis_price: Option<f64>,
    pub pending: bool,
    pub mature: bool,
    pub uncle: bool,
    pub orphan: bool,
    pub spent: bool,
    pub created_at: Option<OffsetDateTime>,
}

impl Round {
    /// A freshly submitted block awaiting confirmations.
    pub fn pending(chain_id: &str, height: u64, hash: &str, difficulty: f64) -> Self {
        Self {
            id: 0,
            chain_id: chain_id.to_string(),
            miner_id: None,
            height,
            uncle_height: None,
            epoch_height: None,
            hash: hash.to_string(),
            coinbase_txid: None,
            nonce: None,
            solution: None,
            mix_digest: None,
            difficulty,
            value: None,
            mev_value: None,
            cost_basis_price: None,
            pending: true,
            mature: false,
            uncle: false,
            orphan: false,
            spent: false,
            created_at: None,
        }
    }

    /// Base value plus MEV; fails when the value has not been assigned yet.
    pub fn total_value(&self) -> Result<BigInt> {
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| PoolError::invariant(format!("round {}: value not set", self.id)))?;
        Ok(match &self.mev_value {
            Some(mev) => value + mev,
            None => value.clone(),
        })
    }

    pub fn mark_orphan(&mut self) {
        self.pending = false;
        self.orphan = true;
        self.mature = false;
        self.uncle = false;
    }

    /// Terminal confirmation; requires a value unless the round is an orphan.
    pub fn mark_mature(&mut self) -> Result<()> {
        if self.orphan {
            return Err(PoolError::invariant(format!(
                "round {}: orphan cannot mature",
                self.id
            )));
        }
        if self.value.is_none() {
            return Err(PoolError::invariant(format!(
                "round {}: value must be set before maturing",
                self.id
            )));
        }
        self.pending = false;
        self.mature = true;
        Ok(())
    }
}

/// Share count a miner contributed to one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundShare {
    pub round_id: u64,
    pub miner_id: Option<u64>,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_value_includes_mev() {
        let mut round = Round::pending("ETH", 100, "0xabc", 1.0);
        assert!(round.total_value().is_err());
        round.value = Some(BigInt::from(10));
        assert_eq!(round.total_value().unwrap(), BigInt::from(10));
        round.mev_value = Some(BigInt::from(5));
        assert_eq!(round.total_value().unwrap(), BigInt::from(15));
    }

    #[test]
    fn test_mature_requires_value_and_not_orphan() {
        let mut round = Round::pending("RVN", 100, "00ab", 1.0);
        assert!(round.mark_mature().is_err());
        round.value = Some(BigInt::from(2500000000u64));
        round.mark_mature().unwrap();
        assert!(round.mature && !round.pending);

        let mut orphan = Round::pending("RVN", 101, "00cd", 1.0);
        orphan.value = Some(BigInt::from(1));
        orphan.mark_orphan();
        assert!(orphan.mark_mature().is_err());
    }
}
