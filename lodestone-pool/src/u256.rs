//! 256-bit unsigned integer used for PoW targets.
//!
//! Thin wrapper over `ruint::aliases::U256` so callers only see the handful of
//! operations share checking needs.

use ruint::aliases::U256 as Ruint256;
use std::ops::{Div, Rem, Shl, Shr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct U256(Ruint256);

impl U256 {
    pub const ZERO: Self = Self(Ruint256::ZERO);
    pub const MAX: Self = Self(Ruint256::MAX);

    pub fn from_u64(value: u64) -> Self {
        Self(Ruint256::from(value))
    }

    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        Self(Ruint256::from_le_bytes(bytes))
    }

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(Ruint256::from_be_bytes(bytes))
    }

    pub fn to_le_bytes(self) -> [u8; 32] {
        self.0.to_le_bytes()
    }

    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0.to_be_bytes()
    }

    /// Parse big-endian hex of up to 64 digits, with or without `0x`.
    pub fn from_hex(text: &str) -> crate::error::Result<Self> {
        let digits = text.trim_start_matches("0x");
        if digits.len() > 64 {
            return Err(crate::error::PoolError::invalid(format!(
                "{} hex digits do not fit in 256 bits",
                digits.len()
            )));
        }
        let padded = format!("{:0>64}", digits);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&padded, &mut bytes)?;
        Ok(Self::from_be_bytes(bytes))
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.to_be_bytes())
    }

    pub fn is_zero(self) -> bool {
        self.0 == Ruint256::ZERO
    }

    pub fn saturating_to_u64(self) -> u64 {
        self.0.saturating_to()
    }

    /// Nearest `f64`; precision beyond 53 bits is lost.
    pub fn to_f64(self) -> f64 {
        self.to_be_bytes()
            .iter()
            .fold(0f64, |acc, b| acc * 256.0 + f64::from(*b))
    }
}

impl From<u64> for U256 {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl Div for U256 {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Self(self.0 / rhs.0)
    }
}

impl Div<u64> for U256 {
    type Output = Self;

    fn div(self, rhs: u64) -> Self::Output {
        Self(self.0 / Ruint256::from(rhs))
    }
}

impl Rem for U256 {
    type Output = Self;

    fn rem(self, rhs: Self) -> Self::Output {
        Self(self.0 % rhs.0)
    }
}

impl Shl<usize> for U256 {
    type Output = Self;

    fn shl(self, rhs: usize) -> Self::Output {
        Self(self.0 << rhs)
    }
}

impl Shr<usize> for U256 {
    type Output = Self;

    fn shr(self, rhs: usize) -> Self::Output {
        Self(self.0 >> rhs)
    }
}

impl std::ops::Add for U256 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_orders_agree() {
        let mut be = [0u8; 32];
        be[31] = 100;
        let mut le = [0u8; 32];
        le[0] = 100;
        assert_eq!(U256::from_be_bytes(be), U256::from_le_bytes(le));
        assert_eq!(U256::from_be_bytes(be), U256::from_u64(100));
        assert_eq!(U256::from_u64(100).to_le_bytes(), le);
    }

    #[test]
    fn test_division_and_remainder() {
        let a = U256::from_u64(103);
        assert_eq!(a / U256::from_u64(10), U256::from_u64(10));
        assert_eq!(a / 10u64, U256::from_u64(10));
        assert_eq!(a % U256::from_u64(10), U256::from_u64(3));
        assert_eq!(U256::MAX / U256::from_u64(1), U256::MAX);
    }

    #[test]
    fn test_hex() {
        let value = U256::from_hex("0x00000000ff").unwrap();
        assert_eq!(value, U256::from_u64(255));
        assert_eq!(value.to_hex(), format!("{}ff", "0".repeat(62)));
        assert!(U256::from_hex(&"f".repeat(65)).is_err());
        assert!(U256::from_hex("zz").is_err());
    }

    #[test]
    fn test_shifts_and_f64() {
        let one = U256::from_u64(1);
        assert_eq!((one << 40).to_f64(), 1099511627776.0);
        assert_eq!((one << 40) >> 8, one << 32);
        assert_eq!(U256::from_u64(42).to_f64(), 42.0);
        assert!(U256::ZERO.is_zero());
    }
}
