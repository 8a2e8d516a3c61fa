//! Share and network difficulty.

use std::fmt;

use crate::u256::U256;

/// Fixed-point scale applied to fractional difficulties before dividing.
const FRACTION_BITS: usize = 32;

/// Mining difficulty relative to a chain's difficulty-1 target.
///
/// Pools hand out fractional difficulties (0.5, 0.25, ...) for slow coins, so
/// the value is carried as `f64` and converted to an exact 256-bit target with
/// 32 fractional bits:
/// ```text
/// target = max_target * 2^32 / round(difficulty * 2^32)
/// ```
/// A digest meets the difficulty when it is `<= target`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Difficulty(f64);

impl Difficulty {
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Scale by a chain's share difficulty factor.
    pub fn scaled(self, factor: f64) -> Self {
        Self(self.0 * factor)
    }

    /// Difficulty a digest represents against `max_target`.
    pub fn from_hash(digest: U256, max_target: U256) -> Self {
        if digest.is_zero() {
            return Self(f64::MAX);
        }
        Self(max_target.to_f64() / digest.to_f64())
    }

    pub fn to_target(self, max_target: U256) -> U256 {
        if self.0.is_nan() || self.0 <= 0.0 {
            return max_target;
        }
        let fixed = (self.0 * (1u64 << FRACTION_BITS) as f64).round();
        if fixed < 1.0 {
            return U256::MAX;
        }
        if fixed >= u64::MAX as f64 {
            return max_target / (self.0 as u64).max(1);
        }
        let divisor = U256::from_u64(fixed as u64);

        let quotient = max_target / divisor;
        if quotient > U256::MAX >> FRACTION_BITS {
            return U256::MAX;
        }
        let remainder = max_target % divisor;
        (quotient << FRACTION_BITS) + ((remainder << FRACTION_BITS) / divisor)
    }

    pub fn is_met_by(self, digest: U256, max_target: U256) -> bool {
        digest <= self.to_target(max_target)
    }
}

/// Expand compact `nBits` into a 256-bit target.
pub fn target_from_bits(bits: u32) -> U256 {
    let exponent = (bits >> 24) as usize;
    let mantissa = U256::from_u64(u64::from(bits & 0x007f_ffff));
    if bits & 0x0080_0000 != 0 {
        return U256::ZERO;
    }
    if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else {
        mantissa << (8 * (exponent - 3))
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        let (scaled, suffix) = if value >= 1e15 {
            (value / 1e15, "P")
        } else if value >= 1e12 {
            (value / 1e12, "T")
        } else if value >= 1e9 {
            (value / 1e9, "G")
        } else if value >= 1e6 {
            (value / 1e6, "M")
        } else if value >= 1e3 {
            (value / 1e3, "K")
        } else {
            (value, "")
        };

        if scaled >= 100.0 {
            write!(f, "{:.0}{}", scaled, suffix)
        } else if scaled >= 10.0 {
            write!(f, "{:.1}{}", scaled, suffix)
        } else {
            write!(f, "{:.2}{}", scaled, suffix)
        }
    }
}
