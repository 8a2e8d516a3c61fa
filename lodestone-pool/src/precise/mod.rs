//! Arbitrary-precision signed decimals.
//!
//! A [`Precise`] is `value · 10^(−decimals)` over a big integer. Every
//! constructor normalizes to canonical form (no trailing zeros in `value`,
//! zero has `decimals == 0`), so structural equality is numeric equality.
//!
//! The accountants use it for rate-weighted cost basis and the chain adapters
//! for converting node-reported floats into satoshi/wei integers.

mod to_precision;

pub use to_precision::{decimal_to_precision, Digits, Padding};

use crate::error::{PoolError, Result};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Mul, Neg};
use std::str::FromStr;

/// Precision used by [`Precise::div`].
pub const DEFAULT_DIV_PRECISION: i32 = 18;

/// Largest decimal exponent, either sign, accepted from text or when
/// aligning two scales.
pub const MAX_SCALE: i32 = 1 << 16;

/// Rounding applied when a value loses decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Drop the excess digits.
    Truncate,
    /// Half away from zero.
    Round,
}

/// Fixed-point decimal with exact arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Precise {
    value: BigInt,
    decimals: i32,
}

/// `10^exp` as a big integer.
pub fn pow10(exp: u32) -> BigInt {
    num_traits::pow(BigInt::from(10u8), exp as usize)
}

impl Precise {
    /// Build from an integer mantissa and a decimal exponent.
    pub fn new(value: impl Into<BigInt>, decimals: i32) -> Self {
        let mut precise = Self {
            value: value.into(),
            decimals,
        };
        precise.reduce();
        precise
    }

    pub fn zero() -> Self {
        Self {
            value: BigInt::zero(),
            decimals: 0,
        }
    }

    pub fn from_integer(value: impl Into<BigInt>) -> Self {
        Self::new(value, 0)
    }

    /// Interpret an integer amount of base units, e.g. satoshis with `units = 8`.
    pub fn from_units(value: impl Into<BigInt>, units: u32) -> Self {
        Self::new(value, units as i32)
    }

    /// Parse decimal text with optional sign, point and `e` exponent.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PoolError::Parse("empty decimal".into()));
        }

        let lower = trimmed.to_ascii_lowercase();
        let (mantissa, exponent) = match lower.split_once('e') {
            Some((mantissa, exponent)) => {
                let exponent: i32 = exponent
                    .parse()
                    .map_err(|_| PoolError::Parse(format!("bad exponent in {:?}", text)))?;
                (mantissa, exponent)
            }
            None => (lower.as_str(), 0),
        };

        let (negative, unsigned) = match mantissa.as_bytes().first() {
            Some(b'-') => (true, &mantissa[1..]),
            Some(b'+') => (false, &mantissa[1..]),
            _ => (false, mantissa),
        };

        let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if integer.is_empty() && fraction.is_empty() {
            return Err(PoolError::Parse(format!("no digits in {:?}", text)));
        }
        if !integer.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(PoolError::Parse(format!("invalid decimal {:?}", text)));
        }

        let digits = format!("{}{}", integer, fraction);
        let mut value = BigInt::from_str(&digits)
            .map_err(|e| PoolError::Parse(format!("{:?}: {}", text, e)))?;
        if negative {
            value = -value;
        }

        let decimals = (fraction.len() as i32)
            .checked_sub(exponent)
            .ok_or_else(|| PoolError::Parse(format!("exponent out of range in {:?}", text)))?;
        let precise = Self::new(value, decimals);
        if precise.decimals.unsigned_abs() > MAX_SCALE as u32 {
            return Err(PoolError::invalid(format!("exponent out of range in {:?}", text)));
        }

        Ok(precise)
    }

    /// Parse the shortest round-trip rendering of a float.
    pub fn from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(PoolError::Parse(format!("non-finite float {}", value)));
        }
        Self::parse(&format!("{}", value))
    }

    pub fn value(&self) -> &BigInt {
        &self.value
    }

    pub fn decimals(&self) -> i32 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.value.is_negative()
    }

    pub fn is_positive(&self) -> bool {
        self.value.is_positive()
    }

    fn reduce(&mut self) {
        if self.value.is_zero() {
            self.decimals = 0;
            return;
        }
        let ten = BigInt::from(10u8);
        loop {
            let (quotient, remainder) = self.value.div_rem(&ten);
            if !remainder.is_zero() {
                break;
            }
            self.value = quotient;
            self.decimals -= 1;
        }
    }

    /// Both mantissas at the larger of the two scales.
    fn aligned(&self, other: &Self) -> Result<(BigInt, BigInt, i32)> {
        let gap = self
            .decimals
            .checked_sub(other.decimals)
            .filter(|gap| gap.unsigned_abs() <= MAX_SCALE as u32)
            .ok_or_else(|| {
                PoolError::invalid(format!(
                    "scales {} and {} are too far apart",
                    self.decimals, other.decimals
                ))
            })?;
        Ok(match gap.cmp(&0) {
            Ordering::Equal => (self.value.clone(), other.value.clone(), self.decimals),
            Ordering::Greater => {
                let factor = pow10(gap.unsigned_abs());
                (self.value.clone(), &other.value * factor, self.decimals)
            }
            Ordering::Less => {
                let factor = pow10(gap.unsigned_abs());
                (&self.value * factor, other.value.clone(), other.decimals)
            }
        })
    }

    pub fn add(&self, other: &Self) -> Result<Self> {
        let (a, b, decimals) = self.aligned(other)?;
        Ok(Self::new(a + b, decimals))
    }

    pub fn sub(&self, other: &Self) -> Result<Self> {
        let (a, b, decimals) = self.aligned(other)?;
        Ok(Self::new(a - b, decimals))
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self::new(&self.value * &other.value, self.decimals + other.decimals)
    }

    /// Truncating division to [`DEFAULT_DIV_PRECISION`] places.
    pub fn div(&self, other: &Self) -> Result<Self> {
        self.div_with_precision(other, DEFAULT_DIV_PRECISION)
    }

    /// Truncating division; the quotient carries `precision` decimals.
    pub fn div_with_precision(&self, other: &Self, precision: i32) -> Result<Self> {
        if other.is_zero() {
            return Err(PoolError::invalid(format!("division of {} by zero", self)));
        }
        let distance = precision - self.decimals + other.decimals;
        let numerator = if distance < 0 {
            &self.value / pow10(distance.unsigned_abs())
        } else {
            &self.value * pow10(distance as u32)
        };
        Ok(Self::new(numerator / &other.value, precision))
    }

    /// Remainder with the sign of the dividend.
    pub fn rem(&self, other: &Self) -> Result<Self> {
        if other.is_zero() {
            return Err(PoolError::invalid(format!("modulo of {} by zero", self)));
        }
        let numerator_scale = (other.decimals - self.decimals).max(0) as u32;
        let denominator_scale = (self.decimals - other.decimals).max(0) as u32;
        let numerator = &self.value * pow10(numerator_scale);
        let denominator = &other.value * pow10(denominator_scale);
        Ok(Self::new(
            numerator % denominator,
            denominator_scale as i32 + other.decimals,
        ))
    }

    pub fn neg(&self) -> Self {
        Self {
            value: -&self.value,
            decimals: self.decimals,
        }
    }

    pub fn abs(&self) -> Self {
        Self {
            value: self.value.abs(),
            decimals: self.decimals,
        }
    }

    /// Limit to `precision` decimal places.
    pub fn quantize(&self, precision: i32, rounding: Rounding) -> Self {
        if self.decimals <= precision {
            return self.clone();
        }
        let exp = pow10((self.decimals - precision) as u32);
        let (mut quotient, remainder) = self.value.abs().div_rem(&exp);
        if rounding == Rounding::Round && remainder * 2u8 >= exp {
            quotient += 1u8;
        }
        if self.is_negative() {
            quotient = -quotient;
        }
        Self::new(quotient, precision)
    }

    /// Exponent of the most significant digit (`123.4` → 2, `0.05` → −2).
    pub fn adjusted_digits(&self) -> i32 {
        if self.is_zero() {
            return 0;
        }
        self.value.abs().to_string().len() as i32 - self.decimals - 1
    }

    fn leading_exponent(&self) -> i64 {
        self.value.abs().to_string().len() as i64 - i64::from(self.decimals)
    }

    /// Multiply by `10^units`.
    pub fn shift(&self, units: i32) -> Self {
        Self::new(self.value.clone(), self.decimals - units)
    }

    /// Integer part after rounding at zero decimal places.
    pub fn to_integer(&self, rounding: Rounding) -> BigInt {
        let rounded = self.quantize(0, rounding);
        if rounded.decimals < 0 {
            rounded.value * pow10(rounded.decimals.unsigned_abs())
        } else {
            rounded.value
        }
    }

    /// Smallest integer not below this value.
    pub fn ceil(&self) -> BigInt {
        let truncated = self.to_integer(Rounding::Truncate);
        if self.is_positive() && Precise::from_integer(truncated.clone()) != *self {
            truncated + 1u8
        } else {
            truncated
        }
    }

    /// Convert to base units (`units` decimals), truncating.
    pub fn to_units(&self, units: u32) -> BigInt {
        self.shift(units as i32).to_integer(Rounding::Truncate)
    }

    pub fn to_f64(&self) -> Option<f64> {
        self.to_string().parse().ok()
    }

    pub fn to_u64(&self) -> Option<u64> {
        if self.decimals > 0 {
            return None;
        }
        self.to_integer(Rounding::Truncate).to_u64()
    }

    pub fn gt(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Greater
    }

    pub fn ge(&self, other: &Self) -> bool {
        self.cmp(other) != Ordering::Less
    }

    pub fn lt(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Less
    }

    pub fn le(&self, other: &Self) -> bool {
        self.cmp(other) != Ordering::Greater
    }
}

impl Ord for Precise {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_sign = self.value.sign().cmp(&other.value.sign());
        if by_sign != Ordering::Equal || self.is_zero() {
            return by_sign;
        }
        // Equal leading exponents bound the scale gap by the mantissa length.
        let magnitude = self
            .leading_exponent()
            .cmp(&other.leading_exponent())
            .then_with(|| {
                let gap = (i64::from(self.decimals) - i64::from(other.decimals)).unsigned_abs();
                let factor = pow10(gap as u32);
                let (a, b) = if self.decimals > other.decimals {
                    (self.value.abs(), other.value.abs() * factor)
                } else {
                    (self.value.abs() * factor, other.value.abs())
                };
                a.cmp(&b)
            });
        if self.is_negative() {
            magnitude.reverse()
        } else {
            magnitude
        }
    }
}

impl PartialOrd for Precise {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Precise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.decimals <= 0 {
            write!(f, "{}", self.value)?;
            if !self.is_zero() {
                for _ in 0..self.decimals.unsigned_abs() {
                    f.write_str("0")?;
                }
            }
            return Ok(());
        }

        let decimals = self.decimals as usize;
        let digits = format!("{:0>width$}", self.value.abs(), width = decimals);
        let split = digits.len() - decimals;
        if self.is_negative() {
            f.write_str("-")?;
        }
        if split == 0 {
            f.write_str("0")?;
        }
        write!(f, "{}.{}", &digits[..split], &digits[split..])
    }
}

impl FromStr for Precise {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        Precise::parse(s)
    }
}

impl From<u64> for Precise {
    fn from(value: u64) -> Self {
        Precise::from_integer(value)
    }
}

impl From<BigInt> for Precise {
    fn from(value: BigInt) -> Self {
        Precise::from_integer(value)
    }
}

macro_rules! forward_binop {
    ($trait:ident, $method:ident) => {
        impl $trait<&Precise> for &Precise {
            type Output = Precise;

            fn $method(self, rhs: &Precise) -> Precise {
                Precise::$method(self, rhs)
            }
        }

        impl $trait for Precise {
            type Output = Precise;

            fn $method(self, rhs: Precise) -> Precise {
                Precise::$method(&self, &rhs)
            }
        }
    };
}

forward_binop!(Mul, mul);

impl Neg for Precise {
    type Output = Precise;

    fn neg(self) -> Precise {
        Precise::neg(&self)
    }
}
