//! Exchange-style number formatting.
//!
//! [`decimal_to_precision`] renders a decimal string limited to a number of
//! decimal places, significant digits, or a tick size, the way exchange
//! order quantities and prices must be rendered.

use super::{Precise, Rounding};
use crate::error::{PoolError, Result};

/// How `precision` is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Digits {
    DecimalPlaces,
    SignificantDigits,
    /// `precision` is itself a decimal step, e.g. `"0.00000012"`.
    TickSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    NoPadding,
    PadWithZero,
}

/// Format `text` to `precision`.
///
/// For [`Digits::TickSize`] `precision_text` is a positive decimal step,
/// otherwise an integer. Negative integer precision rounds to the left of
/// the decimal point (`-2` → hundreds).
pub fn decimal_to_precision(
    text: &str,
    precision_text: &str,
    rounding: Rounding,
    digits: Digits,
    padding: Padding,
) -> Result<String> {
    let number = Precise::parse(text)?;

    if digits == Digits::TickSize {
        let tick = Precise::parse(precision_text)?;
        if !tick.is_positive() {
            return Err(PoolError::invalid(format!(
                "tick size must be positive, got {}",
                precision_text
            )));
        }
        let snapped = snap_to_tick(&number, &tick, rounding)?;
        return format_with(
            &snapped,
            tick.decimals(),
            Rounding::Round,
            Digits::DecimalPlaces,
            padding,
        );
    }

    let precision: i32 = precision_text.trim().parse().map_err(|_| {
        PoolError::Parse(format!("precision {:?} is not an integer", precision_text))
    })?;
    format_with(&number, precision, rounding, digits, padding)
}

fn snap_to_tick(number: &Precise, tick: &Precise, rounding: Rounding) -> Result<Precise> {
    let missing = number.abs().rem(tick)?;
    if missing.is_zero() {
        return Ok(number.clone());
    }

    let away = rounding == Rounding::Round && missing.add(&missing)?.ge(tick);
    match (number.is_negative(), away) {
        (false, false) => number.sub(&missing),
        (false, true) => number.sub(&missing)?.add(tick),
        (true, false) => number.add(&missing),
        (true, true) => number.add(&missing)?.sub(tick),
    }
}

fn format_with(
    number: &Precise,
    precision: i32,
    rounding: Rounding,
    digits: Digits,
    padding: Padding,
) -> Result<String> {
    let digits = match digits {
        Digits::SignificantDigits if precision < 0 => Digits::DecimalPlaces,
        other => other,
    };

    if precision < 0 {
        let step = Precise::new(1, precision);
        let result = match rounding {
            Rounding::Round => {
                let scaled = Precise::new(number.value().clone(), number.decimals() - precision);
                scaled.quantize(0, Rounding::Round).mul(&step)
            }
            Rounding::Truncate => {
                let excess = number.abs().rem(&step)?;
                if number.is_negative() {
                    number.add(&excess)?
                } else {
                    number.sub(&excess)?
                }
            }
        };
        return Ok(result.to_string());
    }

    let result = match digits {
        Digits::DecimalPlaces => number.quantize(precision, rounding),
        Digits::SignificantDigits => significant(number, precision, rounding)?,
        Digits::TickSize => {
            return Err(PoolError::invalid("tick size precision must be decimal text"));
        }
    };

    Ok(pad(result.to_string(), precision, digits, padding))
}

fn significant(number: &Precise, precision: i32, rounding: Rounding) -> Result<Precise> {
    if rounding == Rounding::Truncate && precision == 0 {
        return Ok(Precise::zero());
    }

    let scale = precision - number.adjusted_digits() - 1;
    if scale >= 0 {
        return Ok(number.quantize(scale, rounding));
    }

    // Fewer significant digits than integer digits: bracket by magnitude.
    let step = Precise::new(1, scale);
    let magnitude = number.abs();
    let below = Precise::new(magnitude.value().clone(), magnitude.decimals() - scale)
        .quantize(0, Rounding::Truncate)
        .mul(&step);

    let chosen = match rounding {
        Rounding::Truncate => below,
        Rounding::Round => {
            let above = below.add(&step)?;
            if magnitude.sub(&below)?.lt(&above.sub(&magnitude)?) {
                below
            } else {
                above
            }
        }
    };

    Ok(if number.is_negative() {
        chosen.neg()
    } else {
        chosen
    })
}

fn pad(canonical: String, precision: i32, digits: Digits, padding: Padding) -> String {
    if padding == Padding::NoPadding || precision <= 0 {
        return canonical;
    }

    let (sign, body) = match canonical.strip_prefix('-') {
        Some(body) => ("-", body),
        None => ("", canonical.as_str()),
    };
    let precision = precision as usize;

    match digits {
        Digits::DecimalPlaces => {
            let (integer, fraction) = body.split_once('.').unwrap_or((body, ""));
            format!("{sign}{integer}.{fraction:0<precision$}")
        }
        _ if body.contains('.') => {
            let lead = body.bytes().take_while(|b| *b == b'0' || *b == b'.').count();
            let (head, rest) = body.split_at(lead);
            let width = precision + usize::from(rest.contains('.'));
            format!("{sign}{head}{rest:0<width$}")
        }
        _ if precision > body.len() => {
            format!("{sign}{body}.{}", "0".repeat(precision - body.len()))
        }
        _ => canonical.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use Digits::*;
    use Padding::*;
    use Rounding::*;

    #[test_case("12.3456", "2", Round, DecimalPlaces, NoPadding, "12.35")]
    #[test_case("12.3456", "3", Round, DecimalPlaces, NoPadding, "12.346")]
    #[test_case("12.3456", "0", Round, DecimalPlaces, NoPadding, "12")]
    #[test_case("12.3456000", "100", Truncate, DecimalPlaces, NoPadding, "12.3456")]
    #[test_case("12.3456", "3", Truncate, DecimalPlaces, NoPadding, "12.345")]
    #[test_case("12.3456", "0", Truncate, DecimalPlaces, NoPadding, "12")]
    #[test_case("0.0000001", "8", Truncate, DecimalPlaces, NoPadding, "0.0000001")]
    #[test_case("0.000000000", "9", Truncate, DecimalPlaces, PadWithZero, "0.000000000")]
    #[test_case("-0.9", "0", Truncate, DecimalPlaces, NoPadding, "0")]
    #[test_case("-0.0001", "2", Round, DecimalPlaces, NoPadding, "0")]
    #[test_case("9.999", "2", Round, DecimalPlaces, NoPadding, "10")]
    #[test_case("9.999", "2", Round, DecimalPlaces, PadWithZero, "10.00")]
    #[test_case("-99.999", "2", Round, DecimalPlaces, PadWithZero, "-100.00")]
    fn test_decimal_places(
        text: &str,
        precision: &str,
        rounding: Rounding,
        digits: Digits,
        padding: Padding,
        expected: &str,
    ) {
        assert_eq!(
            decimal_to_precision(text, precision, rounding, digits, padding).unwrap(),
            expected
        );
    }

    #[test_case("12.3456", "-1", Truncate, "10")]
    #[test_case("123.456", "-2", Truncate, "100")]
    #[test_case("9.99999", "-1", Truncate, "0")]
    #[test_case("99.9999", "-2", Truncate, "0")]
    #[test_case("9.99999", "-1", Round, "10")]
    #[test_case("99.9999", "-2", Round, "100")]
    #[test_case("123.456", "-1", Round, "120")]
    fn test_negative_precision(text: &str, precision: &str, rounding: Rounding, expected: &str) {
        assert_eq!(
            decimal_to_precision(text, precision, rounding, DecimalPlaces, NoPadding).unwrap(),
            expected
        );
    }

    #[test_case("0.000123456789", "8", Round, NoPadding, "0.00012345679")]
    #[test_case("0.000123456789", "4", Round, NoPadding, "0.0001235")]
    #[test_case("0.000123456789", "1", Round, NoPadding, "0.0001")]
    #[test_case("123.0000987654", "10", Round, NoPadding, "123.0000988")]
    #[test_case("123.0000987654", "8", Round, NoPadding, "123.0001")]
    #[test_case("123.0000987654", "2", Round, NoPadding, "120")]
    #[test_case("123.0000987654", "1", Round, NoPadding, "100")]
    #[test_case("1234", "5", Round, PadWithZero, "1234.0")]
    #[test_case("1234", "2", Round, NoPadding, "1200")]
    #[test_case("1250", "2", Round, NoPadding, "1300")]
    #[test_case("-1250", "2", Round, NoPadding, "-1300")]
    #[test_case("0.00001234", "6", Round, PadWithZero, "0.0000123400")]
    #[test_case("123.0000987654", "10", Truncate, NoPadding, "123.0000987")]
    #[test_case("123.0000987654", "2", Truncate, NoPadding, "120")]
    #[test_case("0.000123456789", "8", Truncate, NoPadding, "0.00012345678")]
    #[test_case("123", "0", Truncate, NoPadding, "0")]
    #[test_case("1234", "-2", Round, NoPadding, "1200")]
    fn test_significant_digits(
        text: &str,
        precision: &str,
        rounding: Rounding,
        padding: Padding,
        expected: &str,
    ) {
        assert_eq!(
            decimal_to_precision(text, precision, rounding, SignificantDigits, padding).unwrap(),
            expected
        );
    }

    #[test_case("0.000123456789", "0.00000012", Round, NoPadding, "0.00012348")]
    #[test_case("-0.000123456789", "0.00000012", Truncate, NoPadding, "-0.00012336")]
    #[test_case("-1650", "1100", Round, NoPadding, "-2200")]
    #[test_case("-165", "110", Round, NoPadding, "-220")]
    #[test_case("-165", "110", Truncate, NoPadding, "-110")]
    #[test_case("0.01", "0.0001", Round, PadWithZero, "0.0100")]
    #[test_case("0.000273398", "1e-7", Round, NoPadding, "0.0002734")]
    #[test_case("44", "4.4", Round, NoPadding, "44")]
    #[test_case("0.0000571495257361", "0.00000001", Truncate, NoPadding, "0.00005714")]
    #[test_case("-1.2", "0.4", Round, NoPadding, "-1.2")]
    fn test_tick_size(
        text: &str,
        tick: &str,
        rounding: Rounding,
        padding: Padding,
        expected: &str,
    ) {
        assert_eq!(
            decimal_to_precision(text, tick, rounding, TickSize, padding).unwrap(),
            expected
        );
    }

    #[test]
    fn test_tick_size_must_be_positive() {
        let result = decimal_to_precision("1.5", "0", Round, TickSize, NoPadding);
        assert!(matches!(result, Err(PoolError::InvalidArgument(_))));

        let result = decimal_to_precision("1.5", "-0.1", Round, TickSize, NoPadding);
        assert!(matches!(result, Err(PoolError::InvalidArgument(_))));
    }

    #[test]
    fn test_bad_precision_text() {
        assert!(decimal_to_precision("1.5", "two", Round, DecimalPlaces, NoPadding).is_err());
        assert!(decimal_to_precision("abc", "2", Round, DecimalPlaces, NoPadding).is_err());
    }
}
