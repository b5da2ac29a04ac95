mod balances;

pub use balances::Balances;

use thiserror::Error;

/// Atomics per whole coin. All balance arithmetic happens on `i64` atomics;
/// floats only appear at the display/input boundary.
pub const SCALE: i64 = 1_000_000;

const FRACTION_DIGITS: u32 = 6;

/// Largest coin amount representable without overflowing an `i64` atomic.
pub const MAX_COINS: f64 = (i64::MAX / SCALE) as f64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount is not a finite number")]
    NotFinite,
    #[error("amount is negative")]
    Negative,
    #[error("amount is too large")]
    Overflow,
    #[error("invalid decimal string: {0}")]
    InvalidDecimal(String),
}

/// Convert a user-facing coin amount into atomics. Rejects non-finite and
/// negative inputs; rounds to the nearest atomic.
pub fn money_to_atomic(value: f64) -> Result<i64, MoneyError> {
    if !value.is_finite() {
        return Err(MoneyError::NotFinite);
    }
    if value < 0.0 {
        return Err(MoneyError::Negative);
    }
    if value > MAX_COINS {
        return Err(MoneyError::Overflow);
    }
    Ok((value * SCALE as f64).round() as i64)
}

/// Convert atomics back to a coin amount for display math only.
pub fn atomic_to_money(value: i64) -> f64 {
    value as f64 / SCALE as f64
}

/// Render atomics as a decimal string with the full six fractional digits,
/// the interchange form used for decimal columns and provider amounts.
pub fn decimal_from_atomic(value: i64) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    let whole = abs / SCALE as u64;
    let frac = abs % SCALE as u64;
    format!("{sign}{whole}.{frac:06}")
}

/// Parse an interchange decimal string into atomics. Accepts up to six
/// fractional digits; anything finer is rejected rather than silently
/// truncated.
pub fn atomic_from_decimal(s: &str) -> Result<i64, MoneyError> {
    let s = s.trim();
    let invalid = || MoneyError::InvalidDecimal(s.to_string());

    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if rest.is_empty() {
        return Err(invalid());
    }

    let (whole_str, frac_str) = match rest.split_once('.') {
        Some((w, f)) => (w, f),
        None => (rest, ""),
    };
    if whole_str.is_empty() && frac_str.is_empty() {
        return Err(invalid());
    }
    if frac_str.len() > FRACTION_DIGITS as usize {
        return Err(invalid());
    }
    if !whole_str.chars().all(|c| c.is_ascii_digit())
        || !frac_str.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: i64 = if whole_str.is_empty() {
        0
    } else {
        whole_str.parse().map_err(|_| invalid())?
    };
    let mut frac: i64 = if frac_str.is_empty() {
        0
    } else {
        frac_str.parse().map_err(|_| invalid())?
    };
    for _ in frac_str.len()..FRACTION_DIGITS as usize {
        frac *= 10;
    }

    let atomic = whole
        .checked_mul(SCALE)
        .and_then(|w| w.checked_add(frac))
        .ok_or(MoneyError::Overflow)?;
    Ok(if negative { -atomic } else { atomic })
}

/// Format atomics for display, rounding half away from zero to `digits`
/// fractional digits (two for balances shown to users).
pub fn format_money(value: i64, digits: u32) -> String {
    let digits = digits.min(FRACTION_DIGITS);
    let divisor = 10i64.pow(FRACTION_DIGITS - digits);
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs() as i128;
    let divisor = divisor as i128;
    let rounded = (abs + divisor / 2) / divisor;
    let unit = 10i128.pow(digits);
    let whole = rounded / unit;
    if digits == 0 {
        return format!("{sign}{whole}");
    }
    let frac = rounded % unit;
    format!("{sign}{whole}.{frac:0width$}", width = digits as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_to_atomic() {
        assert_eq!(money_to_atomic(1.0).unwrap(), 1_000_000);
        assert_eq!(money_to_atomic(0.000001).unwrap(), 1);
        assert_eq!(money_to_atomic(12.34).unwrap(), 12_340_000);
        assert_eq!(money_to_atomic(0.0).unwrap(), 0);
    }

    #[test]
    fn test_money_to_atomic_rejects_bad_input() {
        assert_eq!(money_to_atomic(f64::NAN), Err(MoneyError::NotFinite));
        assert_eq!(money_to_atomic(f64::INFINITY), Err(MoneyError::NotFinite));
        assert_eq!(money_to_atomic(-0.01), Err(MoneyError::Negative));
        assert_eq!(money_to_atomic(1e19), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_atomic_roundtrip_through_money() {
        for v in [0i64, 1, 999_999, 1_000_000, 123_456_789, 5_000_000_000] {
            assert_eq!(money_to_atomic(atomic_to_money(v)).unwrap(), v);
        }
    }

    #[test]
    fn test_decimal_from_atomic() {
        assert_eq!(decimal_from_atomic(0), "0.000000");
        assert_eq!(decimal_from_atomic(1), "0.000001");
        assert_eq!(decimal_from_atomic(1_500_000), "1.500000");
        assert_eq!(decimal_from_atomic(-2_250_000), "-2.250000");
    }

    #[test]
    fn test_atomic_from_decimal() {
        assert_eq!(atomic_from_decimal("1.5").unwrap(), 1_500_000);
        assert_eq!(atomic_from_decimal("0.000001").unwrap(), 1);
        assert_eq!(atomic_from_decimal("100").unwrap(), 100_000_000);
        assert_eq!(atomic_from_decimal("-3.25").unwrap(), -3_250_000);
        assert_eq!(atomic_from_decimal(".5").unwrap(), 500_000);
    }

    #[test]
    fn test_atomic_from_decimal_rejects_bad_input() {
        assert!(atomic_from_decimal("").is_err());
        assert!(atomic_from_decimal("abc").is_err());
        assert!(atomic_from_decimal("1.2.3").is_err());
        assert!(atomic_from_decimal("1.0000001").is_err()); // finer than scale
        assert!(atomic_from_decimal("-").is_err());
        assert!(atomic_from_decimal(".").is_err());
    }

    #[test]
    fn test_decimal_roundtrip() {
        for v in [0i64, 1, -1, 999_999, 1_000_001, -12_345_678, i64::MAX / 2] {
            assert_eq!(atomic_from_decimal(&decimal_from_atomic(v)).unwrap(), v);
        }
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(1_000_000, 2), "1.00");
        assert_eq!(format_money(1_235_000, 2), "1.24"); // rounds half up
        assert_eq!(format_money(1_234_999, 2), "1.23");
        assert_eq!(format_money(-1_500_000, 2), "-1.50");
        assert_eq!(format_money(10_000_000, 0), "10");
        assert_eq!(format_money(123, 6), "0.000123");
    }
}
