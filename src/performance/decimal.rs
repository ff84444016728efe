//! Fixed-precision decimal handling for score, value and percentage columns.
//!
//! Values arrive as JSON strings or numbers and are checked against the
//! column's `NUMERIC(max_digits, decimal_places)` bounds before they are stored.
//! Out-of-range input is a validation error, never a silent truncation.

use bigdecimal::{BigDecimal, RoundingMode};
use serde_json::Value;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalSpec {
    pub max_digits: i64,
    pub decimal_places: i64,
}

/// `NUMERIC(5, 2)`: review scores, goal progress and percentages.
pub const PERCENT: DecimalSpec = DecimalSpec {
    max_digits: 5,
    decimal_places: 2,
};

/// `NUMERIC(10, 2)`: goal target and current values.
pub const VALUE: DecimalSpec = DecimalSpec {
    max_digits: 10,
    decimal_places: 2,
};

const INVALID: &str = "A valid number is required.";

pub fn parse_decimal(value: &Value, column: DecimalSpec) -> Result<BigDecimal, String> {
    let parsed = match value {
        Value::String(s) => BigDecimal::from_str(s.trim()).map_err(|_| INVALID.to_string())?,
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).map_err(|_| INVALID.to_string())?,
        _ => return Err(INVALID.to_string()),
    };
    check_precision(&parsed, column)?;
    Ok(parsed.with_scale(column.decimal_places))
}

pub fn check_precision(value: &BigDecimal, column: DecimalSpec) -> Result<(), String> {
    let (digits, scale) = value.normalized().as_bigint_and_exponent();
    let digit_count = digits.magnitude().to_string().len() as i64;

    let (total, decimals) = if scale <= 0 {
        (digit_count - scale, 0)
    } else if scale > digit_count {
        (scale, scale)
    } else {
        (digit_count, scale)
    };
    let whole = total - decimals;

    if total > column.max_digits {
        return Err(format!(
            "Ensure that there are no more than {} digits in total.",
            column.max_digits
        ));
    }
    if decimals > column.decimal_places {
        return Err(format!(
            "Ensure that there are no more than {} decimal places.",
            column.decimal_places
        ));
    }
    if whole > column.max_digits - column.decimal_places {
        return Err(format!(
            "Ensure that there are no more than {} digits before the decimal point.",
            column.max_digits - column.decimal_places
        ));
    }
    Ok(())
}

/// Rounds half away from zero, the same quantization PostgreSQL applies to the columns.
pub fn round2(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

/// Always two fractional digits, zero included (`"0.00"`).
pub fn format_decimal(value: &BigDecimal) -> String {
    let cents = (round2(value) * BigDecimal::from(100)).with_scale(0);
    let (digits, _) = cents.as_bigint_and_exponent();
    let digits = digits.to_string();
    let (sign, magnitude) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits.as_str()),
    };
    let padded = format!("{:0>3}", magnitude);
    let (whole, fraction) = padded.split_at(padded.len() - 2);
    format!("{}{}.{}", sign, whole, fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_accepts_strings_and_numbers() {
        assert_eq!(parse_decimal(&json!("75.5"), PERCENT).unwrap(), dec("75.50"));
        assert_eq!(parse_decimal(&json!(150), VALUE).unwrap(), dec("150"));
        assert_eq!(parse_decimal(&json!(" 12.25 "), VALUE).unwrap(), dec("12.25"));
    }

    #[test]
    fn test_parse_rejects_non_numbers() {
        assert_eq!(parse_decimal(&json!("abc"), VALUE), Err(INVALID.to_string()));
        assert_eq!(parse_decimal(&json!(true), VALUE), Err(INVALID.to_string()));
        assert_eq!(parse_decimal(&json!(null), VALUE), Err(INVALID.to_string()));
    }

    #[test]
    fn test_precision_bounds() {
        assert!(check_precision(&dec("999.99"), PERCENT).is_ok());
        assert!(check_precision(&dec("-999.99"), PERCENT).is_ok());
        assert_eq!(
            check_precision(&dec("1000"), PERCENT),
            Err("Ensure that there are no more than 3 digits before the decimal point.".to_string())
        );
        assert_eq!(
            check_precision(&dec("1000.00"), PERCENT),
            Err("Ensure that there are no more than 3 digits before the decimal point.".to_string())
        );
        assert_eq!(
            check_precision(&dec("1.234"), PERCENT),
            Err("Ensure that there are no more than 2 decimal places.".to_string())
        );
        assert_eq!(
            check_precision(&dec("123456.789"), PERCENT),
            Err("Ensure that there are no more than 5 digits in total.".to_string())
        );
        assert!(check_precision(&dec("99999999.99"), VALUE).is_ok());
        assert!(check_precision(&dec("100000000"), VALUE).is_err());
    }

    #[test]
    fn test_trailing_zeros_do_not_count() {
        assert!(check_precision(&dec("12.5000"), PERCENT).is_ok());
        assert!(check_precision(&dec("0"), PERCENT).is_ok());
        assert!(check_precision(&dec("0.01"), PERCENT).is_ok());
    }

    #[test]
    fn test_format_decimal_has_two_places() {
        assert_eq!(format_decimal(&dec("75")), "75.00");
        assert_eq!(format_decimal(&dec("66.666666")), "66.67");
        assert_eq!(format_decimal(&dec("0.125")), "0.13");
        assert_eq!(format_decimal(&dec("0.135")), "0.14");
        assert_eq!(format_decimal(&dec("-1.5")), "-1.50");
    }

    #[test]
    fn test_format_decimal_zero_keeps_places() {
        assert_eq!(format_decimal(&BigDecimal::from(0)), "0.00");
        assert_eq!(format_decimal(&dec("0.001")), "0.00");
        assert_eq!(format_decimal(&dec("0.05")), "0.05");
        assert_eq!(format_decimal(&dec("100")), "100.00");
    }
}
