use bigdecimal::{BigDecimal, Zero};
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

// Amounts routinely exceed 28 significant digits, so never go through f64 here.
pub fn parse_decimal(value: &str) -> Result<BigDecimal, ConversionError> {
    BigDecimal::from_str(value.trim()).map_err(|e| ConversionError::InvalidDecimal(e.to_string()))
}

/// Decimal view of a JSON scalar; strings, numbers and booleans are accepted.
pub fn value_to_decimal(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::String(s) => parse_decimal(s).ok(),
        Value::Number(n) => parse_decimal(&n.to_string()).ok(),
        Value::Bool(b) => Some(if *b { BigDecimal::from(1) } else { BigDecimal::zero() }),
        _ => None,
    }
}

/// Orders two optional amounts, missing values sorting as zero.
pub fn compare_amounts(a: Option<&BigDecimal>, b: Option<&BigDecimal>) -> Ordering {
    let zero = BigDecimal::zero();
    a.unwrap_or(&zero).cmp(b.unwrap_or(&zero))
}

/// `true` when `value` parses and is at least `minimum`.
pub fn at_least(value: Option<&str>, minimum: &BigDecimal) -> bool {
    value
        .and_then(|v| parse_decimal(v).ok())
        .map(|v| &v >= minimum)
        .unwrap_or(false)
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),
}
