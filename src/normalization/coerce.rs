//! Lossless-or-null conversions for loosely typed provider payloads.
//!
//! Every helper here returns `None` instead of failing: a value that cannot be
//! interpreted becomes a null column, it never aborts a run.
use bigdecimal::BigDecimal;
use serde_json::Value;

/// Integer view of a JSON value. Accepts integers, integral floats and numeric strings.
pub fn safe_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .filter(|f| *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Like [`safe_int`] but for counts: negative values are out of range.
pub fn safe_count(value: &Value) -> Option<i64> {
    non_negative(safe_int(value))
}

pub fn non_negative(value: Option<i64>) -> Option<i64> {
    value.filter(|n| *n >= 0)
}

/// Lower bound of a SteamSpy owners range such as `"10,000,000 .. 20,000,000"`.
pub fn parse_owners(raw: &str) -> Option<i64> {
    let (lower, upper) = raw.split_once("..")?;
    let lower = parse_grouped(lower)?;
    // the upper bound must at least look like a number for the range to be trusted
    parse_grouped(upper)?;
    Some(lower)
}

fn parse_grouped(part: &str) -> Option<i64> {
    let digits: String = part.trim().chars().filter(|c| *c != ',').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok()
}

/// Largest amount a `NUMERIC(10, 2)` price column holds, in cents.
pub const MAX_PRICE_CENTS: i64 = 9_999_999_999;

/// Minor units to an exact two-decimal major-unit amount (1999 -> 19.99).
/// Amounts the price columns cannot hold are null.
pub fn cents_to_usd(cents: Option<i64>) -> Option<BigDecimal> {
    non_negative(cents)
        .filter(|c| *c <= MAX_PRICE_CENTS)
        .map(|c| BigDecimal::new(c.into(), 2))
}

/// Trimmed, non-empty text.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
