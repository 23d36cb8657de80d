//! Lenient numeric deserializers for feed payloads.
//!
//! The upstream feed sends some counters and timestamps as JSON strings
//! (`"ltt": "1700000000000"`). These helpers accept either form. An empty
//! string or `null` decodes to `None`, and so does a non-finite value
//! (`"NaN"`, `"inf"`), which never reaches a canonical record.

use serde::Deserialize;
use serde::de::{self, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Float(f64),
    Text(String),
}

/// `Option<f64>` from a number or numeric string. Non-finite values are `None`.
///
/// # Errors
///
/// Fails when a string is present but not numeric.
pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Number>::deserialize(deserializer)? {
        None => Ok(None),
        #[allow(clippy::cast_precision_loss)]
        Some(Number::Int(v)) => Ok(Some(v as f64)),
        Some(Number::Float(v)) => Ok(finite(v)),
        Some(Number::Text(s)) => parse_text(&s),
    }
}

/// `Option<i64>` from a number or numeric string. Fractions are truncated;
/// non-finite values are `None`.
///
/// # Errors
///
/// Fails when a string is present but not numeric.
#[allow(clippy::cast_possible_truncation)]
pub fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Number>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Number::Int(v)) => Ok(Some(v)),
        Some(Number::Float(v)) => Ok(finite(v).map(|v| v as i64)),
        Some(Number::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            match trimmed.parse::<i64>() {
                Ok(v) => Ok(Some(v)),
                Err(_) => Ok(parse_text(trimmed)?.map(|v| v as i64)),
            }
        }
    }
}

/// `Option<u64>` from a number or numeric string. Negative values clamp to zero.
///
/// # Errors
///
/// Fails when a string is present but not numeric.
pub fn opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = opt_i64(deserializer)?;
    Ok(value.map(|v| u64::try_from(v).unwrap_or(0)))
}

fn parse_text<E: de::Error>(s: &str) -> Result<Option<f64>, E> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse::<f64>().map(finite).map_err(E::custom)
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use test_case::test_case;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "super::opt_f64")]
        price: Option<f64>,
        #[serde(default, deserialize_with = "super::opt_i64")]
        ts: Option<i64>,
        #[serde(default, deserialize_with = "super::opt_u64")]
        qty: Option<u64>,
    }

    #[test_case(r#"{"price": 101.5}"#, Some(101.5) ; "float")]
    #[test_case(r#"{"price": 101}"#, Some(101.0) ; "integer")]
    #[test_case(r#"{"price": "101.5"}"#, Some(101.5) ; "numeric string")]
    #[test_case(r#"{"price": ""}"#, None ; "empty string")]
    #[test_case(r#"{"price": null}"#, None ; "null")]
    #[test_case(r"{}", None ; "absent")]
    #[test_case(r#"{"price": "NaN"}"#, None ; "nan string")]
    #[test_case(r#"{"price": "inf"}"#, None ; "inf string")]
    #[test_case(r#"{"price": "-infinity"}"#, None ; "negative infinity string")]
    fn lenient_f64(json: &str, expected: Option<f64>) {
        let sample: Sample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.price, expected);
    }

    #[test]
    fn timestamp_string_parses_as_integer() {
        let sample: Sample = serde_json::from_str(r#"{"ts": "1700000000000"}"#).unwrap();
        assert_eq!(sample.ts, Some(1_700_000_000_000));
    }

    #[test]
    fn negative_quantity_clamps_to_zero() {
        let sample: Sample = serde_json::from_str(r#"{"qty": -3}"#).unwrap();
        assert_eq!(sample.qty, Some(0));
    }

    #[test]
    fn non_finite_integer_strings_are_absent() {
        let sample: Sample = serde_json::from_str(r#"{"ts": "NaN", "qty": "inf"}"#).unwrap();
        assert_eq!(sample.ts, None);
        assert_eq!(sample.qty, None);
    }

    #[test]
    fn non_numeric_string_is_an_error() {
        assert!(serde_json::from_str::<Sample>(r#"{"price": "abc"}"#).is_err());
    }
}
