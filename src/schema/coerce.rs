//! Fail-closed coercion of loosely typed JSON values
//!
//! Session payloads come from several recorders and carry numbers as JSON
//! numbers, numeric strings, or garbage. Every helper here returns `None`
//! rather than a wrong value when the input cannot be read.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Read a finite float from a JSON number or numeric string.
pub fn parse_optional_float(raw: &Value) -> Option<f64> {
    let numeric = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };
    numeric.is_finite().then_some(numeric)
}

/// Largest representable distance from the epoch, in milliseconds.
///
/// Matches the ECMAScript time value range (±100,000,000 days), which keeps
/// differences of any two parsed times well inside `i64`.
pub const MAX_TIME_MS: i64 = 8_640_000_000_000_000;

/// Resolve a timestamp to epoch milliseconds.
///
/// Accepts epoch numbers (or numeric strings) as milliseconds, RFC 3339
/// strings, naive ISO-8601 date-times (read as UTC) and bare dates. Times
/// beyond [`MAX_TIME_MS`] either side of the epoch resolve to `None`.
pub fn parse_time_ms(raw: &Value) -> Option<i64> {
    parse_unbounded_time_ms(raw).filter(|ms| ms.abs() <= MAX_TIME_MS)
}

fn parse_unbounded_time_ms(raw: &Value) -> Option<i64> {
    if let Some(numeric) = parse_optional_float(raw) {
        return float_to_ms(numeric);
    }
    let text = raw.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc).timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

fn float_to_ms(value: f64) -> Option<i64> {
    let rounded = value.round();
    if rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64 {
        Some(rounded as i64)
    } else {
        None
    }
}

/// Read a boolean flag from a bool, a yes/no style string, or a number.
pub fn coerce_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// First key in `keys` whose value parses as a float.
pub fn first_float(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find_map(parse_optional_float)
}

/// First key in `keys` holding a non-empty string.
pub fn first_text<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Widen a stored FLOAT column value without picking up binary noise.
///
/// `3.2f32 as f64` is `3.200000047…`; going through the shortest
/// round-trip decimal form yields `3.2`.
pub fn widen_f32(value: f32) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(value as f64)
}
