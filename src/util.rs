// Utility helpers for number parsing, formatting and basic statistics.
//
// Everything pasted from a spreadsheet arrives as text in whatever locale the
// user's export happened to use. This module turns that text into `f64` and
// back into the pt-BR money/percent strings shown in the reports.
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Coerce free text into a number, defaulting to `0.0` for anything that
/// cannot be read.
///
/// - Drops every character except digits, `.`, `,` and `-` (so `R$`, spaces
///   and `%` disappear).
/// - When both `,` and `.` are present, the one appearing last is the decimal
///   mark and the other is a thousands separator.
/// - A single `,` is always the decimal mark.
/// - A single `.` followed by exactly three digits, with one to three digits
///   before it (`1.234`), is a thousands separator; otherwise it is decimal.
/// - Repeated identical separators (`1.234.567`) are thousands groupings.
///
/// Never panics and never returns NaN or infinity.
pub fn parse_numeric_value(value: &str) -> f64 {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() {
        return 0.0;
    }

    // Only a leading minus carries meaning; stray dashes are noise.
    let negative = cleaned.starts_with('-');
    let unsigned: String = cleaned.chars().filter(|c| *c != '-').collect();
    let normalized = normalize_separators(&unsigned);
    let text = if negative {
        format!("-{}", normalized)
    } else {
        normalized
    };

    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

fn normalize_separators(s: &str) -> String {
    match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                s.replace('.', "").replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        (Some(_), None) => {
            if s.matches(',').count() > 1 {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        }
        (None, Some(_)) => {
            if s.matches('.').count() > 1 || is_thousands_dot(s) {
                s.replace('.', "")
            } else {
                s.to_string()
            }
        }
        (None, None) => s.to_string(),
    }
}

/// `1.234`, `12.345`, `999.000`: one dot, 1..=3 digits before, exactly 3 after.
fn is_thousands_dot(s: &str) -> bool {
    let Some((int_part, frac_part)) = s.split_once('.') else {
        return false;
    };
    (1..=3).contains(&int_part.len())
        && frac_part.len() == 3
        && int_part.chars().all(|c| c.is_ascii_digit())
        && frac_part.chars().all(|c| c.is_ascii_digit())
}

/// Read an amount that may have been stored either as a JSON number or as
/// the raw text the user pasted.
pub fn parse_amount(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        Value::String(s) => parse_numeric_value(s),
        _ => 0.0,
    }
}

/// Serde adapter for amount fields (`#[serde(deserialize_with = "...")]`).
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_amount(&value))
}

/// Like [`deserialize_amount`] but keeps `null` as "not computed".
pub fn deserialize_optional_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        other => Some(parse_amount(&other)),
    })
}

pub fn average(v: &[f64]) -> f64 {
    // Standard arithmetic mean; returns 0 for an empty slice to avoid NaNs.
    if v.is_empty() {
        return 0.0;
    }
    let sum: f64 = v.iter().copied().sum();
    sum / v.len() as f64
}

/// Fixed-decimal rendering with a configurable thousands/decimal pair.
fn format_grouped(n: f64, decimals: usize, thousands: char, decimal: char) -> String {
    let neg = n.is_sign_negative() && n != 0.0;
    let abs_n = n.abs();
    // First, format to a plain fixed-decimal string like `1234567.89`.
    let s = format!("{:.*}", decimals, abs_n);
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    // `num-format` groups the integer portion with `,`; swap in the requested separator.
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res: String = int_val
        .to_formatted_string(&Locale::en)
        .chars()
        .map(|c| if c == ',' { thousands } else { c })
        .collect();
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push(decimal);
            res.push_str(frac);
        }
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

/// `1234567.891` with 2 decimals → `1,234,567.89`.
pub fn format_number(n: f64, decimals: usize) -> String {
    format_grouped(n, decimals, ',', '.')
}

/// Brazilian real: `1234.5` → `R$ 1.234,50`, `-3` → `-R$ 3,00`.
pub fn format_currency(value: f64) -> String {
    let value = if value.is_finite() { value } else { 0.0 };
    let body = format_grouped(value.abs(), 2, '.', ',');
    if value < 0.0 && body != "0,00" {
        format!("-R$ {}", body)
    } else {
        format!("R$ {}", body)
    }
}

/// Percent already scaled to 0..100: `50.0` → `50,00%`.
pub fn format_percentage(value: f64) -> String {
    let value = if value.is_finite() { value } else { 0.0 };
    format!("{}%", format_grouped(value, 2, '.', ','))
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    n.to_formatted_string(&Locale::en)
}
