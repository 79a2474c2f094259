//! Locale-tolerant monetary parsing and es-ES formatting.
//!
//! Amounts arrive as free text typed at the till ("1.234,56", "10,50 €",
//! " -800,00 ") or as numbers already stored in a record. Parsing is a staged
//! transform: sanitize, normalize the sign, resolve the decimal separator,
//! then read the longest valid decimal prefix. Nothing here returns an error:
//! unreadable input is worth `0`.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A monetary input before normalization.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawAmount {
    Number(f64),
    Text(String),
    #[default]
    Missing,
}

impl RawAmount {
    pub fn value(&self) -> f64 {
        parse_num(self)
    }
}

impl From<f64> for RawAmount {
    fn from(n: f64) -> Self {
        RawAmount::Number(n)
    }
}

impl From<&str> for RawAmount {
    fn from(s: &str) -> Self {
        RawAmount::Text(s.to_string())
    }
}

impl From<String> for RawAmount {
    fn from(s: String) -> Self {
        RawAmount::Text(s)
    }
}

impl<T: Into<RawAmount>> From<Option<T>> for RawAmount {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(RawAmount::Missing)
    }
}

impl From<&Value> for RawAmount {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => RawAmount::Missing,
            Value::Number(n) => n.as_f64().map(RawAmount::Number).unwrap_or_default(),
            Value::String(s) => RawAmount::Text(s.clone()),
            Value::Bool(b) => RawAmount::Text(b.to_string()),
            other => RawAmount::Text(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for RawAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        Ok(RawAmount::from(&v))
    }
}

impl Serialize for RawAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RawAmount::Number(n) => serializer.serialize_f64(*n),
            RawAmount::Text(s) => serializer.serialize_str(s),
            RawAmount::Missing => serializer.serialize_none(),
        }
    }
}

/// Normalize any monetary input to a number.
///
/// Numbers pass through untouched, missing or empty input is `0`.
pub fn parse_num(value: &RawAmount) -> f64 {
    match value {
        RawAmount::Number(n) => *n,
        RawAmount::Missing => 0.0,
        RawAmount::Text(s) => parse_str(s),
    }
}

/// Parse a free-text amount, returning `0` for anything unreadable.
pub fn parse_str(input: &str) -> f64 {
    if input.is_empty() {
        return 0.0;
    }
    let kept = sanitize(input.trim());
    let signed = normalize_sign(&kept);
    if signed.is_empty() {
        return 0.0;
    }
    let decimal = resolve_separators(&signed);
    leading_decimal(&decimal).unwrap_or(0.0)
}

/// Stage 1: keep digits, both separators and sign characters.
fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-' | '+'))
        .collect()
}

/// Stage 2: a leading sign survives, any other `+`/`-` is dropped.
fn normalize_sign(s: &str) -> String {
    let mut chars = s.chars();
    let lead = match chars.clone().next() {
        Some(c @ ('-' | '+')) => {
            chars.next();
            Some(c)
        }
        _ => None,
    };
    let mut out: String = lead.into_iter().collect();
    out.extend(chars.filter(|c| !matches!(c, '-' | '+')));
    out
}

/// Stage 3: with both separators present `.` groups thousands and `,` is the
/// decimal point; a lone `,` is the decimal point; a lone `.` already is.
fn resolve_separators(s: &str) -> String {
    let has_comma = s.contains(',');
    let has_dot = s.contains('.');
    if has_comma && has_dot {
        s.replace('.', "").replacen(',', ".", 1)
    } else if has_comma {
        s.replacen(',', ".", 1)
    } else {
        s.to_string()
    }
}

/// Stage 4: read the longest `[sign] digits [. digits]` prefix. Trailing
/// garbage (a second decimal point, a stray comma) ends the number.
fn leading_decimal(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut pos = 0;
    let negative = match bytes.first() {
        Some(b'-') => {
            pos += 1;
            true
        }
        Some(b'+') => {
            pos += 1;
            false
        }
        _ => false,
    };

    let int_start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    let int_part = &s[int_start..pos];

    let mut frac_part = "";
    if pos < bytes.len() && bytes[pos] == b'.' {
        let frac_start = pos + 1;
        let mut end = frac_start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        frac_part = &s[frac_start..end];
    }

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let literal = format!(
        "{}.{}",
        if int_part.is_empty() { "0" } else { int_part },
        if frac_part.is_empty() { "0" } else { frac_part }
    );
    let magnitude: f64 = literal.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Format an amount the way es-ES renders currency figures: two decimals,
/// `,` as decimal point, `.` grouping once the integer part has five digits.
pub fn format_currency(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let grouped = if int_part.len() >= 5 {
        let mut out = String::with_capacity(int_part.len() + int_part.len() / 3);
        for (i, ch) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                out.push('.');
            }
            out.push(ch);
        }
        out
    } else {
        int_part.to_string()
    };

    let is_zero = int_part.chars().all(|c| c == '0') && frac_part.chars().all(|c| c == '0');
    let sign = if value.is_sign_negative() && !is_zero { "-" } else { "" };
    format!("{sign}{grouped},{frac_part}")
}

/// Format raw input after normalizing it, as the till does on field blur.
pub fn format_raw(value: &RawAmount) -> String {
    format_currency(parse_num(value))
}

/// Render a date, a ledger key (`2025-08-01#2`) or a timestamp as `d/m/yyyy`.
/// Unparseable input is returned as-is.
pub fn format_date(date_or_key: &str) -> String {
    let base = date_or_key
        .split('T')
        .next()
        .unwrap_or_default()
        .split('#')
        .next()
        .unwrap_or_default();
    match NaiveDate::parse_from_str(base, "%Y-%m-%d") {
        Ok(d) => format!("{}/{}/{}", d.day(), d.month(), d.year()),
        Err(_) => date_or_key.to_string(),
    }
}

/// Treat a figure as balanced when it rounds to zero cents.
pub fn is_balanced(diff: f64) -> bool {
    diff.abs() < 0.01
}

/// serde helper: accept numbers, formatted strings or null for an `f64` field.
pub(crate) fn de_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    RawAmount::deserialize(deserializer).map(|raw| parse_num(&raw))
}

/// serde helper: null becomes an empty string.
pub(crate) fn de_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}
