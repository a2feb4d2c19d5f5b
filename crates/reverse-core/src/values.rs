//! Change-stream values decoded against their column type.
//!
//! Change streams encode values in JSON with a few conventions that do not
//! map one-to-one onto JSON types: 64-bit integers and NUMERIC values arrive
//! as strings, BYTES as base64, TIMESTAMP as RFC 3339, and JSON columns as
//! serialized documents. [`TypedValue::decode`] resolves those conventions
//! using the catalog's [`ColumnType`] so that writers receive values they can
//! bind directly.

use crate::error::{ReplicationError, Result};
use crate::types::ColumnType;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact decimal kept in its textual form.
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Decode `value` of column `column` as `column_type`.
    pub fn decode(
        column: &str,
        value: &serde_json::Value,
        column_type: &ColumnType,
    ) -> Result<Self> {
        use serde_json::Value as J;

        if value.is_null() {
            return Ok(Self::Null);
        }

        let mismatch = |reason: &str| {
            ReplicationError::malformed(format!(
                "Column '{column}' expects {column_type}, got {value}: {reason}"
            ))
        };

        match column_type {
            ColumnType::Bool => match value {
                J::Bool(b) => Ok(Self::Bool(*b)),
                J::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Self::Bool(false)),
                    Some(1) => Ok(Self::Bool(true)),
                    _ => Err(mismatch("not a boolean")),
                },
                J::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Self::Bool(true)),
                    "false" | "0" => Ok(Self::Bool(false)),
                    _ => Err(mismatch("not a boolean")),
                },
                _ => Err(mismatch("not a boolean")),
            },

            ColumnType::Int16 | ColumnType::Int32 | ColumnType::Int64 | ColumnType::Year => {
                let i = match value {
                    J::Number(n) => n.as_i64().ok_or_else(|| mismatch("not an integer"))?,
                    J::String(s) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|e| mismatch(&e.to_string()))?,
                    _ => return Err(mismatch("not an integer")),
                };
                let in_range = match column_type {
                    ColumnType::Int16 => i16::try_from(i).is_ok(),
                    ColumnType::Int32 => i32::try_from(i).is_ok(),
                    ColumnType::Year => (1901..=2155).contains(&i) || i == 0,
                    _ => true,
                };
                if !in_range {
                    return Err(mismatch("out of range"));
                }
                Ok(Self::Int(i))
            }

            ColumnType::Float32 | ColumnType::Float64 => match value {
                J::Number(n) => n
                    .as_f64()
                    .map(Self::Float)
                    .ok_or_else(|| mismatch("not a float")),
                J::String(s) => match s.as_str() {
                    "NaN" => Ok(Self::Float(f64::NAN)),
                    "Infinity" => Ok(Self::Float(f64::INFINITY)),
                    "-Infinity" => Ok(Self::Float(f64::NEG_INFINITY)),
                    other => other
                        .trim()
                        .parse::<f64>()
                        .map(Self::Float)
                        .map_err(|e| mismatch(&e.to_string())),
                },
                _ => Err(mismatch("not a float")),
            },

            ColumnType::Decimal { .. } => {
                let text = match value {
                    J::Number(n) => n.to_string(),
                    J::String(s) => s.trim().to_string(),
                    _ => return Err(mismatch("not a decimal")),
                };
                if !is_decimal_literal(&text) {
                    return Err(mismatch("not a decimal literal"));
                }
                Ok(Self::Decimal(text))
            }

            ColumnType::Char { length } | ColumnType::VarChar { length } => {
                let s = scalar_to_string(value).ok_or_else(|| mismatch("not a string"))?;
                if s.chars().count() > usize::from(*length) {
                    return Err(mismatch("exceeds declared length"));
                }
                Ok(Self::String(s))
            }

            ColumnType::Text => scalar_to_string(value)
                .map(Self::String)
                .ok_or_else(|| mismatch("not a string")),

            ColumnType::Uuid => {
                let s = value.as_str().ok_or_else(|| mismatch("not a string"))?;
                uuid::Uuid::parse_str(s).map_err(|e| mismatch(&e.to_string()))?;
                Ok(Self::String(s.to_string()))
            }

            ColumnType::Enum { values } => {
                let s = value.as_str().ok_or_else(|| mismatch("not a string"))?;
                if !values.is_empty() && !values.iter().any(|v| v == s) {
                    return Err(mismatch("not an allowed enum value"));
                }
                Ok(Self::String(s.to_string()))
            }

            ColumnType::Set { values } => {
                let members: Vec<String> = match value {
                    J::String(s) if s.is_empty() => Vec::new(),
                    J::String(s) => s.split(',').map(str::to_string).collect(),
                    J::Array(items) => items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| mismatch("set members must be strings"))
                        })
                        .collect::<Result<_>>()?,
                    _ => return Err(mismatch("not a set")),
                };
                if !values.is_empty() && members.iter().any(|m| !values.contains(m)) {
                    return Err(mismatch("not an allowed set member"));
                }
                Ok(Self::String(members.join(",")))
            }

            ColumnType::Bytes | ColumnType::Blob => {
                let s = value.as_str().ok_or_else(|| mismatch("not base64 text"))?;
                base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .map(Self::Bytes)
                    .map_err(|e| mismatch(&e.to_string()))
            }

            ColumnType::Date => {
                let s = value.as_str().ok_or_else(|| mismatch("not a date string"))?;
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(Self::Date)
                    .map_err(|e| mismatch(&e.to_string()))
            }

            ColumnType::Time => {
                let s = value.as_str().ok_or_else(|| mismatch("not a time string"))?;
                NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                    .map(Self::Time)
                    .map_err(|e| mismatch(&e.to_string()))
            }

            ColumnType::DateTime | ColumnType::Timestamp => {
                let s = value
                    .as_str()
                    .ok_or_else(|| mismatch("not a timestamp string"))?;
                parse_datetime_string(s)
                    .map(Self::DateTime)
                    .ok_or_else(|| mismatch("unrecognised timestamp format"))
            }

            ColumnType::Json => match value {
                J::String(s) => serde_json::from_str(s)
                    .map(Self::Json)
                    .map_err(|e| mismatch(&e.to_string())),
                other => Ok(Self::Json(other.clone())),
            },
        }
    }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_decimal_literal(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    let (mantissa, exponent) = match digits.split_once(['e', 'E']) {
        Some((m, e)) => (m, Some(e)),
        None => (digits, None),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mantissa_ok = !(int_part.is_empty() && frac_part.is_empty())
        && int_part.chars().all(|c| c.is_ascii_digit())
        && frac_part.chars().all(|c| c.is_ascii_digit());
    let exponent_ok = exponent.map_or(true, |e| {
        let e = e.strip_prefix(['-', '+']).unwrap_or(e);
        !e.is_empty() && e.chars().all(|c| c.is_ascii_digit())
    });
    mantissa_ok && exponent_ok
}

/// Parse a datetime string in RFC 3339 or `YYYY-MM-DD HH:MM:SS[.f]` (UTC) form.
fn parse_datetime_string(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    None
}
