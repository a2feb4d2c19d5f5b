//! Forward conversion: TypedValue → MySQLValue
//!
//! Converts decoded change-stream values into values bound as statement
//! parameters on the source. Timestamps are shifted into the source
//! database's configured offset; MySQL DATETIME carries no zone.

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use mysql_async::Value;
use reverse_core::{ColumnType, ReplicationError, Result, TypedValue};

/// MySQL value wrapper for type-safe conversions.
#[derive(Debug, Clone, PartialEq)]
pub struct MySQLValue(pub Value);

impl MySQLValue {
    /// Get the inner mysql_async::Value.
    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Get a reference to the inner value.
    pub fn as_inner(&self) -> &Value {
        &self.0
    }

    /// Convert a decoded value for a column of `column_type`.
    ///
    /// Dates whose year does not fit MySQL's date representation are
    /// `MalformedData`.
    pub fn from_typed(
        value: TypedValue,
        column_type: &ColumnType,
        offset: FixedOffset,
    ) -> Result<Self> {
        let value = match value {
            TypedValue::Null => MySQLValue(Value::NULL),

            // Boolean - MySQL uses TINYINT(1)
            TypedValue::Bool(b) => MySQLValue(Value::Int(i64::from(b))),

            TypedValue::Int(i) => MySQLValue(Value::Int(i)),

            TypedValue::Float(f) => match column_type {
                ColumnType::Float32 => MySQLValue(Value::Float(f as f32)),
                _ => MySQLValue(Value::Double(f)),
            },

            // Decimal - sent as text to keep precision
            TypedValue::Decimal(s) | TypedValue::String(s) => {
                MySQLValue(Value::Bytes(s.into_bytes()))
            }

            TypedValue::Bytes(b) => MySQLValue(Value::Bytes(b)),

            TypedValue::Date(d) => MySQLValue(Value::Date(
                mysql_year(d.year())?,
                d.month() as u8,
                d.day() as u8,
                0,
                0,
                0,
                0,
            )),

            TypedValue::Time(t) => MySQLValue(Value::Time(
                false, // not negative
                0,     // days
                t.hour() as u8,
                t.minute() as u8,
                t.second() as u8,
                t.nanosecond() / 1000, // MySQL uses microseconds
            )),

            TypedValue::DateTime(dt) => datetime_value(dt, column_type, offset)?,

            // JSON - MySQL JSON type takes text
            TypedValue::Json(j) => MySQLValue(Value::Bytes(j.to_string().into_bytes())),
        };
        Ok(value)
    }
}

impl TryFrom<TypedValue> for MySQLValue {
    type Error = ReplicationError;

    /// Convert with UTC as the source offset.
    fn try_from(value: TypedValue) -> Result<Self> {
        let column_type = match &value {
            TypedValue::Float(_) => ColumnType::Float64,
            TypedValue::Date(_) => ColumnType::Date,
            TypedValue::DateTime(_) => ColumnType::DateTime,
            _ => ColumnType::Text,
        };
        Self::from_typed(value, &column_type, Utc.fix())
    }
}

fn mysql_year(year: i32) -> Result<u16> {
    u16::try_from(year).map_err(|_| {
        ReplicationError::malformed(format!("Year {year} cannot be stored in a MySQL date"))
    })
}

fn datetime_value(
    dt: DateTime<Utc>,
    column_type: &ColumnType,
    offset: FixedOffset,
) -> Result<MySQLValue> {
    let local = dt.with_timezone(&offset);
    let year = mysql_year(local.year())?;
    let value = match column_type {
        ColumnType::Date => MySQLValue(Value::Date(
            year,
            local.month() as u8,
            local.day() as u8,
            0,
            0,
            0,
            0,
        )),
        // MySQL DATETIME(6) / TIMESTAMP(6)
        _ => MySQLValue(Value::Date(
            year,
            local.month() as u8,
            local.day() as u8,
            local.hour() as u8,
            local.minute() as u8,
            local.second() as u8,
            local.nanosecond() / 1000,
        )),
    };
    Ok(value)
}

/// Decode a change-stream value against `column_type` and convert it for MySQL.
///
/// Decoding failures are `MalformedData`.
pub fn coerce_value(
    column: &str,
    raw: &serde_json::Value,
    column_type: &ColumnType,
    offset: FixedOffset,
) -> Result<MySQLValue> {
    let typed = TypedValue::decode(column, raw, column_type)?;
    MySQLValue::from_typed(typed, column_type, offset)
}
