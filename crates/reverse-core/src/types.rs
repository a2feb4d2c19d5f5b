//! Column type universe for the schema catalog.
//!
//! Both sides of a table mapping describe their columns with `ColumnType`.
//! The migrated side uses it to build typed shadow-table keys; the source
//! side uses it to coerce change-stream values before writing.
//!
//! # Format
//!
//! Simple types are strings:
//! ```yaml
//! type: big_int
//! type: text
//! ```
//!
//! Parameterised types use a map:
//! ```yaml
//! type:
//!   type: var_char
//!   length: 255
//! type:
//!   type: decimal
//!   precision: 10
//!   scale: 2
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal { precision: u8, scale: u8 },
    Char { length: u16 },
    VarChar { length: u16 },
    Text,
    Bytes,
    Blob,
    Date,
    Time,
    /// Timestamp without zone, written in the source's configured offset.
    DateTime,
    /// Timestamp with zone.
    Timestamp,
    Year,
    Json,
    Uuid,
    Enum { values: Vec<String> },
    Set { values: Vec<String> },
}

impl ColumnType {
    /// Name used in the serialized form.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int16 => "small_int",
            Self::Int32 => "int",
            Self::Int64 => "big_int",
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::Decimal { .. } => "decimal",
            Self::Char { .. } => "char",
            Self::VarChar { .. } => "var_char",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Blob => "blob",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "date_time",
            Self::Timestamp => "timestamp",
            Self::Year => "year",
            Self::Json => "json",
            Self::Uuid => "uuid",
            Self::Enum { .. } => "enum",
            Self::Set { .. } => "set",
        }
    }

    fn from_simple_name(name: &str) -> Option<Self> {
        let ty = match name {
            "bool" | "boolean" => Self::Bool,
            "small_int" | "smallint" => Self::Int16,
            "int" | "integer" => Self::Int32,
            "big_int" | "bigint" | "int64" => Self::Int64,
            "float" => Self::Float32,
            "double" | "float64" => Self::Float64,
            "text" | "string" => Self::Text,
            "bytes" | "binary" => Self::Bytes,
            "blob" => Self::Blob,
            "date" => Self::Date,
            "time" => Self::Time,
            "date_time" | "datetime" => Self::DateTime,
            "timestamp" | "timestamp_tz" | "timestamptz" => Self::Timestamp,
            "year" => Self::Year,
            "json" | "jsonb" => Self::Json,
            "uuid" => Self::Uuid,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            Self::Char { length } => write!(f, "char({length})"),
            Self::VarChar { length } => write!(f, "var_char({length})"),
            other => f.write_str(other.name()),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        match self {
            Self::Decimal { precision, scale } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "decimal")?;
                map.serialize_entry("precision", precision)?;
                map.serialize_entry("scale", scale)?;
                map.end()
            }
            Self::Char { length } | Self::VarChar { length } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", self.name())?;
                map.serialize_entry("length", length)?;
                map.end()
            }
            Self::Enum { values } | Self::Set { values } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", self.name())?;
                map.serialize_entry("values", values)?;
                map.end()
            }
            simple => serializer.serialize_str(simple.name()),
        }
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{Error, MapAccess, Visitor};

        struct ColumnTypeVisitor;

        impl<'de> Visitor<'de> for ColumnTypeVisitor {
            type Value = ColumnType;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or map representing a column type")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                ColumnType::from_simple_name(&value.to_ascii_lowercase())
                    .ok_or_else(|| E::custom(format!("unknown simple type: {value}")))
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut type_name: Option<String> = None;
                let mut fields: HashMap<String, serde_json::Value> = HashMap::new();

                while let Some(key) = map.next_key::<String>()? {
                    if key == "type" {
                        type_name = Some(map.next_value()?);
                    } else {
                        fields.insert(key, map.next_value()?);
                    }
                }

                let type_name = type_name.ok_or_else(|| M::Error::missing_field("type"))?;

                let number = |field: &str| -> Result<u64, M::Error> {
                    fields
                        .get(field)
                        .and_then(|v| v.as_u64())
                        .ok_or_else(|| {
                            M::Error::custom(format!(
                                "missing field `{field}` for type `{type_name}`"
                            ))
                        })
                };
                let values = |field: &str| -> Result<Vec<String>, M::Error> {
                    match fields.get(field) {
                        Some(v) => serde_json::from_value(v.clone()).map_err(M::Error::custom),
                        None => Ok(Vec::new()),
                    }
                };

                match type_name.to_ascii_lowercase().as_str() {
                    "decimal" | "numeric" => Ok(ColumnType::Decimal {
                        precision: u8::try_from(number("precision")?).map_err(M::Error::custom)?,
                        scale: u8::try_from(number("scale")?).map_err(M::Error::custom)?,
                    }),
                    "char" => Ok(ColumnType::Char {
                        length: u16::try_from(number("length")?).map_err(M::Error::custom)?,
                    }),
                    "var_char" | "varchar" => Ok(ColumnType::VarChar {
                        length: u16::try_from(number("length")?).map_err(M::Error::custom)?,
                    }),
                    "enum" => Ok(ColumnType::Enum {
                        values: values("values")?,
                    }),
                    "set" => Ok(ColumnType::Set {
                        values: values("values")?,
                    }),
                    simple => ColumnType::from_simple_name(simple)
                        .ok_or_else(|| M::Error::custom(format!("unknown type: {type_name}"))),
                }
            }
        }

        deserializer.deserialize_any(ColumnTypeVisitor)
    }
}
