//! Statement construction for the MySQL source.

use chrono::FixedOffset;
use mysql_types::{coerce_value, MySQLValue};
use reverse_core::{ColumnType, ColumnValues, ModType, ReplicationError, Result, TypedValue};
use schema_mapper::TranslatedEvent;
use std::collections::BTreeMap;

/// A parameterised statement ready to execute against the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStatement {
    pub sql: String,
    pub params: Vec<MySQLValue>,
}

impl SourceStatement {
    /// Build the statement for `event`, shifting timestamps into `offset`.
    pub fn for_event(event: &TranslatedEvent, offset: FixedOffset) -> Result<Self> {
        match event.mod_type {
            ModType::Insert | ModType::Update => Self::upsert(event, offset),
            ModType::Delete => Self::delete(event, offset),
        }
    }

    /// `INSERT .. ON DUPLICATE KEY UPDATE` over keys and values.
    ///
    /// A row that carries only key columns updates the first key to itself,
    /// which turns a duplicate into a no-op.
    pub fn upsert(event: &TranslatedEvent, offset: FixedOffset) -> Result<Self> {
        let mut columns = Vec::with_capacity(event.keys.len() + event.values.len());
        let mut params = Vec::with_capacity(columns.capacity());
        for (name, raw) in event.keys.iter().chain(event.values.iter()) {
            params.push(coerce(event, name, raw, offset)?);
            columns.push(quote_ident(name));
        }
        let Some(first_key) = event.keys.columns().next() else {
            return Err(missing_keys(event));
        };

        let updates: Vec<String> = if event.values.is_empty() {
            let k = quote_ident(first_key);
            vec![format!("{k} = {k}")]
        } else {
            event
                .values
                .columns()
                .map(|c| {
                    let c = quote_ident(c);
                    format!("{c} = VALUES({c})")
                })
                .collect()
        };

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            quote_ident(&event.source_table),
            columns.join(", "),
            vec!["?"; columns.len()].join(", "),
            updates.join(", ")
        );
        Ok(Self { sql, params })
    }

    /// `DELETE .. WHERE` on every key column.
    pub fn delete(event: &TranslatedEvent, offset: FixedOffset) -> Result<Self> {
        if event.keys.is_empty() {
            return Err(missing_keys(event));
        }
        let mut predicates = Vec::with_capacity(event.keys.len());
        let mut params = Vec::with_capacity(event.keys.len());
        for (name, raw) in event.keys.iter() {
            if raw.is_null() {
                return Err(ReplicationError::malformed(format!(
                    "Key column '{name}' of table '{}' is null",
                    event.source_table
                )));
            }
            params.push(coerce(event, name, raw, offset)?);
            predicates.push(format!("{} = ?", quote_ident(name)));
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(&event.source_table),
            predicates.join(" AND ")
        );
        Ok(Self { sql, params })
    }

    pub fn params_into_values(self) -> Vec<mysql_async::Value> {
        self.params.into_iter().map(MySQLValue::into_inner).collect()
    }
}

fn coerce(
    event: &TranslatedEvent,
    name: &str,
    raw: &serde_json::Value,
    offset: FixedOffset,
) -> Result<MySQLValue> {
    let column_type = event.column_types.get(name).ok_or_else(|| {
        ReplicationError::malformed(format!(
            "No source column type for '{name}' of table '{}'",
            event.source_table
        ))
    })?;
    coerce_value(name, raw, column_type, offset)
}

fn missing_keys(event: &TranslatedEvent) -> ReplicationError {
    ReplicationError::malformed(format!(
        "{} on table '{}' carries no key columns",
        event.mod_type, event.source_table
    ))
}

/// Backtick-quote a MySQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Canonical row identity of a key tuple, used by in-memory sinks.
///
/// Values are decoded with their column type where one is known, so `"42"`
/// and `42` for an INT64 key identify the same row.
pub(crate) fn row_identity(keys: &ColumnValues, types: &BTreeMap<String, ColumnType>) -> String {
    let parts: Vec<String> = keys
        .iter()
        .map(|(column, raw)| {
            let typed = types
                .get(column)
                .and_then(|ty| TypedValue::decode(column, raw, ty).ok());
            match typed {
                Some(value) => format!("{column}={value:?}"),
                None => format!("{column}={raw}"),
            }
        })
        .collect();
    parts.join(",")
}
