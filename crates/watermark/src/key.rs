//! Shadow-table row identity.

use reverse_core::{ColumnType, ColumnValues, ReplicationError, Result, TableMapping, TypedValue};
use std::fmt;

/// One primary-key column of a shadow-table row.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub value: TypedValue,
}

/// Identifies one watermark row: the shadow table plus the row's key tuple.
///
/// Key columns mirror the migrated data table's primary key, in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowKey {
    shadow_table: String,
    columns: Vec<KeyColumn>,
}

impl ShadowKey {
    pub fn new(shadow_table: impl Into<String>, columns: Vec<KeyColumn>) -> Self {
        Self {
            shadow_table: shadow_table.into(),
            columns,
        }
    }

    /// Name of the shadow table that tracks `table`.
    pub fn shadow_table_name(prefix: &str, table: &str) -> String {
        format!("{prefix}{table}")
    }

    /// Build the key for the row addressed by `keys` (migrated column names).
    pub fn build(prefix: &str, table: &TableMapping, keys: &ColumnValues) -> Result<Self> {
        let migrated = &table.migrated;
        let mut columns = Vec::with_capacity(migrated.primary_key.len());
        for column in migrated.key_columns() {
            let raw = keys.get(&column.name).ok_or_else(|| {
                ReplicationError::malformed(format!(
                    "Key column '{}' of table '{}' is missing from the event",
                    column.name, migrated.name
                ))
            })?;
            let value = TypedValue::decode(&column.name, raw, &column.column_type)?;
            if value.is_null() {
                return Err(ReplicationError::malformed(format!(
                    "Key column '{}' of table '{}' is null",
                    column.name, migrated.name
                )));
            }
            columns.push(KeyColumn {
                name: column.name.clone(),
                column_type: column.column_type.clone(),
                value,
            });
        }
        if columns.is_empty() {
            return Err(ReplicationError::malformed(format!(
                "Table '{}' declares no primary key",
                migrated.name
            )));
        }
        Ok(Self::new(
            Self::shadow_table_name(prefix, &migrated.name),
            columns,
        ))
    }

    pub fn shadow_table(&self) -> &str {
        &self.shadow_table
    }

    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    /// Canonical text form of the key tuple.
    ///
    /// Equal for keys that decode to the same typed values, so `"42"` and
    /// `42` for an INT64 column identify the same row.
    pub fn identity(&self) -> String {
        let parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{}={:?}", c.name, c.value))
            .collect();
        format!("{}[{}]", self.shadow_table, parts.join(","))
    }
}

impl fmt::Display for ShadowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}
