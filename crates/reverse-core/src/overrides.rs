//! User-declared table and column renames layered on top of the catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parsed schema overrides.
///
/// ```json
/// {
///   "renamedTables": { "Users": "people" },
///   "renamedColumns": { "Users": { "full_name": "display_name" } }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideMap {
    #[serde(default)]
    pub renamed_tables: HashMap<String, String>,
    /// table → (column → overridden column)
    #[serde(default)]
    pub renamed_columns: HashMap<String, HashMap<String, String>>,
}

impl OverrideMap {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_empty(&self) -> bool {
        self.renamed_tables.is_empty() && self.renamed_columns.values().all(HashMap::is_empty)
    }

    /// Overridden table name, or `table` itself when none is declared.
    pub fn table_override_or_default<'a>(&'a self, table: &'a str) -> &'a str {
        self.renamed_tables
            .get(table)
            .map(String::as_str)
            .unwrap_or(table)
    }

    /// Overridden `(table, column)` pair, or the inputs when none is declared.
    ///
    /// The returned table is always the table the override was declared for.
    pub fn column_override_or_default<'a>(
        &'a self,
        table: &'a str,
        column: &'a str,
    ) -> (&'a str, &'a str) {
        let column = self
            .renamed_columns
            .get(table)
            .and_then(|cols| cols.get(column))
            .map(String::as_str)
            .unwrap_or(column);
        (table, column)
    }
}
