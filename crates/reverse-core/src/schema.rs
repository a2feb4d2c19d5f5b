//! Schema catalog mapping migrated tables back onto source tables.
//!
//! The catalog is loaded once per worker and never mutated. Every table has
//! an internal id and two sides: the migrated side (where the change stream
//! comes from) and the source side (where changes are re-applied). Columns
//! are matched across sides by column id, which gives:
//!
//! - renamed columns: same id, different names
//! - dropped columns: source ids with no migrated counterpart
//! - added columns: migrated ids with no source counterpart

use crate::types::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Error type for catalog loading.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read schema catalog: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON schema catalog: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse YAML schema catalog: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Duplicate migrated table name '{0}' in schema catalog")]
    DuplicateTable(String),

    #[error("Primary key column id '{column_id}' of table '{table}' has no column definition")]
    UnknownKeyColumn { table: String, column_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDef {
    /// Column id shared by both sides of a mapping.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            column_type,
        }
    }
}

/// One side (migrated or source) of a table mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSide {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Primary-key column ids, in key order.
    #[serde(default)]
    pub primary_key: Vec<String>,
}

impl TableSide {
    pub fn column_by_id(&self, id: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column_id(&self, id: &str) -> bool {
        self.column_by_id(id).is_some()
    }

    /// Primary-key columns in key order.
    ///
    /// Validated at catalog load, so every id resolves.
    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.primary_key
            .iter()
            .filter_map(move |id| self.column_by_id(id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyntheticKey {
    pub column_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableMapping {
    /// Internal table id.
    pub id: String,
    pub migrated: TableSide,
    pub source: TableSide,
    #[serde(default)]
    pub synthetic_key: Option<SyntheticKey>,
}

impl TableMapping {
    /// Source-side name of a migrated-side column, if the column exists at the source.
    pub fn source_column_name(&self, migrated_column: &str) -> Option<&str> {
        let col = self.migrated.column_by_name(migrated_column)?;
        self.source.column_by_id(&col.id).map(|c| c.name.as_str())
    }

    /// Migrated-side columns that have a different name at the source.
    pub fn column_renames(&self) -> impl Iterator<Item = (&str, &str)> {
        self.migrated.columns.iter().filter_map(move |m| {
            self.source
                .column_by_id(&m.id)
                .filter(|s| s.name != m.name)
                .map(|s| (m.name.as_str(), s.name.as_str()))
        })
    }

    /// Source columns that no longer exist in the migrated schema.
    pub fn dropped_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.source
            .columns
            .iter()
            .filter(move |c| !self.migrated.has_column_id(&c.id))
    }

    /// Migrated columns that were never present at the source.
    pub fn added_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.migrated
            .columns
            .iter()
            .filter(move |c| !self.source.has_column_id(&c.id))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    tables: Vec<TableMapping>,
}

/// Immutable table/column mapping between the migrated and source schemas.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaCatalog {
    tables: Vec<TableMapping>,

    #[serde(skip)]
    by_migrated_name: HashMap<String, usize>,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableMapping>) -> Result<Self, SchemaError> {
        let mut by_migrated_name = HashMap::with_capacity(tables.len());
        for (idx, table) in tables.iter().enumerate() {
            for side in [&table.migrated, &table.source] {
                if let Some(missing) = side.primary_key.iter().find(|id| !side.has_column_id(id)) {
                    return Err(SchemaError::UnknownKeyColumn {
                        table: side.name.clone(),
                        column_id: missing.clone(),
                    });
                }
            }
            if by_migrated_name
                .insert(table.migrated.name.clone(), idx)
                .is_some()
            {
                return Err(SchemaError::DuplicateTable(table.migrated.name.clone()));
            }
        }
        Ok(Self {
            tables,
            by_migrated_name,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::new(file.tables)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaError> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        Self::new(file.tables)
    }

    /// Load a catalog file; `.yaml`/`.yml` are read as YAML, anything else as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Look up a table by its migrated-schema name.
    pub fn table_by_migrated_name(&self, name: &str) -> Option<&TableMapping> {
        self.by_migrated_name
            .get(name)
            .and_then(|&idx| self.tables.get(idx))
    }

    pub fn table_by_id(&self, id: &str) -> Option<&TableMapping> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn tables(&self) -> &[TableMapping] {
        &self.tables
    }
}
