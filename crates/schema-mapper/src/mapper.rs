use chrono::{DateTime, Utc};
use reverse_core::{
    ChangeEvent, ColumnType, ColumnValues, ModType, ReplicationError, Result, SchemaCatalog,
    TableMapping,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::trace;

/// A change event expressed in the source schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslatedEvent {
    /// Internal catalog id of the table.
    pub table_id: String,
    /// Source table name (after overrides, once applied).
    pub source_table: String,
    pub mod_type: ModType,
    /// Key columns, named as at the source.
    pub keys: ColumnValues,
    /// Non-key values to write. Empty for deletes.
    pub values: ColumnValues,
    /// Source column type of every field in `keys` and `values`.
    pub column_types: BTreeMap<String, ColumnType>,
    pub commit_timestamp: DateTime<Utc>,
    pub record_sequence: u64,
    pub shard_id: String,
}

impl TranslatedEvent {
    /// Rename a field wherever it appears (keys, values and type map).
    pub fn rename_field(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        self.keys.rename(from, to);
        self.values.rename(from, to);
        if let Some(ty) = self.column_types.remove(from) {
            self.column_types.insert(to.to_string(), ty);
        }
    }

    /// All field names carried by the event, keys first.
    pub fn field_names(&self) -> Vec<String> {
        self.keys
            .columns()
            .chain(self.values.columns().filter(|c| !self.keys.contains(c)))
            .map(str::to_string)
            .collect()
    }
}

/// Largest record sequence a watermark can store (BIGINT).
pub const MAX_RECORD_SEQUENCE: u64 = i64::MAX as u64;

/// Translate a migrated-schema event into the source schema.
///
/// Fails with `UnknownTable` when the catalog does not know the table and
/// with `MissingSyntheticKeyColumn` when a declared synthetic key has no
/// column definition. Both mean the catalog is stale or corrupt, so the
/// failure repeats identically on replay.
pub fn map_event(event: &ChangeEvent, catalog: &SchemaCatalog) -> Result<TranslatedEvent> {
    let table = catalog
        .table_by_migrated_name(&event.table_name)
        .ok_or_else(|| ReplicationError::UnknownTable(event.table_name.clone()))?;
    if event.record_sequence > MAX_RECORD_SEQUENCE {
        return Err(ReplicationError::malformed(format!(
            "Record sequence {} of {} exceeds {MAX_RECORD_SEQUENCE}",
            event.record_sequence, event.table_name
        )));
    }

    let mut column_types = BTreeMap::new();
    let mut keys = rename_to_source(table, &event.keys, &mut column_types)?;

    let values = match event.mod_type {
        ModType::Insert | ModType::Update => {
            let new_values = event.new_values.clone().unwrap_or_default();
            let mut values = rename_to_source(table, &new_values, &mut column_types)?;
            for key in keys.columns() {
                values.remove(key);
            }
            values
        }
        ModType::Delete => ColumnValues::new(),
    };

    inject_synthetic_key(table, event, &mut keys, &mut column_types)?;

    if keys.is_empty() {
        return Err(ReplicationError::malformed(format!(
            "No key column of table '{}' exists at the source",
            table.migrated.name
        )));
    }

    trace!(
        "Mapped {} '{}' -> '{}' with keys {:?}",
        event.mod_type,
        event.table_name,
        table.source.name,
        keys
    );

    Ok(TranslatedEvent {
        table_id: table.id.clone(),
        source_table: table.source.name.clone(),
        mod_type: event.mod_type,
        keys,
        values,
        column_types,
        commit_timestamp: event.commit_timestamp,
        record_sequence: event.record_sequence,
        shard_id: event.shard_id.clone(),
    })
}

/// Rename every field to its source name, dropping columns the source never had.
fn rename_to_source(
    table: &TableMapping,
    payload: &ColumnValues,
    column_types: &mut BTreeMap<String, ColumnType>,
) -> Result<ColumnValues> {
    let mut out = ColumnValues::new();
    for (name, value) in payload.iter() {
        let migrated = table.migrated.column_by_name(name).ok_or_else(|| {
            ReplicationError::malformed(format!(
                "Column '{name}' of table '{}' is not in the schema catalog",
                table.migrated.name
            ))
        })?;
        let Some(source) = table.source.column_by_id(&migrated.id) else {
            trace!("Dropping column '{name}' absent from source table '{}'", table.source.name);
            continue;
        };
        column_types.insert(source.name.clone(), source.column_type.clone());
        out.insert(source.name.clone(), value.clone());
    }
    Ok(out)
}

fn inject_synthetic_key(
    table: &TableMapping,
    event: &ChangeEvent,
    keys: &mut ColumnValues,
    column_types: &mut BTreeMap<String, ColumnType>,
) -> Result<()> {
    let Some(synthetic) = &table.synthetic_key else {
        return Ok(());
    };
    if !table.migrated.has_column_id(&synthetic.column_id) {
        return Err(ReplicationError::MissingSyntheticKeyColumn {
            table_id: table.id.clone(),
            column_id: synthetic.column_id.clone(),
        });
    }
    let Some(source_col) = table.source.column_by_id(&synthetic.column_id) else {
        return Ok(());
    };
    let uuid = event.row_uuid.as_deref().ok_or_else(|| {
        ReplicationError::malformed(format!(
            "Event for table '{}' has a synthetic key but carries no row UUID",
            table.migrated.name
        ))
    })?;
    keys.insert(
        source_col.name.clone(),
        serde_json::Value::String(uuid.to_string()),
    );
    column_types.insert(source_col.name.clone(), source_col.column_type.clone());
    Ok(())
}
