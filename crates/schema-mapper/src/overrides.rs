use crate::mapper::TranslatedEvent;
use reverse_core::OverrideMap;
use tracing::trace;

/// Apply user-declared renames to an already mapped event.
///
/// Column overrides are looked up against the table name the event had
/// before any table override, and only take effect when the override was
/// declared for that same table and actually changes the column name.
pub fn apply_overrides(mut event: TranslatedEvent, overrides: Option<&OverrideMap>) -> TranslatedEvent {
    let Some(overrides) = overrides.filter(|o| !o.is_empty()) else {
        return event;
    };

    let original_table = event.source_table.clone();
    let renamed_table = overrides.table_override_or_default(&original_table);
    if renamed_table != original_table {
        trace!("Table override '{original_table}' -> '{renamed_table}'");
        event.source_table = renamed_table.to_string();
    }

    for field in event.field_names() {
        let (table, column) = overrides.column_override_or_default(&original_table, &field);
        if table == original_table && column != field {
            trace!("Column override '{original_table}.{field}' -> '{column}'");
            event.rename_field(&field, column);
        }
    }

    event
}
