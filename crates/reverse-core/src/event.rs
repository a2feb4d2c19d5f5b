//! Change events captured from the migrated database's change stream.
//!
//! The change-stream reader delivers records whose key and value payloads
//! are JSON documents encoded as strings. [`ChangeRecord`] mirrors that wire
//! shape; [`ChangeEvent`] is the strongly typed form every engine stage works
//! with.

use crate::error::{ReplicationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of mutation captured by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModType {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ModType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModType::Insert => write!(f, "INSERT"),
            ModType::Update => write!(f, "UPDATE"),
            ModType::Delete => write!(f, "DELETE"),
        }
    }
}

impl std::str::FromStr for ModType {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(ModType::Insert),
            "UPDATE" => Ok(ModType::Update),
            "DELETE" => Ok(ModType::Delete),
            other => Err(ReplicationError::malformed(format!(
                "Unknown mod type: {other}"
            ))),
        }
    }
}

/// Column name → value mapping for one side of a change event.
///
/// Keys are kept sorted so that statement construction and shadow-key
/// construction are deterministic for identical inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnValues(BTreeMap<String, serde_json::Value>);

impl ColumnValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object document (e.g. a `keysJson` payload).
    ///
    /// An empty string is treated as an empty object.
    pub fn from_json_str(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ReplicationError::malformed(format!("Invalid JSON payload: {e}")))?;
        match value {
            serde_json::Value::Object(map) => Ok(Self(map.into_iter().collect())),
            serde_json::Value::Null => Ok(Self::new()),
            other => Err(ReplicationError::malformed(format!(
                "Expected JSON object payload, got: {other}"
            ))),
        }
    }

    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.0.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: serde_json::Value) {
        self.0.insert(column.into(), value);
    }

    pub fn remove(&mut self, column: &str) -> Option<serde_json::Value> {
        self.0.remove(column)
    }

    /// Move the value stored under `from` to `to`.
    ///
    /// Returns `false` when `from` is absent. An existing value under `to`
    /// is replaced.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return self.0.contains_key(from);
        }
        match self.0.remove(from) {
            Some(value) => {
                self.0.insert(to.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, serde_json::Value)> for ColumnValues {
    fn from_iter<I: IntoIterator<Item = (K, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// One captured mutation, expressed in the migrated schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Causal order key assigned by the change stream per transaction.
    pub commit_timestamp: DateTime<Utc>,
    pub server_transaction_id: String,
    /// Tie-break for records of the same transaction.
    #[serde(deserialize_with = "deserialize_record_sequence")]
    pub record_sequence: u64,
    /// Table name in the migrated schema.
    pub table_name: String,
    pub mod_type: ModType,
    pub keys: ColumnValues,
    #[serde(default)]
    pub old_values: Option<ColumnValues>,
    #[serde(default)]
    pub new_values: Option<ColumnValues>,
    /// Logical shard that owns the row on the source side.
    #[serde(default)]
    pub shard_id: String,
    /// Row UUID carried in event metadata, used to populate synthetic keys.
    #[serde(default)]
    pub row_uuid: Option<String>,
    #[serde(default)]
    pub number_of_records_in_transaction: u32,
    #[serde(default)]
    pub transaction_tag: String,
}

impl ChangeEvent {
    /// Parse one change record as delivered by the change-stream reader.
    pub fn from_change_record(json: &str) -> Result<Self> {
        let record: ChangeRecord = serde_json::from_str(json)
            .map_err(|e| ReplicationError::malformed(format!("Invalid change record: {e}")))?;
        Self::try_from(record)
    }

    /// Short identifying description used in logs.
    pub fn describe(&self) -> String {
        format!(
            "{} {} [{}] @ {} seq {} shard '{}'",
            self.mod_type,
            self.table_name,
            self.keys
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", "),
            self.commit_timestamp.to_rfc3339(),
            self.record_sequence,
            self.shard_id
        )
    }
}

/// Key and value payloads of a change record, JSON-encoded as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModPayload {
    pub keys_json: String,
    #[serde(default)]
    pub old_values_json: Option<String>,
    #[serde(default)]
    pub new_values_json: Option<String>,
}

/// Wire shape of a change record produced by the change-stream reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub commit_timestamp: DateTime<Utc>,
    pub server_transaction_id: String,
    #[serde(deserialize_with = "deserialize_record_sequence")]
    pub record_sequence: u64,
    pub table_name: String,
    #[serde(rename = "mod")]
    pub payload: ModPayload,
    pub mod_type: ModType,
    #[serde(default)]
    pub number_of_records_in_transaction: u32,
    #[serde(default)]
    pub transaction_tag: String,
    #[serde(default)]
    pub shard: String,
    #[serde(default)]
    pub row_uuid: Option<String>,
}

impl TryFrom<ChangeRecord> for ChangeEvent {
    type Error = ReplicationError;

    fn try_from(record: ChangeRecord) -> Result<Self> {
        let keys = ColumnValues::from_json_str(&record.payload.keys_json)?;
        if keys.is_empty() {
            return Err(ReplicationError::malformed(format!(
                "Change record for table '{}' carries no key columns",
                record.table_name
            )));
        }
        let old_values = record
            .payload
            .old_values_json
            .as_deref()
            .map(ColumnValues::from_json_str)
            .transpose()?;
        let new_values = record
            .payload
            .new_values_json
            .as_deref()
            .map(ColumnValues::from_json_str)
            .transpose()?;

        Ok(Self {
            commit_timestamp: record.commit_timestamp,
            server_transaction_id: record.server_transaction_id,
            record_sequence: record.record_sequence,
            table_name: record.table_name,
            mod_type: record.mod_type,
            keys,
            old_values,
            new_values,
            shard_id: record.shard,
            row_uuid: record.row_uuid,
            number_of_records_in_transaction: record.number_of_records_in_transaction,
            transaction_tag: record.transaction_tag,
        })
    }
}

/// Accept either a number or a (zero-padded) numeric string.
fn deserialize_record_sequence<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Sequence {
        Number(u64),
        Text(String),
    }

    match Sequence::deserialize(deserializer)? {
        Sequence::Number(n) => Ok(n),
        Sequence::Text(s) => s.trim().parse::<u64>().map_err(|e| {
            serde::de::Error::custom(format!("Invalid record sequence '{s}': {e}"))
        }),
    }
}
