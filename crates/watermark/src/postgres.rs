//! Shadow-table watermark storage over the PostgreSQL protocol.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reverse_core::{ColumnType, ReplicationError, Result, TableMapping, TypedValue};
use std::str::FromStr;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::key::{KeyColumn, ShadowKey};
use crate::store::{AdvanceOutcome, WatermarkPosition, WatermarkStore};

const COMMIT_TS_COLUMN: &str = "processed_commit_ts";
const RECORD_SEQ_COLUMN: &str = "record_seq";

/// PostgreSQL implementation of WatermarkStore trait.
pub struct PostgresWatermarkStore {
    client: Client,
}

impl PostgresWatermarkStore {
    /// Connect and spawn the connection driver.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(classify_pg_error)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Watermark store connection error: {e}");
            }
        });

        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Create the shadow table of every catalog table that does not have one yet.
    pub async fn ensure_shadow_tables<'a>(
        &self,
        prefix: &str,
        tables: impl IntoIterator<Item = &'a TableMapping>,
    ) -> Result<()> {
        for table in tables {
            let ddl = shadow_table_ddl(prefix, table);
            debug!("Ensuring shadow table: {ddl}");
            self.client
                .batch_execute(&ddl)
                .await
                .map_err(classify_pg_error)?;
        }
        info!("Shadow tables ready (prefix '{prefix}')");
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for PostgresWatermarkStore {
    async fn get_watermark(&self, key: &ShadowKey) -> Result<Option<WatermarkPosition>> {
        let sql = select_sql(key);
        let params = key_params(key.columns())?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let row = self
            .client
            .query_opt(&sql, &refs)
            .await
            .map_err(classify_pg_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let commit_timestamp: DateTime<Utc> = row.try_get(0).map_err(classify_pg_error)?;
        let record_seq: i64 = row.try_get(1).map_err(classify_pg_error)?;
        let record_sequence = u64::try_from(record_seq).map_err(|_| {
            ReplicationError::WatermarkStore {
                message: format!("Negative record sequence {record_seq} stored for {key}"),
                retryable: false,
            }
        })?;
        Ok(Some(WatermarkPosition::new(commit_timestamp, record_sequence)))
    }

    async fn advance_watermark(
        &self,
        key: &ShadowKey,
        position: WatermarkPosition,
    ) -> Result<AdvanceOutcome> {
        let sql = advance_sql(key);
        let mut params = key_params(key.columns())?;
        let record_seq = i64::try_from(position.record_sequence).map_err(|_| {
            ReplicationError::malformed(format!(
                "Record sequence {} does not fit a BIGINT",
                position.record_sequence
            ))
        })?;
        params.push(Box::new(position.commit_timestamp));
        params.push(Box::new(record_seq));
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let affected = self
            .client
            .execute(&sql, &refs)
            .await
            .map_err(classify_pg_error)?;

        if affected == 0 {
            Ok(AdvanceOutcome::RaceLost)
        } else {
            Ok(AdvanceOutcome::Advanced)
        }
    }
}

/// `CREATE TABLE IF NOT EXISTS` statement for the shadow table of `table`.
pub fn shadow_table_ddl(prefix: &str, table: &TableMapping) -> String {
    let shadow = ShadowKey::shadow_table_name(prefix, &table.migrated.name);
    let key_columns: Vec<_> = table.migrated.key_columns().collect();

    let mut defs: Vec<String> = key_columns
        .iter()
        .map(|c| format!("{} {} NOT NULL", quote_ident(&c.name), pg_type(&c.column_type)))
        .collect();
    defs.push(format!("{} TIMESTAMPTZ NOT NULL", quote_ident(COMMIT_TS_COLUMN)));
    defs.push(format!(
        "{} BIGINT NOT NULL DEFAULT 0",
        quote_ident(RECORD_SEQ_COLUMN)
    ));
    let pk: Vec<String> = key_columns.iter().map(|c| quote_ident(&c.name)).collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
        quote_ident(&shadow),
        defs.join(", "),
        pk.join(", ")
    )
}

fn select_sql(key: &ShadowKey) -> String {
    format!(
        "SELECT {}, {} FROM {} WHERE {}",
        quote_ident(COMMIT_TS_COLUMN),
        quote_ident(RECORD_SEQ_COLUMN),
        quote_ident(key.shadow_table()),
        key_predicate(key.columns())
    )
}

/// Single guarded upsert; zero affected rows means the stored position won.
fn advance_sql(key: &ShadowKey) -> String {
    let names: Vec<String> = key.columns().iter().map(|c| quote_ident(&c.name)).collect();
    let n = names.len();
    let ts = quote_ident(COMMIT_TS_COLUMN);
    let seq = quote_ident(RECORD_SEQ_COLUMN);
    let placeholders: Vec<String> = (1..=n + 2).map(|i| format!("${i}")).collect();

    format!(
        "INSERT INTO {table} AS t ({cols}, {ts}, {seq}) VALUES ({vals}) \
         ON CONFLICT ({cols}) DO UPDATE SET {ts} = EXCLUDED.{ts}, {seq} = EXCLUDED.{seq} \
         WHERE (t.{ts}, t.{seq}) < (EXCLUDED.{ts}, EXCLUDED.{seq})",
        table = quote_ident(key.shadow_table()),
        cols = names.join(", "),
        vals = placeholders.join(", "),
    )
}

fn key_predicate(columns: &[KeyColumn]) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(&c.name), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn pg_type(column_type: &ColumnType) -> String {
    match column_type {
        ColumnType::Bool => "BOOLEAN".into(),
        ColumnType::Int16 => "SMALLINT".into(),
        ColumnType::Int32 | ColumnType::Year => "INTEGER".into(),
        ColumnType::Int64 => "BIGINT".into(),
        ColumnType::Float32 => "REAL".into(),
        ColumnType::Float64 => "DOUBLE PRECISION".into(),
        ColumnType::Decimal { precision, scale } => format!("NUMERIC({precision},{scale})"),
        ColumnType::Char { length } | ColumnType::VarChar { length } => {
            format!("VARCHAR({length})")
        }
        ColumnType::Text | ColumnType::Enum { .. } | ColumnType::Set { .. } => "TEXT".into(),
        ColumnType::Bytes | ColumnType::Blob => "BYTEA".into(),
        ColumnType::Date => "DATE".into(),
        ColumnType::Time => "TIME".into(),
        ColumnType::DateTime | ColumnType::Timestamp => "TIMESTAMPTZ".into(),
        ColumnType::Json => "JSONB".into(),
        ColumnType::Uuid => "UUID".into(),
    }
}

fn key_params(columns: &[KeyColumn]) -> Result<Vec<Box<dyn ToSql + Sync + Send>>> {
    columns.iter().map(key_param).collect()
}

/// Convert a key value to a boxed ToSql trait object matching its column type.
fn key_param(column: &KeyColumn) -> Result<Box<dyn ToSql + Sync + Send>> {
    let out_of_range = || {
        ReplicationError::malformed(format!(
            "Key column '{}' value {:?} does not fit {}",
            column.name, column.value, column.column_type
        ))
    };
    let param: Box<dyn ToSql + Sync + Send> = match (&column.column_type, &column.value) {
        (_, TypedValue::Null) => Box::new(None::<String>),
        (ColumnType::Int16, TypedValue::Int(i)) => {
            Box::new(i16::try_from(*i).map_err(|_| out_of_range())?)
        }
        (ColumnType::Int32 | ColumnType::Year, TypedValue::Int(i)) => {
            Box::new(i32::try_from(*i).map_err(|_| out_of_range())?)
        }
        (_, TypedValue::Int(i)) => Box::new(*i),
        (ColumnType::Float32, TypedValue::Float(f)) => Box::new(*f as f32),
        (_, TypedValue::Float(f)) => Box::new(*f),
        (_, TypedValue::Bool(b)) => Box::new(*b),
        (_, TypedValue::Decimal(d)) => Box::new(
            rust_decimal::Decimal::from_str(d)
                .or_else(|_| rust_decimal::Decimal::from_scientific(d))
                .map_err(|_| out_of_range())?,
        ),
        (ColumnType::Uuid, TypedValue::String(s)) => Box::new(
            uuid::Uuid::parse_str(s)
                .map_err(|e| ReplicationError::malformed(format!("Invalid UUID '{s}': {e}")))?,
        ),
        (_, TypedValue::String(s)) => Box::new(s.clone()),
        (_, TypedValue::Bytes(b)) => Box::new(b.clone()),
        (_, TypedValue::Date(d)) => Box::new(*d),
        (_, TypedValue::Time(t)) => Box::new(*t),
        (_, TypedValue::DateTime(ts)) => Box::new(*ts),
        (_, TypedValue::Json(j)) => Box::new(j.clone()),
    };
    Ok(param)
}

/// Map a driver error onto the replication taxonomy.
fn classify_pg_error(e: tokio_postgres::Error) -> ReplicationError {
    let retryable = match e.code() {
        None => true,
        Some(code) => is_retriable_sqlstate(code),
    } || e.is_closed();
    ReplicationError::WatermarkStore {
        message: e.to_string(),
        retryable,
    }
}

fn is_retriable_sqlstate(code: &SqlState) -> bool {
    // Class 08: connection exceptions.
    code.code().starts_with("08")
        || *code == SqlState::T_R_SERIALIZATION_FAILURE
        || *code == SqlState::T_R_DEADLOCK_DETECTED
        || *code == SqlState::ADMIN_SHUTDOWN
        || *code == SqlState::CANNOT_CONNECT_NOW
        || *code == SqlState::TOO_MANY_CONNECTIONS
        || *code == SqlState::QUERY_CANCELED
}
