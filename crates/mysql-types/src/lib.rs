//! MySQL value conversions for reverse replication.
//!
//! # Structure
//!
//! - `forward`: Convert `TypedValue` → `MySQLValue` (for upserts and deletes)
//! - `timezone`: Parse the source database's fixed timezone offset
//!
//! # Example
//!
//! ```rust,ignore
//! use mysql_types::{coerce_value, parse_timezone_offset};
//! use reverse_core::ColumnType;
//!
//! let offset = parse_timezone_offset("+05:30")?;
//! let value = coerce_value("created_at", &json!("2024-12-01T10:15:30Z"), &ColumnType::DateTime, offset)?;
//! ```

pub mod forward;
pub mod timezone;

pub use forward::{coerce_value, MySQLValue};
pub use timezone::{parse_timezone_offset, TimezoneError};
