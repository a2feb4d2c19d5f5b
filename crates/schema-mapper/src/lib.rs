//! Schema mapping for reverse replication.
//!
//! Change events arrive named after the migrated schema. Before they can be
//! written back to a source database they go through two pure steps:
//!
//! 1. [`map_event`] resolves the table in the [`SchemaCatalog`], renames
//!    columns to their source names, injects synthetic keys and drops
//!    columns the source never had.
//! 2. [`apply_overrides`] layers user-declared table/column renames from an
//!    [`OverrideMap`] on top.
//!
//! Both steps are deterministic so that replaying an event always yields
//! the same statement.
//!
//! [`SchemaCatalog`]: reverse_core::SchemaCatalog
//! [`OverrideMap`]: reverse_core::OverrideMap

mod mapper;
mod overrides;

pub use mapper::{map_event, TranslatedEvent, MAX_RECORD_SEQUENCE};
pub use overrides::apply_overrides;
