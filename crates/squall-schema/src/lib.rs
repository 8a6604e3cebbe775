//! # squall-schema
//!
//! Immutable schema snapshots for schema-aware query generation.
//!
//! A [`SchemaView`] is built once at run start, from a DDL script
//! ([`schema_from_ddl`]) or from `information_schema` rows collected over a
//! live endpoint ([`introspect::assemble`]), then shared read-only across
//! workers. Columns carry a normalized [`TypeTag`] so grammar rules can ask
//! for "a numeric column" without caring about exact SQL types. The view's
//! xxh3-128 [`SchemaView::fingerprint`] ties checkpoints to the schema they
//! were produced against.

mod ddl;
mod error;
pub mod introspect;
mod types;
mod view;

pub use ddl::schema_from_ddl;
pub use error::SchemaError;
pub use types::TypeTag;
pub use view::{ColumnDef, IndexDef, SchemaView, TableConstraint, TableDef};
