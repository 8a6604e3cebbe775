//! Schema error types.

use thiserror::Error;

/// Failures while building a schema view.
///
/// Fatal before a run starts; a failure to rebuild after a mid-run DDL
/// degrades to an empty view instead (the caller logs the warning).
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse DDL: {0}")]
    DdlParse(String),

    #[error("table `{0}` defined twice")]
    DuplicateTable(String),

    #[error("introspection returned no usable rows")]
    EmptyIntrospection,
}
