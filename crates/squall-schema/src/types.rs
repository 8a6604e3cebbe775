//! Type-tag normalization.
//!
//! Generated grammars care about type *categories*, not exact SQL types:
//! a rule that builds an arithmetic predicate needs "some numeric column",
//! not "a numeric(12,4)". Every SQL type is normalized into this small
//! enumeration when the view is built.

use serde::{Deserialize, Serialize};

/// Normalized type category of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Integer,
    Numeric,
    Boolean,
    Text,
    Bytes,
    Temporal,
    Json,
    Array,
    Uuid,
    Network,
    Range,
    Other,
}

impl TypeTag {
    /// Maps a SQL type name (as printed by `information_schema` or a DDL
    /// parser) to its category.
    #[must_use]
    pub fn from_sql_type(sql_type: &str) -> Self {
        let t = sql_type.trim().to_ascii_lowercase();

        // Postgres spells array element types with a leading underscore in
        // pg_type, and `ARRAY` in information_schema.
        if t == "array" || t.starts_with('_') || t.ends_with("[]") {
            return Self::Array;
        }
        if t.ends_with("range") {
            return Self::Range;
        }

        match t.split('(').next().unwrap_or("").trim() {
            "smallint" | "int2" | "integer" | "int" | "int4" | "bigint" | "int8" | "serial"
            | "smallserial" | "bigserial" | "tinyint" => Self::Integer,
            "numeric" | "decimal" | "real" | "float4" | "double precision" | "float8" | "float"
            | "money" => Self::Numeric,
            "boolean" | "bool" => Self::Boolean,
            "text" | "varchar" | "character varying" | "character" | "char" | "bpchar" | "name"
            | "citext" | "string" => Self::Text,
            "bytea" | "binary" | "varbinary" | "blob" | "bytes" => Self::Bytes,
            "date" | "time" | "timetz" | "timestamp" | "timestamptz" | "interval"
            | "time with time zone" | "time without time zone"
            | "timestamp with time zone" | "timestamp without time zone" => Self::Temporal,
            "json" | "jsonb" => Self::Json,
            "uuid" => Self::Uuid,
            "inet" | "cidr" | "macaddr" | "macaddr8" => Self::Network,
            _ => Self::Other,
        }
    }

    /// True for `Integer` and `Numeric`.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Numeric)
    }

    /// True for `Text`.
    #[must_use]
    pub fn is_string(self) -> bool {
        matches!(self, Self::Text)
    }
}
