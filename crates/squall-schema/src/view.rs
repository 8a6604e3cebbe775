//! The immutable schema snapshot and its typed helper queries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

use crate::types::TypeTag;

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub type_tag: TypeTag,
    pub nullable: bool,
    pub pk: bool,
    /// Default expression, verbatim, if one was declared.
    pub default: Option<String>,
}

/// A table-level constraint kept for schema-aware rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableConstraint {
    PrimaryKey { columns: Vec<String> },
    Unique { columns: Vec<String> },
    ForeignKey {
        columns: Vec<String>,
        referenced_table: String,
        referenced_columns: Vec<String>,
    },
    Check { expr: String },
}

/// An index on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
}

/// A table of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    /// Column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Immutable snapshot of tables, columns, and types.
///
/// Built once at run start (or rebuilt after a successful DDL), then shared
/// read-only across workers behind an `Arc`. Tables iterate in name order
/// so every RNG-driven pick over the view is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaView {
    tables: BTreeMap<String, TableDef>,
}

impl SchemaView {
    /// A view with no tables.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds or replaces a table.
    pub fn insert_table(&mut self, table: TableDef) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Number of tables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// True if the view holds no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Table by name.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// Tables in lexicographic name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    /// Tables satisfying the predicate, in name order.
    pub fn tables_matching<'a, F>(&'a self, predicate: F) -> Vec<&'a TableDef>
    where
        F: Fn(&TableDef) -> bool + 'a,
    {
        self.tables.values().filter(|t| predicate(t)).collect()
    }

    /// Names of a table's numeric (integer or decimal) columns, sorted.
    #[must_use]
    pub fn numeric_columns(&self, table: &str) -> Vec<String> {
        self.columns_where(table, |c| c.type_tag.is_numeric())
    }

    /// Names of a table's string columns, sorted.
    #[must_use]
    pub fn string_columns(&self, table: &str) -> Vec<String> {
        self.columns_where(table, |c| c.type_tag.is_string())
    }

    /// Names of a table's primary key columns, sorted.
    #[must_use]
    pub fn pk_columns(&self, table: &str) -> Vec<String> {
        self.columns_where(table, |c| c.pk)
    }

    fn columns_where<F>(&self, table: &str, predicate: F) -> Vec<String>
    where
        F: Fn(&ColumnDef) -> bool,
    {
        let Some(table) = self.tables.get(table) else {
            return Vec::new();
        };
        let mut names: Vec<String> = table
            .columns
            .iter()
            .filter(|c| predicate(c))
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// 128-bit fingerprint of the whole view, hex-encoded.
    ///
    /// Stored in checkpoints so a resume against a different schema is
    /// rejected instead of silently producing a different multiset.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut canonical = String::new();
        for table in self.tables.values() {
            canonical.push_str(&table.name);
            canonical.push('(');
            for column in &table.columns {
                canonical.push_str(&format!(
                    "{}:{:?}:{}:{};",
                    column.name, column.type_tag, column.nullable, column.pk
                ));
            }
            canonical.push(')');
            canonical.push('\n');
        }
        format!("{:032x}", xxh3_128(canonical.as_bytes()))
    }
}
