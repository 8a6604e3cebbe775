//! Live-endpoint introspection.
//!
//! The SQL that reads `information_schema` lives here; actually running it
//! is the endpoint adapter's job (the adapter feeds the resulting rows back
//! through [`assemble`]). Keeping the SQL and the row assembly together
//! means every introspection path builds the view the same way.

use std::collections::BTreeMap;

use crate::view::{ColumnDef, SchemaView, TableConstraint, TableDef};
use crate::TypeTag;

/// Columns of every base table in the current schema, in declaration order.
pub const COLUMNS_SQL: &str = "\
SELECT c.table_name, c.column_name, c.data_type, c.is_nullable, c.column_default
FROM information_schema.columns c
JOIN information_schema.tables t
  ON t.table_schema = c.table_schema AND t.table_name = c.table_name
WHERE c.table_schema = current_schema() AND t.table_type = 'BASE TABLE'
ORDER BY c.table_name, c.ordinal_position";

/// Primary key membership per table.
pub const PRIMARY_KEYS_SQL: &str = "\
SELECT kcu.table_name, kcu.column_name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_name = tc.constraint_name
 AND kcu.table_schema = tc.table_schema
WHERE tc.table_schema = current_schema() AND tc.constraint_type = 'PRIMARY KEY'
ORDER BY kcu.table_name, kcu.ordinal_position";

/// One row of [`COLUMNS_SQL`].
#[derive(Debug, Clone)]
pub struct IntrospectedColumn {
    pub table: String,
    pub column: String,
    /// `data_type` as printed by `information_schema`.
    pub sql_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

/// Assembles introspection rows into a schema view.
///
/// `primary_keys` holds `(table, column)` pairs from [`PRIMARY_KEYS_SQL`].
/// Rows for unknown tables in `primary_keys` are ignored.
#[must_use]
pub fn assemble(
    columns: Vec<IntrospectedColumn>,
    primary_keys: Vec<(String, String)>,
) -> SchemaView {
    let mut pk_by_table: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (table, column) in primary_keys {
        pk_by_table.entry(table).or_default().push(column);
    }

    let mut tables: BTreeMap<String, TableDef> = BTreeMap::new();
    for row in columns {
        let pk = pk_by_table
            .get(&row.table)
            .is_some_and(|cols| cols.contains(&row.column));
        let table = tables.entry(row.table.clone()).or_insert_with(|| TableDef {
            name: row.table.clone(),
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
        });
        table.columns.push(ColumnDef {
            name: row.column,
            type_tag: TypeTag::from_sql_type(&row.sql_type),
            nullable: row.nullable && !pk,
            pk,
            default: row.default,
        });
    }

    let mut view = SchemaView::empty();
    for (name, mut table) in tables {
        if let Some(pk_cols) = pk_by_table.get(&name) {
            table.constraints.push(TableConstraint::PrimaryKey {
                columns: pk_cols.clone(),
            });
        }
        view.insert_table(table);
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(table: &str, column: &str, sql_type: &str, nullable: bool) -> IntrospectedColumn {
        IntrospectedColumn {
            table: table.into(),
            column: column.into(),
            sql_type: sql_type.into(),
            nullable,
            default: None,
        }
    }

    #[test]
    fn assembles_tables_with_primary_keys() {
        let view = assemble(
            vec![
                row("users", "id", "bigint", false),
                row("users", "email", "character varying", false),
                row("orders", "id", "bigint", false),
                row("orders", "total", "numeric", true),
            ],
            vec![
                ("users".into(), "id".into()),
                ("orders".into(), "id".into()),
            ],
        );

        assert_eq!(view.table_count(), 2);
        assert_eq!(view.pk_columns("users"), vec!["id"]);
        assert_eq!(view.numeric_columns("orders"), vec!["id", "total"]);
        let users = view.table("users").expect("users");
        assert!(users
            .constraints
            .iter()
            .any(|c| matches!(c, TableConstraint::PrimaryKey { .. })));
    }

    #[test]
    fn pk_columns_are_forced_non_nullable() {
        // information_schema reports is_nullable independently of key
        // membership; the view reconciles them.
        let view = assemble(
            vec![row("t", "id", "integer", true)],
            vec![("t".into(), "id".into())],
        );
        let id = view.table("t").and_then(|t| t.column("id")).expect("id");
        assert!(id.pk);
        assert!(!id.nullable);
    }

    #[test]
    fn stray_pk_rows_are_ignored() {
        let view = assemble(
            vec![row("t", "id", "integer", false)],
            vec![("ghost".into(), "id".into())],
        );
        assert_eq!(view.table_count(), 1);
        assert!(view.pk_columns("t").is_empty());
    }
}
