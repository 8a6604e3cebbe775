//! Building a schema view from a DDL script.
//!
//! Covers the reduced DDL dialect needed for table/column/constraint/index
//! extraction: `CREATE TABLE` (with `PRIMARY KEY`, `UNIQUE`, `NOT NULL`,
//! `DEFAULT`, `REFERENCES`, `CHECK`) and `CREATE INDEX`. Every other
//! statement is tolerated and skipped with a warning, so a full production
//! dump can be pointed at directly.

use sqlparser::ast::{ColumnOption, ObjectName, Statement, TableConstraint as SqlTableConstraint};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::warn;

use crate::error::SchemaError;
use crate::types::TypeTag;
use crate::view::{ColumnDef, IndexDef, SchemaView, TableConstraint, TableDef};

/// Parses a DDL script into a schema view.
pub fn schema_from_ddl(script: &str) -> Result<SchemaView, SchemaError> {
    let dialect = PostgreSqlDialect {};
    let statements =
        Parser::parse_sql(&dialect, script).map_err(|e| SchemaError::DdlParse(e.to_string()))?;

    let mut view = SchemaView::empty();
    for statement in &statements {
        match statement {
            Statement::CreateTable(create_table) => {
                let table = build_table(create_table);
                if view.table(&table.name).is_some() {
                    return Err(SchemaError::DuplicateTable(table.name));
                }
                view.insert_table(table);
            }
            Statement::CreateIndex(create_index) => {
                attach_index(&mut view, create_index);
            }
            other => {
                warn!(statement = %statement_label(other), "skipping unsupported DDL statement");
            }
        }
    }
    Ok(view)
}

fn build_table(create_table: &sqlparser::ast::CreateTable) -> TableDef {
    let table_name = object_name_to_string(&create_table.name);

    let mut columns = Vec::new();
    for col_def in &create_table.columns {
        let mut nullable = true;
        let mut pk = false;
        let mut default = None;
        for option in &col_def.options {
            match &option.option {
                ColumnOption::NotNull => nullable = false,
                ColumnOption::Unique { is_primary, .. } if *is_primary => {
                    pk = true;
                    nullable = false;
                }
                ColumnOption::Default(expr) => default = Some(expr.to_string()),
                _ => {}
            }
        }
        columns.push(ColumnDef {
            name: col_def.name.value.clone(),
            type_tag: TypeTag::from_sql_type(&col_def.data_type.to_string()),
            nullable,
            pk,
            default,
        });
    }

    let mut constraints = Vec::new();
    for constraint in &create_table.constraints {
        match constraint {
            SqlTableConstraint::PrimaryKey {
                columns: pk_cols, ..
            } => {
                let names: Vec<String> = pk_cols.iter().map(|c| c.value.clone()).collect();
                for column in &mut columns {
                    if names.contains(&column.name) {
                        column.pk = true;
                        column.nullable = false;
                    }
                }
                constraints.push(TableConstraint::PrimaryKey { columns: names });
            }
            SqlTableConstraint::Unique {
                columns: uq_cols, ..
            } => {
                constraints.push(TableConstraint::Unique {
                    columns: uq_cols.iter().map(|c| c.value.clone()).collect(),
                });
            }
            SqlTableConstraint::ForeignKey {
                columns: fk_cols,
                foreign_table,
                referred_columns,
                ..
            } => {
                constraints.push(TableConstraint::ForeignKey {
                    columns: fk_cols.iter().map(|c| c.value.clone()).collect(),
                    referenced_table: object_name_to_string(foreign_table),
                    referenced_columns: referred_columns
                        .iter()
                        .map(|c| c.value.clone())
                        .collect(),
                });
            }
            SqlTableConstraint::Check { expr, .. } => {
                constraints.push(TableConstraint::Check {
                    expr: expr.to_string(),
                });
            }
            _ => {}
        }
    }

    // Column-level REFERENCES / CHECK also land in the constraint list.
    for col_def in &create_table.columns {
        for option in &col_def.options {
            match &option.option {
                ColumnOption::ForeignKey {
                    foreign_table,
                    referred_columns,
                    ..
                } => {
                    constraints.push(TableConstraint::ForeignKey {
                        columns: vec![col_def.name.value.clone()],
                        referenced_table: object_name_to_string(foreign_table),
                        referenced_columns: referred_columns
                            .iter()
                            .map(|c| c.value.clone())
                            .collect(),
                    });
                }
                ColumnOption::Check(expr) => {
                    constraints.push(TableConstraint::Check {
                        expr: expr.to_string(),
                    });
                }
                ColumnOption::Unique { is_primary, .. } if !is_primary => {
                    constraints.push(TableConstraint::Unique {
                        columns: vec![col_def.name.value.clone()],
                    });
                }
                _ => {}
            }
        }
    }

    TableDef {
        name: table_name,
        columns,
        constraints,
        indexes: Vec::new(),
    }
}

fn attach_index(view: &mut SchemaView, create_index: &sqlparser::ast::CreateIndex) {
    let table_name = object_name_to_string(&create_index.table_name);
    let index_name = create_index
        .name
        .as_ref()
        .map_or_else(|| format!("{table_name}_idx"), object_name_to_string);
    let columns: Vec<String> = create_index
        .columns
        .iter()
        .map(|c| c.expr.to_string())
        .collect();

    let Some(table) = view.table(&table_name) else {
        warn!(index = %index_name, table = %table_name, "index references unknown table; skipping");
        return;
    };
    let mut table = table.clone();
    table.indexes.push(IndexDef {
        name: index_name,
        columns,
    });
    view.insert_table(table);
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn statement_label(statement: &Statement) -> &'static str {
    match statement {
        Statement::AlterTable { .. } => "ALTER TABLE",
        Statement::Drop { .. } => "DROP",
        Statement::Insert(_) => "INSERT",
        Statement::Query(_) => "SELECT",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DDL: &str = r"
        CREATE TABLE users (
            id bigint PRIMARY KEY,
            email varchar(255) NOT NULL UNIQUE,
            balance numeric(12, 4) DEFAULT 0,
            created_at timestamptz NOT NULL,
            settings jsonb
        );

        CREATE TABLE orders (
            id bigint NOT NULL,
            user_id bigint REFERENCES users (id),
            total numeric NOT NULL CHECK (total >= 0),
            PRIMARY KEY (id)
        );

        CREATE INDEX orders_user_idx ON orders (user_id);
    ";

    #[test]
    fn parses_tables_and_columns() {
        let view = schema_from_ddl(SAMPLE_DDL).expect("parse");
        assert_eq!(view.table_count(), 2);

        let users = view.table("users").expect("users");
        assert_eq!(users.columns.len(), 5);

        let id = users.column("id").expect("id");
        assert!(id.pk);
        assert!(!id.nullable);
        assert_eq!(id.type_tag, TypeTag::Integer);

        let balance = users.column("balance").expect("balance");
        assert_eq!(balance.type_tag, TypeTag::Numeric);
        assert_eq!(balance.default.as_deref(), Some("0"));

        let settings = users.column("settings").expect("settings");
        assert_eq!(settings.type_tag, TypeTag::Json);
        assert!(settings.nullable);
    }

    #[test]
    fn table_level_primary_key_marks_columns() {
        let view = schema_from_ddl(SAMPLE_DDL).expect("parse");
        assert_eq!(view.pk_columns("orders"), vec!["id"]);
        let id = view.table("orders").and_then(|t| t.column("id")).expect("id");
        assert!(id.pk);
    }

    #[test]
    fn foreign_key_and_check_are_recorded() {
        let view = schema_from_ddl(SAMPLE_DDL).expect("parse");
        let orders = view.table("orders").expect("orders");
        assert!(orders.constraints.iter().any(|c| matches!(
            c,
            TableConstraint::ForeignKey { referenced_table, .. } if referenced_table == "users"
        )));
        assert!(orders
            .constraints
            .iter()
            .any(|c| matches!(c, TableConstraint::Check { .. })));
    }

    #[test]
    fn index_attaches_to_table() {
        let view = schema_from_ddl(SAMPLE_DDL).expect("parse");
        let orders = view.table("orders").expect("orders");
        assert_eq!(orders.indexes.len(), 1);
        assert_eq!(orders.indexes[0].name, "orders_user_idx");
        assert_eq!(orders.indexes[0].columns, vec!["user_id"]);
    }

    #[test]
    fn unsupported_statements_are_skipped() {
        let ddl = "CREATE TABLE t (i int); INSERT INTO t VALUES (1); DROP TABLE t;";
        let view = schema_from_ddl(ddl).expect("parse");
        // The INSERT and DROP are skipped, the table survives.
        assert_eq!(view.table_count(), 1);
    }

    #[test]
    fn malformed_ddl_is_fatal() {
        let err = schema_from_ddl("CREATE TABLE (").unwrap_err();
        assert!(matches!(err, SchemaError::DdlParse(_)));
    }

    #[test]
    fn duplicate_table_is_rejected() {
        let err = schema_from_ddl("CREATE TABLE t (i int); CREATE TABLE t (j int);").unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateTable(name) if name == "t"));
    }
}
