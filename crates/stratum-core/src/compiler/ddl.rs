//! DDL statements and their PostgreSQL rendering.

use std::fmt;

use super::sql::{Comma, Ident};
use crate::catalog::OnDelete;
use crate::registry::{ColumnSpec, IndexMethod, SqlType};

/// Named table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    /// Constraint name.
    pub name: String,
    /// Constraint body.
    pub kind: ConstraintKind,
}

/// Kind of a table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// `PRIMARY KEY (cols)`
    PrimaryKey(Vec<String>),
    /// `UNIQUE (cols)`
    Unique(Vec<String>),
    /// `CHECK (expr)`
    Check(String),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CONSTRAINT {} ", Ident(&self.name))?;
        match &self.kind {
            ConstraintKind::PrimaryKey(cols) => {
                write!(f, "PRIMARY KEY ({})", Comma(cols.iter().map(Ident)))
            }
            ConstraintKind::Unique(cols) => write!(f, "UNIQUE ({})", Comma(cols.iter().map(Ident))),
            ConstraintKind::Check(expr) => write!(f, "CHECK ({expr})"),
        }
    }
}

/// Foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    /// Constraint name (`<table>_<column>_fkey`).
    pub name: String,
    /// Owning table.
    pub table: String,
    /// Referencing column.
    pub column: String,
    /// Referenced table.
    pub references_table: String,
    /// Referenced column.
    pub references_column: String,
    /// Referential action.
    pub on_delete: OnDelete,
}

/// Index definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Indexed columns.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    pub unique: bool,
    /// Access method.
    pub method: IndexMethod,
}

/// Read view realizing computed fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewSpec {
    /// View name (`<table>_view`).
    pub name: String,
    /// `SELECT` body.
    pub query: String,
}

/// A single DDL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `CREATE TABLE`
    CreateTable {
        /// Table name.
        table: String,
        /// Columns, in order.
        columns: Vec<ColumnSpec>,
        /// Inline constraints.
        constraints: Vec<Constraint>,
        /// Emit `IF NOT EXISTS`.
        if_not_exists: bool,
    },
    /// `DROP TABLE`
    DropTable {
        /// Table name.
        table: String,
    },
    /// `ALTER TABLE .. ADD COLUMN`
    AddColumn {
        /// Table name.
        table: String,
        /// New column.
        column: ColumnSpec,
    },
    /// `ALTER TABLE .. DROP COLUMN`
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// `ALTER TABLE .. ALTER COLUMN .. TYPE`
    AlterColumnType {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New type.
        sql_type: SqlType,
    },
    /// `ALTER TABLE .. ALTER COLUMN .. SET/DROP NOT NULL`
    AlterColumnNullability {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Whether NULL is allowed afterwards.
        nullable: bool,
    },
    /// `ALTER TABLE .. ALTER COLUMN .. SET/DROP DEFAULT`
    AlterColumnDefault {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New default, `None` to drop it.
        default: Option<String>,
    },
    /// `ALTER TABLE .. ADD CONSTRAINT`
    AddConstraint {
        /// Table name.
        table: String,
        /// Constraint.
        constraint: Constraint,
    },
    /// `ALTER TABLE .. DROP CONSTRAINT`
    DropConstraint {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
    },
    /// Foreign key, wrapped so adding it twice is a no-op.
    AddForeignKey(ForeignKey),
    /// `CREATE INDEX`
    CreateIndex {
        /// Index.
        index: IndexSpec,
        /// Emit `IF NOT EXISTS`.
        if_not_exists: bool,
    },
    /// `DROP INDEX`
    DropIndex {
        /// Index name.
        name: String,
    },
    /// `CREATE OR REPLACE VIEW`
    CreateView(ViewSpec),
    /// `DROP VIEW`
    DropView {
        /// View name.
        name: String,
    },
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateTable {
                table,
                columns,
                constraints,
                if_not_exists,
            } => {
                let exists = if *if_not_exists { " IF NOT EXISTS" } else { "" };
                writeln!(f, "CREATE TABLE{exists} {} (", Ident(table))?;
                let mut s = "";
                for column in columns {
                    write!(f, "{s}  {}", column.definition())?;
                    s = ",\n";
                }
                for constraint in constraints {
                    write!(f, "{s}  {constraint}")?;
                    s = ",\n";
                }
                write!(f, "\n);")
            }
            Statement::DropTable { table } => {
                write!(f, "DROP TABLE IF EXISTS {} CASCADE;", Ident(table))
            }
            Statement::AddColumn { table, column } => write!(
                f,
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};",
                Ident(table),
                column.definition()
            ),
            Statement::DropColumn { table, column } => write!(
                f,
                "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
                Ident(table),
                Ident(column)
            ),
            Statement::AlterColumnType {
                table,
                column,
                sql_type,
            } => write!(
                f,
                "ALTER TABLE {} ALTER COLUMN {} TYPE {sql_type} USING {}::{sql_type};",
                Ident(table),
                Ident(column),
                Ident(column)
            ),
            Statement::AlterColumnNullability {
                table,
                column,
                nullable,
            } => {
                let action = if *nullable { "DROP" } else { "SET" };
                write!(
                    f,
                    "ALTER TABLE {} ALTER COLUMN {} {action} NOT NULL;",
                    Ident(table),
                    Ident(column)
                )
            }
            Statement::AlterColumnDefault {
                table,
                column,
                default,
            } => match default {
                Some(default) => write!(
                    f,
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {default};",
                    Ident(table),
                    Ident(column)
                ),
                None => write!(
                    f,
                    "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;",
                    Ident(table),
                    Ident(column)
                ),
            },
            Statement::AddConstraint { table, constraint } => {
                write!(f, "ALTER TABLE {} ADD {constraint};", Ident(table))
            }
            Statement::DropConstraint { table, name } => write!(
                f,
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                Ident(table),
                Ident(name)
            ),
            Statement::AddForeignKey(fk) => write!(
                f,
                "DO $$ BEGIN\n  ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {};\nEXCEPTION WHEN duplicate_object THEN NULL;\nEND $$;",
                Ident(&fk.table),
                Ident(&fk.name),
                Ident(&fk.column),
                Ident(&fk.references_table),
                Ident(&fk.references_column),
                fk.on_delete.as_sql()
            ),
            Statement::CreateIndex {
                index,
                if_not_exists,
            } => {
                let unique = if index.unique { " UNIQUE" } else { "" };
                let exists = if *if_not_exists { " IF NOT EXISTS" } else { "" };
                let method = match index.method {
                    IndexMethod::Btree => "btree",
                    IndexMethod::Gin => "gin",
                };
                write!(
                    f,
                    "CREATE{unique} INDEX{exists} {} ON {} USING {method} ({});",
                    Ident(&index.name),
                    Ident(&index.table),
                    Comma(index.columns.iter().map(Ident))
                )
            }
            Statement::DropIndex { name } => write!(f, "DROP INDEX IF EXISTS {};", Ident(name)),
            Statement::CreateView(view) => write!(
                f,
                "CREATE OR REPLACE VIEW {} AS\n{};",
                Ident(&view.name),
                view.query
            ),
            Statement::DropView { name } => write!(f, "DROP VIEW IF EXISTS {};", Ident(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_table() {
        let mut id = ColumnSpec::new("id", FieldType::SingleLineText, SqlType::Text);
        id.nullable = false;
        let title = ColumnSpec::new("title", FieldType::SingleLineText, SqlType::Varchar(255));
        let stmt = Statement::CreateTable {
            table: "notes".to_string(),
            columns: vec![id, title],
            constraints: vec![Constraint {
                name: "notes_pkey".to_string(),
                kind: ConstraintKind::PrimaryKey(vec!["id".to_string()]),
            }],
            if_not_exists: true,
        };
        assert_eq!(
            stmt.to_string(),
            "CREATE TABLE IF NOT EXISTS \"notes\" (\n  \"id\" TEXT NOT NULL,\n  \"title\" VARCHAR(255),\n  CONSTRAINT \"notes_pkey\" PRIMARY KEY (\"id\")\n);"
        );
    }

    #[test]
    fn test_create_index_methods() {
        let mut index = IndexSpec {
            name: "idx_events_payload".to_string(),
            table: "events".to_string(),
            columns: vec!["payload".to_string()],
            unique: false,
            method: IndexMethod::Gin,
        };
        let stmt = Statement::CreateIndex {
            index: index.clone(),
            if_not_exists: true,
        };
        assert_eq!(
            stmt.to_string(),
            "CREATE INDEX IF NOT EXISTS \"idx_events_payload\" ON \"events\" USING gin (\"payload\");"
        );

        index.name = "idx_events_kind".to_string();
        index.columns = vec!["kind".to_string()];
        index.method = IndexMethod::Btree;
        let stmt = Statement::CreateIndex {
            index,
            if_not_exists: true,
        };
        assert_eq!(
            stmt.to_string(),
            "CREATE INDEX IF NOT EXISTS \"idx_events_kind\" ON \"events\" USING btree (\"kind\");"
        );
    }

    #[test]
    fn test_foreign_key_is_idempotent() {
        let stmt = Statement::AddForeignKey(ForeignKey {
            name: "employees_department_fkey".to_string(),
            table: "employees".to_string(),
            column: "department".to_string(),
            references_table: "departments".to_string(),
            references_column: "id".to_string(),
            on_delete: OnDelete::SetNull,
        });
        let sql = stmt.to_string();
        assert!(sql.starts_with("DO $$ BEGIN"));
        assert!(sql.contains("REFERENCES \"departments\" (\"id\") ON DELETE SET NULL"));
        assert!(sql.contains("EXCEPTION WHEN duplicate_object THEN NULL"));
    }

    #[test]
    fn test_alter_column() {
        let stmt = Statement::AlterColumnType {
            table: "t".to_string(),
            column: "n".to_string(),
            sql_type: SqlType::Numeric(19, 4),
        };
        assert_eq!(
            stmt.to_string(),
            "ALTER TABLE \"t\" ALTER COLUMN \"n\" TYPE NUMERIC(19,4) USING \"n\"::NUMERIC(19,4);"
        );
    }
}
