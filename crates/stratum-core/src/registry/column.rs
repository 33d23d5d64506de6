//! Physical column specifications.

use std::fmt;

use crate::catalog::{
    Aggregation, Condition, FieldType, FormulaResultType, OnDelete, RelationType,
};
use crate::compiler::sql::Ident;

/// SQL column types emitted by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// `VARCHAR(n)`
    Varchar(u32),
    /// `TEXT`
    Text,
    /// `INTEGER`
    Integer,
    /// `NUMERIC(precision, scale)`
    Numeric(u8, u8),
    /// `SERIAL`
    Serial,
    /// `BOOLEAN`
    Boolean,
    /// `DATE`
    Date,
    /// `TIMESTAMPTZ`
    Timestamptz,
    /// `TIME`
    Time,
    /// `INTERVAL`
    Interval,
    /// `TEXT[]`
    TextArray,
    /// `JSONB`
    Jsonb,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Varchar(n) => write!(f, "VARCHAR({n})"),
            SqlType::Text => f.write_str("TEXT"),
            SqlType::Integer => f.write_str("INTEGER"),
            SqlType::Numeric(p, s) => write!(f, "NUMERIC({p},{s})"),
            SqlType::Serial => f.write_str("SERIAL"),
            SqlType::Boolean => f.write_str("BOOLEAN"),
            SqlType::Date => f.write_str("DATE"),
            SqlType::Timestamptz => f.write_str("TIMESTAMPTZ"),
            SqlType::Time => f.write_str("TIME"),
            SqlType::Interval => f.write_str("INTERVAL"),
            SqlType::TextArray => f.write_str("TEXT[]"),
            SqlType::Jsonb => f.write_str("JSONB"),
        }
    }
}

/// Index access method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexMethod {
    /// B-tree index for scalar columns.
    Btree,
    /// GIN index for `JSONB` and array columns.
    Gin,
}

/// Foreign key from a column to another table's `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKeySpec {
    /// Referenced table.
    pub references_table: String,
    /// Referenced column.
    pub references_column: String,
    /// Referential action.
    pub on_delete: OnDelete,
    /// Whether the referenced table belongs to the auth subsystem.
    pub auth_table: bool,
}

/// Specification of a stored column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Abstract field type the column realizes.
    pub field_type: FieldType,
    /// SQL type.
    pub sql_type: SqlType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default expression, already rendered as SQL.
    pub default: Option<String>,
    /// Check expression; the constraint is named `<table>_<column>_check`.
    pub check: Option<String>,
    /// Unique constraint `<table>_<column>_key`.
    pub unique: bool,
    /// Foreign key `<table>_<column>_fkey`.
    pub foreign_key: Option<ForeignKeySpec>,
    /// Index `idx_<table>_<column>`.
    pub index: Option<IndexMethod>,
    /// Whether clients may never write the column.
    pub read_only: bool,
}

impl ColumnSpec {
    /// Create a nullable column with no constraints.
    pub fn new(name: impl Into<String>, field_type: FieldType, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            field_type,
            sql_type,
            nullable: true,
            default: None,
            check: None,
            unique: false,
            foreign_key: None,
            index: None,
            read_only: field_type.is_read_only(),
        }
    }

    /// Column definition as it appears inside `CREATE TABLE`, without
    /// named constraints.
    pub fn definition(&self) -> String {
        let mut sql = format!("{} {}", Ident(&self.name), self.sql_type);
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// A virtual one-to-many relationship (no column on this table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipSpec {
    /// Field name.
    pub name: String,
    /// Related table.
    pub related_table: String,
    /// Column on the related table pointing back at this table.
    pub foreign_key: String,
    /// Cardinality.
    pub relation_type: RelationType,
}

/// A computed field, realized in the table's read view.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputedSpec {
    /// Expression over the same row.
    Formula {
        /// Field name.
        name: String,
        /// Expression source.
        expression: String,
        /// Declared result type.
        result_type: FormulaResultType,
    },
    /// Aggregation over related rows.
    Rollup {
        /// Field name.
        name: String,
        /// Relationship field on the owning table.
        relationship_field: String,
        /// Aggregated field on the related table.
        related_field: String,
        /// Aggregation function.
        aggregation: Aggregation,
        /// Filters on related rows.
        filters: Vec<Condition>,
    },
}

impl ComputedSpec {
    /// Field name.
    pub fn name(&self) -> &str {
        match self {
            ComputedSpec::Formula { name, .. } | ComputedSpec::Rollup { name, .. } => name,
        }
    }
}

/// Physical realization of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedField {
    /// Stored column.
    Column(ColumnSpec),
    /// Virtual relationship.
    Relationship(RelationshipSpec),
    /// Computed value.
    Computed(ComputedSpec),
}

impl ResolvedField {
    /// The column spec, if the field is stored.
    pub fn as_column(&self) -> Option<&ColumnSpec> {
        match self {
            ResolvedField::Column(column) => Some(column),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_display() {
        assert_eq!(SqlType::Varchar(255).to_string(), "VARCHAR(255)");
        assert_eq!(SqlType::Numeric(19, 4).to_string(), "NUMERIC(19,4)");
        assert_eq!(SqlType::TextArray.to_string(), "TEXT[]");
    }

    #[test]
    fn test_column_definition() {
        let mut column = ColumnSpec::new("done", FieldType::Checkbox, SqlType::Boolean);
        column.nullable = false;
        column.default = Some("false".to_string());
        assert_eq!(column.definition(), "\"done\" BOOLEAN NOT NULL DEFAULT false");
        assert!(!column.read_only);
    }
}
