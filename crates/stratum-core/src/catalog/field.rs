//! Field definitions for tables.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filter::Condition;
use super::types::{Aggregation, FieldType, FormulaResultType, OnDelete, RelationType};

/// Field identifier, unique within a table.
pub type FieldId = u64;

/// A field definition within a table.
///
/// Type-specific attributes are flat optional members, mirroring the schema
/// document. Which ones are meaningful depends on `field_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    /// Field identifier.
    pub id: FieldId,
    /// Column name.
    pub name: String,
    /// Abstract field type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether a value must be present (NOT NULL).
    #[serde(default)]
    pub required: bool,
    /// Whether values must be unique across the table.
    #[serde(default)]
    pub unique: bool,
    /// Whether an index should be created for this field.
    #[serde(default)]
    pub indexed: bool,
    /// Lower bound for numeric fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound for numeric fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Maximum length for short text fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Total digits for decimal fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    /// Fractional digits for decimal fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
    /// Default value applied on insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Allowed choices for select fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Related table name (relationship fields).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_table: Option<String>,
    /// Relationship cardinality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<RelationType>,
    /// Back-reference field on the related table (one-to-many).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    /// Referential action on delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<OnDelete>,
    /// Formula expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// Declared formula result type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<FormulaResultType>,
    /// Relationship field a rollup aggregates through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_field: Option<String>,
    /// Field on the related table a rollup aggregates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_field: Option<String>,
    /// Rollup aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    /// Rollup filters on related rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Condition>,
}

/// Borrowed view of a rollup field's attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollupDefinition<'a> {
    /// Relationship field on the rollup's own table.
    pub relationship_field: &'a str,
    /// Field on the related table.
    pub related_field: &'a str,
    /// Aggregation function.
    pub aggregation: Aggregation,
    /// Filters on related rows.
    pub filters: &'a [Condition],
}

impl FieldDefinition {
    /// Create a new optional field with no attributes.
    pub fn new(id: FieldId, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id,
            name: name.into(),
            field_type,
            required: false,
            unique: false,
            indexed: false,
            min: None,
            max: None,
            max_length: None,
            precision: None,
            scale: None,
            default: None,
            options: Vec::new(),
            related_table: None,
            relation_type: None,
            foreign_key: None,
            on_delete: None,
            formula: None,
            result_type: None,
            relationship_field: None,
            related_field: None,
            aggregation: None,
            filters: Vec::new(),
        }
    }

    /// Mark as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as indexed.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Set numeric bounds.
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Set select options.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Turn into a relationship to `table`.
    pub fn related_to(mut self, table: impl Into<String>, relation_type: RelationType) -> Self {
        self.related_table = Some(table.into());
        self.relation_type = Some(relation_type);
        self
    }

    /// Set the back-reference field of a one-to-many relationship.
    pub fn with_foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }

    /// Set the formula expression.
    pub fn with_formula(mut self, expression: impl Into<String>) -> Self {
        self.formula = Some(expression.into());
        self
    }

    /// Set the formula result type.
    pub fn with_result_type(mut self, result_type: FormulaResultType) -> Self {
        self.result_type = Some(result_type);
        self
    }

    /// Set the rollup attributes.
    pub fn with_rollup(
        mut self,
        relationship_field: impl Into<String>,
        related_field: impl Into<String>,
        aggregation: Aggregation,
    ) -> Self {
        self.relationship_field = Some(relationship_field.into());
        self.related_field = Some(related_field.into());
        self.aggregation = Some(aggregation);
        self
    }

    /// Add a rollup filter.
    pub fn with_rollup_filter(mut self, condition: Condition) -> Self {
        self.filters.push(condition);
        self
    }

    /// Relationship cardinality, defaulting to many-to-one.
    pub fn relation(&self) -> RelationType {
        self.relation_type.unwrap_or_default()
    }

    /// Check if the field is backed by a physical column.
    pub fn is_stored(&self) -> bool {
        match self.field_type {
            FieldType::Formula | FieldType::Rollup => false,
            FieldType::Relationship => self.relation() != RelationType::OneToMany,
            _ => true,
        }
    }

    /// Rollup attributes, if all of them are present.
    pub fn rollup_definition(&self) -> Option<RollupDefinition<'_>> {
        Some(RollupDefinition {
            relationship_field: self.relationship_field.as_deref()?,
            related_field: self.related_field.as_deref()?,
            aggregation: self.aggregation?,
            filters: &self.filters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builder() {
        let field = FieldDefinition::new(3, "salary", FieldType::Currency)
            .required()
            .indexed()
            .with_range(Some(0.0), None);

        assert_eq!(field.name, "salary");
        assert!(field.required);
        assert!(field.indexed);
        assert!(!field.unique);
        assert_eq!(field.min, Some(0.0));
        assert!(field.is_stored());
    }

    #[test]
    fn test_parse_field_document() {
        let field: FieldDefinition = serde_json::from_str(
            r#"{
                "id": 4,
                "name": "total_salary",
                "type": "rollup",
                "relationshipField": "employees",
                "relatedField": "salary",
                "aggregation": "sum"
            }"#,
        )
        .unwrap();

        assert_eq!(field.field_type, FieldType::Rollup);
        assert!(!field.is_stored());
        let rollup = field.rollup_definition().unwrap();
        assert_eq!(rollup.relationship_field, "employees");
        assert_eq!(rollup.aggregation, Aggregation::Sum);
    }

    #[test]
    fn test_incomplete_rollup() {
        let field = FieldDefinition::new(1, "total", FieldType::Rollup);
        assert!(field.rollup_definition().is_none());
    }

    #[test]
    fn test_one_to_many_is_virtual() {
        let field = FieldDefinition::new(2, "employees", FieldType::Relationship)
            .related_to("employees", RelationType::OneToMany)
            .with_foreign_key("department");
        assert!(!field.is_stored());

        let field = FieldDefinition::new(2, "department", FieldType::Relationship)
            .related_to("departments", RelationType::ManyToOne);
        assert!(field.is_stored());
    }
}
