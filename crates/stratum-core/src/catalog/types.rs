//! Core type definitions for the catalog.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::compiler::SchemaError;

/// Abstract field types supported by Stratum.
///
/// The set is closed: anything else is rejected with
/// [`SchemaError::UnknownFieldType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Short text (`VARCHAR`).
    SingleLineText,
    /// Unbounded text.
    LongText,
    /// Unbounded text holding markup.
    RichText,
    /// Email address.
    Email,
    /// URL.
    Url,
    /// Phone number.
    PhoneNumber,
    /// 32-bit integer.
    Integer,
    /// Fixed-precision decimal.
    Decimal,
    /// Monetary amount.
    Currency,
    /// Percentage (0-100 by default).
    Percentage,
    /// Star rating (0..max).
    Rating,
    /// Database-generated sequence number.
    Autonumber,
    /// Boolean.
    Checkbox,
    /// Calendar date.
    Date,
    /// Timestamp with time zone.
    Datetime,
    /// Time of day.
    Time,
    /// Time span.
    Duration,
    /// One value out of `options`.
    SingleSelect,
    /// Any subset of `options`.
    MultiSelect,
    /// Arbitrary JSON document.
    Json,
    /// A single file object.
    Attachment,
    /// A list of file objects.
    MultipleAttachments,
    /// Reference to a user of the authentication subsystem.
    User,
    /// User that created the record (system-managed).
    CreatedBy,
    /// User that last updated the record (system-managed).
    UpdatedBy,
    /// User that soft-deleted the record (system-managed).
    DeletedBy,
    /// Creation timestamp (system-managed).
    CreatedAt,
    /// Last update timestamp (system-managed).
    UpdatedAt,
    /// Soft-delete timestamp (system-managed).
    DeletedAt,
    /// Link to another table.
    Relationship,
    /// Value computed from an expression over the same row.
    Formula,
    /// Aggregation over related rows.
    Rollup,
}

impl FieldType {
    /// All supported field types.
    pub const ALL: [FieldType; 32] = [
        FieldType::SingleLineText,
        FieldType::LongText,
        FieldType::RichText,
        FieldType::Email,
        FieldType::Url,
        FieldType::PhoneNumber,
        FieldType::Integer,
        FieldType::Decimal,
        FieldType::Currency,
        FieldType::Percentage,
        FieldType::Rating,
        FieldType::Autonumber,
        FieldType::Checkbox,
        FieldType::Date,
        FieldType::Datetime,
        FieldType::Time,
        FieldType::Duration,
        FieldType::SingleSelect,
        FieldType::MultiSelect,
        FieldType::Json,
        FieldType::Attachment,
        FieldType::MultipleAttachments,
        FieldType::User,
        FieldType::CreatedBy,
        FieldType::UpdatedBy,
        FieldType::DeletedBy,
        FieldType::CreatedAt,
        FieldType::UpdatedAt,
        FieldType::DeletedAt,
        FieldType::Relationship,
        FieldType::Formula,
        FieldType::Rollup,
    ];

    /// The type name used in schema documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::SingleLineText => "single-line-text",
            FieldType::LongText => "long-text",
            FieldType::RichText => "rich-text",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::PhoneNumber => "phone-number",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Currency => "currency",
            FieldType::Percentage => "percentage",
            FieldType::Rating => "rating",
            FieldType::Autonumber => "autonumber",
            FieldType::Checkbox => "checkbox",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Time => "time",
            FieldType::Duration => "duration",
            FieldType::SingleSelect => "single-select",
            FieldType::MultiSelect => "multi-select",
            FieldType::Json => "json",
            FieldType::Attachment => "attachment",
            FieldType::MultipleAttachments => "multiple-attachments",
            FieldType::User => "user",
            FieldType::CreatedBy => "created-by",
            FieldType::UpdatedBy => "updated-by",
            FieldType::DeletedBy => "deleted-by",
            FieldType::CreatedAt => "created-at",
            FieldType::UpdatedAt => "updated-at",
            FieldType::DeletedAt => "deleted-at",
            FieldType::Relationship => "relationship",
            FieldType::Formula => "formula",
            FieldType::Rollup => "rollup",
        }
    }

    /// Check if this type stores a number.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Integer
                | FieldType::Decimal
                | FieldType::Currency
                | FieldType::Percentage
                | FieldType::Rating
                | FieldType::Autonumber
        )
    }

    /// Check if this type stores text.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            FieldType::SingleLineText
                | FieldType::LongText
                | FieldType::RichText
                | FieldType::Email
                | FieldType::Url
                | FieldType::PhoneNumber
                | FieldType::SingleSelect
        )
    }

    /// Check if this type references the authentication subsystem's users.
    pub fn requires_authentication(&self) -> bool {
        matches!(
            self,
            FieldType::User | FieldType::CreatedBy | FieldType::UpdatedBy | FieldType::DeletedBy
        )
    }

    /// Check if the value is computed instead of stored.
    pub fn is_computed(&self) -> bool {
        matches!(self, FieldType::Formula | FieldType::Rollup)
    }

    /// Check if clients may never supply a value for this type.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            FieldType::Autonumber
                | FieldType::CreatedBy
                | FieldType::UpdatedBy
                | FieldType::DeletedBy
                | FieldType::CreatedAt
                | FieldType::UpdatedAt
                | FieldType::DeletedAt
                | FieldType::Formula
                | FieldType::Rollup
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .find(|ty| ty.as_str() == s)
            .copied()
            .ok_or_else(|| SchemaError::UnknownFieldType(s.to_string()))
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Cardinality of a relationship field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationType {
    /// Many rows of this table point at one related row (stored column).
    #[default]
    ManyToOne,
    /// Like many-to-one, with a uniqueness constraint on the column.
    OneToOne,
    /// One row of this table is pointed at by many related rows (virtual).
    OneToMany,
}

/// Referential action when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnDelete {
    /// Clear the reference.
    #[default]
    SetNull,
    /// Delete the referencing row.
    Cascade,
    /// Refuse to delete the referenced row.
    Restrict,
}

impl OnDelete {
    /// SQL referential action.
    pub fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::SetNull => "SET NULL",
            OnDelete::Cascade => "CASCADE",
            OnDelete::Restrict => "RESTRICT",
        }
    }
}

/// Aggregation applied by a rollup field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Sum of values (0 on empty).
    Sum,
    /// Count of non-null values (0 on empty).
    Count,
    /// Average of values (null on empty).
    Avg,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Count of non-empty values.
    Counta,
    /// Count of related rows.
    Countall,
    /// Distinct non-null values, ordered.
    Arrayunique,
}

impl Aggregation {
    /// Check if the aggregation needs numeric input.
    pub fn requires_numeric(&self) -> bool {
        matches!(self, Aggregation::Sum | Aggregation::Avg)
    }
}

/// Declared result type of a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormulaResultType {
    /// Text result.
    #[default]
    Text,
    /// Numeric result.
    Number,
    /// Boolean result.
    Boolean,
    /// Date result.
    Date,
    /// Timestamp result.
    Datetime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_round_trip() {
        for ty in FieldType::ALL {
            assert_eq!(ty.as_str().parse::<FieldType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_unknown_type() {
        let err = "hologram".parse::<FieldType>().unwrap_err();
        assert!(matches!(err, SchemaError::UnknownFieldType(ref name) if name == "hologram"));
    }

    #[test]
    fn test_type_classes() {
        assert!(FieldType::Currency.is_numeric());
        assert!(!FieldType::Email.is_numeric());
        assert!(FieldType::DeletedBy.requires_authentication());
        assert!(!FieldType::DeletedAt.requires_authentication());
        assert!(FieldType::Rollup.is_computed());
        assert!(FieldType::CreatedAt.is_read_only());
        assert!(!FieldType::User.is_read_only());
    }

    #[test]
    fn test_deserialize_field_type() {
        let ty: FieldType = serde_json::from_str("\"multi-select\"").unwrap();
        assert_eq!(ty, FieldType::MultiSelect);

        let err = serde_json::from_str::<FieldType>("\"hologram\"").unwrap_err();
        assert!(err.to_string().contains("unknown field type"));
    }
}
