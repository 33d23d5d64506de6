//! Special fields implicitly present on every table.
//!
//! Field lookup is two-tier: explicit [`FieldDefinition`]s first, then this
//! fixed table. `deleted_at` / `deleted_by` are deliberately absent; they only
//! exist when declared.

use super::field::FieldDefinition;
use super::types::FieldType;

/// Name of the tenant column on organization-scoped tables.
pub const ORGANIZATION_ID: &str = "organization_id";

/// A field every table has without declaring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialField {
    /// Record identifier.
    Id,
    /// Creation timestamp.
    CreatedAt,
    /// Last update timestamp.
    UpdatedAt,
}

impl SpecialField {
    /// All special fields, in physical column order.
    pub const ALL: [SpecialField; 3] = [
        SpecialField::Id,
        SpecialField::CreatedAt,
        SpecialField::UpdatedAt,
    ];

    /// Column name.
    pub fn name(&self) -> &'static str {
        match self {
            SpecialField::Id => "id",
            SpecialField::CreatedAt => "created_at",
            SpecialField::UpdatedAt => "updated_at",
        }
    }

    /// Look a special field up by name.
    pub fn lookup(name: &str) -> Option<SpecialField> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// The field type the special field behaves like.
    pub fn field_type(&self) -> FieldType {
        match self {
            SpecialField::Id => FieldType::SingleLineText,
            SpecialField::CreatedAt => FieldType::CreatedAt,
            SpecialField::UpdatedAt => FieldType::UpdatedAt,
        }
    }
}

/// Result of a two-tier field lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldRef<'a> {
    /// An explicitly declared field.
    Declared(&'a FieldDefinition),
    /// An implicit special field.
    Special(SpecialField),
}

impl<'a> FieldRef<'a> {
    /// Field name.
    pub fn name(&self) -> &'a str {
        match self {
            FieldRef::Declared(field) => &field.name,
            FieldRef::Special(special) => special.name(),
        }
    }

    /// Field type.
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldRef::Declared(field) => field.field_type,
            FieldRef::Special(special) => special.field_type(),
        }
    }

    /// Check if the field has a physical column.
    pub fn is_stored(&self) -> bool {
        match self {
            FieldRef::Declared(field) => field.is_stored(),
            FieldRef::Special(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_lookup() {
        assert_eq!(SpecialField::lookup("id"), Some(SpecialField::Id));
        assert_eq!(SpecialField::lookup("created_at"), Some(SpecialField::CreatedAt));
        assert_eq!(SpecialField::lookup("deleted_at"), None);
        assert_eq!(SpecialField::lookup("deleted_by"), None);
    }
}
