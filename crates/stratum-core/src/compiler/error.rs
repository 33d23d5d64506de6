//! Schema compilation errors.

use thiserror::Error;

/// Errors raised while parsing or compiling an application schema.
///
/// Compilation is all-or-nothing: any of these aborts it without applying
/// anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Schema document could not be parsed.
    #[error("invalid schema document: {0}")]
    Parse(String),

    /// Field type outside the supported set.
    #[error("unknown field type: {0}")]
    UnknownFieldType(String),

    /// A formula, rollup or rule references a field that does not exist.
    #[error("invalid field reference in {table}.{field}: {reference}")]
    InvalidFieldReference {
        /// Table containing the referencing field.
        table: String,
        /// Referencing field (or rule).
        field: String,
        /// The unresolved reference.
        reference: String,
    },

    /// A relationship points at something that is not a relationship target.
    #[error("invalid relationship reference in {table}.{field}: {reason}")]
    InvalidRelationshipReference {
        /// Table containing the field.
        table: String,
        /// Field name.
        field: String,
        /// What is wrong.
        reason: String,
    },

    /// The field or rule needs an auth configuration the schema lacks.
    #[error("authentication required for {table}.{field}: {reason}")]
    AuthenticationRequired {
        /// Table name.
        table: String,
        /// Field name (or `organizationScoped`).
        field: String,
        /// What is missing.
        reason: String,
    },

    /// Two fields in one table share an id.
    #[error("duplicate field id {id} in table {table}")]
    DuplicateFieldId {
        /// Table name.
        table: String,
        /// Repeated id.
        id: u64,
    },

    /// Two fields in one table share a name.
    #[error("duplicate field name {field} in table {table}")]
    DuplicateFieldName {
        /// Table name.
        table: String,
        /// Repeated name.
        field: String,
    },

    /// Two tables share an id or a name.
    #[error("duplicate table: {0}")]
    DuplicateTable(String),

    /// Table or field name is not a valid identifier.
    #[error("invalid name {0:?}: expected [a-z_][a-z0-9_]* of at most 63 characters")]
    InvalidFieldName(String),

    /// Formula expression does not parse.
    #[error("invalid formula in {table}.{field}: {message}")]
    InvalidFormula {
        /// Table name.
        table: String,
        /// Field name.
        field: String,
        /// Parse error.
        message: String,
    },

    /// Permission rule is malformed.
    #[error("invalid permission on {table}: {reason}")]
    InvalidPermission {
        /// Table name.
        table: String,
        /// What is wrong.
        reason: String,
    },

    /// Primary key references missing or computed fields.
    #[error("invalid primary key on {table}: {reason}")]
    InvalidPrimaryKey {
        /// Table name.
        table: String,
        /// What is wrong.
        reason: String,
    },

    /// Rollup attributes are incomplete or incompatible.
    #[error("invalid rollup {table}.{field}: {reason}")]
    InvalidRollup {
        /// Table name.
        table: String,
        /// Field name.
        field: String,
        /// What is wrong.
        reason: String,
    },
}

/// Result type for schema compilation.
pub type SchemaResult<T> = Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchemaError::UnknownFieldType("hologram".to_string());
        assert_eq!(err.to_string(), "unknown field type: hologram");

        let err = SchemaError::AuthenticationRequired {
            table: "tasks".to_string(),
            field: "deleted_by".to_string(),
            reason: "deleted-by references the user table".to_string(),
        };
        assert!(err.to_string().contains("tasks.deleted_by"));
    }
}
