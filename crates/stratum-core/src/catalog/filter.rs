//! Declarative field conditions.
//!
//! Conditions appear in two places: rollup `filters` inside schema documents
//! and client-supplied list filters. Both compile to a
//! [`RowFilter`](crate::security::RowFilter).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    /// `field = value`
    Equals,
    /// `field <> value`
    NotEquals,
    /// `field > value`
    GreaterThan,
    /// `field >= value`
    GreaterThanOrEqual,
    /// `field < value`
    LessThan,
    /// `field <= value`
    LessThanOrEqual,
    /// Case-insensitive substring match, or array membership.
    Contains,
    /// `field IN (values...)`
    In,
    /// `field IS NULL`
    IsNull,
    /// `field IS NOT NULL`
    IsNotNull,
}

impl FilterOperator {
    /// Check if the operator takes no operand.
    pub fn is_unary(&self) -> bool {
        matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }
}

/// A single `field <operator> value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field name.
    pub field: String,
    /// Operator.
    pub operator: FilterOperator,
    /// Operand; absent for unary operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Condition {
    /// Create a condition.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value.into()),
        }
    }

    /// Create a unary condition (`isNull` / `isNotNull`).
    pub fn unary(field: impl Into<String>, operator: FilterOperator) -> Self {
        Self {
            field: field.into(),
            operator,
            value: None,
        }
    }
}

/// A tree of conditions combined with `and` / `or`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    /// All children must hold.
    And {
        /// Children.
        and: Vec<FilterNode>,
    },
    /// At least one child must hold.
    Or {
        /// Children.
        or: Vec<FilterNode>,
    },
    /// A leaf condition.
    Condition(Condition),
}

impl FilterNode {
    /// Names of every field the tree references.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterNode::And { and: children } | FilterNode::Or { or: children } => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            FilterNode::Condition(condition) => out.push(condition.field.as_str()),
        }
    }
}
