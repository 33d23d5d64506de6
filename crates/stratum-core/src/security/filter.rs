//! Row filter predicates.
//!
//! A [`RowFilter`] is the resolved form of every row-level restriction:
//! organization isolation, owner rules, soft-delete visibility, client list
//! filters and rollup filters. It can be evaluated against an in-memory row
//! or rendered to SQL.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::catalog::{Condition, FilterNode, FilterOperator};
use crate::compiler::formula::compare_values;
use crate::compiler::sql::{literal, quote_str, Ident};

/// A malformed filter condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid filter on {field}: {reason}")]
pub struct FilterError {
    /// Field of the condition.
    pub field: String,
    /// What is wrong.
    pub reason: String,
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }
}

/// Resolved row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFilter {
    /// Every row.
    True,
    /// No row.
    False,
    /// `column <op> value`
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    /// `column IN (values)`
    In { column: String, values: Vec<Value> },
    /// Case-insensitive substring (or array element) match.
    Contains { column: String, value: Value },
    /// `column IS NULL`
    IsNull { column: String },
    /// `column IS NOT NULL`
    IsNotNull { column: String },
    /// Conjunction.
    And(Vec<RowFilter>),
    /// Disjunction.
    Or(Vec<RowFilter>),
}

/// How values are rendered into SQL.
enum SqlValues<'a> {
    Inline,
    Bind(&'a mut Vec<Value>),
}

impl RowFilter {
    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        RowFilter::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    /// `column IS NULL`
    pub fn is_null(column: impl Into<String>) -> Self {
        RowFilter::IsNull {
            column: column.into(),
        }
    }

    /// Conjunction of two filters, simplified.
    pub fn and(self, other: RowFilter) -> RowFilter {
        match (self, other) {
            (RowFilter::False, _) | (_, RowFilter::False) => RowFilter::False,
            (RowFilter::True, f) | (f, RowFilter::True) => f,
            (RowFilter::And(mut a), RowFilter::And(b)) => {
                a.extend(b);
                RowFilter::And(a)
            }
            (RowFilter::And(mut a), f) => {
                a.push(f);
                RowFilter::And(a)
            }
            (f, RowFilter::And(mut b)) => {
                b.insert(0, f);
                RowFilter::And(b)
            }
            (a, b) => RowFilter::And(vec![a, b]),
        }
    }

    /// Disjunction of two filters, simplified.
    pub fn or(self, other: RowFilter) -> RowFilter {
        match (self, other) {
            (RowFilter::True, _) | (_, RowFilter::True) => RowFilter::True,
            (RowFilter::False, f) | (f, RowFilter::False) => f,
            (RowFilter::Or(mut a), RowFilter::Or(b)) => {
                a.extend(b);
                RowFilter::Or(a)
            }
            (a, b) => RowFilter::Or(vec![a, b]),
        }
    }

    /// Conjunction of many filters.
    pub fn all(filters: impl IntoIterator<Item = RowFilter>) -> RowFilter {
        filters.into_iter().fold(RowFilter::True, RowFilter::and)
    }

    /// Check if the filter admits no row.
    pub fn is_false(&self) -> bool {
        matches!(self, RowFilter::False)
    }

    /// Build from a declarative condition.
    pub fn from_condition(condition: &Condition) -> Result<RowFilter, FilterError> {
        let column = condition.field.clone();
        let invalid = |reason: &str| FilterError {
            field: condition.field.clone(),
            reason: reason.to_string(),
        };

        if condition.operator.is_unary() {
            return Ok(match condition.operator {
                FilterOperator::IsNull => RowFilter::IsNull { column },
                _ => RowFilter::IsNotNull { column },
            });
        }

        let value = condition
            .value
            .clone()
            .ok_or_else(|| invalid("operator requires a value"))?;

        let op = match condition.operator {
            FilterOperator::Equals => CompareOp::Eq,
            FilterOperator::NotEquals => CompareOp::Ne,
            FilterOperator::GreaterThan => CompareOp::Gt,
            FilterOperator::GreaterThanOrEqual => CompareOp::Ge,
            FilterOperator::LessThan => CompareOp::Lt,
            FilterOperator::LessThanOrEqual => CompareOp::Le,
            FilterOperator::Contains => return Ok(RowFilter::Contains { column, value }),
            FilterOperator::In => {
                return match value {
                    Value::Array(values) => Ok(RowFilter::In { column, values }),
                    _ => Err(invalid("in requires an array value")),
                }
            }
            FilterOperator::IsNull | FilterOperator::IsNotNull => {
                return Err(invalid("unexpected operator"))
            }
        };
        Ok(RowFilter::Compare { column, op, value })
    }

    /// Build from a conjunction of conditions.
    pub fn from_conditions(conditions: &[Condition]) -> Result<RowFilter, FilterError> {
        conditions
            .iter()
            .map(RowFilter::from_condition)
            .collect::<Result<Vec<_>, _>>()
            .map(RowFilter::all)
    }

    /// Build from a filter tree.
    pub fn from_node(node: &FilterNode) -> Result<RowFilter, FilterError> {
        match node {
            FilterNode::Condition(condition) => RowFilter::from_condition(condition),
            FilterNode::And { and } => and
                .iter()
                .map(RowFilter::from_node)
                .collect::<Result<Vec<_>, _>>()
                .map(RowFilter::all),
            FilterNode::Or { or } => or
                .iter()
                .map(RowFilter::from_node)
                .collect::<Result<Vec<_>, _>>()
                .map(|filters| filters.into_iter().fold(RowFilter::False, RowFilter::or)),
        }
    }

    /// Columns the filter references.
    pub fn columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            RowFilter::True | RowFilter::False => {}
            RowFilter::Compare { column, .. }
            | RowFilter::In { column, .. }
            | RowFilter::Contains { column, .. }
            | RowFilter::IsNull { column }
            | RowFilter::IsNotNull { column } => {
                out.insert(column.as_str());
            }
            RowFilter::And(filters) | RowFilter::Or(filters) => {
                for filter in filters {
                    filter.collect_columns(out);
                }
            }
        }
    }

    /// Evaluate against a row. Comparisons with NULL never hold.
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        let get = |column: &str| row.get(column).unwrap_or(&Value::Null);
        match self {
            RowFilter::True => true,
            RowFilter::False => false,
            RowFilter::Compare { column, op, value } => compare_values(get(column), value)
                .map(|ordering| op.holds(ordering))
                .unwrap_or(false),
            RowFilter::In { column, values } => {
                let actual = get(column);
                values
                    .iter()
                    .any(|v| compare_values(actual, v) == Some(Ordering::Equal))
            }
            RowFilter::Contains { column, value } => {
                let needle = text(value).to_lowercase();
                match get(column) {
                    Value::Null => false,
                    Value::Array(items) => items
                        .iter()
                        .any(|item| text(item).to_lowercase().contains(&needle)),
                    other => text(other).to_lowercase().contains(&needle),
                }
            }
            RowFilter::IsNull { column } => get(column).is_null(),
            RowFilter::IsNotNull { column } => !get(column).is_null(),
            RowFilter::And(filters) => filters.iter().all(|f| f.matches(row)),
            RowFilter::Or(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }

    /// Render with values inlined as literals (view definitions).
    pub fn to_sql_inline(&self, alias: Option<&str>) -> String {
        self.render(alias, &mut SqlValues::Inline)
    }

    /// Render with values bound as `jsonb` parameters, appended to `params`.
    ///
    /// Placeholders are numbered from `params.len() + 1`.
    pub fn to_sql_bound(&self, alias: Option<&str>, params: &mut Vec<Value>) -> String {
        self.render(alias, &mut SqlValues::Bind(params))
    }

    fn render(&self, alias: Option<&str>, values: &mut SqlValues<'_>) -> String {
        let col = |column: &str| match alias {
            Some(alias) => format!("{alias}.{}", Ident(column)),
            None => Ident(column).to_string(),
        };

        match self {
            RowFilter::True => "TRUE".to_string(),
            RowFilter::False => "FALSE".to_string(),
            RowFilter::Compare { column, op, value } => match values {
                SqlValues::Inline => format!("{} {} {}", col(column), op.sql(), literal(value)),
                SqlValues::Bind(params) => {
                    params.push(value.clone());
                    format!("to_jsonb({}) {} ${}::jsonb", col(column), op.sql(), params.len())
                }
            },
            RowFilter::In { values: list, .. } if list.is_empty() => "FALSE".to_string(),
            RowFilter::In {
                column,
                values: list,
            } => match values {
                SqlValues::Inline => {
                    let list: Vec<String> = list.iter().map(literal).collect();
                    format!("{} IN ({})", col(column), list.join(", "))
                }
                SqlValues::Bind(params) => {
                    let mut placeholders = Vec::with_capacity(list.len());
                    for value in list {
                        params.push(value.clone());
                        placeholders.push(format!("${}::jsonb", params.len()));
                    }
                    format!("to_jsonb({}) IN ({})", col(column), placeholders.join(", "))
                }
            },
            RowFilter::Contains { column, value } => {
                let pattern = format!("%{}%", text(value));
                match values {
                    SqlValues::Inline => {
                        format!("{}::text ILIKE {}", col(column), quote_str(&pattern))
                    }
                    SqlValues::Bind(params) => {
                        params.push(Value::String(pattern));
                        format!(
                            "{}::text ILIKE (${}::jsonb #>> '{{}}')",
                            col(column),
                            params.len()
                        )
                    }
                }
            }
            RowFilter::IsNull { column } => format!("{} IS NULL", col(column)),
            RowFilter::IsNotNull { column } => format!("{} IS NOT NULL", col(column)),
            RowFilter::And(filters) if filters.is_empty() => "TRUE".to_string(),
            RowFilter::Or(filters) if filters.is_empty() => "FALSE".to_string(),
            RowFilter::And(filters) => {
                let parts: Vec<String> = filters.iter().map(|f| f.render(alias, values)).collect();
                format!("({})", parts.join(" AND "))
            }
            RowFilter::Or(filters) => {
                let parts: Vec<String> = filters.iter().map(|f| f.render(alias, values)).collect();
                format!("({})", parts.join(" OR "))
            }
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_inline(None))
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
