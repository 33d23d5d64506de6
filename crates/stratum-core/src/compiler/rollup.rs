//! Rollup realization.
//!
//! Rollups are live: the read view computes them with a correlated subquery
//! and the in-memory store aggregates at read time. Nothing is maintained by
//! triggers.

use std::cmp::Ordering;

use serde_json::Value;

use super::formula::{as_f64, compare_values, number_value};
use super::sql::Ident;
use crate::catalog::{Aggregation, ORGANIZATION_ID};
use crate::security::RowFilter;

/// How the related rows of a rollup are found.
#[derive(Debug, Clone, PartialEq)]
pub enum RollupLink {
    /// Related rows point at this row through `column` (one-to-many).
    Inbound {
        /// Column on the related table holding this row's id.
        column: String,
    },
    /// This row points at one related row through `column` (many-to-one).
    Outbound {
        /// Column on this table holding the related row's id.
        column: String,
    },
}

/// Validated rollup field.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupSpec {
    /// Field name.
    pub name: String,
    /// Related table.
    pub related_table: String,
    /// Link to the related rows.
    pub link: RollupLink,
    /// Aggregated column on the related table.
    pub related_field: String,
    /// Aggregation function.
    pub aggregation: Aggregation,
    /// Restriction on related rows: soft-delete exclusion and declared filters.
    pub filter: RowFilter,
    /// Both tables are organization-scoped; related rows must share the
    /// row's organization.
    pub organization_scoped: bool,
}

impl RollupSpec {
    /// Correlated subquery computing the rollup for the row aliased `t`.
    pub fn to_sql(&self) -> String {
        let x = format!("r.{}", Ident(&self.related_field));
        let aggregate = match self.aggregation {
            Aggregation::Sum => format!("COALESCE(SUM({x}), 0)"),
            Aggregation::Count => format!("COALESCE(COUNT({x}), 0)"),
            Aggregation::Avg => format!("AVG({x})"),
            Aggregation::Min => format!("MIN({x})"),
            Aggregation::Max => format!("MAX({x})"),
            Aggregation::Counta => {
                format!("COUNT(*) FILTER (WHERE {x} IS NOT NULL AND {x}::text <> '')")
            }
            Aggregation::Countall => "COUNT(*)".to_string(),
            Aggregation::Arrayunique => {
                format!("ARRAY_AGG(DISTINCT {x} ORDER BY {x}) FILTER (WHERE {x} IS NOT NULL)")
            }
        };

        let join = match &self.link {
            RollupLink::Inbound { column } => format!("r.{} = t.\"id\"", Ident(column)),
            RollupLink::Outbound { column } => format!("r.\"id\" = t.{}", Ident(column)),
        };
        let mut predicate = join;
        if self.organization_scoped {
            predicate.push_str(&format!(
                " AND r.{org} = t.{org}",
                org = Ident(ORGANIZATION_ID)
            ));
        }
        if !matches!(self.filter, RowFilter::True) {
            predicate.push_str(" AND ");
            predicate.push_str(&self.filter.to_sql_inline(Some("r")));
        }

        format!(
            "(SELECT {aggregate} FROM {} r WHERE {predicate})",
            Ident(&self.related_table)
        )
    }
}

/// Aggregate the related field's values of the matching related rows.
///
/// `values` holds one entry per related row, `Null` where the row has none.
pub fn aggregate(aggregation: Aggregation, values: &[Value]) -> Value {
    let present = || values.iter().filter(|v| !v.is_null());
    match aggregation {
        Aggregation::Sum => number_value(present().filter_map(as_f64).sum()),
        Aggregation::Count => Value::from(present().count() as u64),
        Aggregation::Countall => Value::from(values.len() as u64),
        Aggregation::Counta => Value::from(present().filter(|v| !is_empty(v)).count() as u64),
        Aggregation::Avg => {
            let numbers: Vec<f64> = present().filter_map(as_f64).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                number_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Aggregation::Min => extreme(present(), Ordering::Less),
        Aggregation::Max => extreme(present(), Ordering::Greater),
        Aggregation::Arrayunique => {
            let mut unique: Vec<Value> = Vec::new();
            for value in present() {
                if !unique.iter().any(|u| compare_values(u, value) == Some(Ordering::Equal)) {
                    unique.push(value.clone());
                }
            }
            if unique.is_empty() {
                return Value::Null;
            }
            unique.sort_by(|a, b| compare_values(a, b).unwrap_or(Ordering::Equal));
            Value::Array(unique)
        }
    }
}

fn extreme<'a>(values: impl Iterator<Item = &'a Value>, wanted: Ordering) -> Value {
    values
        .fold(None::<&Value>, |best, value| match best {
            Some(best) if compare_values(value, best) != Some(wanted) => Some(best),
            _ => Some(value),
        })
        .cloned()
        .unwrap_or(Value::Null)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn spec(aggregation: Aggregation, filter: RowFilter) -> RollupSpec {
        RollupSpec {
            name: "total_salary".to_string(),
            related_table: "employees".to_string(),
            link: RollupLink::Inbound {
                column: "department".to_string(),
            },
            related_field: "salary".to_string(),
            aggregation,
            filter,
            organization_scoped: false,
        }
    }

    #[test]
    fn test_sum_subquery() {
        let sql = spec(Aggregation::Sum, RowFilter::is_null("deleted_at")).to_sql();
        assert_eq!(
            sql,
            "(SELECT COALESCE(SUM(r.\"salary\"), 0) FROM \"employees\" r WHERE r.\"department\" = t.\"id\" AND r.\"deleted_at\" IS NULL)"
        );
    }

    #[test]
    fn test_other_aggregations() {
        let sql = spec(Aggregation::Countall, RowFilter::True).to_sql();
        assert_eq!(
            sql,
            "(SELECT COUNT(*) FROM \"employees\" r WHERE r.\"department\" = t.\"id\")"
        );
        let sql = spec(Aggregation::Arrayunique, RowFilter::True).to_sql();
        assert!(sql.contains("ARRAY_AGG(DISTINCT r.\"salary\" ORDER BY r.\"salary\") FILTER (WHERE r.\"salary\" IS NOT NULL)"));
        let sql = spec(Aggregation::Avg, RowFilter::eq("active", true)).to_sql();
        assert!(sql.contains("AVG(r.\"salary\")"));
        assert!(sql.ends_with("AND r.\"active\" = true)"));
    }

    #[test]
    fn test_outbound_link() {
        let mut rollup = spec(Aggregation::Max, RowFilter::True);
        rollup.link = RollupLink::Outbound {
            column: "manager".to_string(),
        };
        assert!(rollup.to_sql().contains("r.\"id\" = t.\"manager\""));
    }

    #[test]
    fn test_organization_correlation() {
        let mut rollup = spec(Aggregation::Sum, RowFilter::is_null("deleted_at"));
        rollup.organization_scoped = true;
        assert_eq!(
            rollup.to_sql(),
            "(SELECT COALESCE(SUM(r.\"salary\"), 0) FROM \"employees\" r WHERE r.\"department\" = t.\"id\" AND r.\"organization_id\" = t.\"organization_id\" AND r.\"deleted_at\" IS NULL)"
        );
    }

    #[test]
    fn test_aggregate_values() {
        let values = vec![json!(120000), json!(150000), Value::Null];
        assert_eq!(aggregate(Aggregation::Sum, &values), json!(270000));
        assert_eq!(aggregate(Aggregation::Count, &values), json!(2));
        assert_eq!(aggregate(Aggregation::Countall, &values), json!(3));
        assert_eq!(aggregate(Aggregation::Avg, &values), json!(135000));
        assert_eq!(aggregate(Aggregation::Min, &values), json!(120000));
        assert_eq!(aggregate(Aggregation::Max, &values), json!(150000));
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(aggregate(Aggregation::Sum, &[]), json!(0));
        assert_eq!(aggregate(Aggregation::Count, &[]), json!(0));
        assert_eq!(aggregate(Aggregation::Avg, &[]), Value::Null);
        assert_eq!(aggregate(Aggregation::Arrayunique, &[]), Value::Null);
    }

    #[test]
    fn test_counta_and_arrayunique() {
        let values = vec![json!("b"), json!(""), json!("a"), json!("b"), Value::Null];
        assert_eq!(aggregate(Aggregation::Counta, &values), json!(3));
        assert_eq!(aggregate(Aggregation::Arrayunique, &values), json!(["", "a", "b"]));
    }
}
