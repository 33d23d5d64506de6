//! List requests and responses.

use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};
use crate::catalog::FilterNode;
use crate::storage::{AggregateFunction, AggregateRequest, Record, SortKey};

/// Page size when the request names none.
pub const DEFAULT_LIMIT: usize = 100;
/// Largest accepted page size.
pub const MAX_LIMIT: usize = 1000;

/// A list request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Client filter, ANDed with the policy filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterNode>,
    /// Ordering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    /// Page size, at most [`MAX_LIMIT`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Records to skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Aggregates over the whole filtered set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<AggregateRequest>,
}

impl ListQuery {
    /// Create an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add a sort key.
    pub fn with_sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    /// Set the page size.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Request an aggregate.
    pub fn with_aggregate(mut self, function: AggregateFunction, field: Option<&str>) -> Self {
        self.aggregates.push(AggregateRequest {
            function,
            field: field.map(str::to_string),
        });
        self
    }

    /// Page size after defaults and clamping.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }

    /// Parse a JSON filter tree.
    pub fn parse_filter(raw: &str) -> RecordResult<FilterNode> {
        serde_json::from_str(raw).map_err(|e| RecordError::BadRequest(format!("invalid filter: {e}")))
    }

    /// Parse `field,-other` into sort keys; `-` means descending.
    pub fn parse_sort(raw: &str) -> RecordResult<Vec<SortKey>> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| match part.strip_prefix('-') {
                Some("") => Err(RecordError::BadRequest("empty sort field".to_string())),
                Some(field) => Ok(SortKey::desc(field)),
                None => Ok(SortKey::asc(part)),
            })
            .collect()
    }

    /// Parse `count,sum:salary,avg:salary` into aggregate requests.
    pub fn parse_aggregates(raw: &str) -> RecordResult<Vec<AggregateRequest>> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (function, field) = match part.split_once(':') {
                    Some((function, field)) => (function, Some(field.to_string())),
                    None => (part, None),
                };
                let function = match function {
                    "count" => AggregateFunction::Count,
                    "sum" => AggregateFunction::Sum,
                    "avg" => AggregateFunction::Avg,
                    "min" => AggregateFunction::Min,
                    "max" => AggregateFunction::Max,
                    other => {
                        return Err(RecordError::BadRequest(format!(
                            "unknown aggregate function: {other}"
                        )))
                    }
                };
                if field.is_none() && function != AggregateFunction::Count {
                    return Err(RecordError::BadRequest(format!(
                        "aggregate {} needs a field",
                        function.as_str()
                    )));
                }
                Ok(AggregateRequest { function, field })
            })
            .collect()
    }
}

/// One page of records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    /// Visible records, redacted.
    pub records: Vec<Record>,
    /// Number of records matching the filters.
    pub total: u64,
    /// Page size used.
    pub limit: usize,
    /// Offset used.
    pub offset: usize,
    /// Whether more records follow this page.
    pub has_more: bool,
    /// Requested aggregates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<Record>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SortDirection;

    #[test]
    fn test_parse_sort() {
        let keys = ListQuery::parse_sort("name, -salary").unwrap();
        assert_eq!(keys, vec![SortKey::asc("name"), SortKey::desc("salary")]);
        assert_eq!(keys[1].direction, SortDirection::Desc);
        assert!(ListQuery::parse_sort("-").is_err());
    }

    #[test]
    fn test_parse_aggregates() {
        let requests = ListQuery::parse_aggregates("count,sum:salary").unwrap();
        assert_eq!(requests[0].key(), "count");
        assert_eq!(requests[1].key(), "sum_salary");
        assert!(ListQuery::parse_aggregates("median:salary").is_err());
        assert!(ListQuery::parse_aggregates("sum").is_err());
    }

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(ListQuery::new().effective_limit(), DEFAULT_LIMIT);
        assert_eq!(ListQuery::new().with_limit(5000).effective_limit(), MAX_LIMIT);
    }

    #[test]
    fn test_deserialize() {
        let query: ListQuery = serde_json::from_str(
            r#"{"filter": {"field": "total_salary", "operator": "greaterThan", "value": 100000},
                "sort": [{"field": "name"}], "limit": 10}"#,
        )
        .unwrap();
        assert_eq!(query.sort, vec![SortKey::asc("name")]);
        assert_eq!(query.limit, Some(10));
        assert!(query.filter.is_some());
    }
}
