//! Query parameters for one list request: pagination, sorting and filtering.

use super::{Result, Value, ViewError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

/// One sort key; a query's sorters apply in sequence order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sorter {
    pub field: String,
    pub order: SortOrder,
}

impl Sorter {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Predicate applied to a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operator", content = "value", rename_all = "lowercase")]
pub enum FilterPredicate {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    In(Vec<Value>),
    /// Case-insensitive substring match on the value's text form.
    Contains(String),
    /// `true` keeps only NULL values, `false` only non-NULL ones.
    Null(bool),
}

impl FilterPredicate {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Null(want_null) => value.is_null() == *want_null,
            _ if value.is_null() => false,
            Self::Eq(expected) => value == expected,
            Self::Ne(expected) => value != expected,
            Self::Lt(bound) => value.compare(bound) == Ordering::Less,
            Self::Lte(bound) => value.compare(bound) != Ordering::Greater,
            Self::Gt(bound) => value.compare(bound) == Ordering::Greater,
            Self::Gte(bound) => value.compare(bound) != Ordering::Less,
            Self::In(options) => options.iter().any(|option| option == value),
            Self::Contains(needle) => value
                .to_string()
                .to_lowercase()
                .contains(&needle.to_lowercase()),
        }
    }
}

/// Active filters keyed by field name.
pub type Filters = BTreeMap<String, FilterPredicate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page_index: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page_index: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn offset(&self) -> usize {
        self.page_index as usize * self.page_size as usize
    }
}

/// Immutable description of one list query. A new query is issued whenever
/// the value changes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryParams {
    pub pagination: Pagination,
    pub sorters: Vec<Sorter>,
    pub filters: Filters,
}

impl QueryParams {
    pub fn new(pagination: Pagination, sorters: Vec<Sorter>, filters: Filters) -> Self {
        Self {
            pagination,
            sorters,
            filters,
        }
    }

    pub fn page_index(&self) -> u32 {
        self.pagination.page_index
    }

    pub fn page_size(&self) -> u32 {
        self.pagination.page_size
    }

    pub fn with_page(mut self, page_index: u32) -> Self {
        self.pagination.page_index = page_index;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.pagination.page_size = page_size;
        self
    }

    pub fn with_sorters(mut self, sorters: Vec<Sorter>) -> Self {
        self.sorters = sorters;
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, predicate: FilterPredicate) -> Self {
        self.filters.insert(field.into(), predicate);
        self
    }

    /// Rejects parameters no backend can serve.
    pub fn validate(&self) -> Result<()> {
        if self.pagination.page_size == 0 {
            return Err(ViewError::InvalidQuery("page size must be positive".into()));
        }
        if let Some(sorter) = self.sorters.iter().find(|s| s.field.is_empty()) {
            return Err(ViewError::InvalidQuery(format!(
                "sorter with empty field name ({:?})",
                sorter.order
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_predicates() {
        assert!(FilterPredicate::Eq("idle".into()).matches(&Value::from("idle")));
        assert!(FilterPredicate::Gte(Value::Integer(2)).matches(&Value::Float(2.0)));
        assert!(!FilterPredicate::Lt(Value::Integer(2)).matches(&Value::Null));
        assert!(FilterPredicate::Null(true).matches(&Value::Null));
        assert!(FilterPredicate::Contains("PRINT".into()).matches(&Value::from("printing")));
        assert!(
            FilterPredicate::In(vec!["idle".into(), "error".into()]).matches(&Value::from("error"))
        );
    }

    #[test]
    fn test_filter_wire_shape() {
        let encoded = serde_json::to_value(FilterPredicate::Eq("idle".into())).unwrap();
        assert_eq!(encoded, json!({"operator": "eq", "value": "idle"}));

        let sorter = serde_json::to_value(Sorter::asc("id")).unwrap();
        assert_eq!(sorter, json!({"field": "id", "order": "asc"}));
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let params = QueryParams::default().with_page_size(0);
        assert!(matches!(params.validate(), Err(ViewError::InvalidQuery(_))));
        assert!(QueryParams::default().validate().is_ok());
    }
}
