use crate::core::{DEFAULT_PAGE_SIZE, Filters, Pagination, Sorter};
use crate::storage::ViewPreferences;
use std::collections::BTreeSet;

/// Static description of one list view.
///
/// Similar to a table definition in an admin UI: which resource it lists,
/// where its preferences live, which columns exist and which show by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewConfig {
    /// Resource type queried and subscribed to
    pub resource: String,

    /// Preferences namespace; unique per view
    pub namespace: String,

    /// Every column the view can show, in display order
    pub columns: Vec<String>,

    /// Columns shown before the user picks any; `None` means all of them
    pub default_columns: Option<Vec<String>>,

    /// Sort order before the user picks one, and after "clear filters"
    pub default_sorters: Vec<Sorter>,

    /// Rows per page before the user picks a size
    pub page_size: u32,
}

impl ViewConfig {
    /// Create a view listing `resource`, persisted under `namespace`
    pub fn new(resource: &str, namespace: &str) -> Self {
        Self {
            resource: resource.to_string(),
            namespace: namespace.to_string(),
            columns: vec!["id".to_string()],
            default_columns: None,
            default_sorters: vec![Sorter::asc("id")],
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the full column list
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the columns visible by default
    pub fn default_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the default sort order
    pub fn default_sorters(mut self, sorters: Vec<Sorter>) -> Self {
        self.default_sorters = sorters;
        self
    }

    /// Set the default page size
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Preferences a namespace starts from on first visit.
    pub fn default_preferences(&self) -> ViewPreferences {
        let visible_columns = match &self.default_columns {
            Some(columns) => columns.iter().cloned().collect(),
            None => self.columns.iter().cloned().collect(),
        };
        ViewPreferences {
            sorters: self.default_sorters.clone(),
            filters: Filters::new(),
            pagination: Pagination {
                page_index: 0,
                page_size: self.page_size,
            },
            visible_columns,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Orders a visible-column set by the configured display order. Columns
    /// the view does not define are left out.
    pub fn order_columns(&self, visible: &BTreeSet<String>) -> Vec<String> {
        self.columns
            .iter()
            .filter(|column| visible.contains(*column))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preferences() {
        let config = ViewConfig::new("printer", "printerList-v2")
            .columns(["id", "printer_id", "status"])
            .default_columns(["id", "printer_id"])
            .page_size(50);

        let preferences = config.default_preferences();
        assert_eq!(preferences.pagination.page_size, 50);
        assert_eq!(preferences.sorters, vec![Sorter::asc("id")]);
        assert!(!preferences.visible_columns.contains("status"));
    }

    #[test]
    fn test_order_columns_follows_config() {
        let config = ViewConfig::new("printer", "printerList-v2").columns(["id", "status", "printer_ip"]);
        let visible: BTreeSet<String> = ["printer_ip", "id", "unknown"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(config.order_columns(&visible), vec!["id", "printer_ip"]);
    }
}
