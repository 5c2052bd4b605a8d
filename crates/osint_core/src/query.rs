use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Describes one article search. `limit == 0` means every matching document,
/// fetched page by page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub limit: usize,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    pub search_term: Option<String>,
    pub sources: BTreeSet<String>,
    pub ids: BTreeSet<String>,
    pub first_date: Option<DateTime<Utc>>,
    pub last_date: Option<DateTime<Utc>>,
    pub highlight: bool,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            sort_by: Some("publish_date".to_string()),
            sort_order: SortOrder::Desc,
            search_term: None,
            sources: BTreeSet::new(),
            ids: BTreeSet::new(),
            first_date: None,
            last_date: None,
            highlight: false,
        }
    }
}

impl SearchQuery {
    pub fn all() -> Self {
        Self {
            limit: 0,
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_search_term(mut self, term: impl Into<String>) -> Self {
        self.search_term = Some(term.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.insert(source.into());
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(field.into());
        self.sort_order = order;
        self
    }

    pub fn with_date_range(mut self, first: Option<DateTime<Utc>>, last: Option<DateTime<Utc>>) -> Self {
        self.first_date = first;
        self.last_date = last;
        self
    }

    pub fn highlighted(mut self) -> Self {
        self.highlight = true;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.limit == 0
    }
}
