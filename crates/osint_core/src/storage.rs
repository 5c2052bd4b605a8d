//! The boundary between the document store and the search engine that backs it.
//!
//! Backends speak in raw JSON documents keyed by id; typing happens one layer up
//! in the document store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::query::SortOrder;
use crate::Result;

/// A document type that can live in the store.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Field holding the natural key used for dedup, e.g. `url` for articles.
    const UNIQUE_FIELD: &'static str;

    /// Source field holding the id, used as the pagination tie-breaker.
    const ID_FIELD: &'static str = "id";

    /// Fields searched by free-text queries.
    const SEARCH_FIELDS: &'static [&'static str] = &[];

    /// Field filtered by a query's source set.
    const SOURCE_FIELD: Option<&'static str> = None;

    /// Field filtered by a query's date range.
    const DATE_FIELD: Option<&'static str> = None;

    /// Identifier under which the document is stored. Must be a pure function
    /// of the unique value.
    fn id(&self) -> String;

    fn unique_value(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Exact match of a keyword field against any of `values`.
    Terms { field: String, values: Vec<String> },
    Ids(Vec<String>),
    /// Inclusive date range over a date field.
    Range {
        field: String,
        gte: Option<DateTime<Utc>>,
        lte: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    pub query: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }
}

/// One page of a search, expressed independently of any engine's query DSL.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineQuery {
    pub filters: Vec<Filter>,
    pub text: Option<TextMatch>,
    pub sort: Vec<SortKey>,
    pub size: usize,
    /// Sort values of the last hit of the previous page.
    pub search_after: Option<Vec<Value>>,
    /// Restrict returned `_source` to these fields.
    pub source_fields: Option<Vec<String>>,
    pub highlight_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub source: Value,
    pub highlight: BTreeMap<String, Vec<String>>,
    pub sort: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of a bulk call. Partial failure is reported, never raised.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkResponse {
    pub succeeded: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkResponse {
    pub fn merge(&mut self, other: BulkResponse) {
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    async fn create_index(&self, index: &str, mapping: &Value) -> Result<()>;

    /// Returns `false` if the index did not exist.
    async fn delete_index(&self, index: &str) -> Result<bool>;

    async fn get_mapping(&self, index: &str) -> Result<Value>;

    /// Copies every document of `source` into `dest`, returning the number copied.
    /// Any per-document failure fails the whole call.
    async fn copy_index(&self, source: &str, dest: &str) -> Result<u64>;

    /// Creates or replaces whole documents.
    async fn bulk_index(&self, index: &str, docs: Vec<(String, Value)>) -> Result<BulkResponse>;

    /// Replaces the given top-level fields of existing documents. Object
    /// values overwrite the stored object instead of merging into it.
    async fn bulk_update(&self, index: &str, docs: Vec<(String, Value)>) -> Result<BulkResponse>;

    async fn bulk_delete(&self, index: &str, ids: Vec<String>) -> Result<BulkResponse>;

    async fn search(&self, index: &str, query: &EngineQuery) -> Result<SearchPage>;

    async fn count(&self, index: &str) -> Result<u64>;

    /// Distinct values of a keyword field.
    async fn unique_values(&self, index: &str, field: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_merge() {
        let mut total = BulkResponse {
            succeeded: 2,
            failures: vec![],
        };
        total.merge(BulkResponse {
            succeeded: 1,
            failures: vec![BulkFailure {
                id: "a".into(),
                reason: "mapper_parsing_exception".into(),
            }],
        });
        assert_eq!(total.succeeded, 3);
        assert_eq!(total.failures.len(), 1);
    }
}
