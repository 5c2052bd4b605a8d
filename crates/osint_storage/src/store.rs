use std::collections::{BTreeMap, HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use osint_core::config::DEFAULT_CHUNK_SIZE;
use osint_core::query::SortOrder;
use osint_core::storage::{EngineQuery, Filter, SearchEngine, SortKey, TextMatch};
use osint_core::{Document, Error, Result, SearchQuery};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

/// Page size used when a query asks for every document.
pub const PAGE_SIZE: usize = 1000;

/// A stored document that no longer deserializes into the document type.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidDocument {
    pub id: String,
    pub source: Value,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct QueryResult<D> {
    pub documents: Vec<D>,
    /// Highlighted fragments per document id, when requested.
    pub highlights: HashMap<String, BTreeMap<String, Vec<String>>>,
    pub invalid: Vec<InvalidDocument>,
}

impl<D> Default for QueryResult<D> {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            highlights: HashMap::new(),
            invalid: Vec::new(),
        }
    }
}

/// Typed, deduplicating access to one index of a search engine.
pub struct DocumentStore<D: Document> {
    engine: Arc<dyn SearchEngine>,
    index: String,
    chunk_size: usize,
    _document: PhantomData<fn() -> D>,
}

impl<D: Document> Clone for DocumentStore<D> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            index: self.index.clone(),
            chunk_size: self.chunk_size,
            _document: PhantomData,
        }
    }
}

impl<D: Document> DocumentStore<D> {
    pub fn new(engine: Arc<dyn SearchEngine>, index: impl Into<String>) -> Self {
        Self {
            engine,
            index: index.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            _document: PhantomData,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    /// Creates the index with `mapping` unless it already exists. Returns
    /// whether it was created.
    pub async fn ensure_index(&self, mapping: &Value) -> Result<bool> {
        if self.engine.index_exists(&self.index).await? {
            debug!(index = %self.index, "index already exists");
            return Ok(false);
        }
        self.engine.create_index(&self.index, mapping).await?;
        Ok(true)
    }

    pub async fn exists(&self, unique_value: &str) -> Result<bool> {
        let unseen = self.filter_unseen(&[unique_value.to_string()]).await?;
        Ok(unseen.is_empty())
    }

    /// Returns the values not yet stored, in input order and without
    /// duplicates. Lookups are batched `chunk_size` values at a time.
    pub async fn filter_unseen(&self, values: &[String]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let candidates: Vec<String> = values
            .iter()
            .filter(|v| seen.insert(v.as_str()))
            .cloned()
            .collect();

        let mut stored: HashSet<String> = HashSet::new();
        for chunk in candidates.chunks(self.chunk_size) {
            let mut query = EngineQuery {
                filters: vec![Filter::Terms {
                    field: D::UNIQUE_FIELD.to_string(),
                    values: chunk.to_vec(),
                }],
                sort: vec![SortKey::new(D::ID_FIELD, SortOrder::Asc)],
                size: chunk.len(),
                source_fields: Some(vec![D::UNIQUE_FIELD.to_string()]),
                ..Default::default()
            };
            // Documents sharing a unique value can fill a page, so keep going
            // until a short page comes back.
            loop {
                let page = self.engine.search(&self.index, &query).await?;
                let full = page.hits.len() == query.size;
                query.search_after = page.hits.last().map(|hit| hit.sort.clone());
                stored.extend(
                    page.hits
                        .iter()
                        .filter_map(|hit| hit.source.get(D::UNIQUE_FIELD))
                        .filter_map(Value::as_str)
                        .map(str::to_string),
                );
                if !full {
                    break;
                }
            }
        }

        Ok(candidates.into_iter().filter(|v| !stored.contains(v)).collect())
    }

    /// Upserts one document, returning its id. Saving the same document twice
    /// overwrites it.
    pub async fn save(&self, doc: &D) -> Result<String> {
        let id = doc.id();
        let response = self
            .engine
            .bulk_index(&self.index, vec![(id.clone(), serde_json::to_value(doc)?)])
            .await?;
        if let Some(failure) = response.failures.first() {
            return Err(Error::Storage(format!(
                "saving {} failed: {}",
                doc.unique_value(),
                failure.reason
            )));
        }
        Ok(id)
    }

    /// Upserts documents chunk by chunk and returns how many were stored.
    /// Failed documents and failed chunks are logged and skipped.
    pub async fn save_batch(&self, docs: &[D]) -> Result<usize> {
        let mut last_error = None;
        let mut saved = 0;
        for chunk in docs.chunks(self.chunk_size) {
            let payload: Vec<(String, Value)> = chunk
                .iter()
                .filter_map(|doc| match serde_json::to_value(doc) {
                    Ok(value) => Some((doc.id(), value)),
                    Err(e) => {
                        warn!(document = doc.unique_value(), error = %e, "could not serialize document");
                        None
                    }
                })
                .collect();
            match self.engine.bulk_index(&self.index, payload).await {
                Ok(response) => {
                    for failure in &response.failures {
                        warn!(id = %failure.id, reason = %failure.reason, "document rejected");
                    }
                    saved += response.succeeded;
                }
                Err(e) => {
                    error!(index = %self.index, error = %e, "bulk save of chunk failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if saved == 0 => Err(e),
            _ => Ok(saved),
        }
    }

    /// Writes only `fields` of each document, leaving the rest of the stored
    /// document untouched. Returns how many documents were updated.
    pub async fn update_batch(&self, docs: &[D], fields: &[&str]) -> Result<usize> {
        let mut last_error = None;
        let mut updated = 0;
        for chunk in docs.chunks(self.chunk_size) {
            let mut payload = Vec::with_capacity(chunk.len());
            for doc in chunk {
                let value = serde_json::to_value(doc)?;
                let partial: Map<String, Value> = fields
                    .iter()
                    .filter_map(|f| value.get(*f).map(|v| (f.to_string(), v.clone())))
                    .collect();
                payload.push((doc.id(), Value::Object(partial)));
            }
            match self.engine.bulk_update(&self.index, payload).await {
                Ok(response) => {
                    for failure in &response.failures {
                        warn!(id = %failure.id, reason = %failure.reason, "update rejected");
                    }
                    updated += response.succeeded;
                }
                Err(e) => {
                    error!(index = %self.index, error = %e, "bulk update of chunk failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if updated == 0 => Err(e),
            _ => Ok(updated),
        }
    }

    pub async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for chunk in ids.chunks(self.chunk_size) {
            deleted += self.engine.bulk_delete(&self.index, chunk.to_vec()).await?.succeeded;
        }
        Ok(deleted)
    }

    pub async fn get(&self, id: &str) -> Result<Option<D>> {
        let query = EngineQuery {
            filters: vec![Filter::Ids(vec![id.to_string()])],
            size: 1,
            ..Default::default()
        };
        let page = self.engine.search(&self.index, &query).await?;
        page.hits
            .into_iter()
            .next()
            .map(|hit| serde_json::from_value(hit.source).map_err(Error::from))
            .transpose()
    }

    pub async fn count(&self) -> Result<u64> {
        self.engine.count(&self.index).await
    }

    pub async fn unique_values(&self, field: &str) -> Result<Vec<String>> {
        self.engine.unique_values(&self.index, field).await
    }

    pub async fn query_all(&self) -> Result<QueryResult<D>> {
        self.query(&SearchQuery::all()).await
    }

    /// Runs a search. Documents that fail to deserialize are returned in
    /// `invalid` instead of failing the query.
    pub async fn query(&self, search: &SearchQuery) -> Result<QueryResult<D>> {
        let mut base = engine_query::<D>(search);
        let wanted = if search.is_unbounded() { usize::MAX } else { search.limit };
        let mut result = QueryResult::default();
        let mut fetched = 0;

        loop {
            let size = (wanted - fetched).min(PAGE_SIZE);
            base.size = size;
            let page = self.engine.search(&self.index, &base).await?;
            let count = page.hits.len();
            base.search_after = page.hits.last().map(|hit| hit.sort.clone());

            for hit in page.hits {
                match serde_json::from_value::<D>(hit.source.clone()) {
                    Ok(doc) => {
                        if !hit.highlight.is_empty() {
                            result.highlights.insert(hit.id.clone(), hit.highlight);
                        }
                        result.documents.push(doc);
                    }
                    Err(e) => result.invalid.push(InvalidDocument {
                        id: hit.id,
                        source: hit.source,
                        error: e.to_string(),
                    }),
                }
            }

            fetched += count;
            if count < size || fetched >= wanted {
                break;
            }
        }

        debug!(
            index = %self.index,
            documents = result.documents.len(),
            invalid = result.invalid.len(),
            "query finished"
        );
        Ok(result)
    }
}

fn engine_query<D: Document>(search: &SearchQuery) -> EngineQuery {
    let mut filters = Vec::new();
    if let Some(field) = D::SOURCE_FIELD {
        if !search.sources.is_empty() {
            filters.push(Filter::Terms {
                field: field.to_string(),
                values: search.sources.iter().cloned().collect(),
            });
        }
    }
    if !search.ids.is_empty() {
        filters.push(Filter::Ids(search.ids.iter().cloned().collect()));
    }
    if let Some(field) = D::DATE_FIELD {
        if search.first_date.is_some() || search.last_date.is_some() {
            filters.push(Filter::Range {
                field: field.to_string(),
                gte: search.first_date,
                lte: search.last_date,
            });
        }
    }

    let search_fields: Vec<String> = D::SEARCH_FIELDS.iter().map(|f| f.to_string()).collect();
    let text = search
        .search_term
        .as_ref()
        .filter(|term| !term.trim().is_empty() && !search_fields.is_empty())
        .map(|term| TextMatch {
            query: term.clone(),
            fields: search_fields.clone(),
        });

    let mut sort = Vec::new();
    if let Some(field) = &search.sort_by {
        if field != D::ID_FIELD {
            sort.push(SortKey::new(field.clone(), search.sort_order));
        }
    }
    // Unique tie-breaker so search_after pagination never skips or repeats.
    sort.push(SortKey::new(D::ID_FIELD, SortOrder::Asc));

    let highlight_fields = if search.highlight && text.is_some() {
        search_fields
    } else {
        Vec::new()
    };

    EngineQuery {
        filters,
        text,
        sort,
        size: 0,
        search_after: None,
        source_fields: None,
        highlight_fields,
    }
}
