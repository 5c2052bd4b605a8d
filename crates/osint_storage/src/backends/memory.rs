use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use osint_core::query::SortOrder;
use osint_core::storage::{
    BulkFailure, BulkResponse, EngineQuery, Filter, SearchEngine, SearchHit, SearchPage, SortKey,
};
use osint_core::{Error, Result};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

const FRAGMENT_RADIUS: usize = 60;

/// Operations that can be made to fail on demand, for exercising recovery paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The next copy whose destination is this index.
    CopyInto(String),
    /// The next bulk write into this index.
    Bulk(String),
    /// The next search against this index.
    Search(String),
    /// The next index creation with this name.
    Create(String),
}

#[derive(Debug, Clone, Default)]
struct MemoryIndex {
    mapping: Value,
    docs: BTreeMap<String, Value>,
}

/// A search engine living entirely in process memory. Mirrors the parts of
/// Elasticsearch semantics the store relies on, including `"dynamic": "strict"`
/// mappings rejecting unknown fields.
#[derive(Default)]
pub struct MemoryEngine {
    indices: RwLock<HashMap<String, MemoryIndex>>,
    faults: Mutex<Vec<Fault>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, fault: Fault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(fault);
        }
    }

    fn trip(&self, fault: Fault) -> Result<()> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| Error::Engine("fault registry poisoned".to_string()))?;
        if let Some(pos) = faults.iter().position(|f| *f == fault) {
            faults.remove(pos);
            return Err(Error::Engine(format!("injected failure: {:?}", fault)));
        }
        Ok(())
    }

    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        let indices = self.indices.read().await;
        indices.get(index).and_then(|i| i.docs.get(id).cloned())
    }
}

fn missing_index(index: &str) -> Error {
    Error::Engine(format!("index_not_found_exception: no such index [{}]", index))
}

fn check_strict(mapping: &Value, doc: &Value) -> std::result::Result<(), String> {
    if mapping.get("dynamic").and_then(Value::as_str) != Some("strict") {
        return Ok(());
    }
    let properties = mapping.get("properties").and_then(Value::as_object);
    let fields = doc.as_object().ok_or_else(|| "document is not an object".to_string())?;
    for key in fields.keys() {
        if !properties.map_or(false, |p| p.contains_key(key)) {
            return Err(format!(
                "strict_dynamic_mapping_exception: mapping set to strict, dynamic introduction of [{}] is not allowed",
                key
            ));
        }
    }
    Ok(())
}

fn field<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, key| value.get(key))
}

fn as_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(as_strings).collect(),
        Value::Null => vec![],
        other => vec![other.to_string()],
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

fn compare_keys(a: &[Value], b: &[Value], sort: &[SortKey]) -> Ordering {
    for (i, key) in sort.iter().enumerate() {
        let ordering = compare_values(&a[i], &b[i]);
        let ordering = match key.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn matches_filter(id: &str, doc: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Ids(ids) => ids.iter().any(|i| i == id),
        Filter::Terms { field: name, values } => field(doc, name)
            .map(as_strings)
            .map_or(false, |found| found.iter().any(|f| values.contains(f))),
        Filter::Range { field: name, gte, lte } => {
            let Some(date) = field(doc, name).and_then(parse_date) else {
                return false;
            };
            gte.map_or(true, |gte| date >= gte) && lte.map_or(true, |lte| date <= lte)
        }
    }
}

fn text_of(doc: &Value, fields: &[String]) -> String {
    fields
        .iter()
        .filter_map(|f| field(doc, f))
        .flat_map(as_strings)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn highlight_fragment(text: &str, terms: &[String]) -> Option<String> {
    let lower = text.to_lowercase();
    // Lowercasing can change byte lengths outside ASCII; only highlight when
    // offsets line up.
    if lower.len() != text.len() {
        return None;
    }
    let (start, term) = terms
        .iter()
        .filter_map(|t| lower.find(t.as_str()).map(|pos| (pos, t)))
        .min_by_key(|(pos, _)| *pos)?;

    let mut from = start.saturating_sub(FRAGMENT_RADIUS);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (start + term.len() + FRAGMENT_RADIUS).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }

    let fragment = &text[from..to];
    let lower_fragment = &lower[from..to];
    let mut out = String::with_capacity(fragment.len() + 16);
    let mut cursor = 0;
    while cursor < fragment.len() {
        let next = terms
            .iter()
            .filter_map(|t| lower_fragment[cursor..].find(t.as_str()).map(|p| (cursor + p, t.len())))
            .min_by_key(|(p, _)| *p);
        match next {
            Some((pos, len)) => {
                out.push_str(&fragment[cursor..pos]);
                out.push_str("<mark>");
                out.push_str(&fragment[pos..pos + len]);
                out.push_str("</mark>");
                cursor = pos + len;
            }
            None => {
                out.push_str(&fragment[cursor..]);
                break;
            }
        }
    }
    Some(out)
}

fn project(doc: &Value, fields: &Option<Vec<String>>) -> Value {
    match (fields, doc.as_object()) {
        (Some(fields), Some(object)) => Value::Object(
            object
                .iter()
                .filter(|(k, _)| fields.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<_, _>>(),
        ),
        _ => doc.clone(),
    }
}

#[async_trait]
impl SearchEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self.indices.read().await.contains_key(index))
    }

    async fn create_index(&self, index: &str, mapping: &Value) -> Result<()> {
        self.trip(Fault::Create(index.to_string()))?;
        let mut indices = self.indices.write().await;
        if indices.contains_key(index) {
            return Err(Error::Engine(format!(
                "resource_already_exists_exception: index [{}] already exists",
                index
            )));
        }
        indices.insert(
            index.to_string(),
            MemoryIndex {
                mapping: mapping.clone(),
                docs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<bool> {
        Ok(self.indices.write().await.remove(index).is_some())
    }

    async fn get_mapping(&self, index: &str) -> Result<Value> {
        let indices = self.indices.read().await;
        indices
            .get(index)
            .map(|i| i.mapping.clone())
            .ok_or_else(|| missing_index(index))
    }

    async fn copy_index(&self, source: &str, dest: &str) -> Result<u64> {
        self.trip(Fault::CopyInto(dest.to_string()))?;
        let mut indices = self.indices.write().await;
        let docs = indices
            .get(source)
            .map(|i| i.docs.clone())
            .ok_or_else(|| missing_index(source))?;
        let target = indices.entry(dest.to_string()).or_insert_with(|| MemoryIndex {
            mapping: Value::Object(Map::new()),
            docs: BTreeMap::new(),
        });

        let mut copied = 0;
        let mut failures = Vec::new();
        for (id, doc) in docs {
            match check_strict(&target.mapping, &doc) {
                Ok(()) => {
                    target.docs.insert(id, doc);
                    copied += 1;
                }
                Err(reason) => failures.push(reason),
            }
        }
        if let Some(first) = failures.first() {
            return Err(Error::Engine(format!(
                "copy from [{}] to [{}] had {} failures, first: {}",
                source,
                dest,
                failures.len(),
                first
            )));
        }
        Ok(copied)
    }

    async fn bulk_index(&self, index: &str, docs: Vec<(String, Value)>) -> Result<BulkResponse> {
        self.trip(Fault::Bulk(index.to_string()))?;
        let mut indices = self.indices.write().await;
        // Writing to a missing index creates it, as Elasticsearch does.
        let target = indices.entry(index.to_string()).or_default();
        let mut response = BulkResponse::default();
        for (id, doc) in docs {
            match check_strict(&target.mapping, &doc) {
                Ok(()) => {
                    target.docs.insert(id, doc);
                    response.succeeded += 1;
                }
                Err(reason) => response.failures.push(BulkFailure { id, reason }),
            }
        }
        Ok(response)
    }

    async fn bulk_update(&self, index: &str, docs: Vec<(String, Value)>) -> Result<BulkResponse> {
        self.trip(Fault::Bulk(index.to_string()))?;
        let mut indices = self.indices.write().await;
        let target = indices.get_mut(index).ok_or_else(|| missing_index(index))?;
        let mut response = BulkResponse::default();
        for (id, partial) in docs {
            let Some(existing) = target.docs.get(&id) else {
                response.failures.push(BulkFailure {
                    id: id.clone(),
                    reason: format!("document_missing_exception: [{}]: document missing", id),
                });
                continue;
            };
            // Named fields are replaced whole; nested objects are not merged.
            let mut merged = existing.clone();
            if let (Some(object), Some(fields)) = (merged.as_object_mut(), partial.as_object()) {
                for (k, v) in fields {
                    object.insert(k.clone(), v.clone());
                }
            }
            match check_strict(&target.mapping, &merged) {
                Ok(()) => {
                    target.docs.insert(id, merged);
                    response.succeeded += 1;
                }
                Err(reason) => response.failures.push(BulkFailure { id, reason }),
            }
        }
        Ok(response)
    }

    async fn bulk_delete(&self, index: &str, ids: Vec<String>) -> Result<BulkResponse> {
        self.trip(Fault::Bulk(index.to_string()))?;
        let mut indices = self.indices.write().await;
        let target = indices.get_mut(index).ok_or_else(|| missing_index(index))?;
        let mut response = BulkResponse::default();
        for id in ids {
            if target.docs.remove(&id).is_some() {
                response.succeeded += 1;
            } else {
                response.failures.push(BulkFailure {
                    id,
                    reason: "not_found".to_string(),
                });
            }
        }
        Ok(response)
    }

    async fn search(&self, index: &str, query: &EngineQuery) -> Result<SearchPage> {
        self.trip(Fault::Search(index.to_string()))?;
        let indices = self.indices.read().await;
        let target = indices.get(index).ok_or_else(|| missing_index(index))?;

        let terms: Vec<String> = query
            .text
            .as_ref()
            .map(|t| t.query.to_lowercase().split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let mut matched: Vec<(&String, &Value, Vec<Value>)> = target
            .docs
            .iter()
            .filter(|(id, doc)| query.filters.iter().all(|f| matches_filter(id, doc, f)))
            .filter(|(_, doc)| match &query.text {
                Some(text) => {
                    let haystack = text_of(doc, &text.fields);
                    terms.iter().all(|t| haystack.contains(t.as_str()))
                }
                None => true,
            })
            .map(|(id, doc)| {
                let sort_values = query
                    .sort
                    .iter()
                    .map(|key| field(doc, &key.field).cloned().unwrap_or(Value::Null))
                    .collect();
                (id, doc, sort_values)
            })
            .collect();

        let total = matched.len() as u64;
        matched.sort_by(|a, b| compare_keys(&a.2, &b.2, &query.sort));

        if let Some(after) = &query.search_after {
            if after.len() != query.sort.len() {
                return Err(Error::Engine(
                    "search_after must have as many values as the sort".to_string(),
                ));
            }
            matched.retain(|(_, _, values)| compare_keys(values, after, &query.sort) == Ordering::Greater);
        }

        let hits = matched
            .into_iter()
            .take(query.size)
            .map(|(id, doc, sort)| {
                let highlight = query
                    .highlight_fields
                    .iter()
                    .filter_map(|name| {
                        let text = field(doc, name)?.as_str()?;
                        highlight_fragment(text, &terms).map(|fragment| (name.clone(), vec![fragment]))
                    })
                    .collect();
                SearchHit {
                    id: id.clone(),
                    source: project(doc, &query.source_fields),
                    highlight,
                    sort,
                }
            })
            .collect();

        Ok(SearchPage { hits, total })
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let indices = self.indices.read().await;
        indices
            .get(index)
            .map(|i| i.docs.len() as u64)
            .ok_or_else(|| missing_index(index))
    }

    async fn unique_values(&self, index: &str, name: &str) -> Result<Vec<String>> {
        let indices = self.indices.read().await;
        let target = indices.get(index).ok_or_else(|| missing_index(index))?;
        let values: BTreeSet<String> = target
            .docs
            .values()
            .filter_map(|doc| field(doc, name))
            .flat_map(as_strings)
            .collect();
        Ok(values.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osint_core::storage::TextMatch;
    use serde_json::json;

    async fn seeded() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.create_index("articles", &json!({})).await.unwrap();
        engine
            .bulk_index(
                "articles",
                vec![
                    ("a".into(), json!({"id": "a", "profile": "one", "content": "Ransomware hits hospital", "publish_date": "2024-01-01T00:00:00Z"})),
                    ("b".into(), json!({"id": "b", "profile": "two", "content": "Patch Tuesday roundup", "publish_date": "2024-02-01T00:00:00Z"})),
                    ("c".into(), json!({"id": "c", "profile": "one", "content": "New ransomware strain", "publish_date": "2024-03-01T00:00:00Z"})),
                ],
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_terms_filter_and_sort() {
        let engine = seeded().await;
        let query = EngineQuery {
            filters: vec![Filter::Terms {
                field: "profile".into(),
                values: vec!["one".into()],
            }],
            sort: vec![SortKey::new("publish_date", SortOrder::Desc)],
            size: 10,
            ..Default::default()
        };
        let page = engine.search("articles", &query).await.unwrap();
        assert_eq!(page.total, 2);
        let ids: Vec<_> = page.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_search_after_pages() {
        let engine = seeded().await;
        let mut query = EngineQuery {
            sort: vec![SortKey::new("id", SortOrder::Asc)],
            size: 2,
            ..Default::default()
        };
        let first = engine.search("articles", &query).await.unwrap();
        assert_eq!(first.hits.len(), 2);
        query.search_after = Some(first.hits[1].sort.clone());
        let second = engine.search("articles", &query).await.unwrap();
        assert_eq!(second.hits.len(), 1);
        assert_eq!(second.hits[0].id, "c");
    }

    #[tokio::test]
    async fn test_text_match_with_highlight() {
        let engine = seeded().await;
        let query = EngineQuery {
            text: Some(TextMatch {
                query: "ransomware".into(),
                fields: vec!["content".into()],
            }),
            highlight_fields: vec!["content".into()],
            size: 10,
            ..Default::default()
        };
        let page = engine.search("articles", &query).await.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.hits[0].highlight["content"][0].contains("<mark>"));
    }

    #[tokio::test]
    async fn test_strict_mapping_rejects_unknown_fields() {
        let engine = MemoryEngine::new();
        engine
            .create_index("strict", &json!({"dynamic": "strict", "properties": {"id": {"type": "keyword"}}}))
            .await
            .unwrap();
        let response = engine
            .bulk_index(
                "strict",
                vec![
                    ("a".into(), json!({"id": "a"})),
                    ("b".into(), json!({"id": "b", "extra": true})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(response.succeeded, 1);
        assert_eq!(response.failures[0].id, "b");
    }

    #[tokio::test]
    async fn test_partial_update_and_missing_document() {
        let engine = seeded().await;
        let response = engine
            .bulk_update(
                "articles",
                vec![
                    ("a".into(), json!({"profile": "three"})),
                    ("zzz".into(), json!({"profile": "three"})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(response.succeeded, 1);
        assert_eq!(response.failures.len(), 1);
        let doc = engine.document("articles", "a").await.unwrap();
        assert_eq!(doc["profile"], "three");
        assert_eq!(doc["content"], "Ransomware hits hospital");
    }

    #[tokio::test]
    async fn test_update_replaces_nested_objects() {
        let engine = seeded().await;
        engine
            .bulk_update(
                "articles",
                vec![("a".into(), json!({"tags": {"manual": {"sectors": ["Healthcare"]}}}))],
            )
            .await
            .unwrap();
        engine
            .bulk_update("articles", vec![("a".into(), json!({"tags": {"manual": {}}}))])
            .await
            .unwrap();
        let doc = engine.document("articles", "a").await.unwrap();
        assert_eq!(doc["tags"], json!({"manual": {}}));
    }

    #[tokio::test]
    async fn test_dates_sort_by_instant() {
        let engine = MemoryEngine::new();
        engine.create_index("articles", &json!({})).await.unwrap();
        engine
            .bulk_index(
                "articles",
                vec![
                    ("whole".into(), json!({"publish_date": "2024-01-01T00:00:00Z"})),
                    ("half".into(), json!({"publish_date": "2024-01-01T00:00:00.500Z"})),
                    ("offset".into(), json!({"publish_date": "2024-01-01T00:00:00.250+00:00"})),
                ],
            )
            .await
            .unwrap();
        let query = EngineQuery {
            sort: vec![SortKey::new("publish_date", SortOrder::Asc)],
            size: 10,
            ..Default::default()
        };
        let page = engine.search("articles", &query).await.unwrap();
        let ids: Vec<_> = page.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["whole", "offset", "half"]);
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let engine = seeded().await;
        engine.fail_next(Fault::CopyInto("backup".into()));
        assert!(engine.copy_index("articles", "backup").await.is_err());
        assert_eq!(engine.copy_index("articles", "backup").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unique_values() {
        let engine = seeded().await;
        assert_eq!(
            engine.unique_values("articles", "profile").await.unwrap(),
            vec!["one".to_string(), "two".to_string()]
        );
    }
}
