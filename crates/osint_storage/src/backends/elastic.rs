//! Elasticsearch backend speaking the REST API directly.

use async_trait::async_trait;
use osint_core::config::EngineSettings;
use osint_core::storage::{
    BulkFailure, BulkResponse, EngineQuery, Filter, SearchEngine, SearchHit, SearchPage,
};
use osint_core::{Error, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use tracing::debug;

const UNIQUE_VALUES_LIMIT: usize = 10_000;

pub struct ElasticConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl From<&EngineSettings> for ElasticConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            url: settings.url.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        }
    }
}

pub struct ElasticEngine {
    client: reqwest::Client,
    config: ElasticConfig,
}

impl ElasticEngine {
    pub fn new(config: ElasticConfig) -> Result<Self> {
        url::Url::parse(&config.url).map_err(|e| Error::InvalidUrl(format!("{}: {}", config.url, e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            config,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.url.trim_end_matches('/'), path);
        let builder = self.client.request(method, url);
        match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_ref()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, Value)> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((status, body))
    }

    async fn send_ok(&self, builder: RequestBuilder, what: &str) -> Result<Value> {
        let (status, body) = self.send(builder).await?;
        if !status.is_success() {
            return Err(Error::Engine(format!("{} failed with {}: {}", what, status, error_reason(&body))));
        }
        Ok(body)
    }

    async fn bulk(&self, body: String) -> Result<BulkResponse> {
        if body.is_empty() {
            return Ok(BulkResponse::default());
        }
        let builder = self
            .request(Method::POST, "_bulk?refresh=wait_for")
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let response = self.send_ok(builder, "bulk request").await?;
        Ok(parse_bulk_response(&response))
    }
}

fn error_reason(body: &Value) -> String {
    body.pointer("/error/reason")
        .or_else(|| body.pointer("/error/type"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

fn filter_clause(filter: &Filter) -> Value {
    match filter {
        Filter::Terms { field, values } => json!({ "terms": { field: values } }),
        Filter::Ids(ids) => json!({ "ids": { "values": ids } }),
        Filter::Range { field, gte, lte } => {
            let mut range = Map::new();
            if let Some(gte) = gte {
                range.insert("gte".to_string(), json!(gte.to_rfc3339()));
            }
            if let Some(lte) = lte {
                range.insert("lte".to_string(), json!(lte.to_rfc3339()));
            }
            json!({ "range": { field: range } })
        }
    }
}

/// Translates an engine query into the Elasticsearch query DSL.
pub fn build_search_body(query: &EngineQuery) -> Value {
    let filters: Vec<Value> = query.filters.iter().map(filter_clause).collect();
    let must: Vec<Value> = query
        .text
        .iter()
        .map(|text| {
            json!({
                "multi_match": { "query": text.query, "fields": text.fields, "operator": "and" }
            })
        })
        .collect();

    let es_query = if filters.is_empty() && must.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": { "filter": filters, "must": must } })
    };

    let mut body = json!({
        "size": query.size,
        "query": es_query,
        "track_total_hits": true,
    });

    if !query.sort.is_empty() {
        body["sort"] = Value::Array(
            query
                .sort
                .iter()
                .map(|key| json!({ key.field.as_str(): { "order": key.order.as_str() } }))
                .collect(),
        );
    }
    if let Some(after) = &query.search_after {
        body["search_after"] = Value::Array(after.clone());
    }
    if let Some(fields) = &query.source_fields {
        body["_source"] = json!(fields);
    }
    if !query.highlight_fields.is_empty() {
        let fields: Map<String, Value> = query
            .highlight_fields
            .iter()
            .map(|f| (f.clone(), json!({})))
            .collect();
        body["highlight"] = json!({
            "pre_tags": ["<mark>"],
            "post_tags": ["</mark>"],
            "fields": fields,
        });
    }
    body
}

/// Overwrites each top-level field in `params.fields`. A partial `doc` update
/// would merge objects recursively and keep keys that are gone.
const REPLACE_FIELDS_SCRIPT: &str =
    "for (entry in params.fields.entrySet()) { ctx._source[entry.getKey()] = entry.getValue(); }";

pub enum BulkAction<'a> {
    Index(&'a [(String, Value)]),
    Update(&'a [(String, Value)]),
    Delete(&'a [String]),
}

/// Builds an NDJSON `_bulk` body.
pub fn build_bulk_body(index: &str, action: BulkAction<'_>) -> String {
    let mut body = String::new();
    let mut push = |line: Value| {
        body.push_str(&line.to_string());
        body.push('\n');
    };
    match action {
        BulkAction::Index(docs) => {
            for (id, doc) in docs {
                push(json!({ "index": { "_index": index, "_id": id } }));
                push(doc.clone());
            }
        }
        BulkAction::Update(docs) => {
            for (id, partial) in docs {
                push(json!({ "update": { "_index": index, "_id": id } }));
                push(json!({
                    "script": {
                        "lang": "painless",
                        "source": REPLACE_FIELDS_SCRIPT,
                        "params": { "fields": partial }
                    }
                }));
            }
        }
        BulkAction::Delete(ids) => {
            for id in ids {
                push(json!({ "delete": { "_index": index, "_id": id } }));
            }
        }
    }
    body
}

pub fn parse_bulk_response(body: &Value) -> BulkResponse {
    let mut response = BulkResponse::default();
    let items = body.get("items").and_then(Value::as_array);
    for item in items.into_iter().flatten() {
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        let id = result.get("_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(500);
        if (200..300).contains(&status) {
            response.succeeded += 1;
        } else {
            let reason = result
                .pointer("/error/reason")
                .or_else(|| result.pointer("/error/type"))
                .or_else(|| result.get("result"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            response.failures.push(BulkFailure { id, reason });
        }
    }
    response
}

pub fn parse_search_response(body: &Value) -> Result<SearchPage> {
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Engine(format!("malformed search response: {}", body)))?;
    let total = body
        .pointer("/hits/total/value")
        .or_else(|| body.pointer("/hits/total"))
        .and_then(Value::as_u64)
        .unwrap_or(hits.len() as u64);

    let hits = hits
        .iter()
        .map(|hit| SearchHit {
            id: hit.get("_id").and_then(Value::as_str).unwrap_or_default().to_string(),
            source: hit.get("_source").cloned().unwrap_or(Value::Null),
            highlight: hit
                .get("highlight")
                .cloned()
                .and_then(|h| serde_json::from_value(h).ok())
                .unwrap_or_default(),
            sort: hit
                .get("sort")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
        .collect();

    Ok(SearchPage { hits, total })
}

#[async_trait]
impl SearchEngine for ElasticEngine {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let (status, _) = self.send(self.request(Method::HEAD, index)).await?;
        match status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(Error::Engine(format!("checking index {} returned {}", index, other))),
        }
    }

    async fn create_index(&self, index: &str, mapping: &Value) -> Result<()> {
        let builder = self
            .request(Method::PUT, index)
            .json(&json!({ "mappings": mapping }));
        self.send_ok(builder, &format!("creating index {}", index)).await?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<bool> {
        let (status, body) = self.send(self.request(Method::DELETE, index)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(Error::Engine(format!("deleting index {} failed: {}", index, error_reason(&body))));
        }
        Ok(true)
    }

    async fn get_mapping(&self, index: &str) -> Result<Value> {
        let body = self
            .send_ok(self.request(Method::GET, &format!("{}/_mapping", index)), "reading mapping")
            .await?;
        body.get(index)
            .and_then(|i| i.get("mappings"))
            .cloned()
            .ok_or_else(|| Error::Engine(format!("no mapping returned for {}", index)))
    }

    async fn copy_index(&self, source: &str, dest: &str) -> Result<u64> {
        debug!(source, dest, "reindexing");
        let builder = self
            .request(Method::POST, "_reindex?refresh=true&wait_for_completion=true")
            .json(&json!({ "source": { "index": source }, "dest": { "index": dest } }));
        let body = self.send_ok(builder, "reindex").await?;
        let failures = body.get("failures").and_then(Value::as_array);
        if let Some(first) = failures.and_then(|f| f.first()) {
            return Err(Error::Engine(format!(
                "reindex from {} to {} reported {} failures, first: {}",
                source,
                dest,
                failures.map_or(0, Vec::len),
                first
            )));
        }
        Ok(body.get("total").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn bulk_index(&self, index: &str, docs: Vec<(String, Value)>) -> Result<BulkResponse> {
        self.bulk(build_bulk_body(index, BulkAction::Index(&docs))).await
    }

    async fn bulk_update(&self, index: &str, docs: Vec<(String, Value)>) -> Result<BulkResponse> {
        self.bulk(build_bulk_body(index, BulkAction::Update(&docs))).await
    }

    async fn bulk_delete(&self, index: &str, ids: Vec<String>) -> Result<BulkResponse> {
        self.bulk(build_bulk_body(index, BulkAction::Delete(&ids))).await
    }

    async fn search(&self, index: &str, query: &EngineQuery) -> Result<SearchPage> {
        let builder = self
            .request(Method::POST, &format!("{}/_search", index))
            .json(&build_search_body(query));
        let body = self.send_ok(builder, "search").await?;
        parse_search_response(&body)
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let body = self
            .send_ok(self.request(Method::GET, &format!("{}/_count", index)), "count")
            .await?;
        body.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Engine(format!("malformed count response: {}", body)))
    }

    async fn unique_values(&self, index: &str, field: &str) -> Result<Vec<String>> {
        let builder = self.request(Method::POST, &format!("{}/_search", index)).json(&json!({
            "size": 0,
            "aggs": { "values": { "terms": { "field": field, "size": UNIQUE_VALUES_LIMIT } } }
        }));
        let body = self.send_ok(builder, "terms aggregation").await?;
        Ok(body
            .pointer("/aggregations/values/buckets")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|bucket| bucket.get("key").and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osint_core::query::SortOrder;
    use osint_core::storage::{SortKey, TextMatch};

    #[test]
    fn test_match_all_when_unfiltered() {
        let body = build_search_body(&EngineQuery {
            size: 5,
            ..Default::default()
        });
        assert_eq!(body["query"], json!({ "match_all": {} }));
        assert_eq!(body["size"], 5);
        assert!(body.get("sort").is_none());
    }

    #[test]
    fn test_search_body_with_everything() {
        let body = build_search_body(&EngineQuery {
            filters: vec![Filter::Terms {
                field: "url".into(),
                values: vec!["https://example.com/a".into()],
            }],
            text: Some(TextMatch {
                query: "ransomware".into(),
                fields: vec!["title".into(), "content".into()],
            }),
            sort: vec![
                SortKey::new("publish_date", SortOrder::Desc),
                SortKey::new("id", SortOrder::Asc),
            ],
            size: 100,
            search_after: Some(vec![json!(1700000000000u64), json!("abc")]),
            source_fields: Some(vec!["url".into()]),
            highlight_fields: vec!["content".into()],
        });
        assert_eq!(
            body["query"]["bool"]["filter"][0],
            json!({ "terms": { "url": ["https://example.com/a"] } })
        );
        assert_eq!(body["query"]["bool"]["must"][0]["multi_match"]["query"], "ransomware");
        assert_eq!(body["sort"][0], json!({ "publish_date": { "order": "desc" } }));
        assert_eq!(body["search_after"][1], "abc");
        assert_eq!(body["_source"], json!(["url"]));
        assert!(body["highlight"]["fields"].get("content").is_some());
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let docs = vec![("1".to_string(), json!({ "title": "a" }))];
        let body = build_bulk_body("articles", BulkAction::Update(&docs));
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<Value>(lines[0]).unwrap(),
            json!({ "update": { "_index": "articles", "_id": "1" } })
        );
        let update: Value = serde_json::from_str(lines[1]).unwrap();
        assert!(update.get("doc").is_none());
        assert_eq!(update["script"]["params"]["fields"], json!({ "title": "a" }));
        assert!(update["script"]["source"].as_str().unwrap().contains("ctx._source[entry.getKey()]"));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_bulk_response_counts_partial_failure() {
        let body = json!({
            "errors": true,
            "items": [
                { "index": { "_id": "1", "status": 201, "result": "created" } },
                { "index": { "_id": "2", "status": 200, "result": "updated" } },
                { "index": { "_id": "3", "status": 400,
                    "error": { "type": "mapper_parsing_exception", "reason": "failed to parse field [publish_date]" } } }
            ]
        });
        let response = parse_bulk_response(&body);
        assert_eq!(response.succeeded, 2);
        assert_eq!(response.failures.len(), 1);
        assert_eq!(response.failures[0].id, "3");
        assert!(response.failures[0].reason.contains("publish_date"));
    }

    #[test]
    fn test_search_response() {
        let body = json!({
            "hits": {
                "total": { "value": 42, "relation": "eq" },
                "hits": [
                    { "_id": "x", "_source": { "url": "u" }, "sort": [1, "x"],
                      "highlight": { "content": ["a <mark>b</mark>"] } }
                ]
            }
        });
        let page = parse_search_response(&body).unwrap();
        assert_eq!(page.total, 42);
        assert_eq!(page.hits[0].id, "x");
        assert_eq!(page.hits[0].sort, vec![json!(1), json!("x")]);
        assert_eq!(page.hits[0].highlight["content"], vec!["a <mark>b</mark>".to_string()]);
        assert!(parse_search_response(&json!({ "error": "x" })).is_err());
    }
}
