use std::fmt;
use std::str::FromStr;

use osint_core::Error;
use serde_json::{json, Value};

/// Logical indices the application knows a mapping for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Articles,
}

impl IndexKind {
    pub fn mapping(&self) -> Value {
        match self {
            IndexKind::Articles => article_mapping(),
        }
    }
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "article" | "articles" => Ok(IndexKind::Articles),
            other => Err(Error::Config(format!("unknown index kind \"{}\"", other))),
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Articles => write!(f, "articles"),
        }
    }
}

pub fn article_mapping() -> Value {
    json!({
        "dynamic": "strict",
        "properties": {
            "id": { "type": "keyword" },
            "url": { "type": "keyword" },
            "profile": { "type": "keyword" },
            "source": { "type": "keyword" },
            "title": { "type": "text" },
            "description": { "type": "text" },
            "author": { "type": "keyword" },
            "image_url": { "type": "keyword", "index": false },
            "publish_date": { "type": "date" },
            "inserted_at": { "type": "date" },
            "content": { "type": "text" },
            "formatted_content": { "type": "text", "index": false },
            "tags": {
                "properties": {
                    "automatic": { "type": "keyword" },
                    "interesting": {
                        "properties": {
                            "name": { "type": "keyword" },
                            "values": { "type": "keyword" }
                        }
                    },
                    "manual": { "type": "flattened" }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use osint_core::Article;

    #[test]
    fn test_article_mapping_covers_article_fields() {
        let mut article = Article::new("https://example.com/a", "example", "Example");
        article.author = Some("Jane".to_string());
        let doc = serde_json::to_value(&article).unwrap();
        let mapping = article_mapping();
        for key in doc.as_object().unwrap().keys() {
            assert!(mapping["properties"].get(key).is_some(), "unmapped field {}", key);
        }
    }

    #[test]
    fn test_index_kind_parse() {
        assert_eq!("articles".parse::<IndexKind>().unwrap(), IndexKind::Articles);
        assert_eq!("ARTICLE".parse::<IndexKind>().unwrap(), IndexKind::Articles);
        assert!("tweets".parse::<IndexKind>().is_err());
    }
}
