use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::storage::Document;

/// Derives the stable identifier of an article from its URL.
pub fn article_id(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// A named group of indicators found in an article, e.g. all CVE ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsOfInterest {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleTags {
    #[serde(default)]
    pub automatic: Vec<String>,
    #[serde(default)]
    pub interesting: Vec<TagsOfInterest>,
    /// Keyword-file name to the tags it matched.
    #[serde(default)]
    pub manual: BTreeMap<String, Vec<String>>,
}

impl ArticleTags {
    pub fn interesting(&self, name: &str) -> Option<&[String]> {
        self.interesting
            .iter()
            .find(|group| group.name == name)
            .map(|group| group.values.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub url: String,
    pub profile: String,
    pub source: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub image_url: String,
    pub publish_date: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub formatted_content: String,
    #[serde(default)]
    pub tags: ArticleTags,
}

impl Article {
    /// Creates an article whose id is derived from `url`.
    pub fn new(url: impl Into<String>, profile: impl Into<String>, source: impl Into<String>) -> Self {
        let url = url.into();
        let now = Utc::now();
        Self {
            id: article_id(&url),
            url,
            profile: profile.into(),
            source: source.into(),
            title: String::new(),
            description: String::new(),
            author: None,
            image_url: String::new(),
            publish_date: now,
            inserted_at: now,
            content: String::new(),
            formatted_content: String::new(),
            tags: ArticleTags::default(),
        }
    }

    /// True when the stored id no longer matches the one derived from the URL.
    pub fn has_stale_id(&self) -> bool {
        self.id != article_id(&self.url)
    }
}

impl Document for Article {
    const UNIQUE_FIELD: &'static str = "url";
    const SEARCH_FIELDS: &'static [&'static str] = &["title", "description", "content"];
    const SOURCE_FIELD: Option<&'static str> = Some("profile");
    const DATE_FIELD: Option<&'static str> = Some("publish_date");

    fn id(&self) -> String {
        self.id.clone()
    }

    fn unique_value(&self) -> &str {
        &self.url
    }
}
