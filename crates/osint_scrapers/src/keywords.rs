//! Operator maintained keyword files used for manual tagging.
//!
//! A keyword file is a JSON array of `{"keywords": [..], "tag": "..",
//! "proximity": n}` records. Broken records are reported one by one and do
//! not stop the rest of the file from loading.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use osint_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::text::tokenize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordCollection {
    pub keywords: Vec<String>,
    pub tag: String,
    /// Maximum distance in tokens between the keywords; 0 means anywhere.
    pub proximity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordError {
    pub index: usize,
    pub record: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordFile {
    /// File stem, used as the key under `tags.manual`.
    pub name: String,
    pub path: PathBuf,
    pub collections: Vec<KeywordCollection>,
    pub errors: Vec<KeywordError>,
}

impl KeywordFile {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn parse_keyword_file(name: &str, json: &str) -> Result<KeywordFile> {
    let records: Vec<Value> = serde_json::from_str(json)
        .map_err(|e| Error::Config(format!("keyword file \"{}\" is not a JSON array: {}", name, e)))?;

    let mut file = KeywordFile {
        name: name.to_string(),
        path: PathBuf::new(),
        collections: Vec::new(),
        errors: Vec::new(),
    };
    for (index, record) in records.into_iter().enumerate() {
        let text = record.to_string();
        match serde_json::from_value::<KeywordCollection>(record) {
            Ok(collection) => file.collections.push(collection),
            Err(e) => file.errors.push(KeywordError {
                index,
                record: text,
                reason: e.to_string(),
            }),
        }
    }
    Ok(file)
}

pub fn load_keyword_file(path: &Path) -> Result<KeywordFile> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| Error::Config(format!("bad keyword file name {}", path.display())))?;
    let mut file = parse_keyword_file(name, &fs::read_to_string(path)?)?;
    file.path = path.to_path_buf();
    for error in &file.errors {
        warn!(file = %path.display(), index = error.index, reason = %error.reason, "malformed keyword record");
    }
    Ok(file)
}

/// Every keyword file in `dir`, sorted by name. A missing directory holds no
/// files.
pub fn load_keyword_dir(dir: &Path) -> Result<Vec<KeywordFile>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "no keyword directory");
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    paths.iter().map(|path| load_keyword_file(path)).collect()
}

fn positions(tokens: &[String], keyword: &[String]) -> Vec<usize> {
    if keyword.is_empty() || keyword.len() > tokens.len() {
        return Vec::new();
    }
    tokens
        .windows(keyword.len())
        .enumerate()
        .filter(|(_, window)| *window == keyword)
        .map(|(i, _)| i)
        .collect()
}

/// Smallest distance between the first and last token of any window that
/// holds one occurrence of every keyword.
fn tightest_span(occurrences: &[Vec<usize>]) -> usize {
    let mut merged: Vec<(usize, usize)> = occurrences
        .iter()
        .enumerate()
        .flat_map(|(keyword, positions)| positions.iter().map(move |p| (*p, keyword)))
        .collect();
    merged.sort_unstable();

    let wanted = occurrences.len();
    let mut counts: HashMap<usize, usize> = HashMap::new();
    let mut best = usize::MAX;
    let mut start = 0;
    for end in 0..merged.len() {
        *counts.entry(merged[end].1).or_insert(0) += 1;
        while counts.len() == wanted {
            best = best.min(merged[end].0 - merged[start].0);
            let keyword = merged[start].1;
            if let Some(count) = counts.get_mut(&keyword) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(&keyword);
                }
            }
            start += 1;
        }
    }
    best
}

fn matches(collection: &KeywordCollection, tokens: &[String]) -> bool {
    let keywords: Vec<Vec<String>> = collection
        .keywords
        .iter()
        .map(|keyword| tokenize(keyword))
        .filter(|keyword| !keyword.is_empty())
        .collect();
    if keywords.is_empty() {
        return false;
    }

    let occurrences: Vec<Vec<usize>> = keywords.iter().map(|k| positions(tokens, k)).collect();
    if occurrences.iter().any(Vec::is_empty) {
        return false;
    }
    collection.proximity == 0 || tightest_span(&occurrences) <= collection.proximity
}

/// Tags of every collection whose keywords all occur in `text`, close enough
/// together. Each tag is reported once.
pub fn locate_keywords(collections: &[KeywordCollection], text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let mut tags: Vec<String> = Vec::new();
    for collection in collections {
        if !tags.contains(&collection.tag) && matches(collection, &tokens) {
            tags.push(collection.tag.clone());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn collection(keywords: &[&str], tag: &str, proximity: usize) -> KeywordCollection {
        KeywordCollection {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            tag: tag.to_string(),
            proximity,
        }
    }

    #[test]
    fn test_malformed_records_are_reported_individually() {
        let file = parse_keyword_file(
            "threats",
            r#"[
                {"keywords": ["lockbit"], "tag": "LockBit", "proximity": 0},
                {"keywords": "lockbit", "tag": "LockBit", "proximity": 0},
                {"keywords": ["cl0p"], "tag": 5, "proximity": 0},
                {"keywords": ["moveit"], "tag": "MOVEit", "proximity": -1}
            ]"#,
        )
        .unwrap();
        assert_eq!(file.collections.len(), 1);
        let indices: Vec<usize> = file.errors.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(!file.is_valid());
    }

    #[test]
    fn test_not_an_array_is_an_error() {
        assert!(parse_keyword_file("bad", r#"{"keywords": []}"#).is_err());
    }

    #[test]
    fn test_locate_keywords_anywhere() {
        let collections = vec![
            collection(&["ransomware", "hospital"], "Healthcare ransomware", 0),
            collection(&["phishing"], "Phishing", 0),
        ];
        let tags = locate_keywords(
            &collections,
            "The hospital confirmed on Monday that a ransomware attack hit its systems.",
        );
        assert_eq!(tags, vec!["Healthcare ransomware"]);
    }

    #[test]
    fn test_locate_keywords_proximity() {
        let collections = vec![collection(&["supply chain", "attack"], "Supply chain", 2)];
        assert_eq!(
            locate_keywords(&collections, "A supply chain attack was found."),
            vec!["Supply chain"]
        );
        assert!(locate_keywords(
            &collections,
            "The supply chain was fine, analysts said, until a much later and unrelated attack."
        )
        .is_empty());
    }

    #[test]
    fn test_load_keyword_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("actors.json"),
            r#"[{"keywords": ["apt29"], "tag": "APT29", "proximity": 0}]"#,
        )
        .unwrap();
        let files = load_keyword_dir(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "actors");
        assert!(load_keyword_dir(&dir.path().join("missing")).unwrap().is_empty());
    }
}
