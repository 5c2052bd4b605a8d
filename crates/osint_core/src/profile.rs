//! Per-source profiles and the registry that loads them.
//!
//! A profile is validated completely when it is loaded: every CSS selector is
//! parsed and every referenced injection script is read from disk. Nothing
//! about a profile can fail later because of a typo in its file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::{Error, Result};

pub const DEFAULT_MAX_URL_COUNT: usize = 10;

const PROFILE_EXTENSIONS: &[&str] = &["json", "profile"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    Rss,
    Scraping,
    Dynamic,
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMethod::Rss => write!(f, "rss"),
            RetrievalMethod::Scraping => write!(f, "scraping"),
            RetrievalMethod::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Selectors locating article links on a front page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSelectors {
    /// Optional outer element that all link containers live in.
    #[serde(default)]
    pub container: Option<String>,
    pub link_containers: String,
    /// Optional link element inside each container. When absent the
    /// containers themselves carry the `href`.
    #[serde(default)]
    pub links: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Retrieval {
    Rss {
        news_paths: Vec<String>,
    },
    Scraping {
        news_paths: Vec<String>,
        targets: LinkSelectors,
    },
    Dynamic {
        news_paths: Vec<String>,
        targets: LinkSelectors,
    },
}

impl Retrieval {
    pub fn method(&self) -> RetrievalMethod {
        match self {
            Retrieval::Rss { .. } => RetrievalMethod::Rss,
            Retrieval::Scraping { .. } => RetrievalMethod::Scraping,
            Retrieval::Dynamic { .. } => RetrievalMethod::Dynamic,
        }
    }

    pub fn news_paths(&self) -> &[String] {
        match self {
            Retrieval::Rss { news_paths }
            | Retrieval::Scraping { news_paths, .. }
            | Retrieval::Dynamic { news_paths, .. } => news_paths,
        }
    }

    pub fn targets(&self) -> Option<&LinkSelectors> {
        match self {
            Retrieval::Rss { .. } => None,
            Retrieval::Scraping { targets, .. } | Retrieval::Dynamic { targets, .. } => Some(targets),
        }
    }
}

/// A CSS selector plus the attribute holding the value, written as
/// `"selector;attribute"` in profile files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldSelector {
    pub selector: String,
    pub attribute: Option<String>,
}

impl FromStr for FieldSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (selector, attribute) = match s.split_once(';') {
            Some((selector, attribute)) => (selector.trim(), Some(attribute.trim())),
            None => (s.trim(), None),
        };
        if selector.is_empty() {
            return Err(Error::Config(format!("empty selector in \"{}\"", s)));
        }
        Ok(Self {
            selector: selector.to_string(),
            attribute: attribute.filter(|a| !a.is_empty()).map(str::to_string),
        })
    }
}

impl TryFrom<String> for FieldSelector {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FieldSelector> for String {
    fn from(value: FieldSelector) -> Self {
        match value.attribute {
            Some(attribute) => format!("{};{}", value.selector, attribute),
            None => value.selector,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetaSelectors {
    #[serde(default)]
    pub title: Option<FieldSelector>,
    #[serde(default)]
    pub description: Option<FieldSelector>,
    #[serde(default)]
    pub author: Option<FieldSelector>,
    #[serde(default)]
    pub publish_date: Option<FieldSelector>,
    #[serde(default)]
    pub image_url: Option<FieldSelector>,
}

impl MetaSelectors {
    fn iter(&self) -> impl Iterator<Item = &FieldSelector> {
        [
            &self.title,
            &self.description,
            &self.author,
            &self.publish_date,
            &self.image_url,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSelectors {
    pub container: String,
    /// `;`-separated selectors of noise elements removed before extraction.
    #[serde(default)]
    pub remove: Option<String>,
}

impl ContentSelectors {
    pub fn remove_selectors(&self) -> Vec<&str> {
        self.remove
            .as_deref()
            .map(|remove| {
                remove
                    .split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Static,
    #[default]
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingConfig {
    #[serde(default)]
    pub fetch: FetchMode,
    /// Names of injection scripts, run in order after the page settles.
    #[serde(default)]
    pub injections: Vec<String>,
    #[serde(default)]
    pub meta: MetaSelectors,
    pub content: ContentSelectors,
}

/// A script executed in the page before its HTML is captured. It must set
/// `document.osinterReady = true` when done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInjection {
    pub name: String,
    pub source: String,
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    name: String,
    profile_name: String,
    address: String,
    #[serde(default)]
    image_url: Option<String>,
    retrieval: Retrieval,
    #[serde(default)]
    max_url_count: Option<usize>,
    scraping: ScrapingConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    /// Human readable source name, e.g. "Bleeping Computer".
    pub name: String,
    pub profile_name: String,
    pub address: Url,
    pub image_url: Option<String>,
    pub retrieval: Retrieval,
    pub max_url_count: usize,
    pub scraping: ScrapingConfig,
    pub injections: Vec<ScriptInjection>,
}

impl Profile {
    /// Parses and validates a profile, loading its injection scripts from
    /// `injections_dir`.
    pub fn from_json(json: &str, injections_dir: &Path) -> Result<Self> {
        let file: ProfileFile = serde_json::from_str(json)?;
        let profile_error = |reason: String| Error::Profile {
            profile: file.profile_name.clone(),
            reason,
        };

        if file.profile_name.trim().is_empty() {
            return Err(Error::Config("profile has an empty profile_name".to_string()));
        }

        let address = Url::parse(&file.address)
            .map_err(|e| profile_error(format!("invalid address \"{}\": {}", file.address, e)))?;
        if !matches!(address.scheme(), "http" | "https") {
            return Err(profile_error(format!("address must be http(s): {}", address)));
        }

        if file.retrieval.news_paths().is_empty() {
            return Err(profile_error("no news_paths configured".to_string()));
        }
        for path in file.retrieval.news_paths() {
            Url::parse(path).map_err(|e| profile_error(format!("invalid news path \"{}\": {}", path, e)))?;
        }

        let mut selectors: Vec<&str> = Vec::new();
        if let Some(targets) = file.retrieval.targets() {
            selectors.extend(targets.container.as_deref());
            selectors.push(&targets.link_containers);
            selectors.extend(targets.links.as_deref());
        }
        selectors.extend(file.scraping.meta.iter().map(|s| s.selector.as_str()));
        selectors.push(&file.scraping.content.container);
        selectors.extend(file.scraping.content.remove_selectors());
        for selector in selectors {
            Selector::parse(selector)
                .map_err(|e| profile_error(format!("invalid selector \"{}\": {:?}", selector, e)))?;
        }

        let injections = file
            .scraping
            .injections
            .iter()
            .map(|name| load_injection(injections_dir, name).map_err(|e| profile_error(e.to_string())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: file.name,
            profile_name: file.profile_name,
            address,
            image_url: file.image_url,
            retrieval: file.retrieval,
            max_url_count: file.max_url_count.unwrap_or(DEFAULT_MAX_URL_COUNT),
            scraping: file.scraping,
            injections,
        })
    }

    pub fn from_file(path: &Path, injections_dir: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json, injections_dir).map_err(|e| match e {
            Error::Serialization(e) => Error::Config(format!("{}: {}", path.display(), e)),
            other => other,
        })
    }

    pub fn retrieval_method(&self) -> RetrievalMethod {
        self.retrieval.method()
    }

    /// The site root without a trailing slash, e.g. `https://example.com`.
    pub fn site(&self) -> String {
        self.address.as_str().trim_end_matches('/').to_string()
    }
}

fn load_injection(dir: &Path, name: &str) -> Result<ScriptInjection> {
    let path = dir.join(format!("{}.js", name));
    if !path.is_file() {
        return Err(Error::Config(format!(
            "injection script \"{}\" not found at {}",
            name,
            path.display()
        )));
    }
    Ok(ScriptInjection {
        name: name.to_string(),
        source: fs::read_to_string(&path)?,
    })
}

/// All profiles known to this process, keyed by `profile_name`.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileRegistry {
    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> Result<Self> {
        let mut registry = Self::default();
        for profile in profiles {
            registry.insert(profile)?;
        }
        Ok(registry)
    }

    /// Loads every profile file in `profiles_dir`. The first invalid profile
    /// fails the whole load.
    pub fn load_dir(profiles_dir: &Path, injections_dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(profiles_dir).map_err(|e| {
            Error::Config(format!("cannot read profiles directory {}: {}", profiles_dir.display(), e))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map_or(false, |ext| PROFILE_EXTENSIONS.contains(&ext))
            })
            .collect();
        paths.sort();

        let mut registry = Self::default();
        for path in paths {
            debug!(path = %path.display(), "loading profile");
            registry.insert(Profile::from_file(&path, injections_dir)?)?;
        }
        info!(count = registry.len(), "loaded profiles");
        Ok(registry)
    }

    fn insert(&mut self, profile: Profile) -> Result<()> {
        if self.profiles.contains_key(&profile.profile_name) {
            return Err(Error::Config(format!(
                "duplicate profile name \"{}\"",
                profile.profile_name
            )));
        }
        self.profiles.insert(profile.profile_name.clone(), profile);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
