use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::profile::DEFAULT_MAX_URL_COUNT;
use crate::{Error, Result};

/// Seconds a rendered page is left to settle before injections run.
pub const DEFAULT_RENDER_SETTLE_SECS: u64 = 3;
pub const DEFAULT_INJECTION_TIMEOUT_SECS: u64 = 30;
/// Documents per bulk request.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Explicit Chrome/Chromium executable; autodetected when unset.
    pub executable: Option<PathBuf>,
    /// DevTools endpoint of an already running browser.
    pub remote_url: Option<String>,
    pub settle_time: Duration,
    pub injection_timeout: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            remote_url: None,
            settle_time: Duration::from_secs(DEFAULT_RENDER_SETTLE_SECS),
            injection_timeout: Duration::from_secs(DEFAULT_INJECTION_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub article_index: String,
    pub chunk_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            article_index: "articles".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Process-wide settings, built once at startup and passed down explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub engine: EngineSettings,
    pub browser: BrowserSettings,
    pub profiles_dir: PathBuf,
    pub injections_dir: PathBuf,
    pub keywords_dir: PathBuf,
    /// Replaces the built-in common word list when set.
    pub common_words_file: Option<PathBuf>,
    pub max_url_count: usize,
    /// Worker count for CPU-bound maintenance; defaults to available cores.
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            browser: BrowserSettings::default(),
            profiles_dir: PathBuf::from("./profiles"),
            injections_dir: PathBuf::from("./profiles/js_injections"),
            keywords_dir: PathBuf::from("./tools/keywords"),
            common_words_file: None,
            max_url_count: DEFAULT_MAX_URL_COUNT,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl Config {
    /// Reads settings from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("ELASTICSEARCH_URL") {
            config.engine.url = url;
        }
        config.engine.username = lookup("ELASTICSEARCH_USERNAME");
        config.engine.password = lookup("ELASTICSEARCH_PASSWORD");
        if let Some(index) = lookup("ELASTICSEARCH_ARTICLE_INDEX") {
            config.engine.article_index = index;
        }
        if let Some(size) = lookup("OSINT_CHUNK_SIZE") {
            config.engine.chunk_size = parse_number("OSINT_CHUNK_SIZE", &size)?;
        }

        if let Some(dir) = lookup("OSINT_PROFILES_DIR") {
            config.profiles_dir = PathBuf::from(dir);
            config.injections_dir = config.profiles_dir.join("js_injections");
        }
        if let Some(dir) = lookup("OSINT_INJECTIONS_DIR") {
            config.injections_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("OSINT_KEYWORDS_DIR") {
            config.keywords_dir = PathBuf::from(dir);
        }
        config.common_words_file = lookup("OSINT_COMMON_WORDS_FILE").map(PathBuf::from);
        if let Some(count) = lookup("OSINT_MAX_URL_COUNT") {
            config.max_url_count = parse_number("OSINT_MAX_URL_COUNT", &count)?;
        }
        if let Some(workers) = lookup("OSINT_WORKERS") {
            config.workers = parse_number::<usize>("OSINT_WORKERS", &workers)?.max(1);
        }

        if let Some(headless) = lookup("OSINT_BROWSER_HEADLESS") {
            config.browser.headless = !matches!(headless.to_lowercase().as_str(), "0" | "false" | "no");
        }
        config.browser.executable = lookup("OSINT_BROWSER_PATH").map(PathBuf::from);
        config.browser.remote_url = lookup("OSINT_BROWSER_REMOTE_URL");
        if let Some(secs) = lookup("OSINT_RENDER_SETTLE_SECS") {
            config.browser.settle_time = Duration::from_secs(parse_number("OSINT_RENDER_SETTLE_SECS", &secs)?);
        }
        if let Some(secs) = lookup("OSINT_INJECTION_TIMEOUT_SECS") {
            config.browser.injection_timeout =
                Duration::from_secs(parse_number("OSINT_INJECTION_TIMEOUT_SECS", &secs)?);
        }

        if config.engine.chunk_size == 0 {
            return Err(Error::Config("OSINT_CHUNK_SIZE must be greater than zero".to_string()));
        }
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number, got \"{}\"", key, value)))
}
