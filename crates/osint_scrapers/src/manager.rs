use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use osint_core::profile::FetchMode;
use osint_core::{Article, Config, Error, Profile, ProfileRegistry, Result};
use osint_storage::{DocumentStore, IndexKind};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::discovery::discover;
use crate::extract::{extract_content, extract_meta};
use crate::fetch::{PageFetcher, WebFetcher};
use crate::keywords::{load_keyword_dir, locate_keywords, KeywordFile};
use crate::markdown::html_to_markdown;
use crate::text::{clean_text, CommonWords, TextAnalyzer};

/// Outcome of scraping one profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileReport {
    pub profile: String,
    pub discovered: usize,
    /// URLs not yet in the store.
    pub new: usize,
    pub stored: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub profiles: Vec<ProfileReport>,
}

impl PipelineReport {
    pub fn discovered(&self) -> usize {
        self.profiles.iter().map(|p| p.discovered).sum()
    }

    pub fn stored(&self) -> usize {
        self.profiles.iter().map(|p| p.stored).sum()
    }

    pub fn failed(&self) -> usize {
        self.profiles.iter().map(|p| p.failed).sum()
    }
}

/// Drives discovery, extraction, analysis and storage for every profile.
pub struct ScraperManager {
    pub(crate) registry: ProfileRegistry,
    pub(crate) store: DocumentStore<Article>,
    pub(crate) fetcher: Arc<dyn PageFetcher>,
    pub(crate) analyzer: Arc<TextAnalyzer>,
    pub(crate) keywords: Arc<Vec<KeywordFile>>,
    pub(crate) max_url_count: usize,
    pub(crate) workers: usize,
}

impl ScraperManager {
    pub fn new(
        registry: ProfileRegistry,
        store: DocumentStore<Article>,
        fetcher: Arc<dyn PageFetcher>,
        analyzer: TextAnalyzer,
    ) -> Self {
        Self {
            registry,
            store,
            fetcher,
            analyzer: Arc::new(analyzer),
            keywords: Arc::new(Vec::new()),
            max_url_count: usize::MAX,
            workers: 1,
        }
    }

    /// Wires up the production fetcher, profiles, word list and keyword
    /// files described by `config`.
    pub fn from_config(config: &Config, store: DocumentStore<Article>) -> Result<Self> {
        let registry = ProfileRegistry::load_dir(&config.profiles_dir, &config.injections_dir)?;
        let common_words = match &config.common_words_file {
            Some(path) => CommonWords::from_file(path)?,
            None => CommonWords::embedded(),
        };
        let fetcher = Arc::new(WebFetcher::new(config.browser.clone())?);

        Ok(Self::new(registry, store, fetcher, TextAnalyzer::new(common_words))
            .with_keywords(load_keyword_dir(&config.keywords_dir)?)
            .with_max_url_count(config.max_url_count)
            .with_workers(config.workers))
    }

    pub fn with_keywords(mut self, keywords: Vec<KeywordFile>) -> Self {
        self.keywords = Arc::new(keywords);
        self
    }

    /// Caps the URLs taken from each seed page, on top of each profile's own
    /// limit.
    pub fn with_max_url_count(mut self, max_url_count: usize) -> Self {
        self.max_url_count = max_url_count;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn store(&self) -> &DocumentStore<Article> {
        &self.store
    }

    /// Creates the article index with its mapping unless it already exists.
    pub async fn prepare_store(&self) -> Result<bool> {
        let created = self.store.ensure_index(&IndexKind::Articles.mapping()).await?;
        if created {
            info!(index = %self.store.index(), "article index created");
        }
        Ok(created)
    }

    fn profile(&self, name: &str) -> Result<&Profile> {
        self.registry
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown profile \"{}\"", name)))
    }

    async fn discover_profile(&self, profile: &Profile) -> Result<Vec<String>> {
        let max = profile.max_url_count.min(self.max_url_count);
        discover(profile, max, self.fetcher.as_ref()).await
    }

    /// Candidate URLs per profile. A profile whose discovery fails yields no
    /// URLs; the others are unaffected.
    pub async fn gather_article_urls(&self) -> BTreeMap<String, Vec<String>> {
        let mut urls = BTreeMap::new();
        for profile in self.registry.iter() {
            debug!(profile = %profile.profile_name, method = %profile.retrieval_method(), "gathering URLs");
            let found = match self.discover_profile(profile).await {
                Ok(found) => found,
                Err(e) => {
                    error!(profile = %profile.profile_name, error = %e, "problem gathering URLs, skipping profile for now");
                    Vec::new()
                }
            };
            urls.insert(profile.profile_name.clone(), found);
        }
        urls
    }

    async fn fetch_article(&self, url: &str, profile: &Profile) -> Result<String> {
        match profile.scraping.fetch {
            FetchMode::Static => self.fetcher.fetch_static(url).await,
            FetchMode::Dynamic => self.fetcher.fetch_dynamic(url, &profile.injections).await,
        }
    }

    /// Fetches, extracts and analyzes one article. Nothing is stored.
    pub async fn handle_single_article(&self, url: &str, profile: &Profile) -> Result<Article> {
        let html = self.fetch_article(url, profile).await?;

        let meta = extract_meta(&html, profile)?;
        let content = extract_content(&html, &profile.scraping.content)?;
        let clean = clean_text(&content.text);

        let mut article = Article::new(url, &profile.profile_name, &profile.name);
        article.title = meta.title;
        article.description = meta.description;
        article.author = meta.author;
        article.image_url = meta.image_url;
        article.publish_date = meta.publish_date;
        article.formatted_content = html_to_markdown(&content.html);
        article.tags = self.analyzer.analyze(&clean);
        article.tags.manual = manual_tags(&self.keywords, &clean);
        article.content = clean;
        article.inserted_at = Utc::now();
        Ok(article)
    }

    /// Scrapes and stores `urls` one after another. Article-level failures
    /// are logged and counted; any other error aborts the profile.
    pub async fn scrape_using_profile(&self, profile_name: &str, urls: &[String]) -> Result<ProfileReport> {
        let profile = self.profile(profile_name)?;
        info!(profile = %profile_name, count = urls.len(), "scraping articles");

        let mut report = ProfileReport {
            profile: profile_name.to_string(),
            new: urls.len(),
            ..Default::default()
        };
        for (i, url) in urls.iter().enumerate() {
            let span = info_span!("article", url = %url);
            debug!(profile = %profile_name, number = i + 1, url = %url, "scraping article");
            match self.handle_single_article(url, profile).instrument(span).await {
                Ok(article) => {
                    self.store.save(&article).await?;
                    report.stored += 1;
                }
                Err(e) if e.is_article_scoped() => {
                    warn!(url = %url, error = %e, "problem with article, skipping for now");
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// One full ingestion run over every profile. Articles stored before a
    /// critical error stay stored.
    pub async fn run_pipeline(&self) -> Result<PipelineReport> {
        debug!("scraping articles from front pages and RSS feeds");
        let discovered = self.gather_article_urls().await;

        let mut pending = Vec::with_capacity(discovered.len());
        for (profile, urls) in discovered {
            let unseen = self.store.filter_unseen(&urls).await?;
            pending.push((profile, urls.len(), unseen));
        }

        let remaining: usize = pending.iter().map(|(_, _, unseen)| unseen.len()).sum();
        let mut report = PipelineReport::default();
        if remaining == 0 {
            info!("all articles seem to have already been stored");
            report.profiles = pending
                .into_iter()
                .map(|(profile, discovered, _)| ProfileReport {
                    profile,
                    discovered,
                    ..Default::default()
                })
                .collect();
            return Ok(report);
        }
        info!(count = remaining, "found articles left to scrape");

        for (profile, discovered, unseen) in pending {
            let span = info_span!("profile", profile = %profile);
            match self.scrape_using_profile(&profile, &unseen).instrument(span).await {
                Ok(mut profile_report) => {
                    profile_report.discovered = discovered;
                    report.profiles.push(profile_report);
                }
                Err(e) => {
                    error!(profile = %profile, error = %e, "critical error, aborting run");
                    return Err(e);
                }
            }
        }

        info!(
            stored = report.stored(),
            failed = report.failed(),
            "scraping run finished"
        );
        Ok(report)
    }

    /// Runs discovery, or takes `url`, and extracts every article of one
    /// profile without storing anything.
    pub async fn test_profile(&self, name: &str, url: Option<&str>) -> Result<Vec<Result<Article>>> {
        let profile = self.profile(name)?;
        let urls = match url {
            Some(url) => vec![url.to_string()],
            None => self.discover_profile(profile).await?,
        };
        info!(profile = %name, count = urls.len(), "testing profile");

        let mut articles = Vec::with_capacity(urls.len());
        for url in &urls {
            info!(url = %url, "scraping article");
            articles.push(self.handle_single_article(url, profile).await);
        }
        Ok(articles)
    }
}

pub(crate) fn manual_tags(keywords: &[KeywordFile], clean: &str) -> BTreeMap<String, Vec<String>> {
    keywords
        .iter()
        .filter_map(|file| {
            let tags = locate_keywords(&file.collections, clean);
            (!tags.is_empty()).then(|| (file.name.clone(), tags))
        })
        .collect()
}
