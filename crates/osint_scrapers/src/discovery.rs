//! Finding candidate article URLs for a profile.

use std::collections::HashSet;

use async_trait::async_trait;
use osint_core::profile::{LinkSelectors, Profile, RetrievalMethod};
use osint_core::{Error, Result};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info_span, Instrument};
use url::Url;

use crate::fetch::PageFetcher;

#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn method(&self) -> RetrievalMethod;

    /// URLs found on one seed page, at most `max` of them.
    async fn discover_from(
        &self,
        profile: &Profile,
        seed: &str,
        max: usize,
        fetcher: &dyn PageFetcher,
    ) -> Result<Vec<String>>;
}

pub struct RssDiscovery;
pub struct ScrapingDiscovery;
pub struct DynamicDiscovery;

/// The strategy handling `method`.
pub fn strategy_for(method: RetrievalMethod) -> &'static dyn DiscoveryStrategy {
    match method {
        RetrievalMethod::Rss => &RssDiscovery,
        RetrievalMethod::Scraping => &ScrapingDiscovery,
        RetrievalMethod::Dynamic => &DynamicDiscovery,
    }
}

/// Runs the profile's strategy over all of its seed pages. The result keeps
/// first-seen order with duplicates across seeds removed.
pub async fn discover(profile: &Profile, max: usize, fetcher: &dyn PageFetcher) -> Result<Vec<String>> {
    let strategy = strategy_for(profile.retrieval_method());
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for seed in profile.retrieval.news_paths() {
        let span = info_span!("discover", profile = %profile.profile_name, method = %strategy.method(), seed = %seed);
        let found = strategy
            .discover_from(profile, seed, max, fetcher)
            .instrument(span)
            .await?;
        debug!(profile = %profile.profile_name, seed = %seed, count = found.len(), "seed page done");
        urls.extend(found.into_iter().filter(|url| seen.insert(url.clone())));
    }
    Ok(urls)
}

fn discovery_error(profile: &Profile, reason: impl Into<String>) -> Error {
    Error::Discovery {
        profile: profile.profile_name.clone(),
        reason: reason.into(),
    }
}

fn targets(profile: &Profile) -> Result<&LinkSelectors> {
    profile
        .retrieval
        .targets()
        .ok_or_else(|| discovery_error(profile, "no link selectors configured"))
}

#[async_trait]
impl DiscoveryStrategy for RssDiscovery {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Rss
    }

    async fn discover_from(
        &self,
        profile: &Profile,
        seed: &str,
        max: usize,
        fetcher: &dyn PageFetcher,
    ) -> Result<Vec<String>> {
        let body = fetcher.fetch_static(seed).await?;
        let urls = feed_entry_urls(&body, max).map_err(|e| discovery_error(profile, e.to_string()))?;
        Ok(urls)
    }
}

#[async_trait]
impl DiscoveryStrategy for ScrapingDiscovery {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Scraping
    }

    async fn discover_from(
        &self,
        profile: &Profile,
        seed: &str,
        max: usize,
        fetcher: &dyn PageFetcher,
    ) -> Result<Vec<String>> {
        let html = fetcher.fetch_static(seed).await?;
        extract_article_urls(&html, &profile.address, targets(profile)?, max)
            .map_err(|e| discovery_error(profile, e.to_string()))
    }
}

#[async_trait]
impl DiscoveryStrategy for DynamicDiscovery {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Dynamic
    }

    async fn discover_from(
        &self,
        profile: &Profile,
        seed: &str,
        max: usize,
        fetcher: &dyn PageFetcher,
    ) -> Result<Vec<String>> {
        // Front pages are rendered bare; injections only apply to articles.
        let html = fetcher.fetch_dynamic(seed, &[]).await?;
        extract_article_urls(&html, &profile.address, targets(profile)?, max)
            .map_err(|e| discovery_error(profile, e.to_string()))
    }
}

/// Entry URLs of an RSS/Atom feed in feed order. The entry id is used when it
/// is a URL, its first link otherwise.
pub fn feed_entry_urls(body: &str, max: usize) -> Result<Vec<String>> {
    let feed = feed_rs::parser::parse(body.as_bytes())
        .map_err(|e| Error::Extraction(format!("unparseable feed: {}", e)))?;
    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            if entry.id.starts_with("http://") || entry.id.starts_with("https://") {
                Some(entry.id)
            } else {
                entry.links.into_iter().next().map(|link| link.href)
            }
        })
        .take(max)
        .collect())
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| Error::Extraction(format!("invalid selector \"{}\": {:?}", selector, e)))
}

/// Pulls article links out of a front page.
///
/// Link containers are looked up inside `targets.container` when one is set;
/// that container missing from the page is an error. Each container either
/// holds the `href` itself or, with `targets.links`, wraps the link element.
/// Relative links are resolved against `base`.
pub fn extract_article_urls(html: &str, base: &Url, targets: &LinkSelectors, max: usize) -> Result<Vec<String>> {
    let document = Html::parse_document(html);

    let outer: ElementRef = match &targets.container {
        Some(container) => document
            .select(&parse_selector(container)?)
            .next()
            .ok_or_else(|| Error::Extraction(format!("container \"{}\" not found on front page", container)))?,
        None => document.root_element(),
    };

    let link_containers = parse_selector(&targets.link_containers)?;
    let links = targets.links.as_deref().map(parse_selector).transpose()?;

    // The cap counts link elements, so a link without a usable href still
    // uses up a slot.
    let mut seen = HashSet::new();
    let urls = outer
        .select(&link_containers)
        .filter_map(|container| match &links {
            Some(links) => container.select(links).next(),
            None => Some(container),
        })
        .take(max)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(String::from)
        .filter(|url| seen.insert(url.clone()))
        .collect();
    Ok(urls)
}
