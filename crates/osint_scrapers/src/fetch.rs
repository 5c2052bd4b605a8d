//! Static and browser-rendered page retrieval.

use async_trait::async_trait;
use osint_core::config::BrowserSettings;
use osint_core::profile::ScriptInjection;
use osint_core::{Error, Result};
use rand::seq::SliceRandom;
use reqwest::StatusCode;
use tracing::{debug, error};

use crate::browser;

type HeaderSet = &'static [(&'static str, &'static str)];

/// Request headers of real desktop browsers. One set is picked at random for
/// every static fetch.
const BROWSER_HEADERS: &[HeaderSet] = &[
    &[
        ("User-Agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:77.0) Gecko/20100101 Firefox/77.0"),
        ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("Referer", "https://www.google.com/"),
        ("Connection", "keep-alive"),
    ],
    &[
        ("User-Agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:77.0) Gecko/20100101 Firefox/77.0"),
        ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("Referer", "https://www.google.com/"),
    ],
    &[
        ("User-Agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/83.0.4103.97 Safari/537.36"),
        ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9"),
        ("Referer", "https://www.google.com/"),
        ("Accept-Language", "en-GB,en-US;q=0.9,en;q=0.8"),
    ],
    &[
        ("User-Agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/83.0.4103.97 Safari/537.36"),
        ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9"),
        ("Referer", "https://www.google.com/"),
        ("Accept-Language", "en-US,en;q=0.9"),
    ],
];

fn random_headers() -> HeaderSet {
    BROWSER_HEADERS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(BROWSER_HEADERS[0])
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Plain HTTP GET. Anything but `200 OK` is an error.
    async fn fetch_static(&self, url: &str) -> Result<String>;

    /// Renders `url` in a browser, runs `injections` in order and returns the
    /// resulting HTML.
    async fn fetch_dynamic(&self, url: &str, injections: &[ScriptInjection]) -> Result<String>;
}

/// The production fetcher: reqwest for static pages, a headless browser for
/// rendered ones.
#[derive(Debug, Clone)]
pub struct WebFetcher {
    client: reqwest::Client,
    browser: BrowserSettings,
}

impl WebFetcher {
    pub fn new(browser: BrowserSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client, browser })
    }
}

#[async_trait]
impl PageFetcher for WebFetcher {
    async fn fetch_static(&self, url: &str) -> Result<String> {
        let mut request = self.client.get(url);
        for (name, value) in random_headers() {
            request = request.header(*name, *value);
        }

        debug!(url, "fetching page");
        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            error!(url, status = status.as_u16(), "unexpected status, skipping URL");
            return Err(Error::Fetch {
                url: url.to_string(),
                reason: format!("status code {}", status),
            });
        }
        Ok(response.text().await?)
    }

    async fn fetch_dynamic(&self, url: &str, injections: &[ScriptInjection]) -> Result<String> {
        browser::render(&self.browser, url, injections).await
    }
}
