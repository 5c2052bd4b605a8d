use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use osint_core::profile::ScriptInjection;
use osint_core::{article_id, Error, ProfileRegistry, Result, SearchEngine};
use osint_scrapers::keywords::load_keyword_dir;
use osint_scrapers::{PageFetcher, ScraperManager, TextAnalyzer};
use osint_storage::backends::memory::Fault;
use osint_storage::{DocumentStore, MemoryEngine};
use tempfile::TempDir;

/// Serves canned pages and records every request.
#[derive(Default)]
struct FixtureFetcher {
    pages: HashMap<String, String>,
    requests: Mutex<Vec<(String, Vec<String>)>>,
}

impl FixtureFetcher {
    fn page(mut self, url: &str, body: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), body.into());
        self
    }

    fn requests_for(&self, url: &str) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(requested, _)| requested == url)
            .map(|(_, injections)| injections.clone())
            .collect()
    }

    fn serve(&self, url: &str, injections: &[ScriptInjection]) -> Result<String> {
        self.requests.lock().unwrap().push((
            url.to_string(),
            injections.iter().map(|i| i.name.clone()).collect(),
        ));
        self.pages.get(url).cloned().ok_or_else(|| Error::Fetch {
            url: url.to_string(),
            reason: "status code 404".to_string(),
        })
    }
}

#[async_trait]
impl PageFetcher for FixtureFetcher {
    async fn fetch_static(&self, url: &str) -> Result<String> {
        self.serve(url, &[])
    }

    async fn fetch_dynamic(&self, url: &str, injections: &[ScriptInjection]) -> Result<String> {
        self.serve(url, injections)
    }
}

fn article_page(title: &str, body: &str) -> String {
    format!(
        r#"<html><head>
        <meta property="og:title" content="{title}">
        <meta property="og:description" content="About {title}">
        <meta property="article:published_time" content="2024-03-01T10:00:00Z">
        </head><body>
        <nav>Home</nav>
        <div class="story"><h2>{title}</h2><p>{body}</p><div class="ad">Buy now</div></div>
        </body></html>"#
    )
}

const ALPHA_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
<title>Alpha</title><link>https://alpha.example/</link><description>Alpha news</description>
<item><title>One</title><link>https://alpha.example/one</link></item>
<item><title>Broken</title><link>https://alpha.example/broken</link></item>
<item><title>Gone</title><link>https://alpha.example/gone</link></item>
</channel></rss>"#;

const BETA_FRONT: &str = r#"<html><body>
<h3 class="headline"><a href="/b/first">First</a></h3>
<h3 class="headline"><a href="https://beta.example/b/second">Second</a></h3>
</body></html>"#;

struct Workspace {
    _dir: TempDir,
    engine: Arc<MemoryEngine>,
    fetcher: Arc<FixtureFetcher>,
    manager: ScraperManager,
}

fn write_profiles(dir: &TempDir) {
    let profiles = dir.path().join("profiles");
    let injections = dir.path().join("injections");
    let keywords = dir.path().join("keywords");
    for path in [&profiles, &injections, &keywords] {
        fs::create_dir_all(path).unwrap();
    }

    fs::write(
        profiles.join("alpha.json"),
        r#"{
            "name": "Alpha News",
            "profile_name": "alpha",
            "address": "https://alpha.example/",
            "retrieval": { "method": "rss", "news_paths": ["https://alpha.example/feed"] },
            "scraping": { "fetch": "static", "content": { "container": "div.story", "remove": "div.ad" } }
        }"#,
    )
    .unwrap();
    fs::write(
        profiles.join("beta.json"),
        r#"{
            "name": "Beta Daily",
            "profile_name": "beta",
            "address": "https://beta.example/",
            "retrieval": {
                "method": "scraping",
                "news_paths": ["https://beta.example/"],
                "targets": { "link_containers": "h3.headline", "links": "a" }
            },
            "scraping": {
                "fetch": "dynamic",
                "injections": ["expand"],
                "content": { "container": "div.story", "remove": "div.ad" }
            }
        }"#,
    )
    .unwrap();
    fs::write(
        profiles.join("gamma.json"),
        r#"{
            "name": "Gamma",
            "profile_name": "gamma",
            "address": "https://gamma.example/",
            "retrieval": { "method": "rss", "news_paths": ["https://gamma.example/feed"] },
            "scraping": { "content": { "container": "article" } }
        }"#,
    )
    .unwrap();
    fs::write(
        injections.join("expand.js"),
        "document.querySelectorAll('.more').forEach(e => e.click()); document.osinterReady = true;",
    )
    .unwrap();
    fs::write(
        keywords.join("sectors.json"),
        r#"[{ "keywords": ["hospital"], "tag": "Healthcare", "proximity": 0 }]"#,
    )
    .unwrap();
}

async fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap();
    write_profiles(&dir);

    let fetcher = Arc::new(
        FixtureFetcher::default()
            .page("https://alpha.example/feed", ALPHA_FEED)
            .page(
                "https://alpha.example/one",
                article_page("Alpha one", "Ransomware ransomware ransomware hit the hospital."),
            )
            .page("https://alpha.example/broken", "<html><body><p>No story here</p></body></html>")
            .page("https://beta.example/", BETA_FRONT)
            .page(
                "https://beta.example/b/first",
                article_page("Beta first", "Exploitation of CVE-2023-12345 from 8.8.8.8 was observed."),
            )
            .page("https://beta.example/b/second", article_page("Beta second", "Nothing unusual.")),
    );

    let registry =
        ProfileRegistry::load_dir(&dir.path().join("profiles"), &dir.path().join("injections")).unwrap();
    let engine = Arc::new(MemoryEngine::new());
    let store = DocumentStore::new(engine.clone(), "articles");
    let manager = ScraperManager::new(registry, store, fetcher.clone(), TextAnalyzer::default())
        .with_keywords(load_keyword_dir(&dir.path().join("keywords")).unwrap());
    manager.prepare_store().await.unwrap();

    Workspace {
        _dir: dir,
        engine,
        fetcher,
        manager,
    }
}

#[tokio::test]
async fn test_pipeline_stores_good_articles_and_isolates_failures() {
    let ws = workspace().await;

    let report = ws.manager.run_pipeline().await.unwrap();
    assert_eq!(report.stored(), 3);
    assert_eq!(report.failed(), 2);
    assert_eq!(ws.engine.count("articles").await.unwrap(), 3);

    let gamma = report.profiles.iter().find(|p| p.profile == "gamma").unwrap();
    assert_eq!(gamma.discovered, 0);

    let one = ws
        .manager
        .store()
        .get(&article_id("https://alpha.example/one"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(one.profile, "alpha");
    assert_eq!(one.source, "Alpha News");
    assert_eq!(one.title, "Alpha one");
    assert_eq!(one.description, "About Alpha one");
    assert_eq!(one.publish_date.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    assert!(one.formatted_content.contains("## Alpha one ##"));
    assert!(!one.content.contains("Buy now"));
    assert!(!one.content.contains("Home"));
    assert_eq!(one.tags.automatic, vec!["ransomware"]);
    assert_eq!(one.tags.manual.get("sectors"), Some(&vec!["Healthcare".to_string()]));

    let first = ws
        .manager
        .store()
        .get(&article_id("https://beta.example/b/first"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.tags.interesting("CVE's"), Some(&["CVE-2023-12345".to_string()][..]));
    assert_eq!(first.tags.interesting("ipv4-addresses"), Some(&["8.8.8.8".to_string()][..]));
    assert!(first.tags.manual.is_empty());
}

#[tokio::test]
async fn test_article_fetch_mode_and_injections() {
    let ws = workspace().await;
    ws.manager.run_pipeline().await.unwrap();

    // Front pages are rendered without injections, articles with them.
    assert_eq!(ws.fetcher.requests_for("https://beta.example/"), vec![Vec::<String>::new()]);
    assert_eq!(
        ws.fetcher.requests_for("https://beta.example/b/first"),
        vec![vec!["expand".to_string()]]
    );
    assert_eq!(
        ws.fetcher.requests_for("https://alpha.example/one"),
        vec![Vec::<String>::new()]
    );
}

#[tokio::test]
async fn test_second_run_does_not_duplicate() {
    let ws = workspace().await;
    ws.manager.run_pipeline().await.unwrap();
    let second = ws.manager.run_pipeline().await.unwrap();

    assert_eq!(second.stored(), 0);
    assert_eq!(ws.engine.count("articles").await.unwrap(), 3);
    // Stored articles are not fetched again; failed ones are retried.
    assert_eq!(ws.fetcher.requests_for("https://alpha.example/one").len(), 1);
    assert_eq!(ws.fetcher.requests_for("https://alpha.example/broken").len(), 2);
}

#[tokio::test]
async fn test_storage_failure_aborts_run() {
    let ws = workspace().await;
    ws.engine.fail_next(Fault::Bulk("articles".to_string()));

    assert!(ws.manager.run_pipeline().await.is_err());
    assert_eq!(ws.engine.count("articles").await.unwrap(), 0);
}

#[tokio::test]
async fn test_profile_dry_run_stores_nothing() {
    let ws = workspace().await;

    let articles = ws.manager.test_profile("beta", None).await.unwrap();
    assert_eq!(articles.len(), 2);
    assert!(articles.iter().all(|a| a.is_ok()));

    let single = ws
        .manager
        .test_profile("alpha", Some("https://alpha.example/broken"))
        .await
        .unwrap();
    assert!(matches!(single[0], Err(Error::Extraction(_))));

    assert!(ws.manager.test_profile("missing", None).await.is_err());
    assert_eq!(ws.engine.count("articles").await.unwrap(), 0);
}

#[tokio::test]
async fn test_url_cap_applies_per_seed() {
    let ws = workspace().await;
    let manager = ws.manager.with_max_url_count(1);

    let urls = manager.gather_article_urls().await;
    assert_eq!(urls["alpha"], vec!["https://alpha.example/one"]);
    assert_eq!(urls["beta"], vec!["https://beta.example/b/first"]);
    assert!(urls["gamma"].is_empty());
}
