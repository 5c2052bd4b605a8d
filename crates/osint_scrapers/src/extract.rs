//! Article metadata and body extraction from fetched HTML.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use osint_core::profile::{ContentSelectors, FieldSelector, MetaSelectors, Profile};
use osint_core::{Error, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, warn};

lazy_static! {
    static ref LD_JSON: Selector = Selector::parse(r#"script[type="application/ld+json"]"#).unwrap();
    static ref LD_DATE_PUBLISHED: Regex = Regex::new(r#""datePublished":"(.*?)""#).unwrap();
    static ref LD_AUTHOR: Regex = Regex::new(r#""@type":"Person",.*?"name":"(.*?)""#).unwrap();
    static ref OG_TITLE: FieldSelector = og("meta[property='og:title']");
    static ref OG_DESCRIPTION: FieldSelector = og("meta[property='og:description']");
    static ref OG_IMAGE: FieldSelector = og("meta[property='og:image']");
    static ref OG_PUBLISHED: FieldSelector = og("meta[property='article:published_time']");
    static ref OG_AUTHOR: FieldSelector = og("meta[name='author']");
}

fn og(selector: &str) -> FieldSelector {
    FieldSelector {
        selector: selector.to_string(),
        attribute: None,
    }
}

/// Tags whose lone text child is trimmed before the body is captured.
const TEXT_TAGS: &[&str] = &["p", "span", "h1", "h2", "h3", "h4", "h5", "h6"];

#[derive(Debug, Clone, PartialEq)]
pub struct ArticleMeta {
    pub title: String,
    pub description: String,
    pub author: Option<String>,
    pub image_url: String,
    pub publish_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArticleContent {
    /// The retained containers as HTML, one per line.
    pub html: String,
    /// Text of the retained containers, one per line.
    pub text: String,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Value of the first element matching `field`, using its declared
/// attribute. Without one, `<meta>` yields `content`, `<time>` yields
/// `datetime` and anything else its text.
fn select_field(document: &Html, field: &FieldSelector) -> Option<String> {
    let selector = Selector::parse(&field.selector).ok()?;
    let element = document.select(&selector).next()?;
    let attribute = field.attribute.as_deref().or(match element.value().name() {
        "meta" => Some("content"),
        "time" => Some("datetime"),
        _ => None,
    });
    match attribute {
        Some(attribute) => element.value().attr(attribute).and_then(non_empty),
        None => non_empty(&element.text().collect::<String>()),
    }
}

fn resolve(document: &Html, declared: &Option<FieldSelector>, fallback: &FieldSelector) -> Option<String> {
    match declared {
        Some(field) => select_field(document, field),
        None => select_field(document, fallback),
    }
}

/// Structured data blocks re-serialized compactly, so the same pattern
/// matches regardless of the site's whitespace.
fn ld_json_blocks(document: &Html) -> Vec<String> {
    document
        .select(&LD_JSON)
        .filter_map(|script| {
            let raw = script.text().collect::<String>();
            serde_json::from_str::<serde_json::Value>(raw.trim())
                .and_then(|value| serde_json::to_string(&value))
                .ok()
        })
        .collect()
}

fn ld_json_match(blocks: &[String], pattern: &Regex) -> Option<String> {
    blocks
        .iter()
        .find_map(|block| pattern.captures(block))
        .and_then(|captures| captures.get(1))
        .and_then(|m| non_empty(m.as_str()))
}

/// Parses the date formats found on news sites. Naive timestamps are taken
/// as UTC.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"] {
        if let Ok(date) = DateTime::parse_from_str(value, format) {
            return Some(date.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&date));
        }
    }
    for format in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0).map(|d| Utc.from_utc_datetime(&d));
        }
    }
    None
}

/// Extracts title, description, author, image and publish date.
///
/// Declared selectors are tried first, OpenGraph tags stand in for missing
/// declarations. Author and publish date then fall back to LD+JSON. A missing
/// title or description is an error.
pub fn extract_meta(html: &str, profile: &Profile) -> Result<ArticleMeta> {
    let document = Html::parse_document(html);
    extract_meta_from(&document, &profile.scraping.meta, &profile.site())
}

pub fn extract_meta_from(document: &Html, meta: &MetaSelectors, site: &str) -> Result<ArticleMeta> {
    let title = resolve(document, &meta.title, &OG_TITLE)
        .ok_or_else(|| Error::Extraction("no title found".to_string()))?;
    let description = resolve(document, &meta.description, &OG_DESCRIPTION)
        .ok_or_else(|| Error::Extraction(format!("no description found for \"{}\"", title)))?;

    let mut author = resolve(document, &meta.author, &OG_AUTHOR);
    let mut publish_date = resolve(document, &meta.publish_date, &OG_PUBLISHED);

    if author.is_none() || publish_date.is_none() {
        let blocks = ld_json_blocks(document);
        if author.is_none() {
            author = ld_json_match(&blocks, &LD_AUTHOR);
        }
        if publish_date.is_none() {
            publish_date = ld_json_match(&blocks, &LD_DATE_PUBLISHED);
        }
    }

    let image_url = resolve(document, &meta.image_url, &OG_IMAGE).unwrap_or_else(|| format!("{}/favicon.ico", site));

    let publish_date = match publish_date {
        Some(raw) => parse_date(&raw).unwrap_or_else(|| {
            warn!(date = %raw, "unparseable publish date, using current time");
            Utc::now()
        }),
        None => {
            debug!(title = %title, "no publish date found, using current time");
            Utc::now()
        }
    };

    Ok(ArticleMeta {
        title,
        description,
        author,
        image_url,
        publish_date,
    })
}

/// Removes noise elements, then captures the content containers as HTML and
/// as text. A page without any content container is an error.
pub fn extract_content(html: &str, selectors: &ContentSelectors) -> Result<ArticleContent> {
    let mut document = Html::parse_document(html);

    for remove in selectors.remove_selectors() {
        let selector = Selector::parse(remove)
            .map_err(|e| Error::Extraction(format!("invalid selector \"{}\": {:?}", remove, e)))?;
        let ids: Vec<_> = document.select(&selector).map(|element| element.id()).collect();
        for id in ids {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    let container = Selector::parse(&selectors.container)
        .map_err(|e| Error::Extraction(format!("invalid selector \"{}\": {:?}", selectors.container, e)))?;
    let containers: Vec<_> = document.select(&container).map(|element| element.id()).collect();
    if containers.is_empty() {
        return Err(Error::Extraction(format!(
            "content container \"{}\" not found",
            selectors.container
        )));
    }

    let lone_texts: Vec<_> = containers
        .iter()
        .filter_map(|id| document.tree.get(*id).and_then(ElementRef::wrap))
        .flat_map(|container| container.descendants())
        .filter_map(ElementRef::wrap)
        .filter(|element| TEXT_TAGS.contains(&element.value().name()))
        .filter_map(|element| {
            let mut children = element.children();
            match (children.next(), children.next()) {
                (Some(only), None) if only.value().is_text() => Some(only.id()),
                _ => None,
            }
        })
        .collect();
    for id in lone_texts {
        if let Some(mut node) = document.tree.get_mut(id) {
            if let Node::Text(text) = node.value() {
                let trimmed = text.text.trim().to_string();
                text.text = trimmed.as_str().into();
            }
        }
    }

    let mut content = ArticleContent {
        html: String::new(),
        text: String::new(),
    };
    for element in containers
        .iter()
        .filter_map(|id| document.tree.get(*id).and_then(ElementRef::wrap))
    {
        content.html.push_str(&element.html());
        content.html.push('\n');
        content.text.extend(element.text());
        content.text.push('\n');
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    const ARTICLE: &str = r#"
        <html><head>
          <meta property="og:title" content="Ransomware hits hospital">
          <meta property="og:description" content="A short summary">
          <meta property="og:image" content="https://example.com/img.png">
          <script type="application/ld+json">
            { "@context": "https://schema.org",
              "datePublished" : "2024-03-05T10:00:00+01:00",
              "author": { "@type": "Person",
                          "name": "Jane Doe" } }
          </script>
        </head><body>
          <div class="article">
            <h1>  Ransomware hits hospital  </h1>
            <p>   First paragraph.   </p>
            <div class="ad">Buy things</div>
            <p>Second <a href="/x" title="t">link</a> paragraph.</p>
          </div>
        </body></html>"#;

    fn meta(author: Option<&str>) -> MetaSelectors {
        MetaSelectors {
            author: author.map(|a| a.parse().unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_og_tags_with_ld_json_fallback() {
        let document = Html::parse_document(ARTICLE);
        let meta = extract_meta_from(&document, &meta(Some("span.byline")), "https://example.com").unwrap();
        assert_eq!(meta.title, "Ransomware hits hospital");
        assert_eq!(meta.description, "A short summary");
        assert_eq!(meta.author.as_deref(), Some("Jane Doe"));
        assert_eq!(meta.image_url, "https://example.com/img.png");
        assert_eq!(meta.publish_date, Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_no_author_anywhere_is_none() {
        let html = r#"<html><head>
            <meta property="og:title" content="Title">
            <meta property="og:description" content="Description">
        </head><body></body></html>"#;
        let document = Html::parse_document(html);
        let meta = extract_meta_from(&document, &meta(Some("span.byline")), "https://example.com").unwrap();
        assert_eq!(meta.author, None);
        assert_eq!(meta.image_url, "https://example.com/favicon.ico");
    }

    #[test]
    fn test_declared_selector_and_time_attribute() {
        let html = r#"<html><head>
            <meta property="og:title" content="Title">
            <meta property="og:description" content="Description">
        </head><body>
          <span class="byline"> John Smith </span>
          <time class="pub" datetime="2023-11-02">Nov 2</time>
        </body></html>"#;
        let document = Html::parse_document(html);
        let selectors = MetaSelectors {
            author: Some("span.byline".parse().unwrap()),
            publish_date: Some("time.pub".parse().unwrap()),
            ..Default::default()
        };
        let meta = extract_meta_from(&document, &selectors, "https://example.com").unwrap();
        assert_eq!(meta.author.as_deref(), Some("John Smith"));
        assert_eq!(meta.publish_date.year(), 2023);
        assert_eq!(meta.publish_date.day(), 2);
    }

    #[test]
    fn test_missing_title_is_an_error() {
        let document = Html::parse_document("<html><body><p>nothing</p></body></html>");
        assert!(extract_meta_from(&document, &MetaSelectors::default(), "https://example.com").is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(parse_date("2024-01-15"), Some(expected));
        assert_eq!(parse_date("January 15, 2024"), Some(expected));
        assert_eq!(parse_date("Mon, 15 Jan 2024 00:00:00 +0000"), Some(expected));
        assert_eq!(parse_date("2024-01-15T00:00:00Z"), Some(expected));
        assert_eq!(parse_date("2024-01-15 00:00:00"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_extract_content_removes_noise_and_trims() {
        let selectors = ContentSelectors {
            container: "div.article".to_string(),
            remove: Some("div.ad".to_string()),
        };
        let content = extract_content(ARTICLE, &selectors).unwrap();
        assert!(!content.text.contains("Buy things"));
        assert!(!content.html.contains("class=\"ad\""));
        assert!(content.html.contains("<p>First paragraph.</p>"));
        assert!(content.html.contains("<h1>Ransomware hits hospital</h1>"));
        assert!(content.text.contains("Second link paragraph."));
        assert!(content.text.ends_with('\n'));
    }

    #[test]
    fn test_missing_container_is_an_error() {
        let selectors = ContentSelectors {
            container: "div.missing".to_string(),
            remove: None,
        };
        assert!(extract_content(ARTICLE, &selectors).is_err());
    }
}
