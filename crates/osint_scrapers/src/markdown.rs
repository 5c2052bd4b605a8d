//! HTML to Markdown for article bodies.
//!
//! The conversion itself is done by `quick_html2md`. Before it runs,
//! `<figure>` wrappers are replaced by their contents, link titles are
//! dropped and non-content elements are removed. Headings come out in the
//! closed ATX style (`## Title ##`).

use lazy_static::lazy_static;
use quick_html2md::{html_to_markdown_with_options, MarkdownOptions};
use regex::Regex;
use scraper::{Html, Node, Selector};

lazy_static! {
    static ref NON_CONTENT: Selector = Selector::parse("script, style, noscript, template").unwrap();
    static ref FIGURE: Selector = Selector::parse("figure").unwrap();
    static ref TITLED_LINK: Selector = Selector::parse("a[title]").unwrap();
    static ref ATX_HEADING: Regex = Regex::new(r"^(#{1,6})\s+(.*?)(?:\s+#+)?\s*$").unwrap();
    static ref BLANK_LINES: Regex = Regex::new(r"\n[ \t]*(?:\n[ \t]*)+\n").unwrap();
}

fn prepare(html: &str) -> String {
    let mut fragment = Html::parse_fragment(html);

    let non_content: Vec<_> = fragment.select(&NON_CONTENT).map(|element| element.id()).collect();
    for id in non_content {
        if let Some(mut node) = fragment.tree.get_mut(id) {
            node.detach();
        }
    }

    let links: Vec<_> = fragment.select(&TITLED_LINK).map(|element| element.id()).collect();
    for id in links {
        if let Some(mut node) = fragment.tree.get_mut(id) {
            if let Node::Element(element) = node.value() {
                element.attrs.retain(|name, _| name.local.as_ref() != "title");
            }
        }
    }

    // Outer figures come first in document order, so nested ones are
    // unwrapped after being moved out.
    let figures: Vec<_> = fragment.select(&FIGURE).map(|element| element.id()).collect();
    for id in figures {
        let children: Vec<_> = match fragment.tree.get(id) {
            Some(figure) if figure.parent().is_some() => figure.children().map(|child| child.id()).collect(),
            _ => continue,
        };
        if let Some(mut figure) = fragment.tree.get_mut(id) {
            for child in children {
                figure.insert_id_before(child);
            }
            figure.detach();
        }
    }

    fragment.root_element().inner_html()
}

/// Rewrites `## Title` headings as `## Title ##`, leaving fenced code alone.
fn close_headings(markdown: &str) -> String {
    let mut fenced = false;
    let lines: Vec<String> = markdown
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                fenced = !fenced;
            }
            match ATX_HEADING.captures(line) {
                Some(heading) if !fenced && !heading[2].is_empty() => {
                    format!("{} {} {}", &heading[1], &heading[2], &heading[1])
                }
                _ => line.to_string(),
            }
        })
        .collect();
    lines.join("\n")
}

pub fn html_to_markdown(html: &str) -> String {
    let options = MarkdownOptions::new()
        .include_links(true)
        .include_images(true)
        .preserve_tables(true);
    let markdown = html_to_markdown_with_options(&prepare(html), &options);
    let markdown = close_headings(&markdown);
    BLANK_LINES.replace_all(&markdown, "\n\n").trim().to_string()
}
