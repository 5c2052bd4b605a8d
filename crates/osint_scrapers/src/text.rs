//! Tokenizing, tag ranking and text cleanup.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use osint_core::{ArticleTags, Result};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::indicators::locate_indicators;

/// Minimum number of occurrences for a token to become a tag.
pub const TAG_MIN_FREQUENCY: usize = 3;
/// Maximum number of automatic tags per article.
pub const MAX_TAGS: usize = 10;

const EMBEDDED_COMMON_WORDS: &str = include_str!("wordlist.txt");

lazy_static! {
    static ref DASHES: Regex = Regex::new(
        "[\u{002D}\u{058A}\u{05BE}\u{2010}\u{2011}\u{2012}\u{2013}\u{2014}\u{2015}\u{2E3A}\u{2E3B}\u{FE58}\u{FE63}\u{FF0D}]"
    )
    .unwrap();
    static ref CONTRACTIONS: Regex = Regex::new(r"(?:'|’)\S*").unwrap();
    static ref BOUNDED_PUNCTUATION: Regex =
        Regex::new(r#"\s(?:,|\.|"|'|/|\\|:|-)+|(?:,|\.|"|'|/|\\|:|-)+\s"#).unwrap();
    static ref BRACKETED: Regex = Regex::new(r"\{.*\}").unwrap();
    static ref QUOTES_AND_PARENS: Regex = Regex::new(r#"“|"|\(|\)"#).unwrap();
    static ref NON_WORDS: Regex = Regex::new(r"\s[^a-zA-Z]*\s").unwrap();
}

/// Normalizes text scraped from the web: NFKD, line breaks to spaces, every
/// dash variant to `-`.
pub fn clean_text(text: &str) -> String {
    let normalized: String = text.nfkd().collect();
    let single_line = normalized.replace('\n', " ");
    DASHES.replace_all(&single_line, "-").into_owned()
}

/// Lowercase word tokens. Possessive and contraction suffixes, punctuation
/// runs at word edges and `{...}` annotations are removed; tokens without a
/// single letter are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let padded = format!(" {} ", text);
    let text = CONTRACTIONS.replace_all(&padded, "");
    let text = BOUNDED_PUNCTUATION.replace_all(&text, " ");
    let text = BRACKETED.replace_all(&text, "");
    let text = QUOTES_AND_PARENS.replace_all(&text, " ");
    let text = NON_WORDS.replace_all(&text, " ");

    text.to_lowercase()
        .split(' ')
        .filter(|token| token.chars().any(char::is_alphabetic))
        .map(str::to_string)
        .collect()
}

/// Words never used as tags.
#[derive(Debug, Clone, Default)]
pub struct CommonWords {
    words: HashSet<String>,
}

impl CommonWords {
    pub fn embedded() -> Self {
        Self::parse(EMBEDDED_COMMON_WORDS)
    }

    /// One word per line.
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words.into_iter().map(|w| w.as_ref().trim().to_lowercase()).collect(),
        }
    }

    fn parse(list: &str) -> Self {
        Self::from_words(list.lines().filter(|line| !line.trim().is_empty()))
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Derives automatic and indicator tags from article text.
#[derive(Debug, Clone)]
pub struct TextAnalyzer {
    common_words: CommonWords,
    min_frequency: usize,
    max_tags: usize,
}

impl Default for TextAnalyzer {
    fn default() -> Self {
        Self::new(CommonWords::embedded())
    }
}

impl TextAnalyzer {
    pub fn new(common_words: CommonWords) -> Self {
        Self {
            common_words,
            min_frequency: TAG_MIN_FREQUENCY,
            max_tags: MAX_TAGS,
        }
    }

    pub fn with_thresholds(mut self, min_frequency: usize, max_tags: usize) -> Self {
        self.min_frequency = min_frequency.max(1);
        self.max_tags = max_tags;
        self
    }

    /// The most frequent tokens, most frequent first, that occur at least
    /// `min_frequency` times and are not common words. Ties keep the order in
    /// which the tokens first appeared.
    pub fn generate_tags(&self, tokens: &[String]) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for token in tokens {
            let count = counts.entry(token.as_str()).or_insert(0);
            if *count == 0 {
                order.push(token);
            }
            *count += 1;
        }
        // Stable, so equal counts stay in first-seen order.
        order.sort_by(|a, b| counts[b].cmp(&counts[a]));

        let mut tags = Vec::new();
        for token in order {
            if counts[token] < self.min_frequency || tags.len() >= self.max_tags {
                break;
            }
            if !token.is_empty() && !self.common_words.contains(token) {
                tags.push(token.to_string());
            }
        }
        tags
    }

    /// Automatic and indicator tags for already cleaned text. Manual tags are
    /// left empty.
    pub fn analyze(&self, clean: &str) -> ArticleTags {
        ArticleTags {
            automatic: self.generate_tags(&tokenize(clean)),
            interesting: locate_indicators(clean),
            ..Default::default()
        }
    }
}
