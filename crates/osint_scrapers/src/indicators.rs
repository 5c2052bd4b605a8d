//! Indicators of compromise found in article text.

use std::collections::HashSet;
use std::net::Ipv6Addr;

use lazy_static::lazy_static;
use osint_core::TagsOfInterest;
use regex::Regex;

pub const CVE: &str = "CVE's";
pub const MITRE: &str = "MITRE IDs";
pub const IPV4: &str = "ipv4-addresses";
pub const IPV6: &str = "ipv6-addresses";
pub const EMAIL: &str = "email-addresses";
pub const URLS: &str = "urls";
pub const MD5: &str = "MD5-hash";
pub const SHA1: &str = "SHA1-hash";
pub const SHA256: &str = "SHA256-hash";
pub const SHA512: &str = "SHA512-hash";

lazy_static! {
    static ref CVE_ID: Regex = Regex::new(r"(?i)\bcve-\d{4}-\d{4,7}").unwrap();
    static ref MITRE_ID: Regex = Regex::new(r"(?i)\b(?:TA|[TMSGO])\d{4}\.\d{3}\b").unwrap();
    static ref IPV4_ADDRESS: Regex =
        Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b").unwrap();
    static ref IPV6_RUN: Regex = Regex::new(r"[0-9A-Fa-f:.]+").unwrap();
    static ref EMAIL_ADDRESS: Regex = Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").unwrap();
    static ref URL: Regex = Regex::new(r#"(?i)\b(?:https?|ftp)://[^\s<>"'\]\[)(]+"#).unwrap();
    static ref MD5_HASH: Regex = Regex::new(r"\b[a-fA-F0-9]{32}\b").unwrap();
    static ref SHA1_HASH: Regex = Regex::new(r"\b[a-fA-F0-9]{40}\b").unwrap();
    static ref SHA256_HASH: Regex = Regex::new(r"\b[a-fA-F0-9]{64}\b").unwrap();
    static ref SHA512_HASH: Regex = Regex::new(r"\b[a-fA-F0-9]{128}\b").unwrap();
    static ref DEFANGED_DOT: Regex = Regex::new(r"(?i)\[\.\]|\(\.\)|\{\.\}|\[dot\]|\(dot\)").unwrap();
    static ref DEFANGED_AT: Regex = Regex::new(r"(?i)\[@\]|\(@\)|\[at\]|\(at\)").unwrap();
    static ref DEFANGED_SCHEME: Regex = Regex::new(r"(?i)\bhxxp(s?)(?:\[:\]|:)//").unwrap();
}

/// Undoes the usual ways indicators are defanged in write-ups, e.g.
/// `hxxp://evil[.]com`.
pub fn refang(text: &str) -> String {
    let text = DEFANGED_SCHEME.replace_all(text, "http$1://");
    let text = DEFANGED_DOT.replace_all(&text, ".");
    DEFANGED_AT.replace_all(&text, "@").into_owned()
}

fn dedup(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values.filter(|v| seen.insert(v.clone())).collect()
}

fn find_all(pattern: &Regex, text: &str) -> Vec<String> {
    dedup(pattern.find_iter(text).map(|m| m.as_str().to_string()))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// The longest address inside one run of hex digits, colons and dots. It may
/// start where the run starts, if that is the start of a word, or right after
/// any colon of the run, so `IPv6:2001:db8::1` yields `2001:db8::1`.
fn ipv6_in_run<'a>(text: &str, start: usize, run: &'a str) -> Option<&'a str> {
    if text[start + run.len()..].starts_with(is_word_char) {
        return None;
    }
    let word_start = !text[..start].ends_with(is_word_char);
    word_start
        .then_some(0)
        .into_iter()
        .chain(run.match_indices(':').map(|(i, _)| i + 1))
        .map(|from| run[from..].trim_end_matches('.'))
        .find(|candidate| {
            candidate.contains(':')
                && candidate.chars().any(|c| c.is_ascii_hexdigit())
                && candidate.parse::<Ipv6Addr>().is_ok()
        })
}

fn ipv6_addresses(text: &str) -> Vec<String> {
    dedup(
        IPV6_RUN
            .find_iter(text)
            .filter_map(|run| ipv6_in_run(text, run.start(), run.as_str()))
            .map(str::to_string),
    )
}

fn urls(text: &str) -> Vec<String> {
    dedup(
        URL.find_iter(text)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']).to_string()),
    )
}

/// Every indicator category with at least one match, in a fixed category
/// order. CVE and MITRE ids are upper-cased; everything else keeps its case.
pub fn locate_indicators(text: &str) -> Vec<TagsOfInterest> {
    let refanged = refang(text);
    let upper = |values: Vec<String>| dedup(values.into_iter().map(|v| v.to_uppercase()));

    let categories = [
        (CVE, upper(find_all(&CVE_ID, text))),
        (MITRE, upper(find_all(&MITRE_ID, text))),
        (IPV4, find_all(&IPV4_ADDRESS, &refanged)),
        (IPV6, ipv6_addresses(text)),
        (EMAIL, find_all(&EMAIL_ADDRESS, &refanged)),
        (URLS, urls(&refanged)),
        (MD5, find_all(&MD5_HASH, text)),
        (SHA1, find_all(&SHA1_HASH, text)),
        (SHA256, find_all(&SHA256_HASH, text)),
        (SHA512, find_all(&SHA512_HASH, text)),
    ];

    categories
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(name, values)| TagsOfInterest {
            name: name.to_string(),
            values,
        })
        .collect()
}
