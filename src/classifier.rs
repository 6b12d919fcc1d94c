//! Decides whether a fetched sitemap points at more sitemaps or at pages.
//!
//! Real-world index files are inconsistently namespaced and sometimes broken,
//! so four signals are checked in a fixed order and the first hit wins:
//! root element, raw markup, majority URL shape, and (for short lists) any
//! single sitemap-looking URL.

use crate::extractor::{has_local_name, XmlDocument};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static INDEX_MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?(?:[\w.-]+:)?sitemapindex\b").unwrap());
static SITEMAP_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?(?:[\w.-]+:)?sitemap>").unwrap());

const LOW_CARDINALITY: usize = 10;
const SITEMAP_EXTENSIONS: [&str; 3] = [".xml", ".xml.gz", ".gz"];
const SITEMAP_KEYWORDS: [&str; 2] = ["sitemap", "siteindex"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSignal {
    RootElement,
    Markup,
    UrlMajority,
    LowCardinality,
}

pub fn is_sitemap_index(document: Option<&XmlDocument>, raw: &str, urls: &[String]) -> bool {
    index_signal(document, raw, urls).is_some()
}

/// The first signal that marks the document as a sitemap index, if any.
pub fn index_signal(
    document: Option<&XmlDocument>,
    raw: &str,
    urls: &[String],
) -> Option<IndexSignal> {
    if let Some(root) = document.and_then(|doc| doc.root()) {
        if has_local_name(&root.name, "sitemapindex") {
            return Some(IndexSignal::RootElement);
        }
    }

    if INDEX_MARKUP.is_match(raw) || SITEMAP_TAG.is_match(raw) {
        return Some(IndexSignal::Markup);
    }

    if urls.is_empty() {
        return None;
    }

    let sitemap_like = urls.iter().filter(|url| looks_like_sitemap(url)).count();
    if sitemap_like * 2 > urls.len() {
        return Some(IndexSignal::UrlMajority);
    }

    if urls.len() < LOW_CARDINALITY && urls.iter().any(|url| last_segment_is_sitemap(url)) {
        return Some(IndexSignal::LowCardinality);
    }

    None
}

fn looks_like_sitemap(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("sitemap") || lower.ends_with(".xml") || lower.ends_with(".xml.gz")
}

fn last_segment_is_sitemap(url: &str) -> bool {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(|s| s.to_lowercase()))
            .unwrap_or_default(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default()
            .to_lowercase(),
    };

    if segment.is_empty() {
        return false;
    }

    SITEMAP_EXTENSIONS.iter().any(|ext| segment.ends_with(ext))
        || SITEMAP_KEYWORDS.iter().any(|kw| segment.contains(kw))
}
