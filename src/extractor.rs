//! Pulls `<loc>` URLs out of raw sitemap bytes.
//!
//! Three strategies are tried in order and the first one that does not error
//! wins: a strict tree parse, a lenient streaming pass, and a regex scan that
//! copes with markup quick-xml refuses to read at all.

use crate::utils::{decode_html_entities, percent_decode_lossless};
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Serialize;

/// Documents larger than this skip the tree parse.
pub const DEFAULT_STREAMING_THRESHOLD: usize = 5 * 1024 * 1024;

static LOC_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<(?:[\w.-]+:)?loc(?:\s[^>]*)?>\s*(?:<!\[CDATA\[\s*)?(.*?)(?:\s*\]\]>)?\s*</(?:[\w.-]+:)?loc\s*>",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    fn new(name: String) -> Self {
        Self {
            name,
            children: Vec::new(),
        }
    }

    /// Concatenated text and CDATA content of this element and its descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }
}

fn collect_text(nodes: &[XmlNode], out: &mut String) {
    for node in nodes {
        match node {
            XmlNode::Text(text) | XmlNode::CData(text) => out.push_str(text),
            XmlNode::Element(element) => collect_text(&element.children, out),
        }
    }
}

/// A parsed XML document: the top-level nodes in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlDocument {
    pub nodes: Vec<XmlNode>,
}

impl XmlDocument {
    pub fn root(&self) -> Option<&XmlElement> {
        self.nodes.iter().find_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    /// Every `loc` element's content, in document order.
    pub fn loc_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        visit_locs(&self.nodes, &mut urls);
        urls
    }
}

fn visit_locs(nodes: &[XmlNode], urls: &mut Vec<String>) {
    for node in nodes {
        if let XmlNode::Element(element) = node {
            if has_local_name(&element.name, "loc") {
                if let Some(url) = clean_loc(&element.text_content()) {
                    urls.push(url);
                }
            } else {
                visit_locs(&element.children, urls);
            }
        }
    }
}

/// Matches `name` exactly or as the suffix of a prefixed name (`ns:name`).
pub fn has_local_name(qualified: &str, local: &str) -> bool {
    let qualified = qualified.to_ascii_lowercase();
    qualified == local || qualified.ends_with(&format!(":{local}"))
}

fn clean_loc(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(percent_decode_lossless(trimmed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Tree,
    Streaming,
    Regex,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub urls: Vec<String>,
    /// Present only when the tree parse succeeded.
    pub document: Option<XmlDocument>,
    pub method: ExtractionMethod,
}

/// Strict parse into an [`XmlDocument`]. Mismatched end tags and bad entity
/// references are errors here.
pub fn parse_document(bytes: &[u8]) -> Result<XmlDocument, quick_xml::Error> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);

    let mut document = XmlDocument::default();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                stack.push(XmlElement::new(name));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                attach(&mut stack, &mut document, XmlNode::Element(XmlElement::new(name)));
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut document, XmlNode::Element(element));
                }
            }
            Event::Text(e) => {
                let text = e.unescape()?.to_string();
                attach(&mut stack, &mut document, XmlNode::Text(text));
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e).to_string();
                attach(&mut stack, &mut document, XmlNode::CData(text));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    // Unclosed elements at EOF are folded into their parents
    while let Some(element) = stack.pop() {
        attach(&mut stack, &mut document, XmlNode::Element(element));
    }

    Ok(document)
}

fn attach(stack: &mut [XmlElement], document: &mut XmlDocument, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => document.nodes.push(node),
    }
}

/// Event-driven pass that never builds a tree. End tag names are not checked
/// and unescapable text is kept raw, so it survives documents the tree parse
/// rejects.
pub fn extract_streaming(bytes: &[u8]) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    reader.check_end_names(false);

    let mut urls = Vec::new();
    let mut in_loc = false;
    let mut current = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                in_loc = has_local_name(&name, "loc");
                if in_loc {
                    current.clear();
                }
            }
            Event::Text(e) if in_loc => match e.unescape() {
                Ok(text) => current.push_str(&text),
                Err(_) => current.push_str(&decode_html_entities(&String::from_utf8_lossy(&e))),
            },
            Event::CData(e) if in_loc => {
                current.push_str(&String::from_utf8_lossy(&e));
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if in_loc && has_local_name(&name, "loc") {
                    if let Some(url) = clean_loc(&current) {
                        urls.push(url);
                    }
                }
                in_loc = false;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(urls)
}

/// Last-resort scan for `<loc>` pairs, tolerating CDATA and namespace prefixes.
pub fn extract_with_regex(text: &str) -> Vec<String> {
    LOC_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| {
            let raw = m.as_str().trim();
            if raw.is_empty() {
                None
            } else {
                Some(percent_decode_lossless(&raw.replace("&amp;", "&")))
            }
        })
        .collect()
}

/// Runs the strategies in order and returns the first successful result.
/// Never fails: garbage input yields an empty URL list.
pub fn extract(bytes: &[u8], streaming_threshold: usize) -> Extraction {
    if bytes.len() <= streaming_threshold {
        match parse_document(bytes) {
            Ok(document) => {
                return Extraction {
                    urls: document.loc_urls(),
                    document: Some(document),
                    method: ExtractionMethod::Tree,
                };
            }
            Err(e) => {
                tracing::debug!("Tree parse failed, falling back to streaming: {}", e);
            }
        }
    } else {
        tracing::debug!(
            "Document is {} bytes, using streaming parser",
            bytes.len()
        );
    }

    match extract_streaming(bytes) {
        Ok(urls) => Extraction {
            urls,
            document: None,
            method: ExtractionMethod::Streaming,
        },
        Err(e) => {
            tracing::debug!("Streaming parse failed, falling back to regex: {}", e);
            Extraction {
                urls: extract_with_regex(&String::from_utf8_lossy(bytes)),
                document: None,
                method: ExtractionMethod::Regex,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URLSET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/</loc><priority>1.0</priority></url>
  <url><loc> https://example.com/about </loc></url>
  <url><loc>https://example.com/blog?a=1&amp;b=2</loc></url>
</urlset>"#;

    #[test]
    fn test_tree_parse_extracts_locs_in_order() {
        let extraction = extract(URLSET.as_bytes(), DEFAULT_STREAMING_THRESHOLD);
        assert_eq!(extraction.method, ExtractionMethod::Tree);
        assert_eq!(
            extraction.urls,
            vec![
                "https://example.com/",
                "https://example.com/about",
                "https://example.com/blog?a=1&b=2",
            ]
        );
        let root = extraction.document.as_ref().and_then(|d| d.root()).unwrap();
        assert_eq!(root.name, "urlset");
    }

    #[test]
    fn test_tree_parse_handles_cdata_and_prefixes() {
        let xml = r#"<ns:urlset xmlns:ns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <ns:url><ns:loc><![CDATA[https://example.com/a]]></ns:loc></ns:url>
  <ns:url><ns:loc>https://example.com/b</ns:loc></ns:url>
</ns:urlset>"#;
        let document = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(
            document.loc_urls(),
            vec!["https://example.com/a", "https://example.com/b"]
        );
    }

    #[test]
    fn test_percent_encoded_locs_are_decoded() {
        let xml = "<urlset><url><loc>https://example.com/caf%C3%A9</loc></url></urlset>";
        let extraction = extract(xml.as_bytes(), DEFAULT_STREAMING_THRESHOLD);
        assert_eq!(extraction.urls, vec!["https://example.com/café"]);
    }

    #[test]
    fn test_mismatched_tags_fall_back_to_streaming() {
        let xml = "<urlset><url><loc>https://example.com/1</loc></urll><url><loc>https://example.com/2</loc></url></urlset>";
        assert!(parse_document(xml.as_bytes()).is_err());

        let extraction = extract(xml.as_bytes(), DEFAULT_STREAMING_THRESHOLD);
        assert_eq!(extraction.method, ExtractionMethod::Streaming);
        assert!(extraction.document.is_none());
        assert_eq!(
            extraction.urls,
            vec!["https://example.com/1", "https://example.com/2"]
        );
    }

    #[test]
    fn test_bare_ampersand_survives_streaming() {
        let xml = "<urlset><url><loc>https://example.com/?a=1&b=2</loc></url></urlset>";
        let extraction = extract(xml.as_bytes(), DEFAULT_STREAMING_THRESHOLD);
        assert_eq!(extraction.method, ExtractionMethod::Streaming);
        assert_eq!(extraction.urls, vec!["https://example.com/?a=1&b=2"]);
    }

    #[test]
    fn test_large_documents_skip_tree_parse() {
        let extraction = extract(URLSET.as_bytes(), 16);
        assert_eq!(extraction.method, ExtractionMethod::Streaming);
        assert_eq!(extraction.urls.len(), 3);
    }

    #[test]
    fn test_unreadable_markup_uses_regex() {
        let xml = "<urlset><url><loc>https://example.com/x</loc></url><!-- never closed";
        let extraction = extract(xml.as_bytes(), DEFAULT_STREAMING_THRESHOLD);
        assert_eq!(extraction.method, ExtractionMethod::Regex);
        assert_eq!(extraction.urls, vec!["https://example.com/x"]);
    }

    #[test]
    fn test_regex_matches_tree_on_valid_input() {
        let xml = r#"<?xml version="1.0"?>
<sitemapindex xmlns:s="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc><![CDATA[ https://example.com/sitemap-posts.xml ]]></loc></sitemap>
  <sitemap><s:loc>https://example.com/sitemap-pages.xml?page=1&amp;lang=en</s:loc></sitemap>
  <s:sitemap><s:loc><![CDATA[https://example.com/sitemap-tags.xml]]></s:loc></s:sitemap>
</sitemapindex>"#;

        let tree = parse_document(xml.as_bytes()).unwrap().loc_urls();
        let regex = extract_with_regex(xml);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree, regex);
    }

    #[test]
    fn test_regex_ignores_lookalike_tags() {
        let text = "<location>nope</location><loc>https://example.com/yes</loc>";
        assert_eq!(extract_with_regex(text), vec!["https://example.com/yes"]);
    }

    #[test]
    fn test_empty_and_non_xml_input_yield_nothing() {
        for input in ["", "not xml at all", "{\"json\": true}", "\x00\x01\x02"] {
            let extraction = extract(input.as_bytes(), DEFAULT_STREAMING_THRESHOLD);
            assert!(extraction.urls.is_empty(), "input {:?}", input);
        }
    }

    #[test]
    fn test_blank_locs_are_skipped() {
        let xml = "<urlset><url><loc>   </loc></url><url><loc/></url></urlset>";
        let extraction = extract(xml.as_bytes(), DEFAULT_STREAMING_THRESHOLD);
        assert!(extraction.urls.is_empty());
    }

    #[test]
    fn test_has_local_name() {
        assert!(has_local_name("loc", "loc"));
        assert!(has_local_name("LOC", "loc"));
        assert!(has_local_name("image:loc", "loc"));
        assert!(!has_local_name("location", "loc"));
        assert!(!has_local_name("xloc", "loc"));
    }
}
