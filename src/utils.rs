use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

pub fn trim_and_clean_text(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").to_string()
}

pub fn extract_domain_from_url(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.to_string()))
}

/// Resolves a sitemap reference to an absolute URL.
///
/// Bare hosts and paths without a scheme get `https://` prepended; relative
/// references are joined onto `base` when one is given.
pub fn normalize_sitemap_url(raw: &str, base: Option<&Url>) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut parsed = if raw.contains("://") {
        Url::parse(raw).ok()?
    } else if let Some(base) = base {
        base.join(raw).ok()?
    } else {
        Url::parse(&format!("https://{}", raw.trim_start_matches('/'))).ok()?
    };

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }

    parsed.set_fragment(None);
    Some(parsed)
}

/// `{scheme}://{host}/llms.txt` for the page's origin.
pub fn potential_llms_txt(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(format!("{}://{}/llms.txt", parsed.scheme(), host))
}

pub fn decode_html_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Percent-decodes a URL, keeping the raw text when the result is not UTF-8.
pub fn percent_decode_lossless(text: &str) -> String {
    match percent_decode_str(text).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Order-preserving dedup, first occurrence wins.
pub fn dedup_preserving_order(urls: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
