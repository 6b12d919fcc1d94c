use crate::cli::PipelineConfig;
use crate::utils::{decode_html_entities, trim_and_clean_text};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024;

const HEAD_END: &[u8] = b"</head>";

static TITLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?is)<title[^>]*>(.*?)</title>",
        r#"(?i)<meta[^>]*property=["']og:title["'][^>]*content=["']([^"']*)["']"#,
        r#"(?i)<meta[^>]*content=["']([^"']*)["'][^>]*property=["']og:title["']"#,
        r#"(?i)<meta[^>]*name=["']twitter:title["'][^>]*content=["']([^"']*)["']"#,
        r#"(?i)<meta[^>]*content=["']([^"']*)["'][^>]*name=["']twitter:title["']"#,
    ])
});

static DESCRIPTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r#"(?i)<meta[^>]*name=["']description["'][^>]*content=["']([^"']*)["']"#,
        r#"(?i)<meta[^>]*content=["']([^"']*)["'][^>]*name=["']description["']"#,
        r#"(?i)<meta[^>]*property=["']og:description["'][^>]*content=["']([^"']*)["']"#,
        r#"(?i)<meta[^>]*content=["']([^"']*)["'][^>]*property=["']og:description["']"#,
        r#"(?i)<meta[^>]*name=["']twitter:description["'][^>]*content=["']([^"']*)["']"#,
        r#"(?i)<meta[^>]*content=["']([^"']*)["'][^>]*name=["']twitter:description["']"#,
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Page returned status {0}")]
    StatusError(u16),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
}

impl PageMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.description.is_empty()
    }
}

/// First non-empty capture across `patterns`, in order.
fn first_match(html: &str, patterns: &[Regex]) -> String {
    patterns
        .iter()
        .filter_map(|pattern| pattern.captures(html))
        .filter_map(|caps| caps.get(1))
        .map(|m| trim_and_clean_text(m.as_str()))
        .find(|text| !text.is_empty())
        .map(|text| decode_html_entities(&text))
        .unwrap_or_default()
}

pub fn extract_metadata(html: &str) -> PageMetadata {
    PageMetadata {
        title: first_match(html, &TITLE_PATTERNS),
        description: first_match(html, &DESCRIPTION_PATTERNS),
    }
}

#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    client: Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl MetadataFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, ScraperError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            timeout: config.metadata_timeout,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Title and description for `url`. Every failure (network, status,
    /// timeout) comes back as empty metadata.
    pub async fn fetch_metadata(&self, url: &str) -> PageMetadata {
        match self.fetch_head(url).await {
            Ok(html) => {
                let metadata = extract_metadata(&html);
                tracing::debug!(
                    "Extracted title {:?}, description length {} from {}",
                    metadata.title,
                    metadata.description.len(),
                    url
                );
                metadata
            }
            Err(e) => {
                tracing::debug!("No metadata for {}: {}", url, e);
                PageMetadata::default()
            }
        }
    }

    /// Like [`Self::read_head`], bounded by the configured timeout.
    pub async fn fetch_head(&self, url: &str) -> Result<String, ScraperError> {
        match tokio::time::timeout(self.timeout, self.read_head(url)).await {
            Ok(result) => result,
            Err(_) => Err(ScraperError::Timeout(self.timeout)),
        }
    }

    /// Reads at most `max_body_bytes`, stopping early once `</head>` shows up.
    /// Dropping the response on return closes the connection.
    async fn read_head(&self, url: &str) -> Result<String, ScraperError> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ScraperError::StatusError(response.status().as_u16()));
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let search_from = body.len().saturating_sub(HEAD_END.len());
            body.extend_from_slice(&chunk);

            if body.len() >= self.max_body_bytes {
                body.truncate(self.max_body_bytes);
                break;
            }
            if contains(&body[search_from..], HEAD_END) {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
