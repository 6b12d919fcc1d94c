use crate::classifier::is_sitemap_index;
use crate::cli::PipelineConfig;
use crate::extractor::{extract, ExtractionMethod};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

pub const SITEMAP_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

#[derive(Error, Debug)]
pub enum SitemapError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Sitemap {url} returned status {status}")]
    StatusError { url: String, status: u16 },
    #[error("Invalid sitemap URL: {0}")]
    InvalidUrl(String),
}

/// One fetched sitemap after extraction and classification.
#[derive(Debug, Clone, Serialize)]
pub struct SitemapDocument {
    pub url: String,
    pub urls: Vec<String>,
    pub is_sitemap_index: bool,
    pub method: ExtractionMethod,
}

/// Extracts and classifies an already-fetched sitemap body.
pub fn analyze_sitemap(url: &str, body: &[u8], streaming_threshold: usize) -> SitemapDocument {
    let extraction = extract(body, streaming_threshold);
    let raw = String::from_utf8_lossy(body);
    let is_index = is_sitemap_index(extraction.document.as_ref(), &raw, &extraction.urls);

    SitemapDocument {
        url: url.to_string(),
        urls: extraction.urls,
        is_sitemap_index: is_index,
        method: extraction.method,
    }
}

#[derive(Debug, Clone)]
pub struct SitemapClient {
    client: Client,
    streaming_threshold: usize,
}

impl SitemapClient {
    pub fn new(config: &PipelineConfig) -> Result<Self, SitemapError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(SITEMAP_ACCEPT));

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.sitemap_timeout)
            .build()?;

        Ok(Self {
            client,
            streaming_threshold: config.streaming_threshold,
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, SitemapError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(SitemapError::StatusError {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    pub async fn process(&self, url: &str) -> Result<SitemapDocument, SitemapError> {
        tracing::debug!("Fetching sitemap: {}", url);
        let body = self.fetch(url).await?;
        let document = analyze_sitemap(url, &body, self.streaming_threshold);

        tracing::info!(
            "Parsed {} ({} bytes, {:?}): {} URLs, sitemap index: {}",
            url,
            body.len(),
            document.method,
            document.urls.len(),
            document.is_sitemap_index
        );

        Ok(document)
    }
}
