//! Recursive walk over a sitemap graph.
//!
//! A single visited set is shared by every branch of one walk, and a depth cap
//! bounds adversarially deep chains. Both are needed: the depth cap alone does
//! not stop wide diamond-shaped duplication, the visited set alone does not
//! stop an endless chain of distinct URLs.
//!
//! Fetch permits are shared the same way, so the concurrency limit holds for
//! the whole tree rather than per index.

use crate::sitemap::{SitemapClient, SitemapError};
use crate::utils::normalize_sitemap_url;
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::Semaphore;
use url::Url;

pub const DEFAULT_MAX_DEPTH: usize = 5;
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct BranchFailure {
    pub sitemap_url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpansionReport {
    /// Leaf URLs from every branch, in walk order.
    pub urls: Vec<String>,
    pub sitemaps_visited: usize,
    pub failures: Vec<BranchFailure>,
}

struct WalkState {
    visited: Mutex<HashSet<String>>,
    failures: Mutex<Vec<BranchFailure>>,
    /// Held only while a document is fetched, never across recursion.
    fetch_permits: Semaphore,
}

impl WalkState {
    fn new(concurrency: usize) -> Self {
        Self {
            visited: Mutex::new(HashSet::new()),
            failures: Mutex::new(Vec::new()),
            fetch_permits: Semaphore::new(concurrency.max(1)),
        }
    }

    /// Returns false when another branch already claimed this sitemap.
    fn claim(&self, url: &str) -> bool {
        self.visited
            .lock()
            .map(|mut visited| visited.insert(url.to_string()))
            .unwrap_or(false)
    }

    fn record_failure(&self, sitemap_url: &str, error: &SitemapError) {
        tracing::warn!("Skipping sitemap branch {}: {}", sitemap_url, error);
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(BranchFailure {
                sitemap_url: sitemap_url.to_string(),
                error: error.to_string(),
            });
        }
    }
}

#[derive(Debug, Clone)]
pub struct SitemapExpander {
    client: SitemapClient,
    max_depth: usize,
    concurrency: usize,
    recursive: bool,
}

impl SitemapExpander {
    pub fn new(client: SitemapClient) -> Self {
        Self {
            client,
            max_depth: DEFAULT_MAX_DEPTH,
            concurrency: DEFAULT_CONCURRENCY,
            recursive: true,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// When disabled the root document's URLs are returned as-is, even if it
    /// is a sitemap index.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub async fn expand(&self, root_url: &str) -> Vec<String> {
        self.expand_with_report(root_url).await.urls
    }

    /// Never fails: unreachable or broken branches contribute nothing and are
    /// listed in the report.
    pub async fn expand_with_report(&self, root_url: &str) -> ExpansionReport {
        let state = WalkState::new(self.concurrency);

        let urls = match self.walk(root_url.to_string(), None, 0, &state).await {
            Ok(urls) => urls,
            Err(e) => {
                state.record_failure(root_url, &e);
                Vec::new()
            }
        };

        let sitemaps_visited = state.visited.lock().map(|v| v.len()).unwrap_or(0);
        let failures = state
            .failures
            .into_inner()
            .unwrap_or_default();

        tracing::info!(
            "Expanded {}: {} URLs from {} sitemaps ({} failed branches)",
            root_url,
            urls.len(),
            sitemaps_visited,
            failures.len()
        );

        ExpansionReport {
            urls,
            sitemaps_visited,
            failures,
        }
    }

    fn walk<'a>(
        &'a self,
        raw_url: String,
        parent: Option<Url>,
        depth: usize,
        state: &'a WalkState,
    ) -> BoxFuture<'a, Result<Vec<String>, SitemapError>> {
        async move {
            let url = normalize_sitemap_url(&raw_url, parent.as_ref())
                .ok_or_else(|| SitemapError::InvalidUrl(raw_url.clone()))?;

            if depth > self.max_depth {
                tracing::debug!("Maximum depth {} reached at {}", self.max_depth, url);
                return Ok(Vec::new());
            }

            if !state.claim(url.as_str()) {
                tracing::debug!("Skipping already processed sitemap: {}", url);
                return Ok(Vec::new());
            }

            let document = {
                // the semaphore is never closed
                let _permit = state.fetch_permits.acquire().await.ok();
                self.client.process(url.as_str()).await?
            };

            if !document.is_sitemap_index || !self.recursive {
                return Ok(document.urls);
            }

            tracing::info!(
                "{} is a sitemap index with {} nested sitemaps (depth {})",
                url,
                document.urls.len(),
                depth
            );

            let branches = document
                .urls
                .iter()
                .map(|child| self.walk(child.clone(), Some(url.clone()), depth + 1, state));
            let results = join_all(branches).await;

            let mut collected = Vec::new();
            for (child, result) in document.urls.iter().zip(results) {
                match result {
                    Ok(urls) => collected.extend(urls),
                    Err(e) => state.record_failure(child, &e),
                }
            }

            Ok(collected)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive() {
        let state = WalkState::new(1);
        assert!(state.claim("https://example.com/sitemap.xml"));
        assert!(!state.claim("https://example.com/sitemap.xml"));
        assert!(state.claim("https://example.com/other.xml"));
    }

    #[test]
    fn test_record_failure() {
        let state = WalkState::new(1);
        state.record_failure("nope", &SitemapError::InvalidUrl("nope".to_string()));
        let failures = state.failures.into_inner().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].sitemap_url, "nope");
        assert!(failures[0].error.contains("Invalid sitemap URL"));
    }

    #[tokio::test]
    async fn test_fetch_permits_bound_concurrency() {
        let state = WalkState::new(2);
        let first = state.fetch_permits.acquire().await.unwrap();
        let _second = state.fetch_permits.acquire().await.unwrap();
        assert!(state.fetch_permits.try_acquire().is_err());
        drop(first);
        assert!(state.fetch_permits.try_acquire().is_ok());
    }
}
