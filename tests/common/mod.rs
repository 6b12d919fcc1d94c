#![allow(dead_code)]

use async_trait::async_trait;
use sitemap_harvester::{
    JobStore, JobUpdate, MemoryStore, Notification, PipelineConfig, ProcessingJob, SitemapRecord,
    SitemapUpdate, SitemapUrlEntry, StoreError, UrlEntryUpdate,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn urlset(urls: &[String]) -> String {
    let entries: String = urls
        .iter()
        .map(|url| format!("  <url><loc>{}</loc></url>\n", url))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n{}</urlset>",
        entries
    )
}

pub fn sitemap_index(urls: &[String]) -> String {
    let entries: String = urls
        .iter()
        .map(|url| format!("  <sitemap><loc>{}</loc></sitemap>\n", url))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<sitemapindex xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n{}</sitemapindex>",
        entries
    )
}

pub fn html_page(title: &str, description: &str) -> String {
    format!(
        "<html><head><title>{}</title><meta name=\"description\" content=\"{}\"></head><body>body</body></html>",
        title, description
    )
}

pub fn page_urls(server: &MockServer, prefix: &str, count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| format!("{}/{}-{}", server.uri(), prefix, i))
        .collect()
}

pub async fn mount_xml(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

/// Serves an HTML page with a title derived from its path for every URL.
pub async fn mount_pages(server: &MockServer, urls: &[String]) {
    for url in urls {
        let page_path = url.trim_start_matches(&server.uri()).to_string();
        Mock::given(method("GET"))
            .and(path(page_path.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(html_page(&format!("Title {}", page_path), "About it")),
            )
            .mount(server)
            .await;
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        sitemap_timeout: Duration::from_secs(5),
        metadata_timeout: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
}

/// Delegates to a [`MemoryStore`], records every job row after each update
/// and can be told to reject sitemap updates.
#[derive(Default)]
pub struct InstrumentedStore {
    pub inner: MemoryStore,
    job_updates: Mutex<Vec<ProcessingJob>>,
    fail_sitemap_updates: AtomicBool,
}

impl InstrumentedStore {
    pub fn failing_sitemap_updates() -> Self {
        let store = Self::default();
        store.fail_sitemap_updates.store(true, Ordering::SeqCst);
        store
    }

    /// `(processed_urls, total_urls)` after each job update, in order.
    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.job_updates
            .lock()
            .unwrap()
            .iter()
            .map(|job| (job.processed_urls, job.total_urls))
            .collect()
    }
}

#[async_trait]
impl JobStore for InstrumentedStore {
    async fn insert_sitemap(&self, record: SitemapRecord) -> Result<(), StoreError> {
        self.inner.insert_sitemap(record).await
    }

    async fn supersede_sitemap(&self, url: &str) -> Result<usize, StoreError> {
        self.inner.supersede_sitemap(url).await
    }

    async fn update_sitemap(&self, id: Uuid, update: SitemapUpdate) -> Result<(), StoreError> {
        if self.fail_sitemap_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("sitemap table unavailable".to_string()));
        }
        self.inner.update_sitemap(id, update).await
    }

    async fn insert_job(&self, job: ProcessingJob) -> Result<Uuid, StoreError> {
        self.inner.insert_job(job).await
    }

    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<ProcessingJob, StoreError> {
        let job = self.inner.update_job(id, update).await?;
        self.job_updates.lock().unwrap().push(job.clone());
        Ok(job)
    }

    async fn supersede_url_entries(&self, job_id: Uuid) -> Result<usize, StoreError> {
        self.inner.supersede_url_entries(job_id).await
    }

    async fn insert_url_entries(&self, entries: Vec<SitemapUrlEntry>) -> Result<usize, StoreError> {
        self.inner.insert_url_entries(entries).await
    }

    async fn update_url_entry(
        &self,
        job_id: Uuid,
        url: &str,
        update: UrlEntryUpdate,
    ) -> Result<(), StoreError> {
        self.inner.update_url_entry(job_id, url, update).await
    }

    async fn insert_notification(&self, notification: Notification) -> Result<(), StoreError> {
        self.inner.insert_notification(notification).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ProcessingJob>, StoreError> {
        self.inner.get_job(id).await
    }

    async fn get_sitemap(&self, id: Uuid) -> Result<Option<SitemapRecord>, StoreError> {
        self.inner.get_sitemap(id).await
    }

    async fn latest_sitemap(&self, url: &str) -> Result<Option<SitemapRecord>, StoreError> {
        self.inner.latest_sitemap(url).await
    }

    async fn latest_url_entries(
        &self,
        sitemap_url: &str,
    ) -> Result<Vec<SitemapUrlEntry>, StoreError> {
        self.inner.latest_url_entries(sitemap_url).await
    }

    async fn job_url_entries(&self, job_id: Uuid) -> Result<Vec<SitemapUrlEntry>, StoreError> {
        self.inner.job_url_entries(job_id).await
    }

    async fn notifications_for(&self, user_id: &str) -> Result<Vec<Notification>, StoreError> {
        self.inner.notifications_for(user_id).await
    }
}
