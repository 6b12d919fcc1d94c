//! Persistence seam for the job pipeline.
//!
//! The pipeline only needs a handful of row operations, so any backend can sit
//! behind [`JobStore`]. [`MemoryStore`] is the in-process implementation used
//! by the binary and the tests.

use crate::entities::{
    JobStatus, Notification, ProcessingJob, SitemapRecord, SitemapUrlEntry, UrlStatus,
};
use crate::scraper::PageMetadata;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("A latest sitemap record already exists for {0}")]
    Conflict(String),
    #[error("Job {0} not found")]
    JobNotFound(Uuid),
    #[error("Sitemap record {0} not found")]
    SitemapNotFound(Uuid),
    #[error("No entry for {url} in job {job_id}")]
    UrlEntryNotFound { job_id: Uuid, url: String },
    #[error("Record {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("Job {id} progress {processed} rejected (current {current}, total {total})")]
    InvalidProgress {
        id: Uuid,
        processed: usize,
        current: usize,
        total: usize,
    },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub processed_urls: Option<usize>,
    pub total_urls: Option<usize>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn processed(mut self, processed_urls: usize) -> Self {
        self.processed_urls = Some(processed_urls);
        self
    }

    pub fn total(mut self, total_urls: usize) -> Self {
        self.total_urls = Some(total_urls);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SitemapUpdate {
    pub status: Option<JobStatus>,
    pub url_count: Option<usize>,
}

impl SitemapUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn url_count(url_count: usize) -> Self {
        Self {
            url_count: Some(url_count),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct UrlEntryUpdate {
    pub status: UrlStatus,
    pub metadata: Option<PageMetadata>,
}

/// Sitemap records are addressed by generation id and URL entries by the job
/// that wrote them, so a run that was superseded mid-flight only ever touches
/// its own rows.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when a latest record exists for the URL.
    async fn insert_sitemap(&self, record: SitemapRecord) -> Result<(), StoreError>;

    /// Marks every latest record for `url` as history. Returns how many flipped.
    async fn supersede_sitemap(&self, url: &str) -> Result<usize, StoreError>;

    /// Inserts, superseding the previous generation on a duplicate URL.
    async fn upsert_sitemap(&self, record: SitemapRecord) -> Result<(), StoreError> {
        match self.insert_sitemap(record.clone()).await {
            Err(StoreError::Conflict(url)) => {
                let superseded = self.supersede_sitemap(&url).await?;
                tracing::info!(
                    "Sitemap {} already known, superseded {} earlier record(s)",
                    url,
                    superseded
                );
                self.insert_sitemap(record).await
            }
            other => other,
        }
    }

    /// Status only moves forward, as for jobs.
    async fn update_sitemap(&self, id: Uuid, update: SitemapUpdate) -> Result<(), StoreError>;

    /// Fails with [`StoreError::SitemapNotFound`] unless the job's sitemap
    /// generation exists.
    async fn insert_job(&self, job: ProcessingJob) -> Result<Uuid, StoreError>;

    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<ProcessingJob, StoreError>;

    /// Flips the latest entries other runs left for the job's sitemap. Does
    /// nothing once the job's own generation has been superseded.
    async fn supersede_url_entries(&self, job_id: Uuid) -> Result<usize, StoreError>;

    /// Upserts by `(job_id, url)`. Entries of a superseded generation are
    /// stored as history, never as latest.
    async fn insert_url_entries(&self, entries: Vec<SitemapUrlEntry>) -> Result<usize, StoreError>;

    async fn update_url_entry(
        &self,
        job_id: Uuid,
        url: &str,
        update: UrlEntryUpdate,
    ) -> Result<(), StoreError>;

    async fn insert_notification(&self, notification: Notification) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<ProcessingJob>, StoreError>;

    async fn get_sitemap(&self, id: Uuid) -> Result<Option<SitemapRecord>, StoreError>;

    async fn latest_sitemap(&self, url: &str) -> Result<Option<SitemapRecord>, StoreError>;

    async fn latest_url_entries(&self, sitemap_url: &str)
        -> Result<Vec<SitemapUrlEntry>, StoreError>;

    async fn job_url_entries(&self, job_id: Uuid) -> Result<Vec<SitemapUrlEntry>, StoreError>;

    async fn notifications_for(&self, user_id: &str) -> Result<Vec<Notification>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    sitemaps: Vec<SitemapRecord>,
    jobs: HashMap<Uuid, ProcessingJob>,
    url_entries: Vec<SitemapUrlEntry>,
    notifications: Vec<Notification>,
}

impl MemoryState {
    /// The job's sitemap generation, as long as the job exists.
    fn generation_of(&self, job_id: Uuid) -> Result<&SitemapRecord, StoreError> {
        let job = self.jobs.get(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        self.sitemaps
            .iter()
            .find(|record| record.id == job.sitemap_id)
            .ok_or(StoreError::SitemapNotFound(job.sitemap_id))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every generation of entries for `sitemap_url`, stale ones included.
    pub async fn url_entry_history(&self, sitemap_url: &str) -> Vec<SitemapUrlEntry> {
        let state = self.state.read().await;
        state
            .url_entries
            .iter()
            .filter(|entry| entry.sitemap_url == sitemap_url)
            .cloned()
            .collect()
    }

    pub async fn sitemap_history(&self, url: &str) -> Vec<SitemapRecord> {
        let state = self.state.read().await;
        state
            .sitemaps
            .iter()
            .filter(|record| record.url == url)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_sitemap(&self, record: SitemapRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state
            .sitemaps
            .iter()
            .any(|existing| existing.url == record.url && existing.is_latest)
        {
            return Err(StoreError::Conflict(record.url));
        }
        state.sitemaps.push(record);
        Ok(())
    }

    async fn supersede_sitemap(&self, url: &str) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut flipped = 0;
        for record in state
            .sitemaps
            .iter_mut()
            .filter(|record| record.url == url && record.is_latest)
        {
            record.is_latest = false;
            record.updated_at = now;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn update_sitemap(&self, id: Uuid, update: SitemapUpdate) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .sitemaps
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or(StoreError::SitemapNotFound(id))?;

        if let Some(status) = update.status {
            if !record.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: record.status,
                    to: status,
                });
            }
            record.status = status;
        }
        if let Some(url_count) = update.url_count {
            record.url_count = url_count;
            record.parsed_at = Utc::now();
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_job(&self, job: ProcessingJob) -> Result<Uuid, StoreError> {
        let mut state = self.state.write().await;
        if !state.sitemaps.iter().any(|record| record.id == job.sitemap_id) {
            return Err(StoreError::SitemapNotFound(job.sitemap_id));
        }

        let id = job.id;
        state.jobs.insert(id, job);
        Ok(id)
    }

    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<ProcessingJob, StoreError> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;

        if let Some(status) = update.status {
            if !job.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: job.status,
                    to: status,
                });
            }
        }

        let total = update.total_urls.unwrap_or(job.total_urls);
        if let Some(processed) = update.processed_urls {
            if processed < job.processed_urls || processed > total {
                return Err(StoreError::InvalidProgress {
                    id,
                    processed,
                    current: job.processed_urls,
                    total,
                });
            }
            job.processed_urls = processed;
        }
        job.total_urls = total;
        if let Some(status) = update.status {
            job.status = status;
        }
        job.updated_at = Utc::now();

        Ok(job.clone())
    }

    async fn supersede_url_entries(&self, job_id: Uuid) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let generation = state.generation_of(job_id)?;
        if !generation.is_latest {
            return Ok(0);
        }
        let sitemap_url = generation.url.clone();

        let now = Utc::now();
        let mut flipped = 0;
        for entry in state.url_entries.iter_mut().filter(|entry| {
            entry.sitemap_url == sitemap_url && entry.is_latest && entry.job_id != job_id
        }) {
            entry.is_latest = false;
            entry.updated_at = now;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn insert_url_entries(&self, entries: Vec<SitemapUrlEntry>) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;

        let mut checked = Vec::with_capacity(entries.len());
        for mut entry in entries {
            entry.is_latest = state.generation_of(entry.job_id)?.is_latest;
            checked.push(entry);
        }

        let count = checked.len();
        for entry in checked {
            let existing = state
                .url_entries
                .iter()
                .position(|current| current.job_id == entry.job_id && current.url == entry.url);
            match existing {
                Some(index) => state.url_entries[index] = entry,
                None => state.url_entries.push(entry),
            }
        }

        Ok(count)
    }

    async fn update_url_entry(
        &self,
        job_id: Uuid,
        url: &str,
        update: UrlEntryUpdate,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let entry = state
            .url_entries
            .iter_mut()
            .find(|entry| entry.job_id == job_id && entry.url == url)
            .ok_or_else(|| StoreError::UrlEntryNotFound {
                job_id,
                url: url.to_string(),
            })?;

        entry.status = update.status;
        if let Some(metadata) = update.metadata {
            entry.title = metadata.title;
            entry.description = metadata.description;
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_notification(&self, notification: Notification) -> Result<(), StoreError> {
        self.state.write().await.notifications.push(notification);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ProcessingJob>, StoreError> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn get_sitemap(&self, id: Uuid) -> Result<Option<SitemapRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.sitemaps.iter().find(|record| record.id == id).cloned())
    }

    async fn latest_sitemap(&self, url: &str) -> Result<Option<SitemapRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .sitemaps
            .iter()
            .find(|record| record.url == url && record.is_latest)
            .cloned())
    }

    async fn latest_url_entries(
        &self,
        sitemap_url: &str,
    ) -> Result<Vec<SitemapUrlEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .url_entries
            .iter()
            .filter(|entry| entry.sitemap_url == sitemap_url && entry.is_latest)
            .cloned()
            .collect())
    }

    async fn job_url_entries(&self, job_id: Uuid) -> Result<Vec<SitemapUrlEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .url_entries
            .iter()
            .filter(|entry| entry.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn notifications_for(&self, user_id: &str) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .filter(|notification| notification.user_id == user_id)
            .cloned()
            .collect())
    }
}
