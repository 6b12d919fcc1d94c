//! Job orchestration: sitemap and job records, expansion, batched metadata
//! fetching, progress counters and the terminal notification.
//!
//! A run is split in stages so the HTTP layer can answer after expansion and
//! leave metadata fetching to a background task:
//!
//! 1. [`JobPipeline::submit`] creates the sitemap record, then the job.
//! 2. [`JobPipeline::expand_stage`] collects the leaf URL set and publishes the
//!    denominator.
//! 3. [`JobPipeline::process_stage`] walks the URL set batch by batch.
//! 4. [`JobPipeline::finalize`] is the single recovery boundary for 2 and 3.

use crate::cli::PipelineConfig;
use crate::entities::{
    JobStatus, Notification, NotificationData, NotificationKind, ProcessingJob, SitemapRecord,
    SitemapUrlEntry, UrlStatus,
};
use crate::expander::{BranchFailure, SitemapExpander};
use crate::scraper::{MetadataFetcher, ScraperError};
use crate::sitemap::{SitemapClient, SitemapError};
use crate::storage::{JobStore, JobUpdate, SitemapUpdate, StoreError, UrlEntryUpdate};
use crate::utils::{
    dedup_preserving_order, extract_domain_from_url, normalize_sitemap_url, potential_llms_txt,
};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid sitemap URL: {0}")]
    InvalidSitemapUrl(String),
    #[error("Failed to create job: {0}")]
    JobCreation(StoreError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Sitemap client error: {0}")]
    Sitemap(#[from] SitemapError),
    #[error("Metadata fetcher error: {0}")]
    Scraper(#[from] ScraperError),
}

impl PipelineError {
    /// Errors caused by the request itself rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingField(_) | PipelineError::InvalidSitemapUrl(_)
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub sitemap_url: Option<String>,
    pub user_id: Option<String>,
    pub domain: Option<String>,
    pub recursive: Option<bool>,
    pub max_depth: Option<usize>,
}

impl SubmitRequest {
    pub fn new(sitemap_url: &str, user_id: &str) -> Self {
        Self {
            sitemap_url: Some(sitemap_url.to_string()),
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }
}

/// An accepted job plus the per-request options its stages run with.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: ProcessingJob,
    pub domain: String,
    pub recursive: bool,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpandedSitemap {
    pub urls: Vec<String>,
    pub sitemaps_visited: usize,
    pub failed_branches: Vec<BranchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub total_urls: usize,
    pub completed_urls: usize,
    pub failed_urls: usize,
    pub sitemaps_visited: usize,
    pub failed_branches: Vec<BranchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub sitemap_url: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<JobSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct JobPipeline {
    store: Arc<dyn JobStore>,
    sitemaps: SitemapClient,
    fetcher: MetadataFetcher,
    config: PipelineConfig,
}

impl JobPipeline {
    pub fn new(store: Arc<dyn JobStore>, config: PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            sitemaps: SitemapClient::new(&config)?,
            fetcher: MetadataFetcher::new(&config)?,
            store,
            config,
        })
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Creates the sitemap record, then the job. A previously seen sitemap is
    /// superseded, not rejected.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Submission, PipelineError> {
        let raw_url = required(request.sitemap_url, "sitemapUrl")?;
        let user_id = required(request.user_id, "userId")?;

        let sitemap_url = normalize_sitemap_url(&raw_url, None)
            .ok_or_else(|| PipelineError::InvalidSitemapUrl(raw_url.clone()))?
            .to_string();
        let domain = request
            .domain
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .or_else(|| extract_domain_from_url(&sitemap_url))
            .unwrap_or_default();

        let record = SitemapRecord::new(sitemap_url, domain.clone(), user_id.clone());
        self.store.upsert_sitemap(record.clone()).await?;

        let job = ProcessingJob::new(&record, user_id);
        self.store
            .insert_job(job.clone())
            .await
            .map_err(PipelineError::JobCreation)?;

        tracing::info!("Created job {} for {}", job.id, job.sitemap_url);

        Ok(Submission {
            job,
            domain,
            recursive: request.recursive.unwrap_or(self.config.recursive),
            max_depth: request.max_depth.unwrap_or(self.config.max_depth),
        })
    }

    /// Expands the sitemap tree, records the URL count on the sitemap and the
    /// job, then moves both to `processing`.
    pub async fn expand_stage(
        &self,
        submission: &Submission,
    ) -> Result<ExpandedSitemap, PipelineError> {
        let job = &submission.job;
        let expander = SitemapExpander::new(self.sitemaps.clone())
            .with_max_depth(submission.max_depth)
            .with_concurrency(self.config.concurrency)
            .with_recursive(submission.recursive);

        let report = expander.expand_with_report(&job.sitemap_url).await;
        let urls = dedup_preserving_order(report.urls);
        if urls.is_empty() {
            tracing::warn!("No URLs found in sitemap {}", job.sitemap_url);
        }

        self.store
            .update_sitemap(job.sitemap_id, SitemapUpdate::url_count(urls.len()))
            .await?;
        self.store
            .update_job(job.id, JobUpdate::default().total(urls.len()))
            .await?;

        self.store
            .update_job(job.id, JobUpdate::status(JobStatus::Processing))
            .await?;
        self.store
            .update_sitemap(job.sitemap_id, SitemapUpdate::status(JobStatus::Processing))
            .await?;

        Ok(ExpandedSitemap {
            urls,
            sitemaps_visited: report.sitemaps_visited,
            failed_branches: report.failures,
        })
    }

    /// Fetches metadata batch by batch. Each batch is inserted as
    /// `processing` placeholders first, fetched concurrently, and followed by
    /// a cumulative `processed_urls` update.
    pub async fn process_stage(
        &self,
        submission: &Submission,
        expanded: &ExpandedSitemap,
    ) -> Result<JobSummary, PipelineError> {
        let job = &submission.job;
        let total = expanded.urls.len();

        let superseded = self.store.supersede_url_entries(job.id).await?;
        if superseded > 0 {
            tracing::info!(
                "Marked {} previous entries of {} as stale",
                superseded,
                job.sitemap_url
            );
        }

        let mut processed = 0;
        let mut completed = 0;
        let mut failed = 0;

        for batch in expanded.urls.chunks(self.config.batch_size.max(1)) {
            let placeholders = batch
                .iter()
                .map(|url| self.placeholder_entry(submission, url))
                .collect();
            self.store.insert_url_entries(placeholders).await?;

            let statuses = join_all(batch.iter().map(|url| self.process_url(job, url))).await;
            for status in statuses {
                match status {
                    UrlStatus::Completed => completed += 1,
                    _ => failed += 1,
                }
            }

            processed = (processed + batch.len()).min(total);
            self.store
                .update_job(job.id, JobUpdate::default().processed(processed))
                .await?;
            tracing::info!("Processed {}/{} URLs for job {}", processed, total, job.id);
        }

        Ok(JobSummary {
            total_urls: total,
            completed_urls: completed,
            failed_urls: failed,
            sitemaps_visited: expanded.sitemaps_visited,
            failed_branches: expanded.failed_branches.clone(),
        })
    }

    fn placeholder_entry(&self, submission: &Submission, url: &str) -> SitemapUrlEntry {
        let now = Utc::now();
        SitemapUrlEntry {
            url: url.to_string(),
            sitemap_url: submission.job.sitemap_url.clone(),
            job_id: submission.job.id,
            domain: submission.domain.clone(),
            potential_llms_txt: potential_llms_txt(url),
            title: String::new(),
            description: String::new(),
            status: UrlStatus::Processing,
            user_id: submission.job.user_id.clone(),
            is_latest: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Missing metadata still completes the entry; only an unfetchable URL or
    /// a lost update counts as failed.
    async fn process_url(&self, job: &ProcessingJob, url: &str) -> UrlStatus {
        let update = if extract_domain_from_url(url).is_none() {
            tracing::warn!("Cannot fetch metadata for malformed URL {}", url);
            UrlEntryUpdate {
                status: UrlStatus::Failed,
                metadata: None,
            }
        } else {
            UrlEntryUpdate {
                status: UrlStatus::Completed,
                metadata: Some(self.fetcher.fetch_metadata(url).await),
            }
        };

        let status = update.status;
        match self.store.update_url_entry(job.id, url, update).await {
            Ok(()) => status,
            Err(e) => {
                tracing::warn!("Failed to record metadata for {}: {}", url, e);
                UrlStatus::Failed
            }
        }
    }

    /// Writes the terminal status of job and sitemap plus one notification.
    /// Store errors here are logged, since nothing above can recover them.
    pub async fn finalize(
        &self,
        job: &ProcessingJob,
        result: Result<JobSummary, PipelineError>,
    ) -> JobOutcome {
        let (status, summary, error) = match result {
            Ok(summary) => (JobStatus::Completed, Some(summary), None),
            Err(e) => {
                tracing::error!("Job {} for {} failed: {}", job.id, job.sitemap_url, e);
                (JobStatus::Failed, None, Some(e.to_string()))
            }
        };

        let mut update = JobUpdate::status(status);
        if let Some(summary) = &summary {
            update = update.total(summary.total_urls).processed(summary.total_urls);
        }
        if let Err(e) = self.store.update_job(job.id, update).await {
            tracing::error!("Could not mark job {} as {}: {}", job.id, status, e);
        }

        if let Err(e) = self
            .store
            .update_sitemap(job.sitemap_id, SitemapUpdate::status(status))
            .await
        {
            tracing::error!("Could not mark sitemap {} as {}: {}", job.sitemap_url, status, e);
        }

        let (kind, message) = match (&summary, &error) {
            (Some(summary), _) => (
                NotificationKind::SitemapProcessed,
                format!(
                    "Sitemap {} processed: {} URLs",
                    job.sitemap_url, summary.total_urls
                ),
            ),
            (None, error) => (
                NotificationKind::SitemapFailed,
                format!(
                    "Sitemap {} failed: {}",
                    job.sitemap_url,
                    error.as_deref().unwrap_or("unknown error")
                ),
            ),
        };
        let notification = Notification {
            user_id: job.user_id.clone(),
            message,
            kind,
            data: NotificationData {
                sitemap_url: job.sitemap_url.clone(),
                job_id: job.id,
            },
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_notification(notification).await {
            tracing::error!("Could not record notification for job {}: {}", job.id, e);
        }

        tracing::info!("Job {} finished as {}", job.id, status);

        JobOutcome {
            job_id: job.id,
            sitemap_url: job.sitemap_url.clone(),
            status,
            summary,
            error,
        }
    }

    async fn run_stages(&self, submission: &Submission) -> Result<JobSummary, PipelineError> {
        let expanded = self.expand_stage(submission).await?;
        self.process_stage(submission, &expanded).await
    }

    /// Runs every stage after submission and finalizes the job.
    pub async fn run(&self, submission: &Submission) -> JobOutcome {
        let result = self.run_stages(submission).await;
        self.finalize(&submission.job, result).await
    }

    /// Runs the metadata stage and finalization on the tokio runtime.
    pub fn spawn_processing(
        self: Arc<Self>,
        submission: Submission,
        expanded: ExpandedSitemap,
    ) -> JoinHandle<JobOutcome> {
        tokio::spawn(async move {
            let result = self.process_stage(&submission, &expanded).await;
            self.finalize(&submission.job, result).await
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, PipelineError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(PipelineError::MissingField(field))
}
