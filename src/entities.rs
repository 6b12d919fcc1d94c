//! Records the job pipeline persists and clients poll.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Status only moves forward; terminal states are absorbing. Re-applying
    /// the current status is allowed so progress updates can carry it.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum UrlStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SitemapRecord {
    /// One id per submission; jobs and status updates address this generation.
    pub id: Uuid,
    pub url: String,
    pub domain: String,
    pub url_count: usize,
    pub parsed_at: DateTime<Utc>,
    pub status: JobStatus,
    pub user_id: String,
    /// Only one record per URL is the latest; older ones are kept as history.
    pub is_latest: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SitemapRecord {
    pub fn new(url: String, domain: String, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url,
            domain,
            url_count: 0,
            parsed_at: now,
            status: JobStatus::Queued,
            user_id,
            is_latest: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub sitemap_id: Uuid,
    pub sitemap_url: String,
    pub user_id: String,
    pub status: JobStatus,
    pub total_urls: usize,
    pub processed_urls: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(sitemap: &SitemapRecord, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sitemap_id: sitemap.id,
            sitemap_url: sitemap.url.clone(),
            user_id,
            status: JobStatus::Queued,
            total_urls: 0,
            processed_urls: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SitemapUrlEntry {
    pub url: String,
    pub sitemap_url: String,
    /// The run that wrote this entry.
    pub job_id: Uuid,
    pub domain: String,
    pub potential_llms_txt: Option<String>,
    pub title: String,
    pub description: String,
    pub status: UrlStatus,
    pub user_id: String,
    pub is_latest: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum NotificationKind {
    SitemapProcessed,
    SitemapFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NotificationData {
    pub sitemap_url: String,
    pub job_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Notification {
    pub user_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub data: NotificationData,
    pub created_at: DateTime<Utc>,
}
