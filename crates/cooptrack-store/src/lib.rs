//! Document fetching + the record store contract for Coop Tracker.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use cooptrack_core::{CreateDefaults, JobRecord, JobStatus, ParsedJob};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cooptrack-store";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: "coop-tracker/0.1".to_string(),
        }
    }
}

/// One unconditional network read of the remote posting document.
///
/// No caching and no retries: a failed pull is surfaced whole, and the
/// caller or scheduler re-invokes the full pipeline if it wants another
/// attempt.
#[derive(Debug)]
pub struct DocumentFetcher {
    client: reqwest::Client,
}

impl DocumentFetcher {
    pub fn new(config: FetcherConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_document(&self, url: &str) -> Result<String, FetchError> {
        let span = info_span!("fetch_document", url);
        async {
            let resp = self
                .client
                .get(url)
                .header(reqwest::header::CACHE_CONTROL, "no-cache")
                .send()
                .await?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            Ok(resp.text().await?)
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage constraint violated: {0}")]
    Constraint(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Result of upserting one parsed job.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub record: JobRecord,
    pub created: bool,
}

/// URL-set membership side of a bulk status filter.
#[derive(Debug, Clone)]
pub enum UrlSelection {
    In(HashSet<String>),
    NotIn(HashSet<String>),
}

impl UrlSelection {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlSelection::In(set) => set.contains(url),
            UrlSelection::NotIn(set) => !set.contains(url),
        }
    }
}

/// Selects records by current status plus URL-set membership. Used by the
/// close/reopen sweep, which by construction only ever names `Open` or
/// `Closed` as the current status.
#[derive(Debug, Clone)]
pub struct StatusFilter {
    pub current_status: JobStatus,
    pub urls: UrlSelection,
}

/// Contract the persistent store must satisfy. The pipeline issues no
/// queries beyond these shapes; identity assignment belongs to the
/// implementation.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_by_url(&self, url: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Upsert every job in the batch, keyed by URL, atomically: either all
    /// writes in the batch apply or none do. On create, all fields are
    /// populated and `first_seen_at`/`status` come from `defaults`; on
    /// update, only descriptive fields are overwritten.
    async fn upsert_batch(
        &self,
        jobs: &[ParsedJob],
        defaults: &CreateDefaults,
    ) -> Result<Vec<UpsertOutcome>, StoreError>;

    /// Transition every record matching `filter` to `new_status` in one bulk
    /// operation. Returns the number of records changed.
    async fn bulk_set_status(
        &self,
        filter: &StatusFilter,
        new_status: JobStatus,
    ) -> Result<u64, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError>;
}

/// In-process reference implementation of [`JobStore`].
///
/// Batch atomicity holds trivially because the map lock spans the whole
/// batch and no individual write can fail.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.lock().await.get(url).cloned())
    }

    async fn upsert_batch(
        &self,
        jobs: &[ParsedJob],
        defaults: &CreateDefaults,
    ) -> Result<Vec<UpsertOutcome>, StoreError> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let mut outcomes = Vec::with_capacity(jobs.len());

        for job in jobs {
            match records.get_mut(&job.url) {
                Some(existing) => {
                    existing.company = job.company.clone();
                    existing.role = job.role.clone();
                    existing.location = job.location.clone();
                    existing.category = job.category.clone();
                    existing.age = job.age.clone();
                    existing.age_minutes = job.age_minutes;
                    existing.last_seen_at = now;
                    outcomes.push(UpsertOutcome {
                        record: existing.clone(),
                        created: false,
                    });
                }
                None => {
                    let record = JobRecord {
                        id: Uuid::new_v4(),
                        company: job.company.clone(),
                        role: job.role.clone(),
                        location: job.location.clone(),
                        category: job.category.clone(),
                        url: job.url.clone(),
                        age: job.age.clone(),
                        age_minutes: job.age_minutes,
                        status: defaults.status,
                        first_seen_at: defaults.first_seen_at,
                        last_seen_at: now,
                    };
                    records.insert(job.url.clone(), record.clone());
                    outcomes.push(UpsertOutcome {
                        record,
                        created: true,
                    });
                }
            }
        }

        Ok(outcomes)
    }

    async fn bulk_set_status(
        &self,
        filter: &StatusFilter,
        new_status: JobStatus,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        let mut changed = 0u64;
        for record in records.values_mut() {
            if record.status == filter.current_status && filter.urls.matches(&record.url) {
                record.status = new_status;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.lock().await.len())
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut out: Vec<JobRecord> = records.values().cloned().collect();
        out.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(out)
    }
}
