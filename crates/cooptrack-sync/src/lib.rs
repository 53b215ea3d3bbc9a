//! Pull orchestration: fetch, parse and reconcile one pass over the remote
//! posting document, then sweep lifecycle status.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use cooptrack_core::{CreateDefaults, JobStatus, ParsedJob, PullSummary};
use cooptrack_parse::{parse_document, ParseOptions};
use cooptrack_store::{
    DocumentFetcher, FetchError, FetcherConfig, JobStore, StatusFilter, StoreError, UrlSelection,
};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cooptrack-sync";

pub const DEFAULT_SOURCE_URL: &str = "https://github.com/SimplifyJobs/Summer2026-Internships";

/// Upsert transaction size. A tunable bound on per-batch locking, not a
/// correctness parameter.
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct PullConfig {
    pub source_url: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub batch_size: usize,
    pub exclude_markers: Vec<String>,
    pub scheduler_enabled: bool,
    pub pull_cron: String,
}

impl PullConfig {
    pub fn from_env() -> Self {
        Self {
            source_url: std::env::var("COOPTRACK_SOURCE_URL")
                .unwrap_or_else(|_| DEFAULT_SOURCE_URL.to_string()),
            http_timeout_secs: std::env::var("COOPTRACK_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: std::env::var("COOPTRACK_USER_AGENT")
                .unwrap_or_else(|_| "coop-tracker/0.1".to_string()),
            batch_size: std::env::var("COOPTRACK_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BATCH_SIZE),
            exclude_markers: std::env::var("COOPTRACK_EXCLUDE_MARKERS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            scheduler_enabled: std::env::var("COOPTRACK_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            pull_cron: std::env::var("PULL_CRON").unwrap_or_else(|_| "0 0 6 * * *".to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PullError {
    /// Network or HTTP failure reaching the source. Fatal to the current
    /// invocation; no partial parse is attempted.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// A batch upsert failed. Batches committed before the failure stay
    /// committed; the store may have partially advanced.
    #[error("upsert failed after {batches_committed} committed batch(es): {source}")]
    Reconcile {
        batches_committed: usize,
        #[source]
        source: StoreError,
    },
    /// The close/reopen sweep failed after all batches committed. Reported
    /// as its own kind so callers can tell a half-swept store from a
    /// half-upserted one.
    #[error("status sweep failed: {0}")]
    Sweep(#[source] StoreError),
}

/// One logical pull unit: fetch, parse, reconcile, sweep.
///
/// Invocations are not mutually excluded against each other; callers must
/// serialize pulls or accept last-writer-wins on overlapping batches.
/// Reconciliation is idempotent, so an abandoned half-finished run is
/// healed by the next successful one.
pub struct PullPipeline {
    config: PullConfig,
    fetcher: DocumentFetcher,
    store: Arc<dyn JobStore>,
}

impl PullPipeline {
    pub fn new(config: PullConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        let fetcher = DocumentFetcher::new(FetcherConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: config.user_agent.clone(),
        })
        .context("building document fetcher")?;
        Ok(Self {
            config,
            fetcher,
            store,
        })
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// End-to-end pull: one fetch, one parse pass, one reconciliation pass.
    pub async fn run_once(&self) -> Result<PullSummary, PullError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, source_url = %self.config.source_url, "starting pull");

        let payload = self.fetcher.fetch_document(&self.config.source_url).await?;
        let options = ParseOptions {
            exclude_markers: self.config.exclude_markers.clone(),
        };
        let parsed = parse_document(&payload, &options);
        info!(%run_id, parsed = parsed.len(), "parsed posting document");

        let summary = self.reconcile(parsed).await?;
        info!(
            %run_id,
            inserted = summary.inserted_count,
            updated = summary.updated_count,
            total = summary.total_parsed_count,
            "pull complete"
        );
        Ok(summary)
    }

    /// Merges a deduplicated parsed batch into the store.
    ///
    /// Upserts run in `batch_size` chunks, each atomic on its own; the
    /// close/reopen sweep runs strictly after every chunk has committed and
    /// touches only `OPEN`/`CLOSED` records, so downstream tracking states
    /// are never clobbered.
    pub async fn reconcile(&self, parsed: Vec<ParsedJob>) -> Result<PullSummary, PullError> {
        // Captured once per run: every record created by this pull shares
        // one first_seen_at.
        let started_at = Utc::now();
        let defaults = CreateDefaults {
            first_seen_at: started_at,
            status: JobStatus::Open,
        };

        let mut inserted_count = 0usize;
        let mut updated_count = 0usize;
        let mut batches_committed = 0usize;

        for chunk in parsed.chunks(self.config.batch_size.max(1)) {
            let outcomes = self
                .store
                .upsert_batch(chunk, &defaults)
                .await
                .map_err(|source| PullError::Reconcile {
                    batches_committed,
                    source,
                })?;
            batches_committed += 1;
            for outcome in outcomes {
                if outcome.created {
                    inserted_count += 1;
                } else {
                    updated_count += 1;
                }
            }
        }

        let pulled_urls: HashSet<String> = parsed.iter().map(|job| job.url.clone()).collect();

        let closed = self
            .store
            .bulk_set_status(
                &StatusFilter {
                    current_status: JobStatus::Open,
                    urls: UrlSelection::NotIn(pulled_urls.clone()),
                },
                JobStatus::Closed,
            )
            .await
            .map_err(PullError::Sweep)?;

        let reopened = self
            .store
            .bulk_set_status(
                &StatusFilter {
                    current_status: JobStatus::Closed,
                    urls: UrlSelection::In(pulled_urls),
                },
                JobStatus::Open,
            )
            .await
            .map_err(PullError::Sweep)?;

        if closed > 0 || reopened > 0 {
            info!(closed, reopened, "status sweep applied");
        }

        Ok(PullSummary {
            inserted_count,
            updated_count,
            total_parsed_count: parsed.len(),
        })
    }

    /// Builds the optional cron scheduler that re-invokes the whole pipeline.
    pub async fn maybe_build_scheduler(self: Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.pull_cron.clone();
        let pipeline = self;
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(
                        inserted = summary.inserted_count,
                        updated = summary.updated_count,
                        "scheduled pull complete"
                    ),
                    Err(err) => warn!(error = %err, "scheduled pull failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}
