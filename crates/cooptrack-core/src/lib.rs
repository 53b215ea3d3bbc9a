//! Core domain model for the Coop Tracker ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cooptrack-core";

/// Tracking state of a persisted posting.
///
/// The ingestion pipeline only ever reads and writes `Open` and `Closed`;
/// the remaining states are advanced by downstream actors and must never be
/// auto-transitioned during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Open,
    Closed,
    Applied,
    Interviewing,
    Offer,
    Rejected,
}

impl JobStatus {
    /// True for the two states the reconciler is allowed to touch.
    pub fn is_pipeline_managed(self) -> bool {
        matches!(self, JobStatus::Open | JobStatus::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Open => "OPEN",
            JobStatus::Closed => "CLOSED",
            JobStatus::Applied => "APPLIED",
            JobStatus::Interviewing => "INTERVIEWING",
            JobStatus::Offer => "OFFER",
            JobStatus::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One posting extracted from a single pull. Ephemeral handoff contract from
/// the parsing crate into the reconciler.
///
/// Invariant: `company`, `role` and `url` are non-empty, and `url` is an
/// absolute link unique within the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedJob {
    pub company: String,
    pub role: String,
    pub location: String,
    pub category: String,
    pub url: String,
    /// Raw relative-age display token from the source, e.g. "3d 4h".
    pub age: Option<String>,
    /// Freshness derived from `age`, in minutes.
    pub age_minutes: Option<i64>,
}

impl ParsedJob {
    /// Descriptive subset overwritten on every pull that still reports this URL.
    pub fn fields(&self) -> JobFields {
        JobFields {
            company: self.company.clone(),
            role: self.role.clone(),
            location: self.location.clone(),
            category: self.category.clone(),
            age: self.age.clone(),
            age_minutes: self.age_minutes,
        }
    }
}

/// Descriptive fields of a record. Never includes `status` or
/// `first_seen_at`, which the reconciler and store own exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFields {
    pub company: String,
    pub role: String,
    pub location: String,
    pub category: String,
    pub age: Option<String>,
    pub age_minutes: Option<i64>,
}

/// Create-time values shared by every record inserted within one pull.
///
/// `first_seen_at` is captured once per run, so records created by the same
/// pull are detectable by timestamp equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDefaults {
    pub first_seen_at: DateTime<Utc>,
    pub status: JobStatus,
}

/// Canonical persisted posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub company: String,
    pub role: String,
    pub location: String,
    pub category: String,
    pub url: String,
    pub age: Option<String>,
    pub age_minutes: Option<i64>,
    pub status: JobStatus,
    /// Set once at creation, never overwritten. Authoritative age anchor
    /// when the source's own age token is missing.
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Observability summary returned to the caller after one pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSummary {
    pub inserted_count: usize,
    pub updated_count: usize,
    pub total_parsed_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_only_manages_open_and_closed() {
        assert!(JobStatus::Open.is_pipeline_managed());
        assert!(JobStatus::Closed.is_pipeline_managed());
        assert!(!JobStatus::Applied.is_pipeline_managed());
        assert!(!JobStatus::Interviewing.is_pipeline_managed());
        assert!(!JobStatus::Offer.is_pipeline_managed());
        assert!(!JobStatus::Rejected.is_pipeline_managed());
    }

    #[test]
    fn status_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&JobStatus::Open).unwrap();
        assert_eq!(json, "\"OPEN\"");
        let back: JobStatus = serde_json::from_str("\"APPLIED\"").unwrap();
        assert_eq!(back, JobStatus::Applied);
    }

    #[test]
    fn fields_excludes_lifecycle_data() {
        let job = ParsedJob {
            company: "Acme".into(),
            role: "SWE Intern".into(),
            location: "NYC".into(),
            category: "Software Engineering".into(),
            url: "https://example.com/apply".into(),
            age: Some("3d".into()),
            age_minutes: Some(4320),
        };
        let fields = job.fields();
        assert_eq!(fields.company, "Acme");
        assert_eq!(fields.age_minutes, Some(4320));
    }
}
