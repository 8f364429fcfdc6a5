//! Crawl jobs and their statistics

use crate::model::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a job crawls: an inclusive page range of one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub page_from: u32,
    pub page_to: u32,
    pub category: String,
}

impl JobTemplate {
    pub fn new(page_from: u32, page_to: u32, category: impl Into<String>) -> Self {
        Self {
            page_from,
            page_to,
            category: category.into(),
        }
    }

    pub fn pages(&self) -> std::ops::RangeInclusive<u32> {
        self.page_from..=self.page_to
    }

    /// Zero when the range is inverted
    pub fn total_pages(&self) -> u32 {
        if self.page_to < self.page_from {
            return 0;
        }
        (self.page_to - self.page_from).saturating_add(1)
    }
}

/// One orchestrator run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub template: JobTemplate,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub found: u64,
    pub processed: u64,
    pub failed: u64,
    pub summary: String,
    pub config_hash: Option<String>,
}

impl Job {
    pub fn start(template: JobTemplate, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            template,
            started_at: now,
            ended_at: None,
            status: JobStatus::Running,
            found: 0,
            processed: 0,
            failed: 0,
            summary: String::new(),
            config_hash: None,
        }
    }

    /// Moves a running job to a terminal status
    ///
    /// Returns false and leaves the job untouched if it already finished.
    pub fn finish(&mut self, status: JobStatus, now: DateTime<Utc>, summary: String) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.ended_at = Some(now);
        self.summary = summary;
        true
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Counters accumulated over one job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pages_processed: u64,
    pub pages_failed: u64,
    pub candidates_found: u64,
    pub candidates_skipped: u64,
    pub records_processed: u64,
    pub records_valid: u64,
    pub records_invalid: u64,
    pub records_saved: u64,
    pub detail_failures: u64,
    pub cache_hits: u64,
    pub requests: u64,
    pub duration_ms: u64,
}

impl JobStats {
    /// Percentage of dispatched candidates that produced a record
    pub fn success_rate(&self) -> f64 {
        let dispatched = self.records_processed + self.detail_failures;
        if dispatched == 0 {
            0.0
        } else {
            self.records_processed as f64 / dispatched as f64 * 100.0
        }
    }
}
