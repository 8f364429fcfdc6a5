//! The seam between the scheduler and whatever executes a job

use crate::model::{JobStatus, JobTemplate};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// What the scheduler keeps from a finished job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub records_processed: u64,
    pub errors_count: u64,
    pub summary: String,
}

impl JobOutcome {
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            records_processed: 0,
            errors_count: 1,
            summary: summary.into(),
        }
    }
}

/// Runs one job to a terminal status
///
/// Implementations observe `cancel` cooperatively and always return an outcome;
/// failures are expressed through [`JobOutcome::status`].
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, template: JobTemplate, cancel: CancellationToken) -> JobOutcome;
}
