//! Storage traits and error types
//!
//! The orchestrator writes through [`RecordSink`]; the scheduler optionally
//! persists its tasks through [`TaskStore`]. Both are implemented by
//! [`SqliteStorage`](crate::storage::SqliteStorage).

use crate::model::{Job, Record};
use crate::scheduler::ScheduledTask;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt row in {table}: {message}")]
    Corrupt { table: String, message: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Destination for sealed records and job status
///
/// Implementations must be idempotent on the record content hash: saving the
/// same record twice stores it once.
pub trait RecordSink: Send + Sync {
    /// Persists a batch; returns how many records were new
    fn save_batch(&self, records: &[Record]) -> StorageResult<usize>;

    /// Registers a job or updates its status and counters
    fn update_job_status(&self, job: &Job) -> StorageResult<()>;
}

/// Optional persistence for scheduled tasks
pub trait TaskStore: Send + Sync {
    fn save_task(&self, task: &ScheduledTask) -> StorageResult<()>;

    fn remove_task(&self, task_id: &str) -> StorageResult<()>;

    fn load_tasks(&self) -> StorageResult<Vec<ScheduledTask>>;
}
