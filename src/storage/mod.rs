//! Storage module for persisting crawl data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Record persistence, deduplicated on the content hash
//! - Job status tracking
//! - Scheduled task persistence
//! - Aggregate statistics for reports

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{RecordSink, StorageError, StorageResult, TaskStore};

use std::path::Path;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    SqliteStorage::new(path)
}

/// A grouping key with its row count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountRow {
    pub key: String,
    pub count: u64,
}

/// Aggregates over the persisted store
///
/// Project-level figures use the latest snapshot of each project.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub snapshots: u64,
    pub distinct_projects: u64,
    pub total_raised: f64,
    pub total_backers: u64,
    pub by_status: Vec<CountRow>,
    pub by_category: Vec<CountRow>,
    pub jobs_by_status: Vec<CountRow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_storage_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("fundscout.db");

        let storage = open_storage(&path).unwrap();
        assert_eq!(storage.count_records().unwrap(), 0);
        assert!(path.exists());
    }
}
