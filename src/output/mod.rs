//! Output module for generating crawl summaries and reports
//!
//! This module handles:
//! - Generating markdown summaries of finished jobs
//! - Rendering statistics over the persisted store
//! - Exporting the latest project snapshots as JSON or CSV

mod export;
mod markdown;
pub mod stats;

pub use export::{export_records, ExportFormat};
pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use stats::{format_statistics, load_statistics, print_statistics, CrawlStatistics};

use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
