//! Fundscout: a scheduled crawler for crowdfunding project listings
//!
//! This crate discovers projects from paginated category listings, fetches and
//! extracts each project's detail page, validates the result, and persists
//! deduplicated snapshots. Fetches share one resource governor (concurrency
//! ceilings, request pacing, a circuit breaker) and a TTL-bounded content cache.
//! A task scheduler re-runs crawl templates on fixed intervals.

pub mod cache;
pub mod clock;
pub mod config;
pub mod crawler;
pub mod extractor;
pub mod governor;
pub mod model;
pub mod output;
pub mod scheduler;
pub mod storage;
pub mod validator;

use thiserror::Error;

/// Main error type for fundscout operations
#[derive(Debug, Error)]
pub enum FundscoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Resource error: {0}")]
    Governor(#[from] governor::GovernorError),

    #[error("Extraction error: {0}")]
    Extract(#[from] extractor::ExtractError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Setup error: {0}")]
    Setup(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid category: {0}")]
    InvalidCategory(String),
}

/// Result type alias for fundscout operations
pub type Result<T> = std::result::Result<T, FundscoutError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{JobResult, Orchestrator};
pub use model::{Job, JobStatus, JobTemplate, ProjectStatus, Record};
pub use scheduler::TaskScheduler;
