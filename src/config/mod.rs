//! Configuration module for fundscout
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section except `[output]` has defaults, so a minimal file only names the
//! database path.
//!
//! # Example
//!
//! ```no_run
//! use fundscout::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("fundscout.toml")).unwrap();
//! println!("Listing URL: {}", config.crawler.listing_url("all", 1));
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CacheConfig, Config, CrawlerConfig, GovernorConfig, HttpConfig, OutputConfig,
    SchedulerConfig, TaskEntry, ValidatorConfig, DEFAULT_CATEGORY,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate_job_template;
