//! Crawler module for job execution
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching and error classification
//! - The job orchestrator (listing discovery and the detail worker pool)
//! - Progress reporting

mod coordinator;
mod fetcher;
mod progress;

pub use coordinator::{JobResult, Orchestrator, QuarantinedRecord};
pub use fetcher::{build_http_client, FetchError, HttpFetcher, PageFetcher};
pub use progress::{
    ChannelProgress, LogLevel, LogLine, NullProgress, ProgressEvent, ProgressMessage,
    ProgressSink,
};

use crate::cache::{ContentCache, FileCache, NoCache};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::extractor::HtmlExtractor;
use crate::governor::Governor;
use crate::storage::RecordSink;
use crate::FundscoutError;
use std::sync::Arc;

/// Opens the configured content cache, or a [`NoCache`] when disabled
pub async fn open_cache(
    config: &Config,
    clock: SharedClock,
) -> Result<Arc<dyn ContentCache>, FundscoutError> {
    if !config.cache.enabled {
        return Ok(Arc::new(NoCache));
    }
    let cache = FileCache::open(&config.cache.dir, config.cache.ttl(), clock).await?;
    tracing::debug!("Using content cache at {}", cache.dir().display());
    Ok(Arc::new(cache))
}

/// Wires the default HTTP fetcher, HTML extractor and cache into an orchestrator
///
/// # Arguments
///
/// * `config` - The loaded configuration snapshot
/// * `sink` - Where records and job status go
/// * `clock` - Time source shared with the cache
pub async fn build_orchestrator(
    config: Arc<Config>,
    sink: Arc<dyn RecordSink>,
    clock: SharedClock,
) -> Result<Orchestrator, FundscoutError> {
    let governor = Governor::new(&config.governor);
    let fetcher = Arc::new(HttpFetcher::from_config(&config.http)?);
    let extractor = Arc::new(HtmlExtractor::new(&config.crawler.base_url)?);
    let cache = open_cache(&config, clock.clone()).await?;

    Ok(Orchestrator::new(config, governor, fetcher, extractor, sink)?
        .with_cache(cache)
        .with_clock(clock))
}
