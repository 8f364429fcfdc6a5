//! Crawl orchestrator - main job pipeline
//!
//! A job runs in two stages:
//! - Listing discovery: pages in ascending order, candidates filtered and deduplicated
//! - Detail processing: a bounded worker pool fetches, extracts, seals and validates
//!   each candidate; valid records are flushed to the sink in batches
//!
//! Every fetch goes through the content cache and the governor (network permit,
//! pacing, breaker). Cancellation is cooperative: once the token fires nothing new is
//! dispatched and no fetch begins, but work already in flight finishes and buffered
//! records are still flushed.

use crate::cache::{CacheKey, ContentCache, NoCache};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::crawler::fetcher::{FetchError, PageFetcher};
use crate::crawler::progress::{LogLevel, LogLine, NullProgress, ProgressEvent, ProgressSink};
use crate::extractor::Extractor;
use crate::governor::{Governor, Permit, ResourceClass};
use crate::model::{CandidateRef, Job, JobStats, JobStatus, JobTemplate, Record};
use crate::scheduler::{JobLauncher, JobOutcome};
use crate::storage::RecordSink;
use crate::validator::{DataValidator, ValidationResult};
use crate::FundscoutError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A record that failed validation and was kept out of the sink
#[derive(Debug, Clone)]
pub struct QuarantinedRecord {
    pub record: Record,
    pub validation: ValidationResult,
}

/// Everything a finished job produced
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job: Job,
    pub stats: JobStats,
    /// Candidates whose detail page could not be fetched or extracted
    pub failed: Vec<CandidateRef>,
    pub quarantined: Vec<QuarantinedRecord>,
}

impl JobResult {
    pub fn failed_urls(&self) -> Vec<&str> {
        self.failed.iter().map(|c| c.url.as_str()).collect()
    }
}

/// Request counters gathered by one fetch sequence
#[derive(Debug, Default)]
struct Tally {
    requests: u64,
    cache_hits: u64,
}

enum PageError {
    Cancelled,
    Fetch(FetchError),
}

enum Detail {
    Record(Record, ValidationResult),
    Failed(String),
    Cancelled,
}

struct DetailOutcome {
    candidate: CandidateRef,
    tally: Tally,
    detail: Detail,
}

/// Drives crawl jobs
///
/// Cheap to clone; clones share their collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    config_hash: Option<String>,
    governor: Governor,
    cache: Arc<dyn ContentCache>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn Extractor>,
    validator: Arc<DataValidator>,
    sink: Arc<dyn RecordSink>,
    progress: Arc<dyn ProgressSink>,
    clock: SharedClock,
}

impl Orchestrator {
    /// Creates an orchestrator without a cache or progress sink attached
    pub fn new(
        config: Arc<Config>,
        governor: Governor,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self, FundscoutError> {
        let validator = DataValidator::new(&config.validator)?;
        Ok(Self {
            config,
            config_hash: None,
            governor,
            cache: Arc::new(NoCache),
            fetcher,
            extractor,
            validator: Arc::new(validator),
            sink,
            progress: Arc::new(NullProgress),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn ContentCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Tags every job with the hash of the configuration it ran under
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    /// Runs one job over `template` until completion or cancellation
    pub async fn run(&self, template: JobTemplate, cancel: CancellationToken) -> JobResult {
        let started = Instant::now();
        let mut job = match self.register(template) {
            Ok(job) => job,
            Err(result) => return *result,
        };

        tracing::info!(
            job_id = %job.id,
            category = %job.template.category,
            page_from = job.template.page_from,
            page_to = job.template.page_to,
            "Starting crawl job"
        );
        self.log(
            LogLevel::Info,
            format!(
                "Job {} started: {} pages {}-{}",
                job.id, job.template.category, job.template.page_from, job.template.page_to
            ),
        );

        let mut stats = JobStats::default();
        let mut tally = Tally::default();
        let candidates = self.discover(&job, &cancel, &mut stats, &mut tally).await;

        stats.candidates_found = candidates.len() as u64;
        job.found = stats.candidates_found;
        tracing::info!(
            job_id = %job.id,
            "Discovered {} candidates ({} skipped, {} pages failed)",
            stats.candidates_found,
            stats.candidates_skipped,
            stats.pages_failed
        );

        self.execute(job, candidates, cancel, stats, tally, started)
            .await
    }

    /// Re-dispatches the candidates that failed in `previous`
    ///
    /// Returns `None` when there is nothing to retry. Pass the returned result back
    /// in to retry again; each retry carries only its own failures.
    pub async fn retry_failed(
        &self,
        previous: &JobResult,
        cancel: CancellationToken,
    ) -> Option<JobResult> {
        if previous.failed.is_empty() {
            return None;
        }
        let candidates = previous.failed.clone();

        let started = Instant::now();
        let mut job = match self.register(previous.job.template.clone()) {
            Ok(job) => job,
            Err(result) => return Some(*result),
        };

        tracing::info!(
            job_id = %job.id,
            retry_of = %previous.job.id,
            "Retrying {} failed candidates",
            candidates.len()
        );
        let stats = JobStats {
            candidates_found: candidates.len() as u64,
            ..JobStats::default()
        };
        job.found = stats.candidates_found;

        Some(
            self.execute(job, candidates, cancel, stats, Tally::default(), started)
                .await,
        )
    }

    /// Creates the job and announces it to the sink
    fn register(&self, template: JobTemplate) -> Result<Job, Box<JobResult>> {
        let mut job = Job::start(template, self.clock.now());
        job.config_hash = self.config_hash.clone();

        if let Err(e) = self.sink.update_job_status(&job) {
            tracing::error!(job_id = %job.id, "Failed to register job: {}", e);
            self.log(LogLevel::Error, format!("Failed to register job: {}", e));
            job.finish(
                JobStatus::Error,
                self.clock.now(),
                format!("failed to register job: {}", e),
            );
            return Err(Box::new(JobResult {
                job,
                stats: JobStats::default(),
                failed: Vec::new(),
                quarantined: Vec::new(),
            }));
        }

        // Breaker counts are per job; an earlier job's failures must not abort this one
        self.governor.reset_breaker();
        Ok(job)
    }

    async fn execute(
        &self,
        mut job: Job,
        candidates: Vec<CandidateRef>,
        cancel: CancellationToken,
        mut stats: JobStats,
        tally: Tally,
        started: Instant,
    ) -> JobResult {
        stats.requests += tally.requests;
        stats.cache_hits += tally.cache_hits;

        let (failed, quarantined) = self
            .process_candidates(&job, candidates, &cancel, &mut stats)
            .await;

        stats.duration_ms = started.elapsed().as_millis() as u64;
        job.processed = stats.records_processed;
        job.failed = stats.detail_failures;

        let status = if cancel.is_cancelled() {
            JobStatus::Stopped
        } else if job.found == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        job.finish(status, self.clock.now(), summarize(&stats));

        if let Err(e) = self.sink.update_job_status(&job) {
            tracing::error!(job_id = %job.id, "Failed to record final job status: {}", e);
        }

        tracing::info!(
            job_id = %job.id,
            status = %job.status,
            duration_ms = stats.duration_ms,
            "Crawl job finished: {}",
            job.summary
        );
        self.emit_progress(
            &job,
            job.template.page_to,
            stats.records_processed,
            100.0,
        );
        self.log(
            if status == JobStatus::Completed {
                LogLevel::Info
            } else {
                LogLevel::Warn
            },
            format!("Job {} {}: {}", job.id, job.status, job.summary),
        );

        JobResult {
            job,
            stats,
            failed,
            quarantined,
        }
    }

    /// Walks the listing pages and collects unique, non-skipped candidates
    async fn discover(
        &self,
        job: &Job,
        cancel: &CancellationToken,
        stats: &mut JobStats,
        tally: &mut Tally,
    ) -> Vec<CandidateRef> {
        let template = &job.template;
        let total_pages = template.total_pages().max(1);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for (index, page) in template.pages().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(job_id = %job.id, "Cancelled during listing discovery");
                break;
            }
            if self.governor.is_tripped() {
                tracing::warn!(
                    job_id = %job.id,
                    page,
                    "Circuit breaker open after {} consecutive failures, aborting discovery",
                    self.governor.consecutive_failures()
                );
                self.log(
                    LogLevel::Warn,
                    format!("Too many consecutive errors, stopped at page {}", page),
                );
                break;
            }

            let url = self.config.crawler.listing_url(&template.category, page);
            tracing::debug!(page, url = %url, "Fetching listing page");

            match self.fetch_page(&url, cancel, tally).await {
                Ok(body) => match self.extractor.parse_listing(&body) {
                    Ok(found) => {
                        stats.pages_processed += 1;
                        let before = candidates.len();
                        for candidate in found {
                            if let Some(reason) = self.skip_reason(&candidate) {
                                tracing::debug!(
                                    external_id = %candidate.external_id,
                                    "Skipping candidate: {}",
                                    reason
                                );
                                stats.candidates_skipped += 1;
                                continue;
                            }
                            if seen.insert(candidate.external_id.clone()) {
                                candidates.push(candidate);
                            }
                        }
                        tracing::debug!(page, new = candidates.len() - before, "Listing page parsed");
                    }
                    Err(e) => {
                        stats.pages_failed += 1;
                        self.governor.record_failure();
                        tracing::warn!("Failed to parse listing page {}: {}", page, e);
                    }
                },
                Err(PageError::Cancelled) => break,
                Err(PageError::Fetch(e)) => {
                    stats.pages_failed += 1;
                    self.governor.record_failure();
                    tracing::warn!("Failed to fetch listing page {}: {}", page, e);
                }
            }

            let percent = (index + 1) as f64 / total_pages as f64 * 100.0;
            self.emit_progress_found(job, page, candidates.len() as u64, percent);
        }

        candidates
    }

    fn skip_reason(&self, candidate: &CandidateRef) -> Option<String> {
        let crawler = &self.config.crawler;
        let title = candidate.title.trim();
        if title.chars().count() < crawler.min_title_length {
            return Some(format!("title '{}' too short", title));
        }
        crawler
            .skip_keywords
            .iter()
            .find(|keyword| title.contains(keyword.as_str()))
            .map(|keyword| format!("title contains '{}'", keyword))
    }

    /// Runs candidates through the worker pool and flushes valid records
    async fn process_candidates(
        &self,
        job: &Job,
        candidates: Vec<CandidateRef>,
        cancel: &CancellationToken,
        stats: &mut JobStats,
    ) -> (Vec<CandidateRef>, Vec<QuarantinedRecord>) {
        let pool_size = self.governor.ceiling(ResourceClass::Network).max(1);
        let save_interval = self.config.crawler.save_interval.max(1);
        let progress_interval = self.config.crawler.progress_interval.max(1) as u64;
        let found = candidates.len() as u64;

        let mut pending = candidates.into_iter();
        let mut workers: JoinSet<DetailOutcome> = JoinSet::new();
        let mut buffer: Vec<Record> = Vec::new();
        let mut failed = Vec::new();
        let mut quarantined = Vec::new();

        loop {
            while workers.len() < pool_size && !cancel.is_cancelled() {
                let Some(candidate) = pending.next() else {
                    break;
                };
                let worker = self.clone();
                let token = cancel.clone();
                let category = job.template.category.clone();
                workers.spawn(async move { worker.process_candidate(candidate, &category, &token).await });
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };

            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    stats.detail_failures += 1;
                    tracing::error!("Detail worker failed: {}", e);
                    continue;
                }
            };

            stats.requests += outcome.tally.requests;
            stats.cache_hits += outcome.tally.cache_hits;

            match outcome.detail {
                Detail::Record(record, validation) => {
                    stats.records_processed += 1;
                    if validation.is_valid {
                        stats.records_valid += 1;
                        buffer.push(record);
                        if buffer.len() >= save_interval {
                            self.flush(&mut buffer, stats).await;
                        }
                    } else {
                        stats.records_invalid += 1;
                        tracing::warn!(
                            external_id = %record.external_id(),
                            errors = ?validation.errors,
                            "Quarantined invalid record"
                        );
                        quarantined.push(QuarantinedRecord { record, validation });
                    }

                    if stats.records_processed % progress_interval == 0 {
                        let percent = stats.records_processed as f64 / found.max(1) as f64 * 100.0;
                        self.emit_progress(job, job.template.page_to, stats.records_processed, percent);
                    }
                }
                Detail::Failed(reason) => {
                    stats.detail_failures += 1;
                    tracing::warn!(url = %outcome.candidate.url, "Detail page failed: {}", reason);
                    failed.push(outcome.candidate);
                }
                Detail::Cancelled => {
                    tracing::debug!(url = %outcome.candidate.url, "Detail fetch skipped after cancel");
                }
            }
        }

        self.flush(&mut buffer, stats).await;
        if !buffer.is_empty() {
            tracing::error!(job_id = %job.id, "{} valid records were not persisted", buffer.len());
        }

        (failed, quarantined)
    }

    async fn process_candidate(
        &self,
        candidate: CandidateRef,
        category: &str,
        cancel: &CancellationToken,
    ) -> DetailOutcome {
        let mut tally = Tally::default();

        let detail = match self.fetch_page(&candidate.url, cancel, &mut tally).await {
            Err(PageError::Cancelled) => Detail::Cancelled,
            Err(PageError::Fetch(e)) => Detail::Failed(e.to_string()),
            Ok(body) => {
                let status = self.extractor.detect_status(&body);
                match self.extractor.parse_detail(&body, &candidate, status) {
                    Ok(mut fields) => {
                        if fields.category.is_empty() {
                            fields.category = category.to_string();
                        }
                        let record = Record::seal(fields, self.clock.now());
                        let validation = self.validator.validate(&record);
                        tracing::debug!(
                            external_id = %record.external_id(),
                            score = validation.score,
                            "Extracted record"
                        );
                        Detail::Record(record, validation)
                    }
                    Err(e) => Detail::Failed(format!("extraction failed: {}", e)),
                }
            }
        };

        DetailOutcome {
            candidate,
            tally,
            detail,
        }
    }

    /// Fetches a page through the cache and governor, retrying transient failures
    async fn fetch_page(
        &self,
        url: &str,
        cancel: &CancellationToken,
        tally: &mut Tally,
    ) -> Result<String, PageError> {
        if let Some(body) = self.cached(url).await {
            tally.cache_hits += 1;
            return Ok(body);
        }

        let mut attempt: u32 = 0;
        loop {
            let permit = self
                .network_permit(cancel)
                .await
                .ok_or(PageError::Cancelled)?;

            let paced = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = self.governor.try_pace() => true,
            };
            if !paced || cancel.is_cancelled() {
                return Err(PageError::Cancelled);
            }

            tally.requests += 1;
            let result = self.fetcher.fetch(url).await;
            drop(permit);

            match result {
                Ok(body) => {
                    self.governor.record_success();
                    self.store(url, &body).await;
                    return Ok(body);
                }
                Err(e) if e.is_retryable() && attempt < self.config.crawler.max_retries => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    tracing::debug!(
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );
                    if sleep_or_cancel(delay, cancel).await {
                        return Err(PageError::Cancelled);
                    }
                }
                Err(e) => return Err(PageError::Fetch(e)),
            }
        }
    }

    /// Takes a network permit, backing off while the ceiling is reached
    async fn network_permit(&self, cancel: &CancellationToken) -> Option<Permit> {
        let mut refusals: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.governor.acquire(ResourceClass::Network) {
                Ok(permit) => return Some(permit),
                Err(e) => {
                    tracing::trace!("{}, backing off", e);
                    let delay = self.backoff(refusals.min(4));
                    refusals += 1;
                    if sleep_or_cancel(delay, cancel).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn cached(&self, url: &str) -> Option<String> {
        let _permit = match self.governor.acquire(ResourceClass::CacheIo) {
            Ok(permit) => permit,
            Err(e) => {
                tracing::debug!("Skipping cache lookup for {}: {}", url, e);
                return None;
            }
        };
        match self.cache.get(&CacheKey::for_url(url)).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", url, e);
                None
            }
        }
    }

    async fn store(&self, url: &str, body: &str) {
        let _permit = match self.governor.acquire(ResourceClass::CacheIo) {
            Ok(permit) => permit,
            Err(e) => {
                tracing::debug!("Skipping cache write for {}: {}", url, e);
                return;
            }
        };
        if let Err(e) = self.cache.put(&CacheKey::for_url(url), body).await {
            tracing::warn!("Cache write failed for {}: {}", url, e);
        }
    }

    /// Saves buffered records under a persistence permit
    ///
    /// On failure the records stay buffered for the next flush.
    async fn flush(&self, buffer: &mut Vec<Record>, stats: &mut JobStats) {
        if buffer.is_empty() {
            return;
        }

        let mut refusals: u32 = 0;
        let _permit = loop {
            match self.governor.acquire(ResourceClass::Persistence) {
                Ok(permit) => break permit,
                Err(_) => {
                    tokio::time::sleep(self.backoff(refusals.min(4))).await;
                    refusals += 1;
                }
            }
        };

        match self.sink.save_batch(buffer) {
            Ok(saved) => {
                stats.records_saved += saved as u64;
                tracing::debug!(batch = buffer.len(), saved, "Flushed records");
                buffer.clear();
            }
            Err(e) => {
                tracing::warn!("Failed to save {} records: {}", buffer.len(), e);
            }
        }
    }

    /// `base * 2^attempt`, capped, plus jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let crawler = &self.config.crawler;
        let exponential = crawler
            .retry_base_delay()
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(crawler.retry_max_delay());
        let jitter = if crawler.retry_jitter_ms > 0 {
            fastrand::u64(0..=crawler.retry_jitter_ms)
        } else {
            0
        };
        exponential + Duration::from_millis(jitter)
    }

    fn emit_progress(&self, job: &Job, current_page: u32, processed: u64, percent: f64) {
        self.progress.on_progress(ProgressEvent {
            job_id: job.id.clone(),
            current_page,
            total_pages: job.template.total_pages(),
            found: job.found,
            processed,
            progress_percent: percent.min(100.0),
        });
    }

    fn emit_progress_found(&self, job: &Job, current_page: u32, found: u64, percent: f64) {
        self.progress.on_progress(ProgressEvent {
            job_id: job.id.clone(),
            current_page,
            total_pages: job.template.total_pages(),
            found,
            processed: 0,
            progress_percent: percent.min(100.0),
        });
    }

    fn log(&self, level: LogLevel, message: String) {
        self.progress.on_log(LogLine {
            level,
            message,
            timestamp: self.clock.now(),
        });
    }
}

#[async_trait]
impl JobLauncher for Orchestrator {
    async fn launch(&self, template: JobTemplate, cancel: CancellationToken) -> JobOutcome {
        let result = self.run(template, cancel).await;
        JobOutcome {
            status: result.job.status,
            records_processed: result.stats.records_processed,
            errors_count: result.stats.detail_failures + result.stats.pages_failed,
            summary: result.job.summary,
        }
    }
}

/// Sleeps for `delay`; returns true if cancelled first
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

fn summarize(stats: &JobStats) -> String {
    format!(
        "{} candidates, {} processed ({} valid, {} invalid), {} saved, {} failed",
        stats.candidates_found,
        stats.records_processed,
        stats.records_valid,
        stats.records_invalid,
        stats.records_saved,
        stats.detail_failures
    )
}
