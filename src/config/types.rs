use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for fundscout
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskEntry>,
}

/// Crawl pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Site root that listing paths are appended to
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// Category name to listing path; the page number is appended to the path
    #[serde(default = "default_categories")]
    pub categories: BTreeMap<String, String>,

    /// Detail fetch attempts after the first one
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base delay (milliseconds); attempt `n` waits `base * 2^n`
    #[serde(rename = "retry-base-delay-ms", default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for a single backoff delay (milliseconds)
    #[serde(rename = "retry-max-delay-ms", default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Maximum random jitter added to each backoff (milliseconds)
    #[serde(rename = "retry-jitter-ms", default = "default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,

    /// Valid records buffered before a flush to the sink
    #[serde(rename = "save-interval", default = "default_save_interval")]
    pub save_interval: usize,

    /// Records between progress callbacks
    #[serde(rename = "progress-interval", default = "default_progress_interval")]
    pub progress_interval: usize,

    /// Listing candidates with shorter titles are skipped
    #[serde(rename = "min-title-length", default = "default_min_title_length")]
    pub min_title_length: usize,

    /// Listing candidates whose title contains any of these are skipped
    #[serde(rename = "skip-keywords", default = "default_skip_keywords")]
    pub skip_keywords: Vec<String>,
}

/// Rate, concurrency and breaker limits
#[derive(Debug, Clone, Deserialize)]
pub struct GovernorConfig {
    #[serde(rename = "max-network", default = "default_max_network")]
    pub max_network: usize,

    #[serde(rename = "max-cache-io", default = "default_max_cache_io")]
    pub max_cache_io: usize,

    #[serde(rename = "max-persistence", default = "default_max_persistence")]
    pub max_persistence: usize,

    /// Lower bound of the gap between two paced requests (milliseconds)
    #[serde(
        rename = "min-request-interval-ms",
        default = "default_min_request_interval_ms"
    )]
    pub min_request_interval_ms: u64,

    /// Upper bound of the gap between two paced requests (milliseconds)
    #[serde(
        rename = "max-request-interval-ms",
        default = "default_max_request_interval_ms"
    )]
    pub max_request_interval_ms: u64,

    /// Consecutive failures that trip the breaker
    #[serde(
        rename = "max-consecutive-errors",
        default = "default_max_consecutive_errors"
    )]
    pub max_consecutive_errors: u32,

    /// Seconds before a tripped breaker lets one attempt through
    #[serde(
        rename = "breaker-cooldown-secs",
        default = "default_breaker_cooldown_secs"
    )]
    pub breaker_cooldown_secs: u64,
}

/// Content cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_dir")]
    pub dir: String,

    #[serde(rename = "ttl-hours", default = "default_ttl_hours")]
    pub ttl_hours: u64,
}

/// Task scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(
        rename = "check-interval-secs",
        default = "default_check_interval_secs"
    )]
    pub check_interval_secs: u64,

    #[serde(
        rename = "max-concurrent-tasks",
        default = "default_max_concurrent_tasks"
    )]
    pub max_concurrent_tasks: usize,

    /// Heartbeat age after which the scheduler reports itself unhealthy
    #[serde(
        rename = "heartbeat-stale-secs",
        default = "default_heartbeat_stale_secs"
    )]
    pub heartbeat_stale_secs: u64,

    /// Bounded wait when joining the loop or a finished run
    #[serde(rename = "join-timeout-secs", default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra static headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path to the markdown job summary
    #[serde(rename = "summary-path", default = "default_summary_path")]
    pub summary_path: String,
}

/// Record validation thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    #[serde(rename = "min-title-length", default = "default_min_title_length")]
    pub min_title_length: usize,

    #[serde(rename = "max-title-length", default = "default_max_title_length")]
    pub max_title_length: usize,

    /// Titles containing these produce a warning
    #[serde(rename = "forbidden-keywords", default = "default_skip_keywords")]
    pub forbidden_keywords: Vec<String>,

    /// Allowed gap between observed and computed funding percent
    #[serde(
        rename = "consistency-tolerance",
        default = "default_consistency_tolerance"
    )]
    pub consistency_tolerance: f64,
}

/// A periodic crawl declared in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    pub name: String,

    #[serde(rename = "interval-secs", default = "default_task_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(rename = "page-from", default = "default_page")]
    pub page_from: u32,

    #[serde(rename = "page-to", default = "default_page")]
    pub page_to: u32,

    #[serde(default = "default_true")]
    pub active: bool,
}

impl CrawlerConfig {
    /// Builds the listing URL for `category` and `page`, falling back to `all`
    pub fn listing_url(&self, category: &str, page: u32) -> String {
        let path = self
            .categories
            .get(category)
            .or_else(|| self.categories.get(DEFAULT_CATEGORY))
            .map(String::as_str)
            .unwrap_or(DEFAULT_CATEGORY_PATH);
        format!("{}{}{}", self.base_url.trim_end_matches('/'), path, page)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours as i64)
    }
}

impl SchedulerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn heartbeat_stale(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_stale_secs as i64)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            categories: default_categories(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter_ms: default_retry_jitter_ms(),
            save_interval: default_save_interval(),
            progress_interval: default_progress_interval(),
            min_title_length: default_min_title_length(),
            skip_keywords: default_skip_keywords(),
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_network: default_max_network(),
            max_cache_io: default_max_cache_io(),
            max_persistence: default_max_persistence(),
            min_request_interval_ms: default_min_request_interval_ms(),
            max_request_interval_ms: default_max_request_interval_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            ttl_hours: default_ttl_hours(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            heartbeat_stale_secs: default_heartbeat_stale_secs(),
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            headers: BTreeMap::new(),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_title_length: default_min_title_length(),
            max_title_length: default_max_title_length(),
            forbidden_keywords: default_skip_keywords(),
            consistency_tolerance: default_consistency_tolerance(),
        }
    }
}

/// Category used when a requested one is unknown
pub const DEFAULT_CATEGORY: &str = "all";
const DEFAULT_CATEGORY_PATH: &str = "/all/top_time/all/";

const CATEGORY_SLUGS: &[&str] = &[
    "success",
    "going",
    "preheat",
    "idea",
    "games",
    "publishing",
    "tablegames",
    "toys",
    "cards",
    "technology",
    "film-video",
    "music",
    "activities",
    "design",
    "curio",
    "home",
    "food",
    "comics",
    "charity",
    "animals",
    "wishes",
    "others",
];

fn default_base_url() -> String {
    "https://zhongchou.modian.com".to_string()
}

fn default_categories() -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = CATEGORY_SLUGS
        .iter()
        .map(|slug| (slug.to_string(), format!("/{}/top_time/all/", slug)))
        .collect();
    map.insert(DEFAULT_CATEGORY.to_string(), DEFAULT_CATEGORY_PATH.to_string());
    map
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_retry_jitter_ms() -> u64 {
    1_500
}

fn default_save_interval() -> usize {
    3
}

fn default_progress_interval() -> usize {
    10
}

fn default_min_title_length() -> usize {
    2
}

fn default_max_title_length() -> usize {
    200
}

fn default_skip_keywords() -> Vec<String> {
    vec!["可汗游戏大会".to_string(), "测试项目".to_string()]
}

fn default_consistency_tolerance() -> f64 {
    5.0
}

fn default_max_network() -> usize {
    5
}

fn default_max_cache_io() -> usize {
    10
}

fn default_max_persistence() -> usize {
    2
}

fn default_min_request_interval_ms() -> u64 {
    1_000
}

fn default_max_request_interval_ms() -> u64 {
    3_000
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> String {
    "data/cache".to_string()
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_check_interval_secs() -> u64 {
    5
}

fn default_max_concurrent_tasks() -> usize {
    3
}

fn default_heartbeat_stale_secs() -> u64 {
    30
}

fn default_join_timeout_secs() -> u64 {
    1
}

fn default_user_agent() -> String {
    concat!(
        "Mozilla/5.0 (compatible; fundscout/",
        env!("CARGO_PKG_VERSION"),
        ")"
    )
    .to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_summary_path() -> String {
    "crawl_summary.md".to_string()
}

fn default_task_interval_secs() -> u64 {
    3600
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_page() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_url_known_category() {
        let config = CrawlerConfig::default();
        assert_eq!(
            config.listing_url("games", 3),
            "https://zhongchou.modian.com/games/top_time/all/3"
        );
    }

    #[test]
    fn test_listing_url_unknown_category_falls_back() {
        let config = CrawlerConfig {
            base_url: "http://127.0.0.1:8080/".to_string(),
            ..CrawlerConfig::default()
        };
        assert_eq!(
            config.listing_url("no-such-thing", 1),
            "http://127.0.0.1:8080/all/top_time/all/1"
        );
    }

    #[test]
    fn test_default_categories_cover_all() {
        let categories = default_categories();
        assert_eq!(categories.len(), CATEGORY_SLUGS.len() + 1);
        assert_eq!(categories["film-video"], "/film-video/top_time/all/");
    }
}
