use crate::config::types::{
    CacheConfig, Config, CrawlerConfig, GovernorConfig, HttpConfig, OutputConfig,
    SchedulerConfig, TaskEntry, ValidatorConfig,
};
use crate::model::JobTemplate;
use crate::scheduler::MIN_INTERVAL_SECS;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_governor_config(&config.governor)?;
    validate_cache_config(&config.cache)?;
    validate_scheduler_config(&config.scheduler)?;
    validate_http_config(&config.http)?;
    validate_output_config(&config.output)?;
    validate_validator_config(&config.validator)?;
    validate_tasks(&config.tasks, &config.crawler)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    for (name, path) in &config.categories {
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidCategory(format!(
                "path for category '{}' must start with '/', got '{}'",
                name, path
            )));
        }
    }

    if config.save_interval < 1 {
        return Err(ConfigError::Validation(
            "save-interval must be >= 1".to_string(),
        ));
    }

    if config.progress_interval < 1 {
        return Err(ConfigError::Validation(
            "progress-interval must be >= 1".to_string(),
        ));
    }

    if config.retry_base_delay_ms > config.retry_max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry-base-delay-ms ({}) cannot exceed retry-max-delay-ms ({})",
            config.retry_base_delay_ms, config.retry_max_delay_ms
        )));
    }

    Ok(())
}

fn validate_governor_config(config: &GovernorConfig) -> Result<(), ConfigError> {
    for (key, value) in [
        ("max-network", config.max_network),
        ("max-cache-io", config.max_cache_io),
        ("max-persistence", config.max_persistence),
    ] {
        if !(1..=100).contains(&value) {
            return Err(ConfigError::Validation(format!(
                "{} must be between 1 and 100, got {}",
                key, value
            )));
        }
    }

    if config.min_request_interval_ms > config.max_request_interval_ms {
        return Err(ConfigError::Validation(format!(
            "min-request-interval-ms ({}) cannot exceed max-request-interval-ms ({})",
            config.min_request_interval_ms, config.max_request_interval_ms
        )));
    }

    if config.max_consecutive_errors < 1 {
        return Err(ConfigError::Validation(
            "max-consecutive-errors must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.enabled && config.dir.is_empty() {
        return Err(ConfigError::Validation(
            "cache dir cannot be empty when the cache is enabled".to_string(),
        ));
    }

    if config.ttl_hours < 1 {
        return Err(ConfigError::Validation(format!(
            "ttl-hours must be >= 1, got {}",
            config.ttl_hours
        )));
    }

    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.check_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "check-interval-secs must be >= 1".to_string(),
        ));
    }

    if config.max_concurrent_tasks < 1 {
        return Err(ConfigError::Validation(
            "max-concurrent-tasks must be >= 1".to_string(),
        ));
    }

    if config.heartbeat_stale_secs <= config.check_interval_secs {
        return Err(ConfigError::Validation(format!(
            "heartbeat-stale-secs ({}) must be greater than check-interval-secs ({})",
            config.heartbeat_stale_secs, config.check_interval_secs
        )));
    }

    Ok(())
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    for name in config.headers.keys() {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ConfigError::Validation(format!(
                "header name '{}' must be ASCII alphanumerics and hyphens",
                name
            )));
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.summary_path.is_empty() {
        return Err(ConfigError::Validation(
            "summary_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_validator_config(config: &ValidatorConfig) -> Result<(), ConfigError> {
    if config.min_title_length > config.max_title_length {
        return Err(ConfigError::Validation(format!(
            "min-title-length ({}) cannot exceed max-title-length ({})",
            config.min_title_length, config.max_title_length
        )));
    }

    if !config.consistency_tolerance.is_finite() || config.consistency_tolerance < 0.0 {
        return Err(ConfigError::Validation(format!(
            "consistency-tolerance must be a non-negative number, got {}",
            config.consistency_tolerance
        )));
    }

    Ok(())
}

/// Validates `[[task]]` entries
fn validate_tasks(tasks: &[TaskEntry], crawler: &CrawlerConfig) -> Result<(), ConfigError> {
    for task in tasks {
        if task.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "task name cannot be empty".to_string(),
            ));
        }

        if task.interval_secs < MIN_INTERVAL_SECS {
            return Err(ConfigError::Validation(format!(
                "task '{}' interval-secs must be >= {}, got {}",
                task.name, MIN_INTERVAL_SECS, task.interval_secs
            )));
        }

        validate_page_range(&format!("task '{}'", task.name), task.page_from, task.page_to)?;

        if !crawler.categories.contains_key(&task.category) {
            return Err(ConfigError::InvalidCategory(format!(
                "task '{}' uses unknown category '{}'",
                task.name, task.category
            )));
        }
    }

    Ok(())
}

/// Checks a job template given on the command line
pub fn validate_job_template(template: &JobTemplate) -> Result<(), ConfigError> {
    validate_page_range("crawl", template.page_from, template.page_to)
}

fn validate_page_range(label: &str, from: u32, to: u32) -> Result<(), ConfigError> {
    if from < 1 || to < from {
        return Err(ConfigError::Validation(format!(
            "{} page range {}..={} is invalid",
            label, from, to
        )));
    }
    Ok(())
}
