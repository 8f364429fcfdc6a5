//! Fundscout main entry point
//!
//! This is the command-line interface for the fundscout crowdfunding crawler.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fundscout::clock::{SharedClock, SystemClock};
use fundscout::config::{load_config_with_hash, validate_job_template, Config};
use fundscout::crawler::{build_orchestrator, open_cache, ChannelProgress, LogLevel, ProgressMessage};
use fundscout::model::{JobStatus, JobTemplate};
use fundscout::output::{
    export_records, generate_markdown_summary, load_statistics, print_statistics, ExportFormat,
};
use fundscout::scheduler::TaskScheduler;
use fundscout::storage::{open_storage, SqliteStorage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Fundscout: a scheduled crowdfunding crawler
///
/// Fundscout walks crowdfunding category listings, extracts and validates each
/// project's detail page, and stores deduplicated snapshots in SQLite.
#[derive(Parser, Debug)]
#[command(name = "fundscout")]
#[command(version)]
#[command(about = "A scheduled crowdfunding crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "fundscout.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single crawl job
    Crawl {
        /// Category to crawl
        #[arg(long, default_value = "all")]
        category: String,

        /// First listing page
        #[arg(long, default_value_t = 1)]
        from: u32,

        /// Last listing page (inclusive)
        #[arg(long, default_value_t = 1)]
        to: u32,

        /// Retry failed detail pages once after the job
        #[arg(long)]
        retry_failed: bool,

        /// Validate config and show what would be crawled without crawling
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the configured tasks on their intervals until interrupted
    Schedule,

    /// Show statistics from the database and exit
    Stats {
        /// Number of recent jobs to list
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },

    /// Export the latest snapshot of every stored project
    Export {
        /// Output format: json or csv
        #[arg(long, default_value = "json")]
        format: ExportFormat,

        /// Destination file (defaults to a timestamped name in the working directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only export projects in this category
        #[arg(long)]
        category: Option<String>,
    },

    /// Remove every cached page
    ClearCache,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);
    let config = Arc::new(config);

    match cli.command {
        Command::Crawl {
            category,
            from,
            to,
            retry_failed,
            dry_run,
        } => {
            let template = JobTemplate::new(from, to, category);
            validate_job_template(&template)?;
            if dry_run {
                handle_dry_run(&config, &template);
                Ok(())
            } else {
                handle_crawl(config, config_hash, template, retry_failed).await
            }
        }
        Command::Schedule => handle_schedule(config, config_hash).await,
        Command::Stats { recent } => handle_stats(&config, recent),
        Command::Export {
            format,
            output,
            category,
        } => handle_export(&config, format, output, category.as_deref()),
        Command::ClearCache => handle_clear_cache(&config).await,
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("fundscout=info,warn"),
            1 => EnvFilter::new("fundscout=debug,info"),
            2 => EnvFilter::new("fundscout=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStorage>> {
    let path = Path::new(&config.output.database_path);
    let storage = open_storage(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(storage))
}

/// Cancels `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            token.cancel();
        }
    });
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, template: &JobTemplate) {
    println!("=== Fundscout Dry Run ===\n");

    println!("Job:");
    println!("  Category: {}", template.category);
    println!("  Pages: {}-{}", template.page_from, template.page_to);
    for page in template.pages().take(3) {
        println!("  - {}", config.crawler.listing_url(&template.category, page));
    }
    if template.total_pages() > 3 {
        println!("  ... {} pages in total", template.total_pages());
    }

    println!("\nGovernor:");
    println!("  Network ceiling: {}", config.governor.max_network);
    println!(
        "  Request interval: {}-{}ms",
        config.governor.min_request_interval_ms, config.governor.max_request_interval_ms
    );
    println!(
        "  Breaker threshold: {} consecutive errors",
        config.governor.max_consecutive_errors
    );

    println!("\nCache:");
    if config.cache.enabled {
        println!("  {} (ttl {}h)", config.cache.dir, config.cache.ttl_hours);
    } else {
        println!("  disabled");
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Summary: {}", config.output.summary_path);

    println!("\nScheduled Tasks ({}):", config.tasks.len());
    for task in &config.tasks {
        println!(
            "  - {} every {}s: {} pages {}-{}{}",
            task.name,
            task.interval_secs,
            task.category,
            task.page_from,
            task.page_to,
            if task.active { "" } else { " (inactive)" }
        );
    }

    println!("\nConfiguration is valid. Remove --dry-run to start crawling.");
}

/// Runs one crawl job and writes its summary
async fn handle_crawl(
    config: Arc<Config>,
    config_hash: String,
    template: JobTemplate,
    retry_failed: bool,
) -> anyhow::Result<()> {
    if !config.crawler.categories.contains_key(&template.category) {
        tracing::warn!(
            "Unknown category '{}', listing pages fall back to 'all'",
            template.category
        );
    }

    let storage = open_store(&config)?;
    let clock: SharedClock = Arc::new(SystemClock);
    let (progress, mut updates) = ChannelProgress::new(256);
    let orchestrator = build_orchestrator(config.clone(), storage, clock)
        .await?
        .with_config_hash(config_hash)
        .with_progress(Arc::new(progress));

    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update {
                ProgressMessage::Progress(event) => tracing::debug!(
                    "Progress: page {}/{}, {} found, {} processed ({:.1}%)",
                    event.current_page,
                    event.total_pages,
                    event.found,
                    event.processed,
                    event.progress_percent
                ),
                ProgressMessage::Log(line) if line.level == LogLevel::Error => {
                    tracing::error!("{}", line.message)
                }
                ProgressMessage::Log(_) => {}
            }
        }
    });

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let mut result = orchestrator.run(template, cancel.clone()).await;
    if retry_failed && !result.failed.is_empty() && !cancel.is_cancelled() {
        tracing::info!("Retrying {} failed detail pages", result.failed.len());
        let retry = orchestrator.retry_failed(&result, cancel).await;
        if let Some(retry) = retry {
            result = retry;
        }
    }

    let summary_path = Path::new(&config.output.summary_path);
    match generate_markdown_summary(&result, summary_path) {
        Ok(()) => tracing::info!("Summary written to {}", summary_path.display()),
        Err(e) => tracing::warn!("Failed to write summary: {}", e),
    }

    println!("Job {} {}: {}", result.job.id, result.job.status, result.job.summary);
    if result.job.status == JobStatus::Error {
        bail!("crawl job failed: {}", result.job.summary);
    }
    Ok(())
}

/// Runs configured tasks until Ctrl-C
async fn handle_schedule(config: Arc<Config>, config_hash: String) -> anyhow::Result<()> {
    let storage = open_store(&config)?;
    let clock: SharedClock = Arc::new(SystemClock);
    let orchestrator = build_orchestrator(config.clone(), storage.clone(), clock.clone())
        .await?
        .with_config_hash(config_hash);

    let scheduler = TaskScheduler::new(
        config.scheduler.clone(),
        Arc::new(orchestrator),
        Some(storage),
        clock,
    );
    scheduler.start()?;

    let existing: Vec<String> = scheduler.list_tasks().into_iter().map(|t| t.name).collect();
    for entry in &config.tasks {
        if existing.contains(&entry.name) {
            continue;
        }
        let template = JobTemplate::new(entry.page_from, entry.page_to, entry.category.clone());
        let id = scheduler.add_task(&entry.name, template, entry.interval_secs)?;
        if !entry.active {
            scheduler.toggle(&id)?;
        }
    }

    let health = scheduler.health();
    println!(
        "Scheduler running with {} tasks ({} active). Press Ctrl-C to stop.",
        health.total_tasks, health.active_tasks
    );

    let mut monitor = tokio::time::interval(Duration::from_secs(
        config.scheduler.heartbeat_stale_secs.max(1),
    ));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = monitor.tick() => {
                let health = scheduler.health();
                if health.healthy {
                    tracing::debug!(
                        "Scheduler healthy: {} running, {} active tasks",
                        health.running_tasks,
                        health.active_tasks
                    );
                } else {
                    tracing::warn!("Scheduler unhealthy (last heartbeat {:?})", health.last_heartbeat);
                }
            }
        }
    }

    tracing::info!("Stopping scheduler");
    scheduler.stop().await;
    Ok(())
}

/// Handles the stats subcommand: shows statistics from the database
fn handle_stats(config: &Config, recent: usize) -> anyhow::Result<()> {
    let storage = open_store(config)?;
    let stats = load_statistics(&storage, recent)?;
    print_statistics(&stats);
    Ok(())
}

/// Handles the export subcommand: writes the latest project snapshots to a file
fn handle_export(
    config: &Config,
    format: ExportFormat,
    output: Option<PathBuf>,
    category: Option<&str>,
) -> anyhow::Result<()> {
    let storage = open_store(config)?;
    let records = storage.latest_records(category)?;

    let now = chrono::Utc::now();
    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "fundscout_projects_{}.{}",
            now.format("%Y%m%d_%H%M%S"),
            format.extension()
        ))
    });

    let written = export_records(&records, &path, format, now)
        .with_context(|| format!("Failed to export to {}", path.display()))?;
    tracing::info!(projects = written, format = %format, "export finished");
    println!("Exported {} projects to {}", written, path.display());
    Ok(())
}

/// Handles the clear-cache subcommand
async fn handle_clear_cache(config: &Config) -> anyhow::Result<()> {
    if !config.cache.enabled {
        println!("Cache is disabled; nothing to clear.");
        return Ok(());
    }
    let cache = open_cache(config, Arc::new(SystemClock)).await?;
    let before = cache.stats().await?;
    let removed = cache.clear().await?;
    println!(
        "Removed {} cached pages ({} bytes) from {}",
        removed, before.total_bytes, config.cache.dir
    );
    Ok(())
}
