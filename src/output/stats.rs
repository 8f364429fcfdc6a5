//! Statistics view over the persisted store
//!
//! This module renders store aggregates and recent jobs for the `stats` command.

use crate::model::Job;
use crate::storage::{CountRow, SqliteStorage, StorageResult, StoreStats};

/// Store aggregates plus the most recent jobs
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub store: StoreStats,
    pub recent_jobs: Vec<Job>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The database to query
/// * `recent` - How many recent jobs to include
pub fn load_statistics(storage: &SqliteStorage, recent: usize) -> StorageResult<CrawlStatistics> {
    Ok(CrawlStatistics {
        store: storage.stats()?,
        recent_jobs: storage.recent_jobs(recent)?,
    })
}

/// Formats statistics as plain text
pub fn format_statistics(stats: &CrawlStatistics) -> String {
    let store = &stats.store;
    let mut out = String::new();

    out.push_str("=== Fundscout Statistics ===\n\n");

    out.push_str("Overview:\n");
    out.push_str(&format!("  Projects: {}\n", store.distinct_projects));
    out.push_str(&format!("  Snapshots stored: {}\n", store.snapshots));
    out.push_str(&format!("  Total raised: {:.2}\n", store.total_raised));
    out.push_str(&format!("  Total backers: {}\n\n", store.total_backers));

    push_counts(&mut out, "Projects by Status", &store.by_status, store.distinct_projects);
    push_counts(&mut out, "Top Categories", &store.by_category, store.distinct_projects);

    let total_jobs: u64 = store.jobs_by_status.iter().map(|row| row.count).sum();
    push_counts(&mut out, "Jobs by Status", &store.jobs_by_status, total_jobs);

    if !stats.recent_jobs.is_empty() {
        out.push_str("Recent Jobs:\n");
        for job in &stats.recent_jobs {
            out.push_str(&format!(
                "  {} {} [{} {}-{}] found {}, processed {}, failed {}\n",
                job.started_at.format("%Y-%m-%d %H:%M:%S"),
                job.status,
                job.template.category,
                job.template.page_from,
                job.template.page_to,
                job.found,
                job.processed,
                job.failed
            ));
        }
    }

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &CrawlStatistics) {
    print!("{}", format_statistics(stats));
}

fn push_counts(out: &mut String, title: &str, rows: &[CountRow], total: u64) {
    if rows.is_empty() {
        return;
    }
    out.push_str(&format!("{}:\n", title));
    for row in rows {
        let percentage = if total > 0 {
            row.count as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        out.push_str(&format!("  {}: {} ({:.1}%)\n", row.key, row.count, percentage));
    }
    out.push('\n');
}
