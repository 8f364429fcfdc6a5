//! Markdown summary generation
//!
//! This module generates human-readable markdown summaries of finished jobs,
//! including statistics, quarantined records and failed URLs.

use crate::crawler::JobResult;
use crate::output::OutputResult;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Failed URLs listed before the report truncates
const MAX_LISTED_URLS: usize = 50;

/// Writes a markdown summary of a finished job
///
/// # Arguments
///
/// * `result` - The finished job
/// * `output_path` - Path where the markdown file should be written
pub fn generate_markdown_summary(result: &JobResult, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(result);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a finished job as markdown
pub fn format_markdown_summary(result: &JobResult) -> String {
    let job = &result.job;
    let stats = &result.stats;
    let mut md = String::new();

    md.push_str("# Fundscout Crawl Summary\n\n");

    // Job metadata
    md.push_str("## Job Information\n\n");
    md.push_str(&format!("- **Job ID**: {}\n", job.id));
    md.push_str(&format!("- **Category**: {}\n", job.template.category));
    md.push_str(&format!(
        "- **Pages**: {}-{}\n",
        job.template.page_from, job.template.page_to
    ));
    md.push_str(&format!("- **Started**: {}\n", job.started_at.to_rfc3339()));
    if let Some(ended) = job.ended_at {
        md.push_str(&format!("- **Finished**: {}\n", ended.to_rfc3339()));
    }
    md.push_str(&format!(
        "- **Duration**: {:.2} seconds\n",
        stats.duration_ms as f64 / 1000.0
    ));
    md.push_str(&format!("- **Status**: {}\n", job.status));
    if let Some(hash) = &job.config_hash {
        md.push_str(&format!("- **Config Hash**: {}\n", hash));
    }
    md.push('\n');

    md.push_str("## Statistics\n\n");
    md.push_str("| Metric | Count |\n");
    md.push_str("|--------|-------|\n");
    for (label, value) in [
        ("Listing pages processed", stats.pages_processed),
        ("Listing pages failed", stats.pages_failed),
        ("Candidates found", stats.candidates_found),
        ("Candidates skipped", stats.candidates_skipped),
        ("Records processed", stats.records_processed),
        ("Records valid", stats.records_valid),
        ("Records invalid", stats.records_invalid),
        ("Records saved", stats.records_saved),
        ("Detail failures", stats.detail_failures),
        ("HTTP requests", stats.requests),
        ("Cache hits", stats.cache_hits),
    ] {
        md.push_str(&format!("| {} | {} |\n", label, value));
    }
    md.push('\n');
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n\n",
        stats.success_rate()
    ));

    if !result.quarantined.is_empty() {
        md.push_str("## Quarantined Records\n\n");
        md.push_str("| Project | Score | Errors |\n");
        md.push_str("|---------|-------|--------|\n");
        for entry in &result.quarantined {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                entry.record.external_id(),
                entry.validation.score,
                entry.validation.errors.join("; ")
            ));
        }
        md.push('\n');
    }

    if !result.failed.is_empty() {
        md.push_str(&format!("## Failed URLs ({})\n\n", result.failed.len()));
        for candidate in result.failed.iter().take(MAX_LISTED_URLS) {
            md.push_str(&format!("- {}\n", candidate.url));
        }
        if result.failed.len() > MAX_LISTED_URLS {
            md.push_str(&format!(
                "- ... and {} more\n",
                result.failed.len() - MAX_LISTED_URLS
            ));
        }
        md.push('\n');
    }

    md.push_str("---\n\n");
    md.push_str(&format!("*{}*\n", job.summary));

    md
}
